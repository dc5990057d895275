//! `warden-auth`: the permission evaluator.
//!
//! Pure policy: `check(caller, action, scope)` with no IO and no knowledge of
//! whether the target resource exists. Decoupled from HTTP and storage.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod scope;

pub use authorize::{
    AuthorizationExplanation, AuthzError, PermissionEvaluator, RoleBasedEvaluator, check, explain,
};
pub use claims::{AccessClaims, TokenValidationError, validate_claims};
pub use permissions::Permission;
pub use principal::{Caller, Membership, PrincipalId};
pub use roles::{Role, default_role_permissions};
pub use scope::ResourceScope;

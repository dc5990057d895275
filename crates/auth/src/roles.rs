use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Permission;

/// Role identifier used for RBAC.
///
/// Roles are opaque strings; [`default_role_permissions`] maps the
/// well-known ones to permissions. Unknown roles grant nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const IAM_OWNER: Role = Role(Cow::Borrowed("IAM_OWNER"));
    pub const IAM_LOGIN_CLIENT: Role = Role(Cow::Borrowed("IAM_LOGIN_CLIENT"));
    pub const ORG_OWNER: Role = Role(Cow::Borrowed("ORG_OWNER"));
    pub const ORG_USER_MANAGER: Role = Role(Cow::Borrowed("ORG_USER_MANAGER"));
    pub const PROJECT_OWNER: Role = Role(Cow::Borrowed("PROJECT_OWNER"));
    pub const PROJECT_GRANT_OWNER: Role = Role(Cow::Borrowed("PROJECT_GRANT_OWNER"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Default role-to-permission mapping.
///
/// The scope a role applies to comes from the membership holding it, not from
/// the role itself: `ORG_OWNER` on org A grants nothing on org B.
pub fn default_role_permissions(role: &Role) -> Vec<Permission> {
    match role.as_str() {
        "IAM_OWNER" => vec![Permission::WILDCARD],
        "ORG_OWNER" => vec![
            Permission::ORG_READ,
            Permission::POLICY_READ,
            Permission::USER_GRANT_READ,
            Permission::USER_GRANT_WRITE,
            Permission::USER_GRANT_DELETE,
        ],
        "ORG_USER_MANAGER" | "PROJECT_OWNER" | "PROJECT_GRANT_OWNER" => vec![
            Permission::USER_GRANT_READ,
            Permission::USER_GRANT_WRITE,
            Permission::USER_GRANT_DELETE,
        ],
        "IAM_LOGIN_CLIENT" => vec![Permission::USER_READ],
        _ => Vec::new(),
    }
}

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use warden_core::InstanceId;

use crate::{Caller, Permission, PrincipalId, ResourceScope, Role, default_role_permissions};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    /// Deliberately carries only the action: a denial never reveals whether
    /// the targeted resource exists.
    #[error("permission denied: '{0}'")]
    PermissionDenied(String),
}

/// Policy seam used by the application services.
pub trait PermissionEvaluator: Send + Sync {
    fn check(
        &self,
        caller: &Caller,
        action: &Permission,
        scope: &ResourceScope,
    ) -> Result<(), AuthzError>;

    fn explain(
        &self,
        caller: &Caller,
        action: &Permission,
        scope: &ResourceScope,
    ) -> AuthorizationExplanation;
}

/// Evaluates memberships through a role → permission mapping.
#[derive(Debug, Clone, Copy)]
pub struct RoleBasedEvaluator {
    role_permissions: fn(&Role) -> Vec<Permission>,
}

impl RoleBasedEvaluator {
    pub fn new(role_permissions: fn(&Role) -> Vec<Permission>) -> Self {
        Self { role_permissions }
    }
}

impl Default for RoleBasedEvaluator {
    fn default() -> Self {
        Self::new(default_role_permissions)
    }
}

impl PermissionEvaluator for RoleBasedEvaluator {
    fn check(
        &self,
        caller: &Caller,
        action: &Permission,
        scope: &ResourceScope,
    ) -> Result<(), AuthzError> {
        let allowed = caller
            .effective_memberships()
            .filter(|m| m.scope.covers(scope))
            .flat_map(|m| m.roles.iter())
            .any(|role| {
                (self.role_permissions)(role)
                    .iter()
                    .any(|p| p.satisfies(action))
            });

        if allowed {
            Ok(())
        } else {
            Err(AuthzError::PermissionDenied(action.as_str().to_string()))
        }
    }

    fn explain(
        &self,
        caller: &Caller,
        action: &Permission,
        scope: &ResourceScope,
    ) -> AuthorizationExplanation {
        let mut effective: BTreeSet<String> = BTreeSet::new();
        let mut granting_roles: Vec<String> = Vec::new();
        let mut ignored_memberships = 0usize;
        let mut applicable_memberships = 0usize;

        for membership in &caller.memberships {
            if membership.instance_id != caller.instance_id || !membership.scope.covers(scope) {
                ignored_memberships += 1;
                continue;
            }
            applicable_memberships += 1;
            for role in &membership.roles {
                let perms = (self.role_permissions)(role);
                if perms.iter().any(|p| p.satisfies(action)) {
                    granting_roles.push(role.as_str().to_string());
                }
                effective.extend(perms.into_iter().map(|p| p.as_str().to_string()));
            }
        }

        let granted = !granting_roles.is_empty();
        let reason = if granted {
            format!(
                "role(s) {:?} grant '{}' on {}",
                granting_roles,
                action.as_str(),
                scope
            )
        } else if applicable_memberships == 0 {
            format!("no membership covers {scope}")
        } else {
            format!(
                "memberships covering {} do not grant '{}'",
                scope,
                action.as_str()
            )
        };

        AuthorizationExplanation {
            principal_id: caller.principal_id,
            instance_id: caller.instance_id,
            required_permission: action.as_str().to_string(),
            scope: *scope,
            granted,
            reason,
            granting_roles,
            effective_permissions: effective.into_iter().collect(),
            ignored_memberships,
        }
    }
}

/// Detailed explanation of an authorization decision (diagnostics only,
/// never returned to the denied caller).
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub principal_id: PrincipalId,
    pub instance_id: InstanceId,
    pub required_permission: String,
    pub scope: ResourceScope,
    pub granted: bool,
    pub reason: String,
    pub granting_roles: Vec<String>,
    /// Permissions held through memberships covering the scope.
    pub effective_permissions: Vec<String>,
    /// Memberships skipped because of a foreign instance or a non-covering scope.
    pub ignored_memberships: usize,
}

/// Check with the default role mapping.
///
/// - No IO
/// - No panics
/// - No knowledge of whether the target exists
pub fn check(caller: &Caller, action: &Permission, scope: &ResourceScope) -> Result<(), AuthzError> {
    RoleBasedEvaluator::default().check(caller, action, scope)
}

pub fn explain(
    caller: &Caller,
    action: &Permission,
    scope: &ResourceScope,
) -> AuthorizationExplanation {
    RoleBasedEvaluator::default().explain(caller, action, scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{OrgId, ProjectGrantId, ProjectId};

    fn caller_in(org: OrgId) -> Caller {
        Caller::new(PrincipalId::new(), InstanceId::new(), org)
    }

    #[test]
    fn iam_owner_is_allowed_everywhere_in_its_instance() {
        let org = OrgId::new();
        let caller = caller_in(org).with_membership(ResourceScope::Instance, vec![Role::IAM_OWNER]);

        assert!(check(&caller, &Permission::IAM_POLICY_WRITE, &ResourceScope::Instance).is_ok());
        assert!(
            check(
                &caller,
                &Permission::USER_GRANT_DELETE,
                &ResourceScope::Organization { org: OrgId::new() }
            )
            .is_ok()
        );
    }

    #[test]
    fn org_owner_cannot_touch_instance_settings() {
        let org = OrgId::new();
        let caller = caller_in(org)
            .with_membership(ResourceScope::Organization { org }, vec![Role::ORG_OWNER]);

        assert_eq!(
            check(&caller, &Permission::IAM_POLICY_READ, &ResourceScope::Instance),
            Err(AuthzError::PermissionDenied("iam.policy.read".into()))
        );
        assert!(
            check(&caller, &Permission::POLICY_READ, &ResourceScope::Organization { org }).is_ok()
        );
    }

    #[test]
    fn org_owner_is_bounded_to_its_org() {
        let org = OrgId::new();
        let caller = caller_in(org)
            .with_membership(ResourceScope::Organization { org }, vec![Role::ORG_OWNER]);

        let foreign = ResourceScope::Project { org: OrgId::new(), project: ProjectId::new() };
        assert!(check(&caller, &Permission::USER_GRANT_WRITE, &foreign).is_err());

        let own = ResourceScope::Project { org, project: ProjectId::new() };
        assert!(check(&caller, &Permission::USER_GRANT_WRITE, &own).is_ok());
    }

    #[test]
    fn login_client_cannot_read_policies() {
        let org = OrgId::new();
        let caller = caller_in(org).with_membership(ResourceScope::Instance, vec![Role::IAM_LOGIN_CLIENT]);

        assert!(check(&caller, &Permission::POLICY_READ, &ResourceScope::Organization { org }).is_err());
    }

    #[test]
    fn project_grant_owner_only_covers_its_grant() {
        let org = OrgId::new();
        let project = ProjectId::new();
        let grant = ProjectGrantId::new();
        let scope = ResourceScope::ProjectGrant { org, project, grant };
        let caller = caller_in(org).with_membership(scope, vec![Role::PROJECT_GRANT_OWNER]);

        assert!(check(&caller, &Permission::USER_GRANT_WRITE, &scope).is_ok());
        assert!(
            check(
                &caller,
                &Permission::USER_GRANT_WRITE,
                &ResourceScope::Project { org, project }
            )
            .is_err()
        );
    }

    #[test]
    fn memberships_from_other_instances_are_ignored() {
        let org = OrgId::new();
        let mut caller = caller_in(org);
        caller.memberships.push(crate::Membership {
            instance_id: InstanceId::new(),
            scope: ResourceScope::Instance,
            roles: vec![Role::IAM_OWNER],
        });

        assert!(check(&caller, &Permission::IAM_POLICY_READ, &ResourceScope::Instance).is_err());

        let explanation = explain(&caller, &Permission::IAM_POLICY_READ, &ResourceScope::Instance);
        assert!(!explanation.granted);
        assert_eq!(explanation.ignored_memberships, 1);
    }

    #[test]
    fn explanation_names_granting_role() {
        let org = OrgId::new();
        let caller = caller_in(org)
            .with_membership(ResourceScope::Organization { org }, vec![Role::new("VIEWER"), Role::ORG_USER_MANAGER]);

        let explanation = explain(
            &caller,
            &Permission::USER_GRANT_READ,
            &ResourceScope::Organization { org },
        );
        assert!(explanation.granted);
        assert_eq!(explanation.granting_roles, vec!["ORG_USER_MANAGER".to_string()]);
        assert!(explanation.effective_permissions.contains(&"user.grant.delete".to_string()));
    }

    #[test]
    fn custom_mapping_is_honoured() {
        fn only_reads(role: &Role) -> Vec<Permission> {
            match role.as_str() {
                "AUDITOR" => vec![Permission::USER_GRANT_READ],
                _ => Vec::new(),
            }
        }

        let org = OrgId::new();
        let evaluator = RoleBasedEvaluator::new(only_reads);
        let caller = caller_in(org)
            .with_membership(ResourceScope::Organization { org }, vec![Role::new("AUDITOR")]);
        let scope = ResourceScope::Organization { org };

        assert!(evaluator.check(&caller, &Permission::USER_GRANT_READ, &scope).is_ok());
        assert!(evaluator.check(&caller, &Permission::USER_GRANT_WRITE, &scope).is_err());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn any_role() -> impl Strategy<Value = Role> {
            prop_oneof![
                Just(Role::IAM_LOGIN_CLIENT),
                Just(Role::ORG_OWNER),
                Just(Role::ORG_USER_MANAGER),
                Just(Role::PROJECT_OWNER),
                Just(Role::PROJECT_GRANT_OWNER),
                "[A-Z_]{1,12}".prop_map(Role::new),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

            /// Only the wildcard role may read or write instance settings.
            #[test]
            fn non_owner_roles_never_reach_instance_policy(
                roles in proptest::collection::vec(any_role(), 0..6),
            ) {
                prop_assume!(!roles.iter().any(|r| r == &Role::IAM_OWNER));
                let org = OrgId::new();
                let caller = caller_in(org).with_membership(ResourceScope::Instance, roles);

                prop_assert!(check(&caller, &Permission::IAM_POLICY_WRITE, &ResourceScope::Instance).is_err());
                prop_assert!(check(&caller, &Permission::IAM_POLICY_READ, &ResourceScope::Instance).is_err());
            }

            /// `check` and `explain` never disagree.
            #[test]
            fn check_agrees_with_explain(roles in proptest::collection::vec(any_role(), 0..4)) {
                let org = OrgId::new();
                let caller = caller_in(org).with_membership(ResourceScope::Organization { org }, roles);
                let scope = ResourceScope::Organization { org };

                for action in [Permission::USER_GRANT_WRITE, Permission::POLICY_READ, Permission::USER_READ] {
                    let allowed = check(&caller, &action, &scope).is_ok();
                    prop_assert_eq!(allowed, explain(&caller, &action, &scope).granted);
                }
            }
        }
    }
}

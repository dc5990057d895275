use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission (action) identifier.
///
/// Permissions are opaque strings (e.g. "user.grant.write"). The wildcard
/// `"*"` is only ever handed out by the instance owner role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const WILDCARD: Permission = Permission(Cow::Borrowed("*"));

    /// Read instance-level security settings.
    pub const IAM_POLICY_READ: Permission = Permission(Cow::Borrowed("iam.policy.read"));
    /// Write instance-level security settings.
    pub const IAM_POLICY_WRITE: Permission = Permission(Cow::Borrowed("iam.policy.write"));
    /// Read login policy derived data (active identity providers).
    pub const POLICY_READ: Permission = Permission(Cow::Borrowed("policy.read"));

    pub const USER_GRANT_READ: Permission = Permission(Cow::Borrowed("user.grant.read"));
    pub const USER_GRANT_WRITE: Permission = Permission(Cow::Borrowed("user.grant.write"));
    pub const USER_GRANT_DELETE: Permission = Permission(Cow::Borrowed("user.grant.delete"));

    pub const ORG_READ: Permission = Permission(Cow::Borrowed("org.read"));
    pub const USER_READ: Permission = Permission(Cow::Borrowed("user.read"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// Whether holding `self` satisfies a requirement for `required`.
    pub fn satisfies(&self, required: &Permission) -> bool {
        self.is_wildcard() || self == required
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

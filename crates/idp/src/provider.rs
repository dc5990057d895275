use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdpId(Uuid);

impl IdpId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for IdpId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for IdpId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdpType {
    Oidc,
    Jwt,
    Ldap,
    #[serde(rename = "oauth")]
    OAuth,
    Saml,
    AzureAd,
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "github_enterprise")]
    GitHubEnterprise,
    #[serde(rename = "gitlab")]
    GitLab,
    #[serde(rename = "gitlab_self_hosted")]
    GitLabSelfHosted,
    Google,
    Apple,
}

/// How an external identity is matched to an existing user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoLinkingOption {
    #[default]
    Unspecified,
    Username,
    Email,
}

impl AutoLinkingOption {
    pub fn is_enabled(self) -> bool {
        self != AutoLinkingOption::Unspecified
    }
}

/// Options chosen when a provider is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOptions {
    pub linking_allowed: bool,
    pub creation_allowed: bool,
    pub auto_creation: bool,
    pub auto_linking: AutoLinkingOption,
}

impl Default for ProviderOptions {
    /// Everything allowed, auto-linking by username.
    fn default() -> Self {
        Self {
            linking_allowed: true,
            creation_allowed: true,
            auto_creation: true,
            auto_linking: AutoLinkingOption::Username,
        }
    }
}

/// Login-facing view of a configured provider.
///
/// `is_active` reflects whether the provider is attached to the login policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    pub id: IdpId,
    pub name: String,
    #[serde(rename = "type")]
    pub idp_type: IdpType,
    pub is_active: bool,
    pub linking_allowed: bool,
    pub creation_allowed: bool,
    pub auto_creation: bool,
    pub auto_linking: bool,
}

impl IdentityProviderConfig {
    /// A freshly configured, not yet attached provider.
    pub fn configured(id: IdpId, name: impl Into<String>, idp_type: IdpType, options: ProviderOptions) -> Self {
        Self {
            id,
            name: name.into(),
            idp_type,
            is_active: false,
            linking_allowed: options.linking_allowed,
            creation_allowed: options.creation_allowed,
            auto_creation: options.auto_creation,
            auto_linking: options.auto_linking.is_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_linking_derives_from_option() {
        let mut options = ProviderOptions::default();
        assert!(IdentityProviderConfig::configured(IdpId::new(), "a", IdpType::OAuth, options).auto_linking);

        options.auto_linking = AutoLinkingOption::Email;
        assert!(IdentityProviderConfig::configured(IdpId::new(), "a", IdpType::OAuth, options).auto_linking);

        options.auto_linking = AutoLinkingOption::Unspecified;
        let config = IdentityProviderConfig::configured(IdpId::new(), "a", IdpType::OAuth, options);
        assert!(!config.auto_linking);
        assert!(!config.is_active);
    }

    #[test]
    fn type_serializes_to_stable_names() {
        assert_eq!(serde_json::to_value(IdpType::GitLabSelfHosted).unwrap(), "gitlab_self_hosted");
        assert_eq!(serde_json::to_value(IdpType::AzureAd).unwrap(), "azure_ad");
        assert_eq!(serde_json::to_value(IdpType::OAuth).unwrap(), "oauth");
    }
}

use serde::{Deserialize, Serialize};

use crate::IdentityProviderConfig;

/// Optional flags a provider must have set to be returned.
///
/// `None` and `Some(false)` both impose no restriction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpActivationPredicates {
    #[serde(default)]
    pub linking_allowed: Option<bool>,
    #[serde(default)]
    pub creation_allowed: Option<bool>,
    #[serde(default)]
    pub auto_creation: Option<bool>,
    #[serde(default)]
    pub auto_linking: Option<bool>,
}

impl IdpActivationPredicates {
    pub fn matches(&self, config: &IdentityProviderConfig) -> bool {
        fn require(predicate: Option<bool>, flag: bool) -> bool {
            predicate != Some(true) || flag
        }

        config.is_active
            && require(self.linking_allowed, config.linking_allowed)
            && require(self.creation_allowed, config.creation_allowed)
            && require(self.auto_creation, config.auto_creation)
            && require(self.auto_linking, config.auto_linking)
    }
}

/// Active providers matching every supplied predicate, in input order.
pub fn filter_active<'a, I>(configs: I, predicates: &IdpActivationPredicates) -> Vec<IdentityProviderConfig>
where
    I: IntoIterator<Item = &'a IdentityProviderConfig>,
{
    configs
        .into_iter()
        .filter(|c| predicates.matches(c))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AutoLinkingOption, IdpId, IdpType, ProviderOptions};

    fn provider(name: &str, active: bool, options: ProviderOptions) -> IdentityProviderConfig {
        let mut config = IdentityProviderConfig::configured(IdpId::new(), name, IdpType::OAuth, options);
        config.is_active = active;
        config
    }

    /// One fully enabled provider, one per disabled flag, plus an unattached one.
    fn login_policy_providers() -> Vec<IdentityProviderConfig> {
        let all = ProviderOptions::default();
        vec![
            provider("inactive", false, all),
            provider("active", true, all),
            provider("no-linking", true, ProviderOptions { linking_allowed: false, ..all }),
            provider("no-creation", true, ProviderOptions { creation_allowed: false, ..all }),
            provider("no-auto-creation", true, ProviderOptions { auto_creation: false, ..all }),
            provider(
                "no-auto-linking",
                true,
                ProviderOptions { auto_linking: AutoLinkingOption::Unspecified, ..all },
            ),
        ]
    }

    fn names(configs: &[IdentityProviderConfig]) -> Vec<&str> {
        configs.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn no_predicates_returns_all_active_in_order() {
        let configs = login_policy_providers();
        let active = filter_active(&configs, &IdpActivationPredicates::default());
        assert_eq!(
            names(&active),
            vec!["active", "no-linking", "no-creation", "no-auto-creation", "no-auto-linking"]
        );
    }

    #[test]
    fn each_predicate_excludes_its_disabled_provider() {
        let configs = login_policy_providers();
        let cases = [
            (IdpActivationPredicates { linking_allowed: Some(true), ..Default::default() }, "no-linking"),
            (IdpActivationPredicates { creation_allowed: Some(true), ..Default::default() }, "no-creation"),
            (IdpActivationPredicates { auto_creation: Some(true), ..Default::default() }, "no-auto-creation"),
            (IdpActivationPredicates { auto_linking: Some(true), ..Default::default() }, "no-auto-linking"),
        ];

        for (predicates, excluded) in cases {
            let active = filter_active(&configs, &predicates);
            assert_eq!(active.len(), 4);
            assert!(!names(&active).contains(&excluded));
            assert!(!names(&active).contains(&"inactive"));
        }
    }

    #[test]
    fn predicates_intersect() {
        let configs = login_policy_providers();
        let all = IdpActivationPredicates {
            linking_allowed: Some(true),
            creation_allowed: Some(true),
            auto_creation: Some(true),
            auto_linking: Some(true),
        };
        assert_eq!(names(&filter_active(&configs, &all)), vec!["active"]);
    }

    #[test]
    fn false_predicate_is_no_restriction() {
        let configs = login_policy_providers();
        let predicates = IdpActivationPredicates { linking_allowed: Some(false), ..Default::default() };
        assert_eq!(filter_active(&configs, &predicates).len(), 5);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn any_config() -> impl Strategy<Value = IdentityProviderConfig> {
            (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
                |(active, linking, creation, auto_creation, auto_linking)| IdentityProviderConfig {
                    id: IdpId::new(),
                    name: String::from("p"),
                    idp_type: IdpType::Oidc,
                    is_active: active,
                    linking_allowed: linking,
                    creation_allowed: creation,
                    auto_creation,
                    auto_linking,
                },
            )
        }

        fn any_predicates() -> impl Strategy<Value = IdpActivationPredicates> {
            (
                proptest::option::of(any::<bool>()),
                proptest::option::of(any::<bool>()),
                proptest::option::of(any::<bool>()),
                proptest::option::of(any::<bool>()),
            )
                .prop_map(|(l, c, ac, al)| IdpActivationPredicates {
                    linking_allowed: l,
                    creation_allowed: c,
                    auto_creation: ac,
                    auto_linking: al,
                })
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

            /// The result is an ordered subsequence of the active providers.
            #[test]
            fn result_is_ordered_active_subsequence(
                configs in proptest::collection::vec(any_config(), 0..12),
                predicates in any_predicates(),
            ) {
                let result = filter_active(&configs, &predicates);
                let unfiltered = filter_active(&configs, &IdpActivationPredicates::default());

                prop_assert!(result.iter().all(|c| c.is_active));
                let mut cursor = unfiltered.iter();
                for item in &result {
                    prop_assert!(cursor.any(|c| c.id == item.id));
                }
            }

            /// Exactly the active providers whose flags cover every `Some(true)`
            /// predicate survive, in input order.
            #[test]
            fn result_is_exactly_the_matching_active_providers(
                configs in proptest::collection::vec(any_config(), 0..12),
                predicates in any_predicates(),
            ) {
                let wanted = |p: Option<bool>| p == Some(true);
                let expected: Vec<IdpId> = configs
                    .iter()
                    .filter(|c| {
                        c.is_active
                            && (!wanted(predicates.linking_allowed) || c.linking_allowed)
                            && (!wanted(predicates.creation_allowed) || c.creation_allowed)
                            && (!wanted(predicates.auto_creation) || c.auto_creation)
                            && (!wanted(predicates.auto_linking) || c.auto_linking)
                    })
                    .map(|c| c.id)
                    .collect();

                let result: Vec<IdpId> = filter_active(&configs, &predicates).iter().map(|c| c.id).collect();
                prop_assert_eq!(result, expected);
            }
        }
    }
}

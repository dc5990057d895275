//! External identity providers usable for login.
//!
//! Providers are configured elsewhere; this crate models their login-relevant
//! flags and the pure filter that selects the active ones.

pub mod filter;
pub mod provider;

pub use filter::{IdpActivationPredicates, filter_active};
pub use provider::{AutoLinkingOption, IdentityProviderConfig, IdpId, IdpType, ProviderOptions};

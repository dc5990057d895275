//! Instance security settings (event-sourced).
//!
//! One settings aggregate per instance: the embedded-iframe policy with its
//! allowed origins, and whether impersonation is enabled.

pub mod security;

pub use security::{
    AGGREGATE_TYPE, SecuritySettings, SecuritySettingsCommand, SecuritySettingsEvent,
    SecuritySettingsSet, SetSecuritySettings, normalize_origins, settings_aggregate_id,
};

//! Projection implementations (read model builders).
//!
//! Projections consume committed envelopes and build query-side views.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event store
//! - **Instance-isolated**: data is partitioned by instance
//! - **Idempotent**: duplicates and older sequences are ignored
//! - **Gap-intolerant**: a skipped sequence is reported, never applied

pub mod cursor_store;
pub mod security_settings;
pub mod user_grants;

pub use cursor_store::{
    InMemoryCursorStore, ProjectionCursorStore, ProjectionCursors, ProjectionError,
    ProjectionPosition,
};
pub use security_settings::{SecuritySettingsProjection, SecuritySettingsView};
pub use user_grants::{UserGrantList, UserGrantQuery, UserGrantReadModel, UserGrantsProjection};

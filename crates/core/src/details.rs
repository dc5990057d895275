//! Change descriptors returned by commands and list queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{InstanceId, OrgId};

/// The organization (or the instance itself) a mutable entity belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ResourceOwner {
    Instance(InstanceId),
    Organization(OrgId),
}

impl core::fmt::Display for ResourceOwner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ResourceOwner::Instance(id) => core::fmt::Display::fmt(id, f),
            ResourceOwner::Organization(id) => core::fmt::Display::fmt(id, f),
        }
    }
}

/// Result of every successful command.
///
/// `sequence` is the per-resource stream revision after the command; callers
/// use it for optimistic concurrency and to detect stale reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDetails {
    pub sequence: u64,
    pub change_date: DateTime<Utc>,
    pub resource_owner: ResourceOwner,
}

/// Metadata attached to list query results.
///
/// `latest_sequence` / `latest_timestamp` describe how far the read view has
/// processed, not the newest item in the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDetails {
    pub total_count: u64,
    pub latest_sequence: u64,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

//! Projection cursor persistence.
//!
//! A cursor is the last applied `sequence_number` per (instance, aggregate)
//! stream for one projection. It makes projections idempotent under
//! at-least-once delivery and lets a rebuild start from a clean slate.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;

use warden_core::{AggregateId, InstanceId};
use warden_events::EventEnvelope;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("instance isolation violation: {0}")]
    InstanceIsolation(String),

    #[error("sequence gap (last={last}, found={found})")]
    SequenceGap { last: u64, found: u64 },

    /// Lock poisoned or the replay source failed.
    #[error("projection unavailable: {0}")]
    Unavailable(String),
}

/// Cursor storage for a projection.
pub trait ProjectionCursorStore: Send + Sync {
    fn get_cursor(
        &self,
        instance_id: InstanceId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64>;

    fn update_cursor(
        &self,
        instance_id: InstanceId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    );

    /// Clear every cursor of an instance for a projection (rebuilds).
    fn clear_cursors(&self, instance_id: InstanceId, projection_name: &str);

    fn list_cursors(&self, instance_id: InstanceId, projection_name: &str) -> Vec<(AggregateId, u64)>;

    /// Replace every cursor of an instance for a projection in one step.
    fn replace_cursors(&self, instance_id: InstanceId, projection_name: &str, cursors: Vec<(AggregateId, u64)>);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    instance_id: InstanceId,
    aggregate_id: AggregateId,
    projection_name: String,
}

#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionCursorStore for InMemoryCursorStore {
    fn get_cursor(
        &self,
        instance_id: InstanceId,
        aggregate_id: AggregateId,
        projection_name: &str,
    ) -> Option<u64> {
        let cursors = self.cursors.read().ok()?;
        cursors
            .get(&CursorKey {
                instance_id,
                aggregate_id,
                projection_name: projection_name.to_string(),
            })
            .copied()
    }

    fn update_cursor(
        &self,
        instance_id: InstanceId,
        aggregate_id: AggregateId,
        projection_name: &str,
        sequence_number: u64,
    ) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(
                CursorKey {
                    instance_id,
                    aggregate_id,
                    projection_name: projection_name.to_string(),
                },
                sequence_number,
            );
        }
    }

    fn clear_cursors(&self, instance_id: InstanceId, projection_name: &str) {
        self.replace_cursors(instance_id, projection_name, Vec::new());
    }

    fn list_cursors(&self, instance_id: InstanceId, projection_name: &str) -> Vec<(AggregateId, u64)> {
        let Ok(cursors) = self.cursors.read() else {
            return vec![];
        };
        cursors
            .iter()
            .filter(|(k, _)| k.instance_id == instance_id && k.projection_name == projection_name)
            .map(|(k, seq)| (k.aggregate_id, *seq))
            .collect()
    }

    fn replace_cursors(&self, instance_id: InstanceId, projection_name: &str, cursors: Vec<(AggregateId, u64)>) {
        if let Ok(mut all) = self.cursors.write() {
            all.retain(|k, _| !(k.instance_id == instance_id && k.projection_name == projection_name));
            for (aggregate_id, sequence_number) in cursors {
                all.insert(
                    CursorKey {
                        instance_id,
                        aggregate_id,
                        projection_name: projection_name.to_string(),
                    },
                    sequence_number,
                );
            }
        }
    }
}

/// How far a projection has processed an instance.
///
/// `processed` counts applied envelopes and only ever grows (until a rebuild);
/// list queries report it as their latest sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    pub processed: u64,
    pub latest_timestamp: Option<DateTime<Utc>>,
}

/// Cursor bookkeeping shared by the projections.
#[derive(Debug)]
pub struct ProjectionCursors<C = InMemoryCursorStore> {
    name: &'static str,
    store: C,
    positions: RwLock<HashMap<InstanceId, ProjectionPosition>>,
}

impl ProjectionCursors<InMemoryCursorStore> {
    pub fn in_memory(name: &'static str) -> Self {
        Self::new(name, InMemoryCursorStore::new())
    }
}

impl<C: ProjectionCursorStore> ProjectionCursors<C> {
    pub fn new(name: &'static str, store: C) -> Self {
        Self {
            name,
            store,
            positions: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `Ok(true)` when the envelope is the next one of its stream,
    /// `Ok(false)` for a duplicate or older sequence.
    pub fn should_apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<bool, ProjectionError> {
        let last = self
            .store
            .get_cursor(envelope.instance_id(), envelope.aggregate_id(), self.name)
            .unwrap_or(0);
        let found = envelope.sequence_number();

        if found == 0 {
            return Err(ProjectionError::SequenceGap { last, found });
        }
        if found <= last {
            return Ok(false);
        }
        if found != last + 1 {
            return Err(ProjectionError::SequenceGap { last, found });
        }
        Ok(true)
    }

    pub fn advance(&self, envelope: &EventEnvelope<JsonValue>) {
        let instance_id = envelope.instance_id();
        self.store.update_cursor(
            instance_id,
            envelope.aggregate_id(),
            self.name,
            envelope.sequence_number(),
        );

        if let Ok(mut positions) = self.positions.write() {
            let position = positions.entry(instance_id).or_default();
            position.processed += 1;
            position.latest_timestamp = match position.latest_timestamp {
                Some(ts) if ts >= envelope.occurred_at() => Some(ts),
                _ => Some(envelope.occurred_at()),
            };
        }
    }

    pub fn position(&self, instance_id: InstanceId) -> ProjectionPosition {
        self.positions
            .read()
            .ok()
            .and_then(|p| p.get(&instance_id).copied())
            .unwrap_or_default()
    }

    pub fn clear(&self, instance_id: InstanceId) {
        self.store.clear_cursors(instance_id, self.name);
        if let Ok(mut positions) = self.positions.write() {
            positions.remove(&instance_id);
        }
    }

    /// Take over an instance's cursors and position from a staged rebuild.
    pub fn adopt<S: ProjectionCursorStore>(&self, instance_id: InstanceId, staged: &ProjectionCursors<S>) {
        self.store
            .replace_cursors(instance_id, self.name, staged.store.list_cursors(instance_id, staged.name));
        let position = staged.position(instance_id);
        if let Ok(mut positions) = self.positions.write() {
            positions.insert(instance_id, position);
        }
    }
}

/// Sort envelopes into replay order and list the instances they touch.
pub(crate) fn replay_order(
    envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
) -> (Vec<InstanceId>, Vec<EventEnvelope<JsonValue>>) {
    let mut envs: Vec<_> = envelopes.into_iter().collect();

    let mut instances = envs.iter().map(|e| e.instance_id()).collect::<Vec<_>>();
    instances.sort();
    instances.dedup();

    envs.sort_by_key(|e| (e.instance_id(), e.aggregate_id(), e.sequence_number()));
    (instances, envs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(instance_id: InstanceId, aggregate_id: AggregateId, seq: u64) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(Uuid::now_v7(), instance_id, aggregate_id, "t", seq, Utc::now(), json!({}))
    }

    #[test]
    fn duplicates_are_skipped_and_gaps_reported() {
        let cursors = ProjectionCursors::in_memory("test");
        let instance_id = InstanceId::new();
        let aggregate_id = AggregateId::new();

        let first = envelope(instance_id, aggregate_id, 1);
        assert_eq!(cursors.should_apply(&first), Ok(true));
        cursors.advance(&first);

        assert_eq!(cursors.should_apply(&first), Ok(false));
        assert_eq!(
            cursors.should_apply(&envelope(instance_id, aggregate_id, 3)),
            Err(ProjectionError::SequenceGap { last: 1, found: 3 })
        );
        assert_eq!(cursors.position(instance_id).processed, 1);
    }

    #[test]
    fn clear_resets_one_instance() {
        let cursors = ProjectionCursors::in_memory("test");
        let a = InstanceId::new();
        let b = InstanceId::new();
        let aggregate_id = AggregateId::new();
        cursors.advance(&envelope(a, aggregate_id, 1));
        cursors.advance(&envelope(b, aggregate_id, 1));

        cursors.clear(a);
        assert_eq!(cursors.should_apply(&envelope(a, aggregate_id, 1)), Ok(true));
        assert_eq!(cursors.should_apply(&envelope(b, aggregate_id, 1)), Ok(false));
        assert_eq!(cursors.position(a), ProjectionPosition::default());
    }

    #[test]
    fn adopt_takes_staged_cursors_and_position() {
        let live = ProjectionCursors::in_memory("test");
        let staged = ProjectionCursors::in_memory("test");
        let instance_id = InstanceId::new();
        let stale = AggregateId::new();
        let fresh = AggregateId::new();
        live.advance(&envelope(instance_id, stale, 1));
        staged.advance(&envelope(instance_id, fresh, 1));
        staged.advance(&envelope(instance_id, fresh, 2));

        live.adopt(instance_id, &staged);
        assert_eq!(live.should_apply(&envelope(instance_id, fresh, 3)), Ok(true));
        assert_eq!(live.should_apply(&envelope(instance_id, stale, 1)), Ok(true));
        assert_eq!(live.position(instance_id).processed, 2);
    }
}

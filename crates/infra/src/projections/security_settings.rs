use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use warden_core::{AggregateId, InstanceId, ResourceOwner};
use warden_events::EventEnvelope;
use warden_settings::{AGGREGATE_TYPE, SecuritySettingsEvent, settings_aggregate_id};

use crate::projections::cursor_store::{
    InMemoryCursorStore, ProjectionCursorStore, ProjectionCursors, ProjectionError, replay_order,
};
use crate::read_model::{InMemoryInstanceStore, InstanceStore};

/// Security settings as seen by readers. Zero values until the first write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettingsView {
    pub embedded_iframe_enabled: bool,
    pub allowed_origins: Vec<String>,
    pub impersonation_enabled: bool,
    pub sequence: u64,
    pub change_date: Option<DateTime<Utc>>,
    pub resource_owner: ResourceOwner,
}

impl SecuritySettingsView {
    pub fn defaults(instance_id: InstanceId) -> Self {
        Self {
            embedded_iframe_enabled: false,
            allowed_origins: Vec::new(),
            impersonation_enabled: false,
            sequence: 0,
            change_date: None,
            resource_owner: ResourceOwner::Instance(instance_id),
        }
    }
}

#[derive(Debug)]
pub struct SecuritySettingsProjection<S, C = InMemoryCursorStore>
where
    S: InstanceStore<AggregateId, SecuritySettingsView>,
{
    store: S,
    cursors: ProjectionCursors<C>,
    gate: Mutex<()>,
}

impl<S> SecuritySettingsProjection<S>
where
    S: InstanceStore<AggregateId, SecuritySettingsView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: ProjectionCursors::in_memory("security_settings"),
            gate: Mutex::new(()),
        }
    }
}

impl<S, C> SecuritySettingsProjection<S, C>
where
    S: InstanceStore<AggregateId, SecuritySettingsView>,
    C: ProjectionCursorStore,
{
    /// Current view, or defaults when nothing was written yet.
    pub fn get(&self, instance_id: InstanceId) -> SecuritySettingsView {
        self.store
            .get(instance_id, &settings_aggregate_id(instance_id))
            .unwrap_or_else(|| SecuritySettingsView::defaults(instance_id))
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let _gate = self.lock_gate()?;
        self.apply_locked(envelope)
    }

    fn lock_gate(&self) -> Result<std::sync::MutexGuard<'_, ()>, ProjectionError> {
        self.gate
            .lock()
            .map_err(|_| ProjectionError::Unavailable("security_settings gate poisoned".to_string()))
    }

    fn apply_locked(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let instance_id = envelope.instance_id();
        if envelope.aggregate_id() != settings_aggregate_id(instance_id) {
            return Err(ProjectionError::InstanceIsolation(
                "settings stream does not belong to the envelope instance".to_string(),
            ));
        }

        let ev: SecuritySettingsEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let mut view = self.get(instance_id);
        match ev {
            SecuritySettingsEvent::Set(e) => {
                if e.instance_id != instance_id {
                    return Err(ProjectionError::InstanceIsolation(
                        "event instance_id does not match envelope instance_id".to_string(),
                    ));
                }
                if let Some(enabled) = e.embedded_iframe_enabled {
                    view.embedded_iframe_enabled = enabled;
                }
                if let Some(origins) = e.allowed_origins {
                    view.allowed_origins = origins;
                }
                if let Some(enabled) = e.impersonation_enabled {
                    view.impersonation_enabled = enabled;
                }
            }
        }
        view.sequence = envelope.sequence_number();
        view.change_date = Some(envelope.occurred_at());

        self.store.upsert(instance_id, envelope.aggregate_id(), view);
        self.cursors.advance(envelope);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.rebuild_with(|| Ok(envelopes))
    }

    /// Rebuild from whatever `load` returns, with applies held off while it
    /// runs. Each touched instance is swapped in whole.
    pub fn rebuild_with<I>(
        &self,
        load: impl FnOnce() -> Result<I, ProjectionError>,
    ) -> Result<(), ProjectionError>
    where
        I: IntoIterator<Item = EventEnvelope<JsonValue>>,
    {
        let _gate = self.lock_gate()?;
        let (instances, envs) = replay_order(load()?);

        let staged: SecuritySettingsProjection<InMemoryInstanceStore<AggregateId, SecuritySettingsView>> =
            SecuritySettingsProjection::new(InMemoryInstanceStore::new());
        for env in &envs {
            staged.apply_locked(env)?;
        }

        for instance_id in instances {
            let key = settings_aggregate_id(instance_id);
            let records = staged
                .store
                .get(instance_id, &key)
                .map(|view| vec![(key, view)])
                .unwrap_or_default();
            self.store.replace_instance(instance_id, records);
            self.cursors.adopt(instance_id, &staged.cursors);
        }
        Ok(())
    }
}

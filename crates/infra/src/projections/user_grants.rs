use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use warden_core::{InstanceId, ListDetails, OrgId, ProjectGrantId, ProjectId, ResourceOwner, UserId};
use warden_events::EventEnvelope;
use warden_grants::{AGGREGATE_TYPE, UserGrantEvent, UserGrantId, UserGrantState};

use crate::projections::cursor_store::{
    InMemoryCursorStore, ProjectionCursorStore, ProjectionCursors, ProjectionError, replay_order,
};
use crate::read_model::{InMemoryInstanceStore, InstanceStore};

/// Queryable user grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGrantReadModel {
    pub id: UserGrantId,
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub project_grant_id: Option<ProjectGrantId>,
    pub role_keys: Vec<String>,
    pub state: UserGrantState,
    pub resource_owner: ResourceOwner,
    pub sequence: u64,
    pub creation_date: DateTime<Utc>,
    pub change_date: DateTime<Utc>,
}

/// Filters for [`UserGrantsProjection::list`]; every supplied filter must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserGrantQuery {
    pub resource_owner: Option<OrgId>,
    pub user_id: Option<UserId>,
    pub project_id: Option<ProjectId>,
    pub project_grant_id: Option<ProjectGrantId>,
    pub role_key: Option<String>,
    pub state: Option<UserGrantState>,
    /// Removed grants are hidden unless set.
    pub with_removed: bool,
    pub offset: u64,
    /// `None` returns everything after `offset`.
    pub limit: Option<u64>,
    /// Sort by creation date, oldest first. Newest first otherwise.
    pub ascending: bool,
}

impl UserGrantQuery {
    fn matches(&self, grant: &UserGrantReadModel) -> bool {
        if grant.state == UserGrantState::Removed && !self.with_removed {
            return false;
        }
        if let Some(org) = self.resource_owner {
            if grant.resource_owner != ResourceOwner::Organization(org) {
                return false;
            }
        }
        if self.user_id.is_some_and(|u| u != grant.user_id) {
            return false;
        }
        if self.project_id.is_some_and(|p| p != grant.project_id) {
            return false;
        }
        if self.project_grant_id.is_some() && self.project_grant_id != grant.project_grant_id {
            return false;
        }
        if let Some(key) = &self.role_key {
            if !grant.role_keys.iter().any(|k| k == key) {
                return false;
            }
        }
        if self.state.is_some_and(|s| s != grant.state) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGrantList {
    pub grants: Vec<UserGrantReadModel>,
    pub details: ListDetails,
}

/// Read view of every user grant, maintained from `user.grant` streams.
///
/// Applies and rebuilds are serialized by `gate`; reads never take it.
#[derive(Debug)]
pub struct UserGrantsProjection<S, C = InMemoryCursorStore>
where
    S: InstanceStore<UserGrantId, UserGrantReadModel>,
{
    store: S,
    cursors: ProjectionCursors<C>,
    gate: Mutex<()>,
}

impl<S> UserGrantsProjection<S>
where
    S: InstanceStore<UserGrantId, UserGrantReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: ProjectionCursors::in_memory("user_grants"),
            gate: Mutex::new(()),
        }
    }
}

impl<S, C> UserGrantsProjection<S, C>
where
    S: InstanceStore<UserGrantId, UserGrantReadModel>,
    C: ProjectionCursorStore,
{
    pub fn with_cursor_store(store: S, cursor_store: C) -> Self {
        Self {
            store,
            cursors: ProjectionCursors::new("user_grants", cursor_store),
            gate: Mutex::new(()),
        }
    }

    pub fn get(&self, instance_id: InstanceId, id: &UserGrantId) -> Option<UserGrantReadModel> {
        self.store.get(instance_id, id)
    }

    pub fn list(&self, instance_id: InstanceId, query: &UserGrantQuery) -> UserGrantList {
        let mut matching: Vec<UserGrantReadModel> = self
            .store
            .list(instance_id)
            .into_iter()
            .filter(|g| query.matches(g))
            .collect();

        // Ties on creation date fall back to the time-ordered id.
        matching.sort_by_key(|g| (g.creation_date, g.id));
        if !query.ascending {
            matching.reverse();
        }

        let total_count = matching.len() as u64;
        let offset = usize::try_from(query.offset).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        let grants = matching.into_iter().skip(offset).take(limit).collect();

        let position = self.cursors.position(instance_id);
        UserGrantList {
            grants,
            details: ListDetails {
                total_count,
                latest_sequence: position.processed,
                latest_timestamp: position.latest_timestamp,
            },
        }
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let _gate = self.lock_gate()?;
        self.apply_locked(envelope)
    }

    fn lock_gate(&self) -> Result<std::sync::MutexGuard<'_, ()>, ProjectionError> {
        self.gate
            .lock()
            .map_err(|_| ProjectionError::Unavailable("user_grants gate poisoned".to_string()))
    }

    fn apply_locked(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }
        if !self.cursors.should_apply(envelope)? {
            return Ok(());
        }

        let instance_id = envelope.instance_id();
        let seq = envelope.sequence_number();
        let ev: UserGrantEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ProjectionError::Deserialize(e.to_string()))?;

        let (event_instance, grant_id) = match &ev {
            UserGrantEvent::Added(e) => (e.instance_id, e.grant_id),
            UserGrantEvent::Changed(e) => (e.instance_id, e.grant_id),
            UserGrantEvent::Deactivated(e) => (e.instance_id, e.grant_id),
            UserGrantEvent::Reactivated(e) => (e.instance_id, e.grant_id),
            UserGrantEvent::Removed(e) => (e.instance_id, e.grant_id),
        };
        if event_instance != instance_id {
            return Err(ProjectionError::InstanceIsolation(
                "event instance_id does not match envelope instance_id".to_string(),
            ));
        }
        if grant_id.aggregate_id() != envelope.aggregate_id() {
            return Err(ProjectionError::InstanceIsolation(
                "event grant_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let updated = match ev {
            UserGrantEvent::Added(e) => Some(UserGrantReadModel {
                id: e.grant_id,
                user_id: e.user_id,
                project_id: e.scope.project_id(),
                project_grant_id: e.scope.project_grant_id(),
                role_keys: e.role_keys,
                state: UserGrantState::Active,
                resource_owner: ResourceOwner::Organization(e.resource_owner),
                sequence: seq,
                creation_date: e.occurred_at,
                change_date: e.occurred_at,
            }),
            UserGrantEvent::Changed(e) => self.store.get(instance_id, &e.grant_id).map(|mut rm| {
                rm.role_keys = e.role_keys;
                rm
            }),
            UserGrantEvent::Deactivated(e) => self.with_state(instance_id, e.grant_id, UserGrantState::Inactive),
            UserGrantEvent::Reactivated(e) => self.with_state(instance_id, e.grant_id, UserGrantState::Active),
            UserGrantEvent::Removed(e) => self.with_state(instance_id, e.grant_id, UserGrantState::Removed),
        };

        // A stream always starts with `Added`; the cursor guarantees it was applied.
        if let Some(mut rm) = updated {
            rm.sequence = seq;
            rm.change_date = envelope.occurred_at();
            self.store.upsert(instance_id, grant_id, rm);
        }

        self.cursors.advance(envelope);
        Ok(())
    }

    fn with_state(
        &self,
        instance_id: InstanceId,
        grant_id: UserGrantId,
        state: UserGrantState,
    ) -> Option<UserGrantReadModel> {
        self.store.get(instance_id, &grant_id).map(|mut rm| {
            rm.state = state;
            rm
        })
    }

    /// Replace the view of every instance present in `envelopes` with a
    /// replay of them.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError> {
        self.rebuild_with(|| Ok(envelopes))
    }

    /// Rebuild from whatever `load` returns.
    ///
    /// `load` runs while applies are held off, so a snapshot of the event
    /// store taken there contains everything the live view already applied.
    /// The replay goes into a staging view that is swapped in per instance;
    /// readers never see a partially rebuilt instance.
    pub fn rebuild_with<I>(
        &self,
        load: impl FnOnce() -> Result<I, ProjectionError>,
    ) -> Result<(), ProjectionError>
    where
        I: IntoIterator<Item = EventEnvelope<JsonValue>>,
    {
        let _gate = self.lock_gate()?;
        let (instances, envs) = replay_order(load()?);

        let staged: UserGrantsProjection<InMemoryInstanceStore<UserGrantId, UserGrantReadModel>> =
            UserGrantsProjection::new(InMemoryInstanceStore::new());
        for env in &envs {
            staged.apply_locked(env)?;
        }

        for instance_id in instances {
            let records = staged
                .store
                .list(instance_id)
                .into_iter()
                .map(|rm| (rm.id, rm))
                .collect();
            self.store.replace_instance(instance_id, records);
            self.cursors.adopt(instance_id, &staged.cursors);
        }
        Ok(())
    }
}

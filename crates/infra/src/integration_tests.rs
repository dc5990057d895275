//! Integration tests for the full event-sourced pipeline.
//!
//! Command → EventStore → EventBus → ProjectionWorker → read model
//!
//! Covers read-after-write through the worker, instance isolation,
//! optimistic concurrency and rebuilding views from the store.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::Value as JsonValue;

    use warden_core::{InstanceId, OrgId, ProjectId, UserId};
    use warden_events::{EventEnvelope, InMemoryEventBus};
    use warden_grants::{
        AGGREGATE_TYPE, AddUserGrant, DeactivateUserGrant, GrantScope, UpdateUserGrant, UserGrant,
        UserGrantCommand, UserGrantId, UserGrantState,
    };
    use warden_settings::{
        SecuritySettings, SecuritySettingsCommand, SetSecuritySettings, settings_aggregate_id,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError, DispatchOptions};
    use crate::consistency::{RetryPolicy, eventually};
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::projections::{
        SecuritySettingsProjection, SecuritySettingsView, UserGrantQuery, UserGrantReadModel,
        UserGrantsProjection,
    };
    use crate::read_model::InMemoryInstanceStore;
    use crate::workers::{ProjectionWorker, WorkerHandle};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;
    type Grants = Arc<UserGrantsProjection<Arc<InMemoryInstanceStore<UserGrantId, UserGrantReadModel>>>>;
    type Settings = Arc<
        SecuritySettingsProjection<Arc<InMemoryInstanceStore<warden_core::AggregateId, SecuritySettingsView>>>,
    >;

    struct Harness {
        dispatcher: Dispatcher,
        store: Arc<InMemoryEventStore>,
        grants: Grants,
        settings: Settings,
        _workers: Vec<WorkerHandle>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let grants: Grants = Arc::new(UserGrantsProjection::new(Arc::new(InMemoryInstanceStore::new())));
        let settings: Settings = Arc::new(SecuritySettingsProjection::new(Arc::new(InMemoryInstanceStore::new())));

        let g = grants.clone();
        let grants_worker = ProjectionWorker::spawn("user-grants", &bus, None, move |env: EventEnvelope<JsonValue>| {
            g.apply_envelope(&env)
        })
        .unwrap();
        let s = settings.clone();
        let settings_worker = ProjectionWorker::spawn("security-settings", &bus, None, move |env: EventEnvelope<JsonValue>| {
            s.apply_envelope(&env)
        })
        .unwrap();

        Harness {
            dispatcher: CommandDispatcher::new(store.clone(), bus),
            store,
            grants,
            settings,
            _workers: vec![grants_worker, settings_worker],
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::fixed(Duration::from_secs(2), Duration::from_millis(5))
    }

    fn grant(
        h: &Harness,
        instance_id: InstanceId,
        grant_id: UserGrantId,
        command: UserGrantCommand,
    ) -> Result<u64, DispatchError> {
        let outcome = h.dispatcher.dispatch(
            instance_id,
            grant_id.aggregate_id(),
            AGGREGATE_TYPE,
            command,
            DispatchOptions::default(),
            |_, id| UserGrant::empty(UserGrantId::new(id)),
        )?;
        Ok(outcome.committed.last().map(|e| e.sequence_number).unwrap_or(0))
    }

    fn add(instance_id: InstanceId, grant_id: UserGrantId, org: OrgId, keys: &[&str]) -> UserGrantCommand {
        UserGrantCommand::Add(AddUserGrant {
            instance_id,
            grant_id,
            user_id: UserId::new(),
            scope: GrantScope::DirectProject { project_id: ProjectId::new() },
            role_keys: keys.iter().map(|k| k.to_string()).collect(),
            resource_owner: org,
            occurred_at: Utc::now(),
        })
    }

    fn wait_for_grant<F>(h: &Harness, instance_id: InstanceId, grant_id: UserGrantId, done: F) -> UserGrantReadModel
    where
        F: Fn(&UserGrantReadModel) -> bool,
    {
        eventually(&policy(), || match h.grants.get(instance_id, &grant_id) {
            Some(g) if done(&g) => Ok(g),
            other => Err(other),
        })
        .unwrap()
    }

    #[test]
    fn commands_reach_the_grant_view() {
        let h = harness();
        let instance_id = InstanceId::new();
        let org = OrgId::new();
        let grant_id = UserGrantId::generate();

        grant(&h, instance_id, grant_id, add(instance_id, grant_id, org, &["admin"])).unwrap();
        let seq = grant(
            &h,
            instance_id,
            grant_id,
            UserGrantCommand::Update(UpdateUserGrant {
                instance_id,
                grant_id,
                resource_owner: org,
                role_keys: vec!["viewer".into(), "editor".into()],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(seq, 2);

        let view = wait_for_grant(&h, instance_id, grant_id, |g| g.sequence >= seq);
        assert_eq!(view.role_keys, vec!["viewer".to_string(), "editor".to_string()]);
        assert_eq!(view.state, UserGrantState::Active);

        grant(
            &h,
            instance_id,
            grant_id,
            UserGrantCommand::Deactivate(DeactivateUserGrant {
                instance_id,
                grant_id,
                resource_owner: org,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        let view = wait_for_grant(&h, instance_id, grant_id, |g| g.state == UserGrantState::Inactive);
        assert_eq!(view.sequence, 3);
    }

    #[test]
    fn views_stay_instance_isolated() {
        let h = harness();
        let a = InstanceId::new();
        let b = InstanceId::new();
        let org = OrgId::new();
        let grant_id = UserGrantId::generate();

        grant(&h, a, grant_id, add(a, grant_id, org, &["admin"])).unwrap();
        wait_for_grant(&h, a, grant_id, |_| true);

        assert!(h.grants.get(b, &grant_id).is_none());
        assert_eq!(h.grants.list(b, &UserGrantQuery::default()).details.total_count, 0);

        // Same grant id in another instance is a separate stream.
        grant(&h, b, grant_id, add(b, grant_id, org, &["viewer"])).unwrap();
        let in_b = wait_for_grant(&h, b, grant_id, |_| true);
        assert_eq!(in_b.role_keys, vec!["viewer".to_string()]);
        assert_eq!(h.grants.get(a, &grant_id).unwrap().role_keys, vec!["admin".to_string()]);
    }

    #[test]
    fn stale_expected_sequence_is_a_conflict() {
        let h = harness();
        let instance_id = InstanceId::new();
        let org = OrgId::new();
        let grant_id = UserGrantId::generate();
        grant(&h, instance_id, grant_id, add(instance_id, grant_id, org, &["admin"])).unwrap();

        let err = h
            .dispatcher
            .dispatch(
                instance_id,
                grant_id.aggregate_id(),
                AGGREGATE_TYPE,
                UserGrantCommand::Update(UpdateUserGrant {
                    instance_id,
                    grant_id,
                    resource_owner: org,
                    role_keys: vec!["viewer".into()],
                    occurred_at: Utc::now(),
                }),
                DispatchOptions::default().expecting(warden_core::ExpectedVersion::Exact(0)),
                |_, id| UserGrant::empty(UserGrantId::new(id)),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
        assert_eq!(h.store.load_stream(instance_id, grant_id.aggregate_id()).unwrap().len(), 1);
    }

    #[test]
    fn settings_reach_their_view_and_rebuild_matches() {
        let h = harness();
        let instance_id = InstanceId::new();

        let set = |cmd: SetSecuritySettings| {
            h.dispatcher.dispatch(
                instance_id,
                settings_aggregate_id(instance_id),
                warden_settings::AGGREGATE_TYPE,
                SecuritySettingsCommand::Set(cmd),
                DispatchOptions::default(),
                |instance, _| SecuritySettings::for_instance(instance),
            )
        };
        set(SetSecuritySettings {
            instance_id,
            embedded_iframe_enabled: Some(true),
            allowed_origins: Some(vec!["https://app.example.com".into()]),
            impersonation_enabled: None,
            occurred_at: Utc::now(),
        })
        .unwrap();
        set(SetSecuritySettings {
            instance_id,
            embedded_iframe_enabled: None,
            allowed_origins: None,
            impersonation_enabled: Some(true),
            occurred_at: Utc::now(),
        })
        .unwrap();

        let live = eventually(&policy(), || {
            let view = h.settings.get(instance_id);
            if view.sequence == 2 { Ok(view) } else { Err(view.sequence) }
        })
        .unwrap();
        assert!(live.embedded_iframe_enabled && live.impersonation_enabled);

        let rebuilt: SecuritySettingsProjection<Arc<InMemoryInstanceStore<warden_core::AggregateId, SecuritySettingsView>>> =
            SecuritySettingsProjection::new(Arc::new(InMemoryInstanceStore::new()));
        let envelopes = h
            .store
            .load_instance(instance_id)
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect::<Vec<_>>();
        rebuilt.rebuild_from_scratch(envelopes).unwrap();
        assert_eq!(rebuilt.get(instance_id), live);
    }

    #[test]
    fn commit_during_rebuild_reaches_the_live_view() {
        let h = harness();
        let instance_id = InstanceId::new();
        let org = OrgId::new();
        let grant_id = UserGrantId::generate();
        grant(&h, instance_id, grant_id, add(instance_id, grant_id, org, &["admin"])).unwrap();
        wait_for_grant(&h, instance_id, grant_id, |g| g.sequence == 1);

        h.grants
            .rebuild_with(|| {
                let snapshot: Vec<EventEnvelope<JsonValue>> = h
                    .store
                    .load_instance(instance_id)
                    .unwrap()
                    .iter()
                    .map(|e| e.to_envelope())
                    .collect();
                // Committed and published after the snapshot was read.
                let seq = grant(
                    &h,
                    instance_id,
                    grant_id,
                    UserGrantCommand::Update(UpdateUserGrant {
                        instance_id,
                        grant_id,
                        resource_owner: org,
                        role_keys: vec!["viewer".into()],
                        occurred_at: Utc::now(),
                    }),
                )
                .unwrap();
                assert_eq!(seq, 2);
                std::thread::sleep(Duration::from_millis(50));
                Ok(snapshot)
            })
            .unwrap();

        let view = wait_for_grant(&h, instance_id, grant_id, |g| g.sequence == 2);
        assert_eq!(view.role_keys, vec!["viewer".to_string()]);
        assert_eq!(h.grants.list(instance_id, &UserGrantQuery::default()).details.latest_sequence, 2);
    }
}

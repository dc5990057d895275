//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 0. Deadline check
//!   ↓
//! 1. Load events from store (instance-scoped)
//!   ↓
//! 2. Check caller's expected sequence, rehydrate aggregate
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Deadline check, then append with ExpectedVersion::Exact(loaded)
//!   ↓
//! 5. Publish committed events to the bus
//! ```
//!
//! No locks are held while the aggregate decides; concurrent commands on the
//! same stream race on the append and the loser gets
//! [`DispatchError::Concurrency`]. Steps 4 and 5 run under one commit lock, so
//! the bus sees every stream in sequence order.

use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use warden_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, InstanceId};
use warden_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Stale expected sequence or lost append race (retryable).
    #[error("conflict: {0}")]
    Concurrency(String),

    /// Loaded data crossed an instance or stream boundary.
    #[error("instance isolation violation: {0}")]
    InstanceIsolation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found")]
    NotFound,

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The request deadline passed before the change was committed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error("event store failure: {0}")]
    Store(EventStoreError),

    /// Publication failed after a successful append; the change is durable.
    #[error("event publication failed: {0}")]
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            EventStoreError::InstanceIsolation(msg) => DispatchError::InstanceIsolation(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidArgument(msg) | DomainError::InvalidId(msg) => {
                DispatchError::InvalidArgument(msg)
            }
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::FailedPrecondition(msg) => DispatchError::FailedPrecondition(msg),
            DomainError::Conflict(msg) => DispatchError::Concurrency(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
        }
    }
}

/// Per-dispatch knobs supplied by the caller.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOptions {
    /// Sequence the caller last observed; `Any` skips the check.
    pub expected_version: ExpectedVersion,
    pub deadline: Option<Instant>,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            expected_version: ExpectedVersion::Any,
            deadline: None,
        }
    }
}

impl DispatchOptions {
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn expecting(mut self, expected_version: ExpectedVersion) -> Self {
        self.expected_version = expected_version;
        self
    }

    fn check_deadline(&self) -> Result<(), DispatchError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(DispatchError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// Outcome of a successful dispatch.
///
/// `aggregate` is the state after the committed events; `committed` is empty
/// when the command was a no-op.
#[derive(Debug)]
pub struct Dispatched<A> {
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

impl<A> Dispatched<A> {
    pub fn is_noop(&self) -> bool {
        self.committed.is_empty()
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Events are appended before they are published: if the append fails nothing
/// is published, and a publication failure is reported even though the change
/// is already durable (at-least-once delivery).
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    // Held from append until the last publish of that append.
    commit: Mutex<()>,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            commit: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate without running a command.
    pub fn load<A>(
        &self,
        instance_id: InstanceId,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(InstanceId, AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(instance_id, aggregate_id)?;
        validate_loaded_stream(instance_id, aggregate_id, &history)?;
        let mut aggregate = make_aggregate(instance_id, aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// Fails with `DeadlineExceeded` if the deadline passes before the load or
    /// before the append, with `Concurrency` if the stream is not at
    /// `options.expected_version` or another writer appended first.
    pub fn dispatch<A>(
        &self,
        instance_id: InstanceId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        options: DispatchOptions,
        make_aggregate: impl FnOnce(InstanceId, AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: warden_events::Event + Serialize + DeserializeOwned,
    {
        options.check_deadline()?;

        let history = self.store.load_stream(instance_id, aggregate_id)?;
        validate_loaded_stream(instance_id, aggregate_id, &history)?;
        let loaded = stream_version(&history);
        options
            .expected_version
            .check(loaded)
            .map_err(DispatchError::from)?;

        let mut aggregate = make_aggregate(instance_id, aggregate_id);
        apply_history(&mut aggregate, &history)?;

        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            debug!(%instance_id, %aggregate_id, sequence = loaded, "command was a no-op");
            return Ok(Dispatched {
                aggregate,
                committed: vec![],
            });
        }

        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    instance_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        options.check_deadline()?;
        let committed = {
            let _commit = self
                .commit
                .lock()
                .map_err(|_| DispatchError::Store(EventStoreError::Unavailable("commit lock poisoned".to_string())))?;
            let committed = self
                .store
                .append(uncommitted, ExpectedVersion::Exact(loaded))?;
            for stored in &committed {
                self.bus
                    .publish(stored.to_envelope())
                    .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
            }
            committed
        };

        for ev in &decided {
            aggregate.apply(ev);
        }

        debug!(
            %instance_id,
            %aggregate_id,
            aggregate_type = %aggregate_type,
            sequence = stream_version(&committed),
            events = committed.len(),
            "command committed"
        );

        Ok(Dispatched {
            aggregate,
            committed,
        })
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    instance_id: InstanceId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Guard against a backend returning foreign or out-of-order data.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.instance_id != instance_id {
            return Err(DispatchError::InstanceIsolation(format!(
                "loaded stream contains wrong instance_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::InstanceIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number != last + 1 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-contiguous sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use chrono::Utc;
    use warden_core::{AggregateRoot, OrgId, ProjectId, UserId};
    use warden_events::{InMemoryBusError, InMemoryEventBus, Subscription};
    use warden_grants::{
        AGGREGATE_TYPE, AddUserGrant, GrantScope, UpdateUserGrant, UserGrant, UserGrantCommand,
        UserGrantId,
    };

    use crate::event_store::InMemoryEventStore;
    use crate::projections::{UserGrantReadModel, UserGrantsProjection};
    use crate::read_model::InMemoryInstanceStore;

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    fn setup() -> (CommandDispatcher<InMemoryEventStore, Bus>, Bus) {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        (CommandDispatcher::new(InMemoryEventStore::new(), bus.clone()), bus)
    }

    fn add(instance_id: InstanceId, grant_id: UserGrantId, org: OrgId) -> UserGrantCommand {
        UserGrantCommand::Add(AddUserGrant {
            instance_id,
            grant_id,
            user_id: UserId::new(),
            scope: GrantScope::DirectProject { project_id: ProjectId::new() },
            role_keys: vec!["admin".to_string()],
            resource_owner: org,
            occurred_at: Utc::now(),
        })
    }

    fn update(instance_id: InstanceId, grant_id: UserGrantId, org: OrgId, key: &str) -> UserGrantCommand {
        UserGrantCommand::Update(UpdateUserGrant {
            instance_id,
            grant_id,
            resource_owner: org,
            role_keys: vec![key.to_string()],
            occurred_at: Utc::now(),
        })
    }

    fn run(
        dispatcher: &CommandDispatcher<InMemoryEventStore, Bus>,
        instance_id: InstanceId,
        grant_id: UserGrantId,
        command: UserGrantCommand,
        options: DispatchOptions,
    ) -> Result<Dispatched<UserGrant>, DispatchError> {
        dispatcher.dispatch(
            instance_id,
            grant_id.aggregate_id(),
            AGGREGATE_TYPE,
            command,
            options,
            |_, id| UserGrant::empty(UserGrantId::new(id)),
        )
    }

    #[test]
    fn dispatch_appends_and_publishes() {
        let (dispatcher, bus) = setup();
        let sub = bus.subscribe();
        let instance_id = InstanceId::new();
        let grant_id = UserGrantId::generate();
        let org = OrgId::new();

        let added = run(&dispatcher, instance_id, grant_id, add(instance_id, grant_id, org), DispatchOptions::default()).unwrap();
        assert_eq!(added.aggregate.version(), 1);
        assert_eq!(added.committed[0].sequence_number, 1);

        let updated = run(&dispatcher, instance_id, grant_id, update(instance_id, grant_id, org, "viewer"), DispatchOptions::default()).unwrap();
        assert_eq!(updated.aggregate.version(), 2);
        assert_eq!(updated.aggregate.role_keys(), &["viewer".to_string()]);

        let first = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = sub.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!((first.sequence_number(), second.sequence_number()), (1, 2));
    }

    #[test]
    fn noop_command_appends_nothing() {
        let (dispatcher, _bus) = setup();
        let instance_id = InstanceId::new();
        let grant_id = UserGrantId::generate();
        let org = OrgId::new();
        run(&dispatcher, instance_id, grant_id, add(instance_id, grant_id, org), DispatchOptions::default()).unwrap();

        let outcome = run(&dispatcher, instance_id, grant_id, update(instance_id, grant_id, org, "admin"), DispatchOptions::default()).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(outcome.aggregate.version(), 1);
    }

    #[test]
    fn stale_expected_sequence_is_a_conflict() {
        let (dispatcher, _bus) = setup();
        let instance_id = InstanceId::new();
        let grant_id = UserGrantId::generate();
        let org = OrgId::new();
        run(&dispatcher, instance_id, grant_id, add(instance_id, grant_id, org), DispatchOptions::default()).unwrap();
        run(&dispatcher, instance_id, grant_id, update(instance_id, grant_id, org, "b"), DispatchOptions::default()).unwrap();

        let err = run(
            &dispatcher,
            instance_id,
            grant_id,
            update(instance_id, grant_id, org, "c"),
            DispatchOptions::default().expecting(ExpectedVersion::Exact(1)),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
    }

    #[test]
    fn expired_deadline_leaves_no_state() {
        let (dispatcher, _bus) = setup();
        let instance_id = InstanceId::new();
        let grant_id = UserGrantId::generate();
        let past = Instant::now() - Duration::from_millis(1);

        let err = run(
            &dispatcher,
            instance_id,
            grant_id,
            add(instance_id, grant_id, OrgId::new()),
            DispatchOptions::default().with_deadline(Some(past)),
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::DeadlineExceeded));
        assert!(dispatcher.store().load_stream(instance_id, grant_id.aggregate_id()).unwrap().is_empty());
    }

    /// Delays publication of one sequence number to widen the window between
    /// append and publish.
    struct SlowBus {
        inner: Bus,
        slow_sequence: u64,
        delay: Duration,
    }

    impl EventBus<EventEnvelope<JsonValue>> for SlowBus {
        type Error = InMemoryBusError;

        fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            if message.sequence_number() == self.slow_sequence {
                thread::sleep(self.delay);
            }
            self.inner.publish(message)
        }

        fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn concurrent_writers_publish_in_commit_order() {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let slow = SlowBus { inner: bus.clone(), slow_sequence: 2, delay: Duration::from_millis(300) };
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), slow);
        let sub = bus.subscribe();
        let view: UserGrantsProjection<InMemoryInstanceStore<UserGrantId, UserGrantReadModel>> =
            UserGrantsProjection::new(InMemoryInstanceStore::new());

        let instance_id = InstanceId::new();
        let grant_id = UserGrantId::generate();
        let org = OrgId::new();
        let dispatch = |command: UserGrantCommand| {
            dispatcher.dispatch(
                instance_id,
                grant_id.aggregate_id(),
                AGGREGATE_TYPE,
                command,
                DispatchOptions::default(),
                |_, id| UserGrant::empty(UserGrantId::new(id)),
            )
        };
        dispatch(add(instance_id, grant_id, org)).unwrap();

        let last = thread::scope(|s| {
            let first = s.spawn(|| dispatch(update(instance_id, grant_id, org, "viewer")));
            thread::sleep(Duration::from_millis(50));
            let second = dispatch(update(instance_id, grant_id, org, "editor")).unwrap();
            first.join().unwrap().unwrap();
            second
        });
        assert_eq!(last.aggregate.version(), 3);

        let mut published = Vec::new();
        for _ in 0..3 {
            let env = sub.recv_timeout(Duration::from_secs(2)).unwrap();
            published.push(env.sequence_number());
            view.apply_envelope(&env).unwrap();
        }
        assert_eq!(published, vec![1, 2, 3]);

        let rm = view.get(instance_id, &grant_id).unwrap();
        assert_eq!(rm.sequence, 3);
        assert_eq!(rm.role_keys, vec!["editor".to_string()]);
    }

    #[test]
    fn domain_errors_are_classified() {
        let (dispatcher, _bus) = setup();
        let instance_id = InstanceId::new();
        let grant_id = UserGrantId::generate();

        let err = run(&dispatcher, instance_id, grant_id, update(instance_id, grant_id, OrgId::new(), "x"), DispatchOptions::default()).unwrap_err();
        assert!(matches!(err, DispatchError::NotFound));
    }
}

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, InstanceId, OrgId, ProjectGrantId,
    ProjectId, ResourceOwner, UserId,
};
use warden_events::Event;

/// Stream type recorded next to every user grant event.
pub const AGGREGATE_TYPE: &str = "user.grant";

/// User grant identifier (instance-scoped via `instance_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserGrantId(pub AggregateId);

impl UserGrantId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.0
    }
}

impl core::fmt::Display for UserGrantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for UserGrantId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// How a grant reaches its project.
///
/// For `ViaProjectGrant` the project is the one the project grant delegates,
/// resolved when the grant is added.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum GrantScope {
    DirectProject {
        project_id: ProjectId,
    },
    ViaProjectGrant {
        project_grant_id: ProjectGrantId,
        project_id: ProjectId,
    },
}

impl GrantScope {
    pub fn project_id(&self) -> ProjectId {
        match self {
            GrantScope::DirectProject { project_id }
            | GrantScope::ViaProjectGrant { project_id, .. } => *project_id,
        }
    }

    pub fn project_grant_id(&self) -> Option<ProjectGrantId> {
        match self {
            GrantScope::DirectProject { .. } => None,
            GrantScope::ViaProjectGrant { project_grant_id, .. } => Some(*project_grant_id),
        }
    }
}

/// Lifecycle of a user grant. `Removed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserGrantState {
    Active,
    Inactive,
    Removed,
}

/// Trim, reject empties and collapse duplicates, keeping first-appearance order.
pub fn normalize_role_keys<S: AsRef<str>>(keys: &[S]) -> Result<Vec<String>, DomainError> {
    if keys.is_empty() {
        return Err(DomainError::invalid_argument("role keys must not be empty"));
    }

    let mut seen = BTreeSet::new();
    let mut normalized = Vec::with_capacity(keys.len());
    for key in keys {
        let key = key.as_ref().trim();
        if key.is_empty() {
            return Err(DomainError::invalid_argument("role key must not be blank"));
        }
        if seen.insert(key.to_string()) {
            normalized.push(key.to_string());
        }
    }
    Ok(normalized)
}

/// Aggregate root: UserGrant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserGrant {
    id: UserGrantId,
    instance_id: Option<InstanceId>,
    user_id: Option<UserId>,
    scope: Option<GrantScope>,
    role_keys: Vec<String>,
    state: UserGrantState,
    resource_owner: Option<OrgId>,
    creation_date: Option<DateTime<Utc>>,
    change_date: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl UserGrant {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: UserGrantId) -> Self {
        Self {
            id,
            instance_id: None,
            user_id: None,
            scope: None,
            role_keys: Vec::new(),
            state: UserGrantState::Active,
            resource_owner: None,
            creation_date: None,
            change_date: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> UserGrantId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        self.instance_id
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn scope(&self) -> Option<GrantScope> {
        self.scope
    }

    pub fn role_keys(&self) -> &[String] {
        &self.role_keys
    }

    pub fn state(&self) -> UserGrantState {
        self.state
    }

    pub fn resource_owner(&self) -> Option<ResourceOwner> {
        self.resource_owner.map(ResourceOwner::Organization)
    }

    pub fn creation_date(&self) -> Option<DateTime<Utc>> {
        self.creation_date
    }

    pub fn change_date(&self) -> Option<DateTime<Utc>> {
        self.change_date
    }
}

impl AggregateRoot for UserGrant {
    type Id = UserGrantId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AddUserGrant.
///
/// `resource_owner` is the caller's organization; the new grant belongs to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddUserGrant {
    pub instance_id: InstanceId,
    pub grant_id: UserGrantId,
    pub user_id: UserId,
    pub scope: GrantScope,
    pub role_keys: Vec<String>,
    pub resource_owner: OrgId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateUserGrant (replaces the role keys).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserGrant {
    pub instance_id: InstanceId,
    pub grant_id: UserGrantId,
    pub resource_owner: OrgId,
    pub role_keys: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateUserGrant {
    pub instance_id: InstanceId,
    pub grant_id: UserGrantId,
    pub resource_owner: OrgId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactivateUserGrant {
    pub instance_id: InstanceId,
    pub grant_id: UserGrantId,
    pub resource_owner: OrgId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveUserGrant {
    pub instance_id: InstanceId,
    pub grant_id: UserGrantId,
    pub resource_owner: OrgId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserGrantCommand {
    Add(AddUserGrant),
    Update(UpdateUserGrant),
    Deactivate(DeactivateUserGrant),
    Reactivate(ReactivateUserGrant),
    Remove(RemoveUserGrant),
}

/// Event: UserGrantAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGrantAdded {
    pub instance_id: InstanceId,
    pub grant_id: UserGrantId,
    pub user_id: UserId,
    pub scope: GrantScope,
    pub role_keys: Vec<String>,
    pub resource_owner: OrgId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UserGrantChanged (full replacement of the role keys).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGrantChanged {
    pub instance_id: InstanceId,
    pub grant_id: UserGrantId,
    pub role_keys: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGrantDeactivated {
    pub instance_id: InstanceId,
    pub grant_id: UserGrantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGrantReactivated {
    pub instance_id: InstanceId,
    pub grant_id: UserGrantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGrantRemoved {
    pub instance_id: InstanceId,
    pub grant_id: UserGrantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserGrantEvent {
    Added(UserGrantAdded),
    Changed(UserGrantChanged),
    Deactivated(UserGrantDeactivated),
    Reactivated(UserGrantReactivated),
    Removed(UserGrantRemoved),
}

impl Event for UserGrantEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserGrantEvent::Added(_) => "user.grant.added",
            UserGrantEvent::Changed(_) => "user.grant.changed",
            UserGrantEvent::Deactivated(_) => "user.grant.deactivated",
            UserGrantEvent::Reactivated(_) => "user.grant.reactivated",
            UserGrantEvent::Removed(_) => "user.grant.removed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserGrantEvent::Added(e) => e.occurred_at,
            UserGrantEvent::Changed(e) => e.occurred_at,
            UserGrantEvent::Deactivated(e) => e.occurred_at,
            UserGrantEvent::Reactivated(e) => e.occurred_at,
            UserGrantEvent::Removed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for UserGrant {
    type Command = UserGrantCommand;
    type Event = UserGrantEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UserGrantEvent::Added(e) => {
                self.id = e.grant_id;
                self.instance_id = Some(e.instance_id);
                self.user_id = Some(e.user_id);
                self.scope = Some(e.scope);
                self.role_keys = e.role_keys.clone();
                self.state = UserGrantState::Active;
                self.resource_owner = Some(e.resource_owner);
                self.creation_date = Some(e.occurred_at);
                self.created = true;
            }
            UserGrantEvent::Changed(e) => {
                self.role_keys = e.role_keys.clone();
            }
            UserGrantEvent::Deactivated(_) => {
                self.state = UserGrantState::Inactive;
            }
            UserGrantEvent::Reactivated(_) => {
                self.state = UserGrantState::Active;
            }
            UserGrantEvent::Removed(_) => {
                self.state = UserGrantState::Removed;
            }
        }

        self.change_date = Some(event.occurred_at());
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UserGrantCommand::Add(cmd) => self.handle_add(cmd),
            UserGrantCommand::Update(cmd) => self.handle_update(cmd),
            UserGrantCommand::Deactivate(cmd) => self.handle_deactivate(cmd),
            UserGrantCommand::Reactivate(cmd) => self.handle_reactivate(cmd),
            UserGrantCommand::Remove(cmd) => self.handle_remove(cmd),
        }
    }
}

impl UserGrant {
    /// A grant that is absent, removed, in another instance or owned by
    /// another organization is reported as not found.
    fn ensure_visible(
        &self,
        instance_id: InstanceId,
        grant_id: UserGrantId,
        org: OrgId,
    ) -> Result<(), DomainError> {
        if !self.created || self.state == UserGrantState::Removed {
            return Err(DomainError::not_found());
        }
        if self.instance_id != Some(instance_id) || self.resource_owner != Some(org) {
            return Err(DomainError::not_found());
        }
        if self.id != grant_id {
            return Err(DomainError::invariant("grant_id mismatch"));
        }
        Ok(())
    }

    fn handle_add(&self, cmd: &AddUserGrant) -> Result<Vec<UserGrantEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("user grant already exists"));
        }
        let role_keys = normalize_role_keys(&cmd.role_keys)?;

        Ok(vec![UserGrantEvent::Added(UserGrantAdded {
            instance_id: cmd.instance_id,
            grant_id: cmd.grant_id,
            user_id: cmd.user_id,
            scope: cmd.scope,
            role_keys,
            resource_owner: cmd.resource_owner,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateUserGrant) -> Result<Vec<UserGrantEvent>, DomainError> {
        self.ensure_visible(cmd.instance_id, cmd.grant_id, cmd.resource_owner)?;
        let role_keys = normalize_role_keys(&cmd.role_keys)?;

        let current: BTreeSet<&str> = self.role_keys.iter().map(String::as_str).collect();
        let requested: BTreeSet<&str> = role_keys.iter().map(String::as_str).collect();
        if current == requested {
            return Ok(vec![]);
        }

        Ok(vec![UserGrantEvent::Changed(UserGrantChanged {
            instance_id: cmd.instance_id,
            grant_id: cmd.grant_id,
            role_keys,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(
        &self,
        cmd: &DeactivateUserGrant,
    ) -> Result<Vec<UserGrantEvent>, DomainError> {
        self.ensure_visible(cmd.instance_id, cmd.grant_id, cmd.resource_owner)?;

        if self.state != UserGrantState::Active {
            return Err(DomainError::failed_precondition("user grant is not active"));
        }

        Ok(vec![UserGrantEvent::Deactivated(UserGrantDeactivated {
            instance_id: cmd.instance_id,
            grant_id: cmd.grant_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reactivate(
        &self,
        cmd: &ReactivateUserGrant,
    ) -> Result<Vec<UserGrantEvent>, DomainError> {
        self.ensure_visible(cmd.instance_id, cmd.grant_id, cmd.resource_owner)?;

        if self.state != UserGrantState::Inactive {
            return Err(DomainError::failed_precondition("user grant is not inactive"));
        }

        Ok(vec![UserGrantEvent::Reactivated(UserGrantReactivated {
            instance_id: cmd.instance_id,
            grant_id: cmd.grant_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove(&self, cmd: &RemoveUserGrant) -> Result<Vec<UserGrantEvent>, DomainError> {
        self.ensure_visible(cmd.instance_id, cmd.grant_id, cmd.resource_owner)?;

        Ok(vec![UserGrantEvent::Removed(UserGrantRemoved {
            instance_id: cmd.instance_id,
            grant_id: cmd.grant_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_instance_id() -> InstanceId {
        InstanceId::new()
    }

    fn test_grant_id() -> UserGrantId {
        UserGrantId::generate()
    }

    fn keys(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|k| k.to_string()).collect()
    }

    struct Fixture {
        instance_id: InstanceId,
        grant_id: UserGrantId,
        org: OrgId,
        grant: UserGrant,
    }

    impl Fixture {
        /// An added, active grant on a direct project.
        fn active(role_keys: &[&str]) -> Self {
            let instance_id = test_instance_id();
            let grant_id = test_grant_id();
            let org = OrgId::new();
            let mut grant = UserGrant::empty(grant_id);
            let events = grant
                .handle(&UserGrantCommand::Add(AddUserGrant {
                    instance_id,
                    grant_id,
                    user_id: UserId::new(),
                    scope: GrantScope::DirectProject { project_id: ProjectId::new() },
                    role_keys: keys(role_keys),
                    resource_owner: org,
                    occurred_at: Utc::now(),
                }))
                .unwrap();
            for e in &events {
                grant.apply(e);
            }
            Self { instance_id, grant_id, org, grant }
        }

        fn run(&mut self, command: UserGrantCommand) -> Result<usize, DomainError> {
            Ok(warden_events::execute(&mut self.grant, &command)?.len())
        }

        fn update(&self, role_keys: &[&str]) -> UserGrantCommand {
            UserGrantCommand::Update(UpdateUserGrant {
                instance_id: self.instance_id,
                grant_id: self.grant_id,
                resource_owner: self.org,
                role_keys: keys(role_keys),
                occurred_at: Utc::now(),
            })
        }

        fn deactivate(&self) -> UserGrantCommand {
            UserGrantCommand::Deactivate(DeactivateUserGrant {
                instance_id: self.instance_id,
                grant_id: self.grant_id,
                resource_owner: self.org,
                occurred_at: Utc::now(),
            })
        }

        fn reactivate(&self) -> UserGrantCommand {
            UserGrantCommand::Reactivate(ReactivateUserGrant {
                instance_id: self.instance_id,
                grant_id: self.grant_id,
                resource_owner: self.org,
                occurred_at: Utc::now(),
            })
        }

        fn remove(&self) -> UserGrantCommand {
            UserGrantCommand::Remove(RemoveUserGrant {
                instance_id: self.instance_id,
                grant_id: self.grant_id,
                resource_owner: self.org,
                occurred_at: Utc::now(),
            })
        }
    }

    #[test]
    fn add_creates_active_grant_at_sequence_one() {
        let fx = Fixture::active(&["admin"]);
        assert_eq!(fx.grant.version(), 1);
        assert_eq!(fx.grant.state(), UserGrantState::Active);
        assert_eq!(fx.grant.role_keys(), &["admin".to_string()]);
        assert_eq!(fx.grant.resource_owner(), Some(ResourceOwner::Organization(fx.org)));
        assert!(fx.grant.creation_date().is_some());
    }

    #[test]
    fn add_rejects_empty_role_keys() {
        let grant = UserGrant::empty(test_grant_id());
        let err = grant
            .handle(&UserGrantCommand::Add(AddUserGrant {
                instance_id: test_instance_id(),
                grant_id: *grant.id(),
                user_id: UserId::new(),
                scope: GrantScope::DirectProject { project_id: ProjectId::new() },
                role_keys: Vec::new(),
                resource_owner: OrgId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[test]
    fn add_via_project_grant_keeps_both_ids() {
        let grant = UserGrant::empty(test_grant_id());
        let project_id = ProjectId::new();
        let project_grant_id = ProjectGrantId::new();
        let events = grant
            .handle(&UserGrantCommand::Add(AddUserGrant {
                instance_id: test_instance_id(),
                grant_id: *grant.id(),
                user_id: UserId::new(),
                scope: GrantScope::ViaProjectGrant { project_grant_id, project_id },
                role_keys: keys(&["viewer"]),
                resource_owner: OrgId::new(),
                occurred_at: Utc::now(),
            }))
            .unwrap();

        match &events[0] {
            UserGrantEvent::Added(e) => {
                assert_eq!(e.scope.project_id(), project_id);
                assert_eq!(e.scope.project_grant_id(), Some(project_grant_id));
            }
            other => panic!("expected Added, got {other:?}"),
        }
    }

    #[test]
    fn role_keys_are_trimmed_and_deduplicated_in_order() {
        assert_eq!(
            normalize_role_keys(&[" b ", "a", "b", "a "]).unwrap(),
            keys(&["b", "a"])
        );
        assert!(matches!(
            normalize_role_keys(&["a", "  "]),
            Err(DomainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn update_replaces_role_keys() {
        let mut fx = Fixture::active(&["admin"]);
        assert_eq!(fx.run(fx.update(&["viewer"])).unwrap(), 1);
        assert_eq!(fx.grant.version(), 2);
        assert_eq!(fx.grant.role_keys(), &["viewer".to_string()]);
    }

    #[test]
    fn update_with_same_set_is_a_noop() {
        let mut fx = Fixture::active(&["a", "b"]);
        assert_eq!(fx.run(fx.update(&["b", "a", "a"])).unwrap(), 0);
        assert_eq!(fx.grant.version(), 1);
    }

    #[test]
    fn update_rejects_empty_role_keys() {
        let mut fx = Fixture::active(&["a"]);
        let err = fx.run(fx.update(&[])).unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
    }

    #[test]
    fn foreign_org_sees_not_found() {
        let mut fx = Fixture::active(&["a"]);
        fx.org = OrgId::new();
        assert_eq!(fx.run(fx.update(&["b"])).unwrap_err(), DomainError::NotFound);
        assert_eq!(fx.run(fx.deactivate()).unwrap_err(), DomainError::NotFound);
        assert_eq!(fx.run(fx.remove()).unwrap_err(), DomainError::NotFound);
    }

    #[test]
    fn absent_grant_is_not_found() {
        let fx = Fixture::active(&["a"]);
        let empty = UserGrant::empty(fx.grant_id);
        assert_eq!(empty.handle(&fx.deactivate()).unwrap_err(), DomainError::NotFound);
        assert_eq!(empty.handle(&fx.remove()).unwrap_err(), DomainError::NotFound);
    }

    #[test]
    fn deactivate_twice_fails_precondition() {
        let mut fx = Fixture::active(&["a"]);
        fx.run(fx.deactivate()).unwrap();
        assert_eq!(fx.grant.state(), UserGrantState::Inactive);
        assert!(matches!(
            fx.run(fx.deactivate()).unwrap_err(),
            DomainError::FailedPrecondition(_)
        ));
    }

    #[test]
    fn reactivate_requires_inactive() {
        let mut fx = Fixture::active(&["a"]);
        assert!(matches!(
            fx.run(fx.reactivate()).unwrap_err(),
            DomainError::FailedPrecondition(_)
        ));
    }

    #[test]
    fn removed_grant_is_terminal() {
        let mut fx = Fixture::active(&["a"]);
        fx.run(fx.deactivate()).unwrap();
        fx.run(fx.remove()).unwrap();
        assert_eq!(fx.grant.state(), UserGrantState::Removed);

        assert_eq!(fx.run(fx.reactivate()).unwrap_err(), DomainError::NotFound);
        assert_eq!(fx.run(fx.update(&["b"])).unwrap_err(), DomainError::NotFound);
        assert_eq!(fx.run(fx.deactivate()).unwrap_err(), DomainError::NotFound);
        assert_eq!(fx.run(fx.remove()).unwrap_err(), DomainError::NotFound);
        assert_eq!(fx.grant.version(), 3);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone, Copy)]
        enum Op {
            Update,
            Deactivate,
            Reactivate,
            Remove,
        }

        fn any_op() -> impl Strategy<Value = Op> {
            prop_oneof![
                Just(Op::Update),
                Just(Op::Deactivate),
                Just(Op::Reactivate),
                Just(Op::Remove),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

            /// Deactivate then Reactivate restores Active with the same role keys.
            #[test]
            fn deactivate_reactivate_preserves_role_keys(
                role_keys in proptest::collection::vec("[a-z]{1,8}", 1..6),
            ) {
                let raw: Vec<&str> = role_keys.iter().map(String::as_str).collect();
                let mut fx = Fixture::active(&raw);
                let before = fx.grant.role_keys().to_vec();

                fx.run(fx.deactivate()).unwrap();
                fx.run(fx.reactivate()).unwrap();

                prop_assert_eq!(fx.grant.state(), UserGrantState::Active);
                prop_assert_eq!(fx.grant.role_keys(), before.as_slice());
                prop_assert_eq!(fx.grant.version(), 3);
            }

            /// Any operation sequence only walks legal transitions, the
            /// version counts exactly the emitted events, and nothing leaves
            /// `Removed`.
            #[test]
            fn transitions_stay_legal(ops in proptest::collection::vec(any_op(), 0..16)) {
                let mut fx = Fixture::active(&["a"]);
                let mut emitted = 1u64;

                for (i, op) in ops.into_iter().enumerate() {
                    let before = fx.grant.state();
                    let command = match op {
                        Op::Update => fx.update(&[if i % 2 == 0 { "b" } else { "c" }]),
                        Op::Deactivate => fx.deactivate(),
                        Op::Reactivate => fx.reactivate(),
                        Op::Remove => fx.remove(),
                    };
                    if let Ok(n) = fx.run(command) {
                        emitted += n as u64;
                    }
                    let after = fx.grant.state();

                    let legal = before == after
                        || matches!(
                            (before, after),
                            (UserGrantState::Active, UserGrantState::Inactive)
                                | (UserGrantState::Inactive, UserGrantState::Active)
                                | (UserGrantState::Active, UserGrantState::Removed)
                                | (UserGrantState::Inactive, UserGrantState::Removed)
                        );
                    prop_assert!(legal, "illegal transition {:?} -> {:?}", before, after);
                    if before == UserGrantState::Removed {
                        prop_assert_eq!(after, UserGrantState::Removed);
                    }
                }

                prop_assert_eq!(fx.grant.version(), emitted);
            }
        }
    }
}

//! Application services: the operations behind every route.
//!
//! Each operation takes a [`RequestContext`], checks permission before it
//! reads or validates anything, then either dispatches a command (write side)
//! or reads a projection (read side). Read views lag writes; see
//! [`AppServices::wait_for_user_grant`] for read-after-write.

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use warden_auth::{Permission, PermissionEvaluator, ResourceScope, RoleBasedEvaluator};
use warden_core::{
    AggregateId, AggregateRoot, ChangeDetails, ExpectedVersion, ProjectGrantId,
    ProjectId, ResourceOwner, UserId,
};
use warden_events::{EventEnvelope, InMemoryEventBus};
use warden_grants::{
    AddUserGrant, DeactivateUserGrant, GrantScope, ReactivateUserGrant, RemoveUserGrant,
    UpdateUserGrant, UserGrant, UserGrantCommand, UserGrantId, UserGrantState, normalize_role_keys,
};
use warden_idp::{IdentityProviderConfig, IdpActivationPredicates, filter_active};
use warden_infra::command_dispatcher::{CommandDispatcher, DispatchOptions, Dispatched};
use warden_infra::consistency::{RetryPolicy, eventually};
use warden_infra::directory::{InMemoryProjectDirectory, ProjectDirectory};
use warden_infra::event_store::{EventStore, InMemoryEventStore};
use warden_infra::idp_registry::{InMemoryProviderRegistry, ProviderRegistry};
use warden_infra::projections::{
    ProjectionError, SecuritySettingsProjection, SecuritySettingsView, UserGrantList, UserGrantQuery,
    UserGrantReadModel, UserGrantsProjection,
};
use warden_infra::read_model::InMemoryInstanceStore;
use warden_infra::workers::{ProjectionWorker, WorkerHandle};
use warden_settings::{SecuritySettings, SecuritySettingsCommand, SetSecuritySettings};

use crate::context::RequestContext;
use crate::error::ServiceError;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Dispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Bus>;
type GrantsView = UserGrantsProjection<Arc<InMemoryInstanceStore<UserGrantId, UserGrantReadModel>>>;
type SettingsView = SecuritySettingsProjection<Arc<InMemoryInstanceStore<AggregateId, SecuritySettingsView>>>;

/// Upper bound on threads a single bulk remove runs in parallel.
const BULK_REMOVE_WORKERS: usize = 8;

/// Partial settings update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettingsUpdate {
    pub embedded_iframe_enabled: Option<bool>,
    pub allowed_origins: Option<Vec<String>>,
    pub impersonation_enabled: Option<bool>,
}

/// What a new user grant points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantTarget {
    Project(ProjectId),
    ProjectGrant(ProjectGrantId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddUserGrantRequest {
    pub user_id: UserId,
    pub target: GrantTarget,
    pub role_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdpList {
    pub providers: Vec<IdentityProviderConfig>,
    pub total_count: u64,
    /// Last change of the provider configuration, if any.
    pub timestamp: Option<DateTime<Utc>>,
}

/// In-process wiring: event store, bus, projections and their workers.
///
/// Workers stop when the services are dropped.
pub struct AppServices {
    dispatcher: Dispatcher,
    evaluator: Arc<dyn PermissionEvaluator>,
    directory: Arc<InMemoryProjectDirectory>,
    providers: Arc<InMemoryProviderRegistry>,
    grants: Arc<GrantsView>,
    settings: Arc<SettingsView>,
    consistency: RetryPolicy,
    _workers: Vec<WorkerHandle>,
}

impl AppServices {
    pub fn in_memory(consistency: RetryPolicy) -> io::Result<Self> {
        Self::with_evaluator(consistency, Arc::new(RoleBasedEvaluator::default()))
    }

    pub fn with_evaluator(
        consistency: RetryPolicy,
        evaluator: Arc<dyn PermissionEvaluator>,
    ) -> io::Result<Self> {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());

        let grants: Arc<GrantsView> = Arc::new(UserGrantsProjection::new(Arc::new(InMemoryInstanceStore::new())));
        let settings: Arc<SettingsView> =
            Arc::new(SecuritySettingsProjection::new(Arc::new(InMemoryInstanceStore::new())));

        // Subscribe before the dispatcher exists so no commit is missed.
        let g = grants.clone();
        let grants_worker = ProjectionWorker::spawn("projection.user_grants", &bus, None, move |env: EventEnvelope<JsonValue>| {
            g.apply_envelope(&env)
        })?;
        let s = settings.clone();
        let settings_worker = ProjectionWorker::spawn("projection.security_settings", &bus, None, move |env: EventEnvelope<JsonValue>| {
            s.apply_envelope(&env)
        })?;

        Ok(Self {
            dispatcher: CommandDispatcher::new(store, bus),
            evaluator,
            directory: Arc::new(InMemoryProjectDirectory::new()),
            providers: Arc::new(InMemoryProviderRegistry::new()),
            grants,
            settings,
            consistency,
            _workers: vec![grants_worker, settings_worker],
        })
    }

    /// Projects and project grants known to the services.
    pub fn directory(&self) -> &InMemoryProjectDirectory {
        &self.directory
    }

    /// Identity providers and their login-policy state.
    pub fn providers(&self) -> &InMemoryProviderRegistry {
        &self.providers
    }

    /// Check `action` at `scope` for the caller; denials are logged with
    /// the evaluator's explanation.
    pub fn authorize(
        &self,
        ctx: &RequestContext,
        action: &Permission,
        scope: ResourceScope,
    ) -> Result<(), ServiceError> {
        if let Err(err) = self.evaluator.check(ctx.caller(), action, &scope) {
            let explanation = self.evaluator.explain(ctx.caller(), action, &scope);
            info!(
                principal_id = %explanation.principal_id,
                instance_id = %explanation.instance_id,
                action = %action,
                scope = %scope,
                reason = %explanation.reason,
                ignored_memberships = explanation.ignored_memberships,
                "permission denied"
            );
            return Err(err.into());
        }
        Ok(())
    }

    pub fn org_scope(ctx: &RequestContext) -> ResourceScope {
        ResourceScope::Organization { org: ctx.org_id() }
    }

    fn options(ctx: &RequestContext) -> DispatchOptions {
        DispatchOptions::default().with_deadline(ctx.deadline())
    }

    // --- security settings -------------------------------------------------

    pub fn get_security_settings(&self, ctx: &RequestContext) -> Result<SecuritySettingsView, ServiceError> {
        self.authorize(ctx, &Permission::IAM_POLICY_READ, ResourceScope::Instance)?;
        ctx.check_deadline()?;
        Ok(self.settings.get(ctx.instance_id()))
    }

    pub fn set_security_settings(
        &self,
        ctx: &RequestContext,
        update: SecuritySettingsUpdate,
    ) -> Result<ChangeDetails, ServiceError> {
        self.authorize(ctx, &Permission::IAM_POLICY_WRITE, ResourceScope::Instance)?;

        let instance_id = ctx.instance_id();
        let command = SecuritySettingsCommand::Set(SetSecuritySettings {
            instance_id,
            embedded_iframe_enabled: update.embedded_iframe_enabled,
            allowed_origins: update.allowed_origins,
            impersonation_enabled: update.impersonation_enabled,
            occurred_at: Utc::now(),
        });

        let outcome = self.dispatcher.dispatch(
            instance_id,
            warden_settings::settings_aggregate_id(instance_id),
            warden_settings::AGGREGATE_TYPE,
            command,
            Self::options(ctx),
            |instance, _| SecuritySettings::for_instance(instance),
        )?;

        let change_date = outcome
            .aggregate
            .change_date()
            .ok_or_else(|| ServiceError::internal("settings without change date"))?;
        Ok(ChangeDetails {
            sequence: outcome.aggregate.version(),
            change_date,
            resource_owner: ResourceOwner::Instance(instance_id),
        })
    }

    // --- user grants: commands -----------------------------------------------

    pub fn add_user_grant(
        &self,
        ctx: &RequestContext,
        request: AddUserGrantRequest,
    ) -> Result<(UserGrantId, ChangeDetails), ServiceError> {
        let instance_id = ctx.instance_id();
        let org = ctx.org_id();

        let scope = match request.target {
            GrantTarget::Project(project_id) => {
                self.authorize(
                    ctx,
                    &Permission::USER_GRANT_WRITE,
                    ResourceScope::Project { org, project: project_id },
                )?;
                normalize_role_keys(&request.role_keys)?;

                match self.directory.project(instance_id, project_id) {
                    Some(project) if project.org == org => GrantScope::DirectProject { project_id },
                    _ => return Err(ServiceError::NotFound),
                }
            }
            GrantTarget::ProjectGrant(grant) => {
                // An unknown project grant is checked at the caller's
                // organization so the answer does not depend on existence.
                let record = self.directory.project_grant(instance_id, grant);
                let check_scope = match record {
                    Some(r) => ResourceScope::ProjectGrant { org, project: r.project_id, grant },
                    None => Self::org_scope(ctx),
                };
                self.authorize(ctx, &Permission::USER_GRANT_WRITE, check_scope)?;
                normalize_role_keys(&request.role_keys)?;

                let record = record
                    .filter(|r| r.granted_org == org)
                    .ok_or(ServiceError::NotFound)?;
                if !record.active {
                    return Err(ServiceError::FailedPrecondition("project grant is not active".to_string()));
                }
                GrantScope::ViaProjectGrant {
                    project_grant_id: grant,
                    project_id: record.project_id,
                }
            }
        };

        let grant_id = UserGrantId::generate();
        let command = UserGrantCommand::Add(AddUserGrant {
            instance_id,
            grant_id,
            user_id: request.user_id,
            scope,
            role_keys: request.role_keys,
            resource_owner: org,
            occurred_at: Utc::now(),
        });
        let outcome = self.dispatch_grant(ctx, grant_id, command, ExpectedVersion::Exact(0))?;
        info!(%instance_id, %grant_id, "user grant added");
        Ok((grant_id, grant_details(&outcome)?))
    }

    pub fn update_user_grant(
        &self,
        ctx: &RequestContext,
        grant_id: UserGrantId,
        role_keys: Vec<String>,
        expected_sequence: Option<u64>,
    ) -> Result<ChangeDetails, ServiceError> {
        self.authorize(ctx, &Permission::USER_GRANT_WRITE, Self::org_scope(ctx))?;

        let command = UserGrantCommand::Update(UpdateUserGrant {
            instance_id: ctx.instance_id(),
            grant_id,
            resource_owner: ctx.org_id(),
            role_keys,
            occurred_at: Utc::now(),
        });
        let outcome = self.dispatch_grant(ctx, grant_id, command, expected_sequence.into())?;
        grant_details(&outcome)
    }

    pub fn deactivate_user_grant(
        &self,
        ctx: &RequestContext,
        grant_id: UserGrantId,
    ) -> Result<ChangeDetails, ServiceError> {
        self.authorize(ctx, &Permission::USER_GRANT_WRITE, Self::org_scope(ctx))?;

        let command = UserGrantCommand::Deactivate(DeactivateUserGrant {
            instance_id: ctx.instance_id(),
            grant_id,
            resource_owner: ctx.org_id(),
            occurred_at: Utc::now(),
        });
        let outcome = self.dispatch_grant(ctx, grant_id, command, ExpectedVersion::Any)?;
        grant_details(&outcome)
    }

    pub fn reactivate_user_grant(
        &self,
        ctx: &RequestContext,
        grant_id: UserGrantId,
    ) -> Result<ChangeDetails, ServiceError> {
        self.authorize(ctx, &Permission::USER_GRANT_WRITE, Self::org_scope(ctx))?;

        let command = UserGrantCommand::Reactivate(ReactivateUserGrant {
            instance_id: ctx.instance_id(),
            grant_id,
            resource_owner: ctx.org_id(),
            occurred_at: Utc::now(),
        });
        let outcome = self.dispatch_grant(ctx, grant_id, command, ExpectedVersion::Any)?;
        grant_details(&outcome)
    }

    pub fn remove_user_grant(
        &self,
        ctx: &RequestContext,
        grant_id: UserGrantId,
    ) -> Result<ChangeDetails, ServiceError> {
        self.authorize(ctx, &Permission::USER_GRANT_DELETE, Self::org_scope(ctx))?;
        self.remove_authorized(ctx, grant_id)
    }

    /// Remove each grant independently; failures are logged, not returned.
    ///
    /// Every removal is its own command, so a deadline expiring midway can
    /// leave some grants removed and others not.
    pub fn bulk_remove_user_grant(
        &self,
        ctx: &RequestContext,
        grant_ids: Vec<UserGrantId>,
    ) -> Result<(), ServiceError> {
        self.authorize(ctx, &Permission::USER_GRANT_DELETE, Self::org_scope(ctx))?;
        if grant_ids.is_empty() {
            return Err(ServiceError::invalid_argument("grant_ids must not be empty"));
        }

        let mut seen = HashSet::new();
        let unique: Vec<UserGrantId> = grant_ids.into_iter().filter(|id| seen.insert(*id)).collect();

        let remove_all = |ids: &[UserGrantId]| {
            for grant_id in ids {
                if let Err(err) = self.remove_authorized(ctx, *grant_id) {
                    warn!(
                        instance_id = %ctx.instance_id(),
                        %grant_id,
                        error = %err,
                        "bulk remove: user grant not removed"
                    );
                }
            }
        };

        let chunk_len = unique.len().div_ceil(BULK_REMOVE_WORKERS);
        thread::scope(|s| {
            for (n, chunk) in unique.chunks(chunk_len).enumerate() {
                let spawned = thread::Builder::new()
                    .name(format!("bulk-remove-{n}"))
                    .spawn_scoped(s, move || remove_all(chunk));
                if let Err(err) = spawned {
                    warn!(error = %err, "bulk remove: worker spawn failed, removing inline");
                    remove_all(chunk);
                }
            }
        });

        debug!(instance_id = %ctx.instance_id(), count = unique.len(), "bulk remove finished");
        Ok(())
    }

    fn remove_authorized(&self, ctx: &RequestContext, grant_id: UserGrantId) -> Result<ChangeDetails, ServiceError> {
        let command = UserGrantCommand::Remove(RemoveUserGrant {
            instance_id: ctx.instance_id(),
            grant_id,
            resource_owner: ctx.org_id(),
            occurred_at: Utc::now(),
        });
        let outcome = self.dispatch_grant(ctx, grant_id, command, ExpectedVersion::Any)?;
        grant_details(&outcome)
    }

    fn dispatch_grant(
        &self,
        ctx: &RequestContext,
        grant_id: UserGrantId,
        command: UserGrantCommand,
        expected: ExpectedVersion,
    ) -> Result<Dispatched<UserGrant>, ServiceError> {
        Ok(self.dispatcher.dispatch(
            ctx.instance_id(),
            grant_id.aggregate_id(),
            warden_grants::AGGREGATE_TYPE,
            command,
            Self::options(ctx).expecting(expected),
            |_, id| UserGrant::empty(UserGrantId::new(id)),
        )?)
    }

    // --- user grants: queries ----------------------------------------------

    /// Grants of the caller's organization. A `resource_owner` filter in the
    /// query is replaced by the caller's organization.
    pub fn list_user_grants(
        &self,
        ctx: &RequestContext,
        mut query: UserGrantQuery,
    ) -> Result<UserGrantList, ServiceError> {
        let org = ctx.org_id();
        let scope = match query.project_id {
            Some(project) => ResourceScope::Project { org, project },
            None => Self::org_scope(ctx),
        };
        self.authorize(ctx, &Permission::USER_GRANT_READ, scope)?;
        ctx.check_deadline()?;

        query.resource_owner = Some(org);
        Ok(self.grants.list(ctx.instance_id(), &query))
    }

    pub fn get_user_grant_by_id(
        &self,
        ctx: &RequestContext,
        grant_id: UserGrantId,
    ) -> Result<UserGrantReadModel, ServiceError> {
        self.authorize(ctx, &Permission::USER_GRANT_READ, Self::org_scope(ctx))?;
        ctx.check_deadline()?;

        self.grants
            .get(ctx.instance_id(), &grant_id)
            .filter(|g| visible_to(ctx, g))
            .ok_or(ServiceError::NotFound)
    }

    /// Like [`Self::get_user_grant_by_id`], but first waits until the view has
    /// processed `min_sequence` for this grant.
    ///
    /// Bounded by the configured consistency window and the request deadline.
    pub fn wait_for_user_grant(
        &self,
        ctx: &RequestContext,
        grant_id: UserGrantId,
        min_sequence: u64,
    ) -> Result<UserGrantReadModel, ServiceError> {
        self.authorize(ctx, &Permission::USER_GRANT_READ, Self::org_scope(ctx))?;

        let mut policy = self.consistency;
        if let Some(left) = ctx.remaining() {
            policy.max_wait = policy.max_wait.min(left);
        }

        let instance_id = ctx.instance_id();
        let started = Instant::now();
        let grant = eventually(&policy, || match self.grants.get(instance_id, &grant_id) {
            Some(g) if g.sequence >= min_sequence => Ok(g),
            other => Err(other.map(|g| g.sequence)),
        })
        .map_err(|err| {
            if ctx.remaining().is_some_and(|left| left.is_zero()) {
                ServiceError::DeadlineExceeded
            } else {
                ServiceError::from(err)
            }
        })?;
        debug!(%instance_id, %grant_id, min_sequence, waited = ?started.elapsed(), "read view caught up");

        Some(grant)
            .filter(|g| visible_to(ctx, g))
            .ok_or(ServiceError::NotFound)
    }

    // --- identity providers -------------------------------------------------

    pub fn get_active_identity_providers(
        &self,
        ctx: &RequestContext,
        predicates: IdpActivationPredicates,
    ) -> Result<IdpList, ServiceError> {
        self.authorize(ctx, &Permission::POLICY_READ, Self::org_scope(ctx))?;
        ctx.check_deadline()?;

        let snapshot = self.providers.login_providers(ctx.instance_id())?;
        let providers = filter_active(&snapshot.providers, &predicates);
        Ok(IdpList {
            total_count: providers.len() as u64,
            timestamp: snapshot.changed_at,
            providers,
        })
    }

    // --- maintenance --------------------------------------------------------

    /// Drop and rebuild this instance's read views from the event store.
    pub fn rebuild_read_models(&self, ctx: &RequestContext) -> Result<(), ServiceError> {
        self.authorize(ctx, &Permission::IAM_POLICY_WRITE, ResourceScope::Instance)?;
        ctx.check_deadline()?;

        let instance_id = ctx.instance_id();
        // Each projection snapshots the store while its worker is held off,
        // so anything committed meanwhile is applied after the swap.
        let load = || -> Result<Vec<EventEnvelope<JsonValue>>, ProjectionError> {
            let stored = self
                .dispatcher
                .store()
                .load_instance(instance_id)
                .map_err(|e| ProjectionError::Unavailable(e.to_string()))?;
            Ok(stored.iter().map(|e| e.to_envelope()).collect())
        };

        self.grants.rebuild_with(load)?;
        self.settings.rebuild_with(load)?;
        info!(%instance_id, "read models rebuilt");
        Ok(())
    }
}

fn visible_to(ctx: &RequestContext, grant: &UserGrantReadModel) -> bool {
    grant.state != UserGrantState::Removed
        && grant.resource_owner == ResourceOwner::Organization(ctx.org_id())
}

fn grant_details(outcome: &Dispatched<UserGrant>) -> Result<ChangeDetails, ServiceError> {
    let grant = &outcome.aggregate;
    match (grant.resource_owner(), grant.change_date()) {
        (Some(resource_owner), Some(change_date)) => Ok(ChangeDetails {
            sequence: grant.version(),
            change_date,
            resource_owner,
        }),
        _ => Err(ServiceError::internal("user grant without owner or change date")),
    }
}

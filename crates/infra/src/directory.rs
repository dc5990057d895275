//! Project and project-grant lookups needed to validate user grants.
//!
//! Projects are managed by another part of the system; the grant services
//! only need to know who owns a project and whether a project grant exists
//! and is active.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use warden_core::{InstanceId, OrgId, ProjectGrantId, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub org: OrgId,
}

/// A project shared by `project_org` with `granted_org`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectGrantRecord {
    pub id: ProjectGrantId,
    pub project_id: ProjectId,
    pub project_org: OrgId,
    pub granted_org: OrgId,
    pub active: bool,
}

pub trait ProjectDirectory: Send + Sync {
    fn project(&self, instance_id: InstanceId, project_id: ProjectId) -> Option<ProjectRecord>;

    fn project_grant(
        &self,
        instance_id: InstanceId,
        project_grant_id: ProjectGrantId,
    ) -> Option<ProjectGrantRecord>;
}

impl<D> ProjectDirectory for Arc<D>
where
    D: ProjectDirectory + ?Sized,
{
    fn project(&self, instance_id: InstanceId, project_id: ProjectId) -> Option<ProjectRecord> {
        (**self).project(instance_id, project_id)
    }

    fn project_grant(
        &self,
        instance_id: InstanceId,
        project_grant_id: ProjectGrantId,
    ) -> Option<ProjectGrantRecord> {
        (**self).project_grant(instance_id, project_grant_id)
    }
}

#[derive(Debug, Default)]
struct InstanceDirectory {
    projects: HashMap<ProjectId, ProjectRecord>,
    grants: HashMap<ProjectGrantId, ProjectGrantRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryProjectDirectory {
    inner: RwLock<HashMap<InstanceId, InstanceDirectory>>,
}

impl InMemoryProjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_project(&self, instance_id: InstanceId, org: OrgId) -> ProjectId {
        let id = ProjectId::new();
        if let Ok(mut map) = self.inner.write() {
            map.entry(instance_id)
                .or_default()
                .projects
                .insert(id, ProjectRecord { id, org });
        }
        id
    }

    /// Share `project_id` with `granted_org`. Returns `None` for unknown projects.
    pub fn add_project_grant(
        &self,
        instance_id: InstanceId,
        project_id: ProjectId,
        granted_org: OrgId,
    ) -> Option<ProjectGrantId> {
        let mut map = self.inner.write().ok()?;
        let dir = map.get_mut(&instance_id)?;
        let project = *dir.projects.get(&project_id)?;

        let id = ProjectGrantId::new();
        dir.grants.insert(
            id,
            ProjectGrantRecord {
                id,
                project_id,
                project_org: project.org,
                granted_org,
                active: true,
            },
        );
        Some(id)
    }

    /// Returns false when the grant is unknown.
    pub fn set_project_grant_active(
        &self,
        instance_id: InstanceId,
        project_grant_id: ProjectGrantId,
        active: bool,
    ) -> bool {
        let Ok(mut map) = self.inner.write() else {
            return false;
        };
        match map
            .get_mut(&instance_id)
            .and_then(|dir| dir.grants.get_mut(&project_grant_id))
        {
            Some(grant) => {
                grant.active = active;
                true
            }
            None => false,
        }
    }
}

impl ProjectDirectory for InMemoryProjectDirectory {
    fn project(&self, instance_id: InstanceId, project_id: ProjectId) -> Option<ProjectRecord> {
        let map = self.inner.read().ok()?;
        map.get(&instance_id)?.projects.get(&project_id).copied()
    }

    fn project_grant(
        &self,
        instance_id: InstanceId,
        project_grant_id: ProjectGrantId,
    ) -> Option<ProjectGrantRecord> {
        let map = self.inner.read().ok()?;
        map.get(&instance_id)?.grants.get(&project_grant_id).copied()
    }
}

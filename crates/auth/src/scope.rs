use serde::{Deserialize, Serialize};

use warden_core::{OrgId, ProjectGrantId, ProjectId};

/// The resource scope an action is evaluated against.
///
/// The hierarchy is instance → organization → project. A project grant is
/// addressed through the organization that received it, since user grants
/// created through it are owned by that organization.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceScope {
    Instance,
    Organization {
        org: OrgId,
    },
    Project {
        org: OrgId,
        project: ProjectId,
    },
    ProjectGrant {
        org: OrgId,
        project: ProjectId,
        grant: ProjectGrantId,
    },
}

impl ResourceScope {
    /// The organization owning the scope (`None` for the instance).
    pub fn owning_org(&self) -> Option<OrgId> {
        match self {
            ResourceScope::Instance => None,
            ResourceScope::Organization { org }
            | ResourceScope::Project { org, .. }
            | ResourceScope::ProjectGrant { org, .. } => Some(*org),
        }
    }

    /// Whether a membership held at `self` applies to `target`.
    ///
    /// - instance covers everything
    /// - an organization covers itself and every project / project grant it owns
    /// - a project covers itself and every grant of that project
    /// - a project grant covers only itself
    pub fn covers(&self, target: &ResourceScope) -> bool {
        match (self, target) {
            (ResourceScope::Instance, _) => true,
            (ResourceScope::Organization { org }, t) => t.owning_org() == Some(*org),
            (ResourceScope::Project { project, .. }, ResourceScope::Project { project: p, .. })
            | (
                ResourceScope::Project { project, .. },
                ResourceScope::ProjectGrant { project: p, .. },
            ) => project == p,
            (
                ResourceScope::ProjectGrant { grant, .. },
                ResourceScope::ProjectGrant { grant: g, .. },
            ) => grant == g,
            _ => false,
        }
    }
}

impl core::fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ResourceScope::Instance => f.write_str("instance"),
            ResourceScope::Organization { org } => write!(f, "org:{org}"),
            ResourceScope::Project { project, .. } => write!(f, "project:{project}"),
            ResourceScope::ProjectGrant { grant, .. } => write!(f, "project_grant:{grant}"),
        }
    }
}

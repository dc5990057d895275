//! Request/response bodies and their mapping to service inputs.

use serde::{Deserialize, Serialize};

use warden_auth::ResourceScope;
use warden_core::{ChangeDetails, OrgId, ProjectGrantId, ProjectId, UserId};
use warden_grants::UserGrantId;

use crate::app::services::{AddUserGrantRequest, GrantTarget};
use crate::error::ServiceError;

#[derive(Debug, Clone, Deserialize)]
pub struct AddUserGrantBody {
    pub user_id: UserId,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub project_grant_id: Option<ProjectGrantId>,
    #[serde(default)]
    pub role_keys: Vec<String>,
}

impl AddUserGrantBody {
    /// Where a body with a bad target is authorized before it is rejected:
    /// the named project, or the caller's organization.
    pub fn fallback_scope(&self, org: OrgId) -> ResourceScope {
        match self.project_id {
            Some(project) => ResourceScope::Project { org, project },
            None => ResourceScope::Organization { org },
        }
    }

    /// Exactly one of `project_id` / `project_grant_id` must be set.
    pub fn into_request(self) -> Result<AddUserGrantRequest, ServiceError> {
        let target = match (self.project_id, self.project_grant_id) {
            (Some(project), None) => GrantTarget::Project(project),
            (None, Some(grant)) => GrantTarget::ProjectGrant(grant),
            (Some(_), Some(_)) => {
                return Err(ServiceError::invalid_argument(
                    "project_id and project_grant_id are mutually exclusive",
                ));
            }
            (None, None) => {
                return Err(ServiceError::invalid_argument(
                    "one of project_id or project_grant_id is required",
                ));
            }
        };
        Ok(AddUserGrantRequest {
            user_id: self.user_id,
            target,
            role_keys: self.role_keys,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUserGrantResponse {
    pub grant_id: UserGrantId,
    pub details: ChangeDetails,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUserGrantBody {
    #[serde(default)]
    pub role_keys: Vec<String>,
    /// Sequence the caller last observed; stale values fail with a conflict.
    #[serde(default)]
    pub expected_sequence: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkRemoveBody {
    #[serde(default)]
    pub grant_ids: Vec<UserGrantId>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct GetUserGrantParams {
    /// Wait until the read view has processed this sequence.
    pub min_sequence: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailsResponse {
    pub details: ChangeDetails,
}

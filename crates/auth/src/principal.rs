use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warden_core::{InstanceId, OrgId};

use crate::{ResourceScope, Role};

/// Identity of an authenticated principal (human user, machine user, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PrincipalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// Roles held by a principal at one resource scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub instance_id: InstanceId,
    pub scope: ResourceScope,
    pub roles: Vec<Role>,
}

/// The authenticated caller of an operation.
///
/// `org_id` is the organization the caller is acting in; commands attribute
/// new resources to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub principal_id: PrincipalId,
    pub instance_id: InstanceId,
    pub org_id: OrgId,
    pub memberships: Vec<Membership>,
}

impl Caller {
    pub fn new(principal_id: PrincipalId, instance_id: InstanceId, org_id: OrgId) -> Self {
        Self {
            principal_id,
            instance_id,
            org_id,
            memberships: Vec::new(),
        }
    }

    /// Add a membership in the caller's own instance.
    pub fn with_membership(mut self, scope: ResourceScope, roles: Vec<Role>) -> Self {
        self.memberships.push(Membership {
            instance_id: self.instance_id,
            scope,
            roles,
        });
        self
    }

    /// Memberships usable for decisions: those of the caller's instance.
    pub fn effective_memberships(&self) -> impl Iterator<Item = &Membership> {
        self.memberships
            .iter()
            .filter(move |m| m.instance_id == self.instance_id)
    }
}

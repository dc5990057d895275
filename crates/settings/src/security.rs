use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use warden_core::{Aggregate, AggregateId, AggregateRoot, DomainError, InstanceId, ResourceOwner};
use warden_events::Event;

pub const AGGREGATE_TYPE: &str = "instance.security_settings";

/// The settings stream of an instance shares the instance's id.
pub fn settings_aggregate_id(instance_id: InstanceId) -> AggregateId {
    AggregateId::from_uuid(*instance_id.as_uuid())
}

/// Trim, reject empty entries, drop duplicates keeping the first occurrence.
pub fn normalize_origins<S: AsRef<str>>(origins: &[S]) -> Result<Vec<String>, DomainError> {
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::with_capacity(origins.len());
    for origin in origins {
        let origin = origin.as_ref().trim();
        if origin.is_empty() {
            return Err(DomainError::invalid_argument("allowed origin must not be blank"));
        }
        if seen.insert(origin.to_string()) {
            normalized.push(origin.to_string());
        }
    }
    Ok(normalized)
}

/// Aggregate root: SecuritySettings.
///
/// Before the first write every field holds its zero value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuritySettings {
    id: AggregateId,
    instance_id: Option<InstanceId>,
    embedded_iframe_enabled: bool,
    allowed_origins: Vec<String>,
    impersonation_enabled: bool,
    change_date: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl SecuritySettings {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            instance_id: None,
            embedded_iframe_enabled: false,
            allowed_origins: Vec::new(),
            impersonation_enabled: false,
            change_date: None,
            version: 0,
            created: false,
        }
    }

    pub fn for_instance(instance_id: InstanceId) -> Self {
        Self::empty(settings_aggregate_id(instance_id))
    }

    pub fn embedded_iframe_enabled(&self) -> bool {
        self.embedded_iframe_enabled
    }

    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    pub fn impersonation_enabled(&self) -> bool {
        self.impersonation_enabled
    }

    pub fn change_date(&self) -> Option<DateTime<Utc>> {
        self.change_date
    }

    pub fn instance_id(&self) -> Option<InstanceId> {
        self.instance_id
    }

    pub fn resource_owner(&self) -> Option<ResourceOwner> {
        self.instance_id.map(ResourceOwner::Instance)
    }
}

impl AggregateRoot for SecuritySettings {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SetSecuritySettings (partial update).
///
/// `None` keeps the current value; `Some(vec![])` clears the origins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSecuritySettings {
    pub instance_id: InstanceId,
    pub embedded_iframe_enabled: Option<bool>,
    pub allowed_origins: Option<Vec<String>>,
    pub impersonation_enabled: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

impl SetSecuritySettings {
    fn is_empty(&self) -> bool {
        self.embedded_iframe_enabled.is_none()
            && self.allowed_origins.is_none()
            && self.impersonation_enabled.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuritySettingsCommand {
    Set(SetSecuritySettings),
}

/// Event: SecuritySettingsSet. Carries only the fields that changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettingsSet {
    pub instance_id: InstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_iframe_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonation_enabled: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecuritySettingsEvent {
    Set(SecuritySettingsSet),
}

impl Event for SecuritySettingsEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SecuritySettingsEvent::Set(_) => "instance.security_settings.set",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SecuritySettingsEvent::Set(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SecuritySettings {
    type Command = SecuritySettingsCommand;
    type Event = SecuritySettingsEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SecuritySettingsEvent::Set(e) => {
                self.instance_id = Some(e.instance_id);
                if let Some(enabled) = e.embedded_iframe_enabled {
                    self.embedded_iframe_enabled = enabled;
                }
                if let Some(origins) = &e.allowed_origins {
                    self.allowed_origins = origins.clone();
                }
                if let Some(enabled) = e.impersonation_enabled {
                    self.impersonation_enabled = enabled;
                }
                self.change_date = Some(e.occurred_at);
                self.created = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SecuritySettingsCommand::Set(cmd) => self.handle_set(cmd),
        }
    }
}

impl SecuritySettings {
    fn handle_set(&self, cmd: &SetSecuritySettings) -> Result<Vec<SecuritySettingsEvent>, DomainError> {
        if cmd.is_empty() {
            return Err(DomainError::invalid_argument(
                "at least one security setting must be supplied",
            ));
        }
        if self.created && self.instance_id != Some(cmd.instance_id) {
            return Err(DomainError::invariant("instance mismatch"));
        }

        let allowed_origins = cmd
            .allowed_origins
            .as_deref()
            .map(normalize_origins)
            .transpose()?;

        // The first write always creates the settings; later writes only
        // record fields whose value actually differs.
        let event = if !self.created {
            SecuritySettingsSet {
                instance_id: cmd.instance_id,
                embedded_iframe_enabled: cmd.embedded_iframe_enabled,
                allowed_origins,
                impersonation_enabled: cmd.impersonation_enabled,
                occurred_at: cmd.occurred_at,
            }
        } else {
            SecuritySettingsSet {
                instance_id: cmd.instance_id,
                embedded_iframe_enabled: cmd
                    .embedded_iframe_enabled
                    .filter(|v| *v != self.embedded_iframe_enabled),
                allowed_origins: allowed_origins.filter(|v| *v != self.allowed_origins),
                impersonation_enabled: cmd
                    .impersonation_enabled
                    .filter(|v| *v != self.impersonation_enabled),
                occurred_at: cmd.occurred_at,
            }
        };

        if self.created
            && event.embedded_iframe_enabled.is_none()
            && event.allowed_origins.is_none()
            && event.impersonation_enabled.is_none()
        {
            return Ok(vec![]);
        }

        Ok(vec![SecuritySettingsEvent::Set(event)])
    }
}

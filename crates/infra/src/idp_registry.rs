//! Identity providers configured per instance and their login-policy state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use warden_core::InstanceId;
use warden_idp::{IdentityProviderConfig, IdpId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("identity provider {0} is not configured")]
    UnknownProvider(IdpId),

    #[error("identity provider {0} is already configured")]
    AlreadyConfigured(IdpId),

    #[error("provider registry unavailable: {0}")]
    Unavailable(String),
}

/// Every provider configured for an instance, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSnapshot {
    pub providers: Vec<IdentityProviderConfig>,
    /// Time of the last configuration or login-policy change.
    pub changed_at: Option<DateTime<Utc>>,
}

pub trait ProviderRegistry: Send + Sync {
    fn login_providers(&self, instance_id: InstanceId) -> Result<ProviderSnapshot, RegistryError>;
}

impl<R> ProviderRegistry for Arc<R>
where
    R: ProviderRegistry + ?Sized,
{
    fn login_providers(&self, instance_id: InstanceId) -> Result<ProviderSnapshot, RegistryError> {
        (**self).login_providers(instance_id)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryProviderRegistry {
    inner: RwLock<HashMap<InstanceId, ProviderSnapshot>>,
}

impl InMemoryProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        instance_id: InstanceId,
        config: IdentityProviderConfig,
    ) -> Result<(), RegistryError> {
        self.modify(instance_id, |snapshot| {
            if snapshot.providers.iter().any(|p| p.id == config.id) {
                return Err(RegistryError::AlreadyConfigured(config.id));
            }
            snapshot.providers.push(config);
            Ok(())
        })
    }

    pub fn attach_to_login_policy(&self, instance_id: InstanceId, id: IdpId) -> Result<(), RegistryError> {
        self.set_active(instance_id, id, true)
    }

    pub fn detach_from_login_policy(&self, instance_id: InstanceId, id: IdpId) -> Result<(), RegistryError> {
        self.set_active(instance_id, id, false)
    }

    fn set_active(&self, instance_id: InstanceId, id: IdpId, active: bool) -> Result<(), RegistryError> {
        self.modify(instance_id, |snapshot| {
            let provider = snapshot
                .providers
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or(RegistryError::UnknownProvider(id))?;
            provider.is_active = active;
            Ok(())
        })
    }

    fn modify(
        &self,
        instance_id: InstanceId,
        f: impl FnOnce(&mut ProviderSnapshot) -> Result<(), RegistryError>,
    ) -> Result<(), RegistryError> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| RegistryError::Unavailable("lock poisoned".to_string()))?;
        let snapshot = map.entry(instance_id).or_default();
        f(snapshot)?;
        snapshot.changed_at = Some(Utc::now());
        Ok(())
    }
}

impl ProviderRegistry for InMemoryProviderRegistry {
    fn login_providers(&self, instance_id: InstanceId) -> Result<ProviderSnapshot, RegistryError> {
        let map = self
            .inner
            .read()
            .map_err(|_| RegistryError::Unavailable("lock poisoned".to_string()))?;
        Ok(map.get(&instance_id).cloned().unwrap_or_default())
    }
}

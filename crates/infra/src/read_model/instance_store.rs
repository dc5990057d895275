use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use warden_core::InstanceId;

/// Instance-isolated key/value store for disposable read models.
pub trait InstanceStore<K, V>: Send + Sync {
    fn get(&self, instance_id: InstanceId, key: &K) -> Option<V>;
    fn upsert(&self, instance_id: InstanceId, key: K, value: V);
    fn list(&self, instance_id: InstanceId) -> Vec<V>;
    /// Drop every record of an instance (rebuild support).
    fn clear_instance(&self, instance_id: InstanceId);
    /// Swap an instance's records for `records` in one step; readers see
    /// either the old set or the new one.
    fn replace_instance(&self, instance_id: InstanceId, records: Vec<(K, V)>);
}

impl<K, V, S> InstanceStore<K, V> for Arc<S>
where
    S: InstanceStore<K, V> + ?Sized,
{
    fn get(&self, instance_id: InstanceId, key: &K) -> Option<V> {
        (**self).get(instance_id, key)
    }

    fn upsert(&self, instance_id: InstanceId, key: K, value: V) {
        (**self).upsert(instance_id, key, value)
    }

    fn list(&self, instance_id: InstanceId) -> Vec<V> {
        (**self).list(instance_id)
    }

    fn clear_instance(&self, instance_id: InstanceId) {
        (**self).clear_instance(instance_id)
    }

    fn replace_instance(&self, instance_id: InstanceId, records: Vec<(K, V)>) {
        (**self).replace_instance(instance_id, records)
    }
}

/// In-memory store, partitioned by instance.
#[derive(Debug)]
pub struct InMemoryInstanceStore<K, V> {
    inner: RwLock<HashMap<InstanceId, HashMap<K, V>>>,
}

impl<K, V> InMemoryInstanceStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryInstanceStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> InstanceStore<K, V> for InMemoryInstanceStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, instance_id: InstanceId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&instance_id)?.get(key).cloned()
    }

    fn upsert(&self, instance_id: InstanceId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.entry(instance_id).or_default().insert(key, value);
        }
    }

    fn list(&self, instance_id: InstanceId) -> Vec<V> {
        let Ok(map) = self.inner.read() else {
            return vec![];
        };
        map.get(&instance_id)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    fn clear_instance(&self, instance_id: InstanceId) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&instance_id);
        }
    }

    fn replace_instance(&self, instance_id: InstanceId, records: Vec<(K, V)>) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(instance_id, records.into_iter().collect());
        }
    }
}

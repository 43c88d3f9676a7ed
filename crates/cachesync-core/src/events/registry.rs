//! Named event buses.
//!
//! Buses are owned by an explicit [`BusRegistry`] value that callers create
//! and pass around. There is no process-wide registry.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::bus::EventBus;
use crate::entity::{EntityKey, EntityValue};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Event bus \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("Event bus \"{0}\" not found")]
    NotFound(String),
}

/// Registry of named buses for one entity type.
pub struct BusRegistry<K, V> {
    buses: DashMap<String, Arc<EventBus<K, V>>>,
}

impl<K: EntityKey, V: EntityValue> BusRegistry<K, V> {
    pub fn new() -> Self {
        Self {
            buses: DashMap::new(),
        }
    }

    /// Add a bus under its own name. Fails if the name is taken.
    pub fn register(&self, bus: EventBus<K, V>) -> Result<Arc<EventBus<K, V>>, RegistryError> {
        let name = bus.name().to_string();
        match self.buses.entry(name.clone()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(name)),
            Entry::Vacant(slot) => {
                let bus = Arc::new(bus);
                slot.insert(bus.clone());
                debug!(bus = %name, "Registered event bus");
                Ok(bus)
            }
        }
    }

    /// Look up a bus by name.
    pub fn get(&self, name: &str) -> Result<Arc<EventBus<K, V>>, RegistryError> {
        self.buses
            .get(name)
            .map(|bus| bus.value().clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Remove a bus from the registry. Subscriptions are left untouched.
    pub fn release(&self, name: &str) -> Option<Arc<EventBus<K, V>>> {
        self.buses.remove(name).map(|(_, bus)| bus)
    }

    /// Names of all registered buses, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.buses.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    /// Shut down and remove every bus.
    pub async fn shutdown_all(&self) {
        let buses: Vec<_> = self
            .buses
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (name, bus) in buses {
            self.buses.remove(&name);
            bus.shutdown().await;
        }
        info!("All event buses shut down");
    }
}

impl<K: EntityKey, V: EntityValue> Default for BusRegistry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::Event;

    #[test]
    fn test_register_and_get() {
        let registry = BusRegistry::<u64, String>::new();
        let bus = registry.register(EventBus::new("users")).unwrap();
        assert_eq!(bus.name(), "users");

        let found = registry.get("users").unwrap();
        assert!(Arc::ptr_eq(&bus, &found));
        assert_eq!(registry.names(), vec!["users".to_string()]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = BusRegistry::<u64, String>::new();
        registry.register(EventBus::new("users")).unwrap();

        let err = registry.register(EventBus::new("users")).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyExists("users".into()));
        assert_eq!(err.to_string(), "Event bus \"users\" already exists");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_frees_name() {
        let registry = BusRegistry::<u64, String>::new();
        registry.register(EventBus::new("users")).unwrap();

        assert!(registry.release("users").is_some());
        assert!(registry.release("users").is_none());
        assert_eq!(
            registry.get("users").unwrap_err(),
            RegistryError::NotFound("users".into())
        );
        assert!(registry.register(EventBus::new("users")).is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let registry = BusRegistry::<u64, String>::new();
        let bus = registry.register(EventBus::new("users")).unwrap();
        registry.register(EventBus::new("orders")).unwrap();
        bus.subscribe_fn("noop", &[], |_event| async { Ok(()) }).await;

        registry.shutdown_all().await;

        assert!(registry.is_empty());
        assert_eq!(bus.subscriber_count().await, 0);
        assert_eq!(bus.publish(Event::deleted(1)).await, 0);
    }
}

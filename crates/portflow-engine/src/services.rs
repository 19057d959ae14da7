//! Per-execution service container
//!
//! A thread-safe map from type to shared instance. Nodes use it to reach
//! capabilities such as a chat client without the graph knowing the
//! concrete types. Trait objects are supported: register an
//! `Arc<dyn ChatClient>` and look it up as `dyn ChatClient`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EngineError, Result};

struct ServiceEntry {
    type_name: &'static str,
    /// Always an `Arc<T>` for the key's `T`
    instance: Box<dyn Any + Send + Sync>,
}

/// Type-keyed service instances
#[derive(Default)]
pub struct ServiceContainer {
    services: RwLock<HashMap<TypeId, ServiceEntry>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any existing instance of the same type
    pub fn register<T: ?Sized + Send + Sync + 'static>(&self, service: Arc<T>) {
        log::debug!("Registered service {}", std::any::type_name::<T>());
        self.services.write().insert(TypeId::of::<T>(), Self::entry(service));
    }

    /// Register a service unless one of the same type exists
    ///
    /// Returns whether the service was inserted.
    pub fn try_register<T: ?Sized + Send + Sync + 'static>(&self, service: Arc<T>) -> bool {
        let mut services = self.services.write();
        if services.contains_key(&TypeId::of::<T>()) {
            return false;
        }
        services.insert(TypeId::of::<T>(), Self::entry(service));
        true
    }

    pub fn is_registered<T: ?Sized + 'static>(&self) -> bool {
        self.services.read().contains_key(&TypeId::of::<T>())
    }

    /// Look up a service, `None` if it is absent
    pub fn get_service<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.instance.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Look up a service that must be present
    pub fn get_required_service<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.get_service::<T>()
            .ok_or_else(|| EngineError::ServiceNotFound(std::any::type_name::<T>().to_string()))
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Type names of registered services, sorted
    pub fn service_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.services.read().values().map(|e| e.type_name).collect();
        names.sort_unstable();
        names
    }

    fn entry<T: ?Sized + Send + Sync + 'static>(service: Arc<T>) -> ServiceEntry {
        ServiceEntry {
            type_name: std::any::type_name::<T>(),
            instance: Box::new(service),
        }
    }
}

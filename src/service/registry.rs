//! Service registry - explicit, registry-per-context service map.
//!
//! The registry is an `Arc` passed to constructors rather than a process-wide
//! singleton, which gives it a clear init/teardown lifecycle and keeps tests
//! from leaking services into each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use super::{Service, ServiceHooks, ServiceStatus};
use crate::types::{Error, Result, ServiceName};

/// Everything needed to register one service.
pub struct ServiceSpec {
    pub name: ServiceName,
    pub dependencies: Vec<ServiceName>,
    pub hooks: Arc<dyn ServiceHooks>,
}

impl fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSpec")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// Administrative view of one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub state: ServiceStatus,
    /// When the current state was entered.
    pub since: DateTime<Utc>,
    pub stop: bool,
    pub dependencies_ready: bool,
    pub service_error: Option<String>,
}

struct Inner {
    /// Registration order, preserved in listings.
    order: Vec<ServiceName>,
    services: HashMap<ServiceName, Arc<Service>>,
}

/// ServiceRegistry manages service registration, lookup, and description.
pub struct ServiceRegistry {
    /// Self-reference handed to services so they can resolve dependency
    /// readiness without keeping the registry alive.
    this: Weak<ServiceRegistry>,
    inner: RwLock<Inner>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            inner: RwLock::new(Inner {
                order: Vec::new(),
                services: HashMap::new(),
            }),
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a service. Names are unique process-wide within one registry;
    /// a duplicate is rejected, never silently merged.
    pub fn register(&self, spec: ServiceSpec) -> Result<Arc<Service>> {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.services.contains_key(&spec.name) {
            return Err(Error::validation(format!(
                "service '{}' is already registered",
                spec.name
            )));
        }
        let registry = self.this.clone();
        let service = Arc::new_cyclic(|this| {
            Service::new(
                spec.name.clone(),
                spec.dependencies,
                spec.hooks,
                registry,
                this.clone(),
            )
        });
        inner.order.push(spec.name.clone());
        inner.services.insert(spec.name, service.clone());
        Ok(service)
    }

    /// Look up a service by name.
    pub fn get(&self, name: &ServiceName) -> Option<Arc<Service>> {
        self.read().services.get(name).cloned()
    }

    /// All service names, in registration order.
    pub fn names(&self) -> Vec<ServiceName> {
        self.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.read().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().services.is_empty()
    }

    /// Describe one service; fails if absent.
    pub fn describe(&self, name: &ServiceName) -> Result<ServiceDescriptor> {
        self.get(name)
            .map(|svc| describe_service(&svc))
            .ok_or_else(|| Error::unknown_service(name.as_str()))
    }

    /// Describe every registered service, in registration order.
    pub fn describe_all(&self) -> Vec<ServiceDescriptor> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.services.get(name))
            .map(|svc| describe_service(svc))
            .collect()
    }
}

fn describe_service(svc: &Service) -> ServiceDescriptor {
    ServiceDescriptor {
        name: svc.name().as_str().to_string(),
        state: svc.status(),
        since: svc.since(),
        stop: svc.stop_requested(),
        dependencies_ready: svc.dependencies_ready(),
        service_error: svc.failure_reason(),
    }
}

//! Services - named units with an explicit lifecycle and guarded access.
//!
//! A [`Service`] owns a state cell (current status, failure reason) and a
//! transition lock that strictly serializes `start()`/`stop()`: a call
//! arriving mid-transition waits for the in-flight transition instead of
//! racing it. Guarded components hold an `Arc<Service>` and wrap every public
//! operation in [`Service::guard`], so adding a new guarded method requires
//! no new safety logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{error, info, warn};

use crate::types::{Error, Result, ServiceName};

mod registry;
mod state;

pub use registry::{ServiceDescriptor, ServiceRegistry, ServiceSpec};
pub use state::ServiceStatus;

/// Startup/shutdown hooks supplied by the component that owns the service.
///
/// `on_stop` must be safe to call after a partial startup: it runs on
/// graceful shutdown and on the teardown that follows a critical failure.
#[async_trait]
pub trait ServiceHooks: Send + Sync {
    async fn on_start(&self) -> Result<()> {
        Ok(())
    }

    async fn on_stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Hooks for services with no startup/shutdown work of their own.
#[derive(Debug, Default)]
pub struct NoopHooks;

#[async_trait]
impl ServiceHooks for NoopHooks {}

struct StateCell {
    status: ServiceStatus,
    failure: Option<String>,
    stop_requested: bool,
    since: DateTime<Utc>,
}

/// A named unit with an explicit lifecycle state and optional dependencies.
pub struct Service {
    name: ServiceName,
    dependencies: Vec<ServiceName>,
    registry: Weak<ServiceRegistry>,
    /// Self-reference for spawning the async teardown after a critical failure.
    this: Weak<Service>,
    hooks: Arc<dyn ServiceHooks>,
    cell: Mutex<StateCell>,
    /// Serializes start/stop so transitions on one service are strictly ordered.
    transition: tokio::sync::Mutex<()>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub(crate) fn new(
        name: ServiceName,
        dependencies: Vec<ServiceName>,
        hooks: Arc<dyn ServiceHooks>,
        registry: Weak<ServiceRegistry>,
        this: Weak<Service>,
    ) -> Self {
        Self {
            name,
            dependencies,
            registry,
            this,
            hooks,
            cell: Mutex::new(StateCell {
                status: ServiceStatus::Created,
                failure: None,
                stop_requested: false,
                since: Utc::now(),
            }),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    fn cell(&self) -> MutexGuard<'_, StateCell> {
        self.cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    pub fn dependencies(&self) -> &[ServiceName] {
        &self.dependencies
    }

    pub fn status(&self) -> ServiceStatus {
        self.cell().status
    }

    /// Last recorded failure, if any. Cleared when the next startup begins.
    pub fn failure_reason(&self) -> Option<String> {
        self.cell().failure.clone()
    }

    /// Whether a stop has been requested since the last startup.
    pub fn stop_requested(&self) -> bool {
        self.cell().stop_requested
    }

    /// When the current state was entered.
    pub fn since(&self) -> DateTime<Utc> {
        self.cell().since
    }

    fn set_status(&self, status: ServiceStatus) {
        let mut cell = self.cell();
        cell.status = status;
        cell.since = Utc::now();
    }

    /// Names of dependencies that are not currently READY.
    ///
    /// A dependency missing from the registry (or a torn-down registry)
    /// counts as unmet.
    pub fn unmet_dependencies(&self) -> Vec<String> {
        let registry = self.registry.upgrade();
        self.dependencies
            .iter()
            .filter(|dep| match registry.as_ref().and_then(|r| r.get(dep)) {
                Some(svc) => svc.status() != ServiceStatus::Ready,
                None => true,
            })
            .map(|dep| dep.as_str().to_string())
            .collect()
    }

    /// True iff every dependency is READY.
    pub fn dependencies_ready(&self) -> bool {
        self.unmet_dependencies().is_empty()
    }

    /// True iff the service itself is READY and all dependencies are READY.
    pub fn is_ready(&self) -> bool {
        self.status() == ServiceStatus::Ready && self.dependencies_ready()
    }

    /// Fail fast unless [`Self::is_ready`] holds.
    pub fn ensure_ready(&self) -> Result<()> {
        let status = self.status();
        let unmet = self.unmet_dependencies();
        if status == ServiceStatus::Ready && unmet.is_empty() {
            Ok(())
        } else {
            Err(Error::NotReady {
                service: self.name.as_str().to_string(),
                state: status,
                unmet,
            })
        }
    }

    /// Run `op` only if the service is ready; the body never executes on
    /// rejection.
    pub async fn guard<T, F>(&self, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_ready()?;
        op.await
    }

    /// Begin startup: INITIALIZING, then READY on hook success or FAILED on
    /// hook error (recorded, not raised - callers observe failure by reading
    /// state).
    ///
    /// A `start()` arriving while a transition is in flight waits for it;
    /// finding the service already READY (or stopping) it returns without
    /// doing work.
    pub async fn start(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        {
            let mut cell = self.cell();
            if !cell.status.can_start() {
                // READY / INITIALIZING / STOPPING: a concurrent caller already
                // did (or is finishing) the work this call wanted.
                return Ok(());
            }
            cell.status = ServiceStatus::Initializing;
            cell.failure = None;
            cell.stop_requested = false;
            cell.since = Utc::now();
        }
        info!(service = %self.name, "service starting");

        match self.hooks.on_start().await {
            Ok(()) => {
                let mut cell = self.cell();
                // A critical failure during startup wins over the hook result.
                if cell.status == ServiceStatus::Initializing {
                    cell.status = ServiceStatus::Ready;
                    cell.since = Utc::now();
                    info!(service = %self.name, "service ready");
                }
            }
            Err(err) => {
                warn!(service = %self.name, error = %err, "service startup failed");
                let mut cell = self.cell();
                cell.failure = Some(err.to_string());
                cell.status = ServiceStatus::Failed;
                cell.since = Utc::now();
            }
        }
        Ok(())
    }

    /// Graceful shutdown: STOPPING, run the shutdown hook, then STOPPED.
    ///
    /// Hook errors are recorded, never fatal to the transition. Stopping an
    /// already-stopped (or never-started) service is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let _transition = self.transition.lock().await;
        {
            let mut cell = self.cell();
            if !cell.status.can_stop() {
                return Ok(());
            }
            cell.stop_requested = true;
            cell.status = ServiceStatus::Stopping;
            cell.since = Utc::now();
        }
        info!(service = %self.name, "service stopping");

        if let Err(err) = self.hooks.on_stop().await {
            warn!(service = %self.name, error = %err, "shutdown hook failed");
            self.cell().failure = Some(err.to_string());
        }
        self.set_status(ServiceStatus::Stopped);
        info!(service = %self.name, "service stopped");
        Ok(())
    }

    /// Record an unrecoverable error, force FAILED, and tear down resources
    /// out of band.
    ///
    /// This is the escalation path for long-lived resources (a broken pool)
    /// failing outside the scope of any single call.
    pub fn critical_failure(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(service = %self.name, %reason, "critical failure");
        {
            let mut cell = self.cell();
            cell.failure = Some(reason);
            cell.status = ServiceStatus::Failed;
            cell.since = Utc::now();
        }
        if let Some(svc) = self.this.upgrade() {
            tokio::spawn(async move {
                let _ = svc.stop().await;
            });
        }
    }
}

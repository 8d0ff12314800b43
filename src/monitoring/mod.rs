//! Monitoring facade - counter reports plus administrative service control.
//!
//! The facade is itself a guarded service: its startup hook spawns the
//! periodic counter-reset task and its shutdown hook tears the task down.
//! Administrative start/stop of other services is fire-and-forget - the
//! transition is spawned and the caller observes progress through
//! `get_services()`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::service::{Service, ServiceDescriptor, ServiceHooks, ServiceRegistry, ServiceSpec};
use crate::types::{Error, MonitoringConfig, Result, ServiceName};

mod counters;

pub use counters::{Counter, CounterRegistry, CounterSpec, CounterType};

/// Name the facade registers itself under.
pub const MONITORING_SERVICE: &str = "monitoring";

/// Acknowledgement returned by fire-and-forget administrative calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminAck {
    pub result: String,
}

impl AdminAck {
    fn ok() -> Self {
        Self {
            result: "ok".to_string(),
        }
    }
}

struct ResetTask {
    counters: Arc<CounterRegistry>,
    period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl ServiceHooks for ResetTask {
    async fn on_start(&self) -> Result<()> {
        let counters = Arc::clone(&self.counters);
        // Arm the ticker here so period boundaries count from startup, not
        // from whenever the task is first polled. The first tick completes
        // immediately; consuming it keeps the first period's live-value
        // snapshot intact.
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        let handle = tokio::spawn(async move {
            loop {
                ticker.tick().await;
                debug!("resetting counters");
                counters.reset();
            }
        });
        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    async fn on_stop(&self) -> Result<()> {
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        Ok(())
    }
}

/// Monitoring facade over the service registry and the counter engine.
pub struct Monitoring {
    service: Arc<Service>,
    services: Arc<ServiceRegistry>,
    counters: Arc<CounterRegistry>,
}

impl fmt::Debug for Monitoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitoring")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl Monitoring {
    /// Register the facade as a service in `services`.
    pub fn register(
        services: &Arc<ServiceRegistry>,
        counters: Arc<CounterRegistry>,
        config: &MonitoringConfig,
    ) -> Result<Arc<Self>> {
        let name = ServiceName::new(MONITORING_SERVICE).map_err(Error::validation)?;
        let hooks = Arc::new(ResetTask {
            counters: Arc::clone(&counters),
            period: config.counters_reset_period,
            task: Mutex::new(None),
        });
        let service = services.register(ServiceSpec {
            name,
            dependencies: vec![],
            hooks,
        })?;
        Ok(Arc::new(Self {
            service,
            services: Arc::clone(services),
            counters,
        }))
    }

    /// Lifecycle handle of the facade itself.
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Counter engine handle, for registering service counters.
    pub fn counters(&self) -> &Arc<CounterRegistry> {
        &self.counters
    }

    /// Descriptors for every registered service.
    pub async fn get_services(&self) -> Result<Vec<ServiceDescriptor>> {
        self.service
            .guard(async { Ok(self.services.describe_all()) })
            .await
    }

    /// Descriptor for one service.
    pub async fn get_service(&self, name: &str) -> Result<ServiceDescriptor> {
        self.service
            .guard(async {
                let name = ServiceName::new(name).map_err(Error::validation)?;
                self.services.describe(&name)
            })
            .await
    }

    /// Kick off a start transition and return immediately.
    pub async fn start_service(&self, name: &str) -> Result<AdminAck> {
        self.service
            .guard(async {
                let target = self.lookup(name)?;
                tokio::spawn(async move {
                    let _ = target.start().await;
                });
                Ok(AdminAck::ok())
            })
            .await
    }

    /// Kick off a stop transition and return immediately.
    pub async fn stop_service(&self, name: &str) -> Result<AdminAck> {
        self.service
            .guard(async {
                let target = self.lookup(name)?;
                tokio::spawn(async move {
                    let _ = target.stop().await;
                });
                Ok(AdminAck::ok())
            })
            .await
    }

    /// Point-in-time text report of the previous counter period.
    pub async fn report_counters(&self) -> Result<String> {
        self.service
            .guard(async { Ok(self.counters.report()) })
            .await
    }

    fn lookup(&self, name: &str) -> Result<Arc<Service>> {
        let service_name = ServiceName::new(name).map_err(Error::validation)?;
        self.services
            .get(&service_name)
            .ok_or_else(|| Error::unknown_service(name))
    }
}

//! SQL connector - a pool-backed service with guarded query access.
//!
//! The connector owns its pool for the service's whole lifetime. Its startup
//! hook logs the (password-redacted) options and runs one canary statement
//! through the pool, so connectivity problems surface at start time rather
//! than on the first real query. Every public operation is guarded by the
//! owning service's state.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::monitoring::{Counter, CounterRegistry, CounterSpec, CounterType};
use crate::pool::{ExecResult, Pool, PoolBackend, PoolHandle, Statement};
use crate::service::{Service, ServiceHooks, ServiceRegistry, ServiceSpec};
use crate::types::{ConnectorConfig, Error, Result, ServiceName};

mod procs;

pub use procs::{Page, ParamDef, ProcDescriptor, ProcSet, SqlType};

/// Statement used to verify connectivity during startup.
const CANARY: &str = "select now()";

struct ConnectorHooks<B: PoolBackend> {
    name: ServiceName,
    pool: Pool<B>,
    config: ConnectorConfig,
}

#[async_trait]
impl<B: PoolBackend> ServiceHooks for ConnectorHooks<B> {
    async fn on_start(&self) -> Result<()> {
        info!(
            service = %self.name,
            host = %self.config.host,
            port = self.config.port,
            user = %self.config.user,
            database = %self.config.database,
            max_connections = self.config.max_connections,
            "connector options"
        );
        self.pool.reopen();
        self.pool.exec(&Statement::new(CANARY)).await.map(|_| ())
    }

    async fn on_stop(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

struct ConnectorMetrics {
    queries: Arc<Counter>,
    errors: Arc<Counter>,
    /// Per-call latency in milliseconds, averaged over the period.
    query_time: Arc<Counter>,
}

/// Pool-backed SQL service.
pub struct SqlConnector<B: PoolBackend> {
    service: Arc<Service>,
    pool: Pool<B>,
    metrics: ConnectorMetrics,
}

impl<B: PoolBackend> fmt::Debug for SqlConnector<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlConnector")
            .field("service", &self.service)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl<B: PoolBackend> SqlConnector<B> {
    /// Wire up pool + service + counters and register with both registries.
    pub fn register(
        services: &Arc<ServiceRegistry>,
        counters: &Arc<CounterRegistry>,
        name: &str,
        dependencies: Vec<ServiceName>,
        config: ConnectorConfig,
        backend: B,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let name = ServiceName::new(name).map_err(Error::validation)?;
        let pool = Pool::new(backend, config.max_connections, config.idle_timeout);

        let service = services.register(ServiceSpec {
            name: name.clone(),
            dependencies,
            hooks: Arc::new(ConnectorHooks {
                name: name.clone(),
                pool: pool.clone(),
                config,
            }),
        })?;
        pool.attach_owner(&service);

        counters.add_service(name.clone());
        let metric = |metric: &str, kind| {
            counters.add_counter(CounterSpec {
                service: name.clone(),
                name: metric.to_string(),
                kind,
            })
        };
        let metrics = ConnectorMetrics {
            queries: metric("queries", CounterType::Times)?,
            errors: metric("errors", CounterType::Times)?,
            query_time: metric("queryTime", CounterType::Avg)?,
        };

        Ok(Arc::new(Self {
            service,
            pool,
            metrics,
        }))
    }

    /// Lifecycle handle.
    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    /// Run one statement: acquire, execute, release.
    pub async fn exec(&self, statement: &Statement) -> Result<ExecResult> {
        self.service
            .guard(async {
                let started = tokio::time::Instant::now();
                let result = self.pool.exec(statement).await;
                self.metrics.queries.bump();
                match &result {
                    Ok(_) => {
                        let millis = started.elapsed().as_secs_f64() * 1000.0;
                        self.metrics.query_time.record(millis);
                    }
                    Err(_) => self.metrics.errors.bump(),
                }
                result
            })
            .await
    }

    /// Check out a long-lived connection for a multi-statement session.
    pub async fn connection(&self) -> Result<Connection<B>> {
        self.service
            .guard(async {
                let handle = self.pool.acquire().await?;
                Ok(Connection {
                    service: Arc::clone(&self.service),
                    handle: Some(handle),
                })
            })
            .await
    }
}

/// One checked-out session. Callers run statements with [`Connection::exec`]
/// and release with [`Connection::end`]; an un-ended session still returns
/// its slot when dropped.
pub struct Connection<B: PoolBackend> {
    service: Arc<Service>,
    handle: Option<PoolHandle<B>>,
}

impl<B: PoolBackend> fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("live", &self.handle.is_some())
            .finish()
    }
}

impl<B: PoolBackend> Connection<B> {
    pub async fn exec(&mut self, statement: &Statement) -> Result<ExecResult> {
        self.service.ensure_ready()?;
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| Error::operation("connection already ended"))?;
        handle.exec(statement).await
    }

    /// Release the underlying slot. Ending twice is prevented by move
    /// semantics; release also happens on drop.
    pub fn end(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.end();
        }
    }
}

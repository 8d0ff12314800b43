//! Resource pool - bounded acquire/execute/release over a pluggable backend.
//!
//! The pool hides handle plumbing behind two call shapes: [`Pool::exec`]
//! (acquire one handle, run, release on every exit path) and
//! [`Pool::acquire`] (a long-lived [`PoolHandle`] the caller manages with
//! `exec(..)` + `end()`). A handle returns its connection to the pool on
//! `Drop`, so an abandoned or error path never leaks a slot.
//!
//! Backend errors carry an explicit [`BackendErrorKind`]: `Operation` errors
//! go back to the immediate caller and leave the owning service untouched;
//! `Fatal` errors mark the pool broken and escalate through the owner's
//! critical-failure path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::service::Service;
use crate::types::{Error, Result};

/// One statement plus positional parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub text: String,
    #[serde(default)]
    pub params: Vec<serde_json::Value>,
}

impl Statement {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(text: impl Into<String>, params: Vec<serde_json::Value>) -> Self {
        Self {
            text: text.into(),
            params,
        }
    }

    /// Rejected before any handle is acquired.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::validation("statement text is empty"));
        }
        Ok(())
    }
}

/// Driver-native result shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub has_next: bool,
}

/// Classifier separating "one operation failed" from "the pool is unusable".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// A single operation failed; the connection and pool stay usable.
    Operation,
    /// The resource manager itself is broken; the pool must be torn down.
    Fatal,
}

/// Error reported by a [`PoolBackend`].
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn operation(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Operation,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: BackendErrorKind::Fatal,
            message: message.into(),
        }
    }
}

/// The wire-level driver behind a pool.
#[async_trait]
pub trait PoolBackend: Send + Sync + 'static {
    type Conn: Send + 'static;

    async fn connect(&self) -> std::result::Result<Self::Conn, BackendError>;

    async fn execute(
        &self,
        conn: &mut Self::Conn,
        statement: &Statement,
    ) -> std::result::Result<ExecResult, BackendError>;
}

struct IdleConn<C> {
    conn: C,
    parked_at: Instant,
}

struct PoolInner<B: PoolBackend> {
    backend: B,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConn<B::Conn>>>,
    idle_timeout: Duration,
    closed: AtomicBool,
    /// Owning service, attached at wiring time; fatal errors escalate here.
    owner: OnceLock<Weak<Service>>,
}

/// Bounded set of live resource handles. Cheap to clone; clones share the
/// same underlying pool.
pub struct Pool<B: PoolBackend> {
    inner: Arc<PoolInner<B>>,
}

impl<B: PoolBackend> Clone for Pool<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: PoolBackend> fmt::Debug for Pool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("idle", &self.idle_count())
            .field("available", &self.inner.permits.available_permits())
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl<B: PoolBackend> Pool<B> {
    pub fn new(backend: B, max_connections: usize, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                backend,
                permits: Arc::new(Semaphore::new(max_connections.max(1))),
                idle: Mutex::new(VecDeque::new()),
                idle_timeout,
                closed: AtomicBool::new(false),
                owner: OnceLock::new(),
            }),
        }
    }

    /// Attach the owning service for critical-failure escalation.
    pub fn attach_owner(&self, service: &Arc<Service>) {
        let _ = self.inner.owner.set(Arc::downgrade(service));
    }

    fn idle(&self) -> std::sync::MutexGuard<'_, VecDeque<IdleConn<B::Conn>>> {
        self.inner
            .idle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn idle_count(&self) -> usize {
        self.idle().len()
    }

    /// Free slots (not checked out).
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Check out one handle, reusing an idle connection when a fresh enough
    /// one exists. A failed connect produces no handle and leaks no slot.
    pub async fn acquire(&self) -> Result<PoolHandle<B>> {
        if self.is_closed() {
            return Err(Error::operation("pool is closed"));
        }
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::operation("pool is closed"))?;
        if self.is_closed() {
            return Err(Error::operation("pool is closed"));
        }

        // Prune connections that sat idle past the deadline.
        let reused = loop {
            let Some(parked) = self.idle().pop_front() else {
                break None;
            };
            if parked.parked_at.elapsed() > self.inner.idle_timeout {
                debug!("pruning stale idle connection");
                continue;
            }
            break Some(parked.conn);
        };

        let conn = match reused {
            Some(conn) => conn,
            None => match self.inner.backend.connect().await {
                Ok(conn) => conn,
                // Permit is dropped here: the failed acquire consumed nothing.
                Err(err) => return Err(self.escalate(err)),
            },
        };

        Ok(PoolHandle {
            pool: self.clone(),
            conn: Some(conn),
            _permit: permit,
        })
    }

    /// Acquire, run one statement, release - on every exit path.
    pub async fn exec(&self, statement: &Statement) -> Result<ExecResult> {
        statement.validate()?;
        let mut handle = self.acquire().await?;
        let result = handle.exec(statement).await;
        handle.end();
        result
    }

    /// Accept acquires again after a close (service restart path).
    pub fn reopen(&self) {
        self.inner.closed.store(false, Ordering::SeqCst);
    }

    /// Drain idle connections and refuse further acquires.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.idle().clear();
        debug!("pool closed");
    }

    fn release(&self, conn: B::Conn) {
        if self.is_closed() {
            return; // connection dropped, slot recovered via the permit
        }
        self.idle().push_back(IdleConn {
            conn,
            parked_at: Instant::now(),
        });
    }

    /// Map a backend error onto the crate taxonomy, escalating fatal ones to
    /// the owning service.
    fn escalate(&self, err: BackendError) -> Error {
        match err.kind {
            BackendErrorKind::Operation => Error::operation(err.message),
            BackendErrorKind::Fatal => {
                warn!(error = %err.message, "pool backend reported fatal error");
                self.close();
                if let Some(owner) = self.inner.owner.get().and_then(Weak::upgrade) {
                    owner.critical_failure(err.message.clone());
                }
                Error::critical(err.message)
            }
        }
    }
}

/// One checked-out resource unit.
///
/// Releases exactly once: explicitly via [`PoolHandle::end`], or on `Drop`
/// for every other exit path.
pub struct PoolHandle<B: PoolBackend> {
    pool: Pool<B>,
    conn: Option<B::Conn>,
    _permit: OwnedSemaphorePermit,
}

impl<B: PoolBackend> fmt::Debug for PoolHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("live", &self.conn.is_some())
            .finish()
    }
}

impl<B: PoolBackend> PoolHandle<B> {
    /// Run one statement on this handle's connection.
    pub async fn exec(&mut self, statement: &Statement) -> Result<ExecResult> {
        statement.validate()?;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::operation("connection already closed"))?;
        match self.pool.inner.backend.execute(conn, statement).await {
            Ok(result) => Ok(result),
            Err(err) => {
                if err.kind == BackendErrorKind::Fatal {
                    // Broken connection never returns to the idle set.
                    self.conn = None;
                }
                Err(self.pool.escalate(err))
            }
        }
    }

    /// Return the connection to the pool.
    pub fn end(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

impl<B: PoolBackend> Drop for PoolHandle<B> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{NoopHooks, ServiceRegistry, ServiceSpec, ServiceStatus};
    use crate::types::ServiceName;
    use std::sync::atomic::AtomicUsize;

    struct FakeConn {
        live: Arc<AtomicUsize>,
    }

    impl Drop for FakeConn {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        connects: AtomicUsize,
        live: Arc<AtomicUsize>,
        fail_connect: AtomicBool,
        scripted: Mutex<VecDeque<BackendError>>,
    }

    impl FakeBackend {
        fn script(&self, err: BackendError) {
            self.scripted.lock().unwrap().push_back(err);
        }
    }

    #[async_trait]
    impl PoolBackend for Arc<FakeBackend> {
        type Conn = FakeConn;

        async fn connect(&self) -> std::result::Result<FakeConn, BackendError> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(BackendError::operation("connect refused"));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn {
                live: Arc::clone(&self.live),
            })
        }

        async fn execute(
            &self,
            _conn: &mut FakeConn,
            statement: &Statement,
        ) -> std::result::Result<ExecResult, BackendError> {
            if let Some(err) = self.scripted.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(ExecResult {
                columns: vec!["echo".to_string()],
                rows: vec![vec![serde_json::Value::String(statement.text.clone())]],
                has_next: false,
            })
        }
    }

    fn pool_with(max: usize, idle_timeout: Duration) -> (Arc<FakeBackend>, Pool<Arc<FakeBackend>>) {
        let backend = Arc::new(FakeBackend::default());
        let pool = Pool::new(Arc::clone(&backend), max, idle_timeout);
        (backend, pool)
    }

    fn idle_60s() -> Duration {
        Duration::from_secs(60)
    }

    #[tokio::test]
    async fn exec_round_trip() {
        let (_backend, pool) = pool_with(2, idle_60s());
        let result = pool.exec(&Statement::new("select now()")).await.unwrap();
        assert_eq!(result.columns, vec!["echo"]);
        assert_eq!(result.rows.len(), 1);
    }

    #[tokio::test]
    async fn connections_are_reused_across_execs() {
        let (backend, pool) = pool_with(2, idle_60s());
        for _ in 0..5 {
            pool.exec(&Statement::new("select 1")).await.unwrap();
        }
        assert_eq!(backend.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn operation_error_still_releases_the_handle() {
        let (backend, pool) = pool_with(1, idle_60s());
        backend.script(BackendError::operation("syntax error"));

        let err = pool.exec(&Statement::new("selct 1")).await.unwrap_err();
        assert!(matches!(err, Error::Operation(_)));

        // Handle released on the error path: the next acquire succeeds
        // without waiting, and the connection went back to the idle set.
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.idle_count(), 1);
        pool.exec(&Statement::new("select 1")).await.unwrap();
        assert_eq!(backend.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_statement_rejected_before_acquire() {
        let (backend, pool) = pool_with(1, idle_60s());
        let err = pool.exec(&Statement::new("   ")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(backend.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_connect_consumes_no_slot() {
        let (backend, pool) = pool_with(1, idle_60s());
        backend.fail_connect.store(true, Ordering::SeqCst);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, Error::Operation(_)));
        assert_eq!(pool.available(), 1);

        backend.fail_connect.store(false, Ordering::SeqCst);
        pool.exec(&Statement::new("select 1")).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn pool_is_bounded() {
        let (_backend, pool) = pool_with(2, idle_60s());
        let h1 = pool.acquire().await.unwrap();
        let _h2 = pool.acquire().await.unwrap();

        // Third acquire must wait for a release.
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err());

        h1.end();
        let h3 = tokio::time::timeout(Duration::from_millis(50), pool.acquire())
            .await
            .unwrap()
            .unwrap();
        h3.end();
    }

    #[tokio::test(start_paused = true)]
    async fn stale_idle_connections_are_pruned() {
        let (backend, pool) = pool_with(2, Duration::from_secs(30));
        pool.exec(&Statement::new("select 1")).await.unwrap();
        assert_eq!(pool.idle_count(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        pool.exec(&Statement::new("select 1")).await.unwrap();

        assert_eq!(backend.connects.load(Ordering::SeqCst), 2);
        assert_eq!(backend.live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fatal_error_escalates_to_owner_and_closes_pool() {
        let (backend, pool) = pool_with(2, idle_60s());
        let registry = ServiceRegistry::new();
        let svc = registry
            .register(ServiceSpec {
                name: ServiceName::new("db").unwrap(),
                dependencies: vec![],
                hooks: Arc::new(NoopHooks),
            })
            .unwrap();
        pool.attach_owner(&svc);
        svc.start().await.unwrap();

        backend.script(BackendError::fatal("pool manager gone"));
        let err = pool.exec(&Statement::new("select 1")).await.unwrap_err();
        assert!(matches!(err, Error::CriticalFailure(_)));

        assert_eq!(svc.status(), ServiceStatus::Failed);
        assert_eq!(svc.failure_reason().as_deref(), Some("pool manager gone"));
        assert!(pool.is_closed());

        let err = pool.acquire().await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn close_drains_idle_connections() {
        let (backend, pool) = pool_with(2, idle_60s());
        pool.exec(&Statement::new("select 1")).await.unwrap();
        assert_eq!(backend.live.load(Ordering::SeqCst), 1);

        pool.close();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(backend.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropped_handle_returns_connection() {
        let (_backend, pool) = pool_with(1, idle_60s());
        {
            let _handle = pool.acquire().await.unwrap();
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn long_lived_handle_runs_multiple_statements() {
        let (backend, pool) = pool_with(2, idle_60s());
        let mut handle = pool.acquire().await.unwrap();
        handle.exec(&Statement::new("begin")).await.unwrap();
        handle.exec(&Statement::new("insert ...")).await.unwrap();
        handle.exec(&Statement::new("commit")).await.unwrap();
        handle.end();

        assert_eq!(backend.connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
    }
}

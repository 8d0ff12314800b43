//! # Steward Core - Service-Orchestration Substrate
//!
//! Independent, named services each carry an explicit lifecycle state,
//! optional dependencies on other services, and guarded access to their
//! methods, so calls fail predictably instead of racing initialization or
//! shutdown. Provides:
//! - Service state machine (CREATED → INITIALIZING → READY → STOPPING →
//!   STOPPED, any state → FAILED) with strictly serialized transitions
//! - Readiness guard combining own state and dependency states
//! - Bounded resource pools with acquire/execute/release semantics and
//!   critical-failure escalation
//! - Monitoring counters (value, times, avg, max, timesPerMinute) with
//!   periodic snapshot resets and a plain-text report
//! - Administrative facade for listing, describing, starting and stopping
//!   services
//!
//! ## Architecture
//!
//! ```text
//!   caller ──▶ guard(Service state) ──▶ method body ──▶ Pool handle
//!                    │                      │
//!                    │                      └─▶ Counter::record
//!                    ▼
//!   Monitoring ──▶ ServiceRegistry (list/describe/start/stop)
//!        └───────▶ CounterRegistry snapshot (report)
//! ```
//!
//! All state is process-local; counters do not persist across restarts.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod connector;
pub mod monitoring;
pub mod pool;
pub mod service;
pub mod types;

// Internal utilities
pub mod observability;

pub use types::{Config, Error, Result};

//! Core types for the steward substrate.
//!
//! This module provides foundational types used throughout the system:
//! - **Names**: Strongly-typed identifiers (ServiceName, CounterName)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for connectors and monitoring

mod config;
mod errors;
mod ids;

pub use config::{Config, ConnectorConfig, MonitoringConfig, ObservabilityConfig};
pub use errors::{Error, Result};
pub use ids::{CounterName, ServiceName};

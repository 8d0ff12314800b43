//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

use crate::service::ServiceStatus;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the steward substrate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad caller input, rejected before any state change.
    #[error("validation error: {0}")]
    Validation(String),

    /// Guard rejection: the owning service is not ready to serve calls.
    /// Carries the current state and the names of unmet dependencies.
    #[error("service '{service}' is not ready: state is {state}{}", fmt_unmet(.unmet))]
    NotReady {
        service: String,
        state: ServiceStatus,
        unmet: Vec<String>,
    },

    /// Administrative lookup failed: no service registered under this name.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Counter registration named a type outside the known variants.
    #[error("unknown counter type: {0}")]
    UnknownCounterType(String),

    /// Dispatch-table lookup failed: no operation registered under this name.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// A single pool operation failed. Returned to the immediate caller;
    /// does not affect service state.
    #[error("operation error: {0}")]
    Operation(String),

    /// The underlying resource manager itself is broken. Escalated through
    /// the owning service's critical-failure path.
    #[error("critical failure: {0}")]
    CriticalFailure(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_unmet(unmet: &[String]) -> String {
    if unmet.is_empty() {
        String::new()
    } else {
        format!(", unmet dependencies: [{}]", unmet.join(", "))
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unknown_service(name: impl Into<String>) -> Self {
        Self::UnknownService(name.into())
    }

    pub fn unknown_counter_type(name: impl Into<String>) -> Self {
        Self::UnknownCounterType(name.into())
    }

    pub fn unknown_operation(name: impl Into<String>) -> Self {
        Self::UnknownOperation(name.into())
    }

    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation(msg.into())
    }

    pub fn critical(msg: impl Into<String>) -> Self {
        Self::CriticalFailure(msg.into())
    }

    /// True for errors that force the owning service to FAILED.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::CriticalFailure(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_message_names_unmet_dependencies() {
        let err = Error::NotReady {
            service: "db".to_string(),
            state: ServiceStatus::Ready,
            unmet: vec!["cache".to_string(), "auth".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'db'"));
        assert!(msg.contains("cache, auth"));
    }

    #[test]
    fn not_ready_message_without_dependencies_is_clean() {
        let err = Error::NotReady {
            service: "db".to_string(),
            state: ServiceStatus::Stopped,
            unmet: vec![],
        };
        assert!(!err.to_string().contains("unmet"));
    }

    #[test]
    fn only_critical_failure_is_critical() {
        assert!(Error::critical("pool broken").is_critical());
        assert!(!Error::operation("one query failed").is_critical());
        assert!(!Error::validation("bad input").is_critical());
    }
}

//! Service lifecycle states.
//!
//! State machine: CREATED → INITIALIZING → READY → STOPPING → STOPPED,
//! any state may drop to FAILED, and FAILED → INITIALIZING is a retry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Constructed, startup not yet begun
    Created,
    /// Startup hook in flight
    Initializing,
    /// Serving calls
    Ready,
    /// Shutdown hook in flight
    Stopping,
    /// Gracefully shut down; restartable via `start()`
    Stopped,
    /// Startup or runtime critical error recorded
    Failed,
}

impl ServiceStatus {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: ServiceStatus) -> bool {
        use ServiceStatus::*;
        match (self, next) {
            // Any state may fail
            (_, Failed) => true,
            // Startup, including restart and retry-after-failure
            (Created | Stopped | Failed, Initializing) => true,
            (Initializing, Ready) => true,
            // Shutdown; INITIALIZING may be torn down mid-startup
            (Ready | Initializing | Failed, Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }

    /// States from which `start()` may begin a transition.
    pub fn can_start(self) -> bool {
        self.can_transition_to(ServiceStatus::Initializing)
    }

    /// States from which `stop()` has work to do.
    pub fn can_stop(self) -> bool {
        self.can_transition_to(ServiceStatus::Stopping)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Created => "created",
            ServiceStatus::Initializing => "initializing",
            ServiceStatus::Ready => "ready",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

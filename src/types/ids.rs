//! Strongly-typed identifiers.
//!
//! All names are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed name newtype wrapper.
///
/// Generates: struct, `new()`, `as_str()`, Display, Serialize, Deserialize.
macro_rules! define_name {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Result<Self, &'static str> {
                let s = s.into();
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_name!(ServiceName);
define_name!(CounterName);

impl CounterName {
    /// Build the registry-wide counter name `<service>_<metric>`.
    ///
    /// Slashes in the service name (nested service paths) are replaced with
    /// underscores so the rendered report stays single-token per name.
    pub fn scoped(service: &ServiceName, metric: &str) -> Result<Self, &'static str> {
        if metric.is_empty() {
            return Err("counter metric name cannot be empty");
        }
        let prefix = service.as_str().replace('/', "_");
        Ok(Self(format!("{prefix}_{metric}")))
    }
}

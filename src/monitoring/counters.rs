//! Counter engine - per-service aggregation counters with periodic snapshots.
//!
//! Five variants: `value`, `times`, `avg`, `max`, `timesPerMinute`. Live
//! counters accumulate; the periodic reset pass swaps each counter's value
//! into the "previous period" snapshot, which is the only thing reports read.
//! Until the first reset a counter's snapshot entry reads through to the live
//! value, so a report taken right after registration shows current data
//! instead of a hole.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use tokio::time::Instant;

use crate::types::{CounterName, Error, Result, ServiceName};

/// Aggregation strategy of one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterType {
    /// Overwrite-last-value gauge; unaffected by resets
    Value,
    /// Events per period
    Times,
    /// Rolling average over the period
    Avg,
    /// Maximum seen over the period
    Max,
    /// Events per elapsed minute within the period
    TimesPerMinute,
}

impl CounterType {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterType::Value => "value",
            CounterType::Times => "times",
            CounterType::Avg => "avg",
            CounterType::Max => "max",
            CounterType::TimesPerMinute => "timesPerMinute",
        }
    }
}

impl FromStr for CounterType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "value" => Ok(CounterType::Value),
            "times" => Ok(CounterType::Times),
            "avg" => Ok(CounterType::Avg),
            "max" => Ok(CounterType::Max),
            "timesPerMinute" => Ok(CounterType::TimesPerMinute),
            other => Err(Error::unknown_counter_type(other)),
        }
    }
}

impl fmt::Display for CounterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Accum {
    Value(f64),
    Times(u64),
    Avg { sum: f64, count: u64 },
    Max(f64),
    TimesPerMinute { count: u64, since: Instant },
}

impl Accum {
    fn new(kind: CounterType) -> Self {
        match kind {
            CounterType::Value => Accum::Value(0.0),
            CounterType::Times => Accum::Times(0),
            CounterType::Avg => Accum::Avg { sum: 0.0, count: 0 },
            CounterType::Max => Accum::Max(f64::NEG_INFINITY),
            CounterType::TimesPerMinute => Accum::TimesPerMinute {
                count: 0,
                since: Instant::now(),
            },
        }
    }
}

/// One registered counter. `record` calls within a period are commutative:
/// count, sum and max are order-independent.
pub struct Counter {
    name: CounterName,
    kind: CounterType,
    accum: Mutex<Accum>,
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Counter {
    fn new(name: CounterName, kind: CounterType) -> Self {
        Self {
            name,
            kind,
            accum: Mutex::new(Accum::new(kind)),
        }
    }

    pub fn name(&self) -> &CounterName {
        &self.name
    }

    pub fn kind(&self) -> CounterType {
        self.kind
    }

    fn accum(&self) -> std::sync::MutexGuard<'_, Accum> {
        self.accum.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Feed one event. Count-style variants (`times`, `timesPerMinute`)
    /// ignore the value.
    pub fn record(&self, event: f64) {
        match &mut *self.accum() {
            Accum::Value(v) => *v = event,
            Accum::Times(n) => *n += 1,
            Accum::Avg { sum, count } => {
                *sum += event;
                *count += 1;
            }
            Accum::Max(m) => *m = m.max(event),
            Accum::TimesPerMinute { count, .. } => *count += 1,
        }
    }

    /// Shorthand for count-style variants.
    pub fn bump(&self) {
        self.record(0.0);
    }

    /// Current value for the running period.
    pub fn get(&self) -> f64 {
        match &*self.accum() {
            Accum::Value(v) => *v,
            Accum::Times(n) => *n as f64,
            Accum::Avg { sum, count } => {
                if *count == 0 {
                    0.0
                } else {
                    sum / *count as f64
                }
            }
            Accum::Max(m) => *m,
            Accum::TimesPerMinute { count, since } => rate_per_minute(*count, since.elapsed()),
        }
    }

    /// Atomically return the period's value and reset to the variant's
    /// identity element (`value` counters are stateless and keep theirs).
    pub fn get_and_reset(&self) -> f64 {
        let mut accum = self.accum();
        match &mut *accum {
            Accum::Value(v) => *v,
            Accum::Times(n) => std::mem::take(n) as f64,
            Accum::Avg { sum, count } => {
                let value = if *count == 0 { 0.0 } else { *sum / *count as f64 };
                *sum = 0.0;
                *count = 0;
                value
            }
            Accum::Max(m) => std::mem::replace(m, f64::NEG_INFINITY),
            Accum::TimesPerMinute { count, since } => {
                let value = rate_per_minute(*count, since.elapsed());
                *count = 0;
                *since = Instant::now();
                value
            }
        }
    }
}

fn rate_per_minute(count: u64, elapsed: std::time::Duration) -> f64 {
    let minutes = elapsed.as_secs_f64() / 60.0;
    if minutes <= f64::EPSILON {
        // A period shorter than a tick has no meaningful rate.
        count as f64
    } else {
        count as f64 / minutes
    }
}

/// Registration request for one counter.
#[derive(Debug, Clone)]
pub struct CounterSpec {
    pub service: ServiceName,
    pub name: String,
    pub kind: CounterType,
}

enum SnapshotEntry {
    /// Written by the reset pass.
    Literal(f64),
    /// Installed at registration: reads through to the live counter until
    /// the first reset.
    Live(Arc<Counter>),
}

struct RegistryInner {
    /// Services registered for reporting, in registration order.
    order: Vec<ServiceName>,
    counters: HashMap<ServiceName, VecDeque<Arc<Counter>>>,
    names: HashSet<CounterName>,
}

/// Registry of per-service counters plus the previous-period snapshot.
///
/// The reset pass is the sole snapshot writer; reporting only reads, so a
/// report never observes a partially-reset period.
pub struct CounterRegistry {
    inner: Mutex<RegistryInner>,
    snapshot: RwLock<HashMap<CounterName, SnapshotEntry>>,
}

impl fmt::Debug for CounterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterRegistry").finish_non_exhaustive()
    }
}

impl Default for CounterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                order: Vec::new(),
                counters: HashMap::new(),
                names: HashSet::new(),
            }),
            snapshot: RwLock::new(HashMap::new()),
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opt a service into reporting. Report lines appear in the order
    /// services were added here.
    pub fn add_service(&self, service: ServiceName) {
        let mut inner = self.inner();
        if !inner.order.contains(&service) {
            inner.order.push(service);
        }
    }

    /// Register one counter. Counter identity is immutable after
    /// registration; a duplicate name is an error, never a silent merge.
    pub fn add_counter(&self, spec: CounterSpec) -> Result<Arc<Counter>> {
        let name = CounterName::scoped(&spec.service, &spec.name).map_err(Error::validation)?;
        let mut inner = self.inner();
        if !inner.names.insert(name.clone()) {
            return Err(Error::validation(format!(
                "counter '{name}' is already registered"
            )));
        }
        let counter = Arc::new(Counter::new(name.clone(), spec.kind));
        inner
            .counters
            .entry(spec.service)
            .or_default()
            .push_back(Arc::clone(&counter));
        drop(inner);

        self.snapshot_mut()
            .insert(name, SnapshotEntry::Live(Arc::clone(&counter)));
        Ok(counter)
    }

    fn snapshot_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CounterName, SnapshotEntry>> {
        self.snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Swap every live counter into the previous-period snapshot.
    pub fn reset(&self) {
        let values: Vec<(CounterName, f64)> = {
            let inner = self.inner();
            inner
                .counters
                .values()
                .flatten()
                .map(|c| (c.name().clone(), c.get_and_reset()))
                .collect()
        };
        let mut snapshot = self.snapshot_mut();
        for (name, value) in values {
            snapshot.insert(name, SnapshotEntry::Literal(value));
        }
    }

    /// Render the previous-period snapshot: one `"<name> <value>"` line per
    /// counter, newline-joined, in registration order, restricted to
    /// services added via [`Self::add_service`].
    pub fn report(&self) -> String {
        let inner = self.inner();
        let snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut lines = Vec::new();
        for service in &inner.order {
            let Some(counters) = inner.counters.get(service) else {
                continue;
            };
            for counter in counters {
                let value = match snapshot.get(counter.name()) {
                    Some(SnapshotEntry::Literal(v)) => *v,
                    Some(SnapshotEntry::Live(c)) => c.get(),
                    None => counter.get(),
                };
                lines.push(format!("{} {}", counter.name(), fmt_value(value)));
            }
        }
        lines.join("\n")
    }
}

/// Integral values print without a decimal point.
fn fmt_value(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

mod activity;

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

pub use activity::ActivityMetrics;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("metric '{name}' already registered as a {existing}")]
    KindConflict { name: String, existing: MetricKind },
    #[error("metric '{name}' collides with existing path '{existing}'")]
    EdgeConflict { name: String, existing: String },
    #[error("metric name must not be empty")]
    EmptyName,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Timer,
    Counter,
    Gauge,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timer => "timer",
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        })
    }
}

/// Latency accumulator. All values are nanoseconds.
#[derive(Debug)]
pub struct Timer {
    count: AtomicU64,
    total: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    last: AtomicU64,
}

impl Default for Timer {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            total: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
            last: AtomicU64::new(0),
        }
    }
}

impl Timer {
    pub fn update(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total.fetch_add(nanos, Ordering::Relaxed);
        self.min.fetch_min(nanos, Ordering::Relaxed);
        self.max.fetch_max(nanos, Ordering::Relaxed);
        self.last.store(nanos, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Release);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> TimerSnapshot {
        let count = self.count();
        let total = self.total.load(Ordering::Relaxed);
        let min = self.min.load(Ordering::Relaxed);
        TimerSnapshot {
            count,
            total,
            min: if count == 0 { 0 } else { min },
            max: self.max.load(Ordering::Relaxed),
            last: self.last.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimerSnapshot {
    pub count: u64,
    pub total: u64,
    pub min: u64,
    pub max: u64,
    pub last: u64,
}

impl TimerSnapshot {
    #[must_use]
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

type GaugeFn = dyn Fn() -> f64 + Send + Sync;

/// Value computed on every read.
pub struct Gauge {
    read: Box<GaugeFn>,
}

impl Gauge {
    pub fn new(read: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        Self {
            read: Box::new(read),
        }
    }

    #[must_use]
    pub fn value(&self) -> f64 {
        (self.read)()
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gauge").field("value", &self.value()).finish()
    }
}

#[derive(Clone, Debug)]
pub enum Metric {
    Timer(Arc<Timer>),
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
}

impl Metric {
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        match self {
            Self::Timer(_) => MetricKind::Timer,
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
        }
    }

    /// Reads one named property of the metric.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<f64> {
        match self {
            Self::Timer(timer) => {
                let snapshot = timer.snapshot();
                match name {
                    "count" => Some(snapshot.count as f64),
                    "total" => Some(snapshot.total as f64),
                    "min" => Some(snapshot.min as f64),
                    "max" => Some(snapshot.max as f64),
                    "mean" => Some(snapshot.mean()),
                    "last" => Some(snapshot.last as f64),
                    _ => None,
                }
            }
            Self::Counter(counter) => (name == "count").then(|| counter.count() as f64),
            Self::Gauge(gauge) => (name == "value").then(|| gauge.value()),
        }
    }

    #[must_use]
    pub const fn properties(&self) -> &'static [&'static str] {
        match self {
            Self::Timer(_) => &["count", "last", "max", "mean", "min", "total"],
            Self::Counter(_) => &["count"],
            Self::Gauge(_) => &["value"],
        }
    }
}

/// Registry of named metrics.
///
/// Names are dotted paths such as `myactivity.cycles.servicetime` and form a
/// tree: a name may not be both a leaf and an inner edge of another name.
/// Values are read back by appending a property, e.g.
/// `myactivity.cycles.servicetime.count`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    metrics: RwLock<BTreeMap<String, Metric>>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn timer(&self, name: &str) -> Result<Arc<Timer>, MetricsError> {
        match self.get_or_register(name, || Metric::Timer(Arc::default()))? {
            Metric::Timer(timer) => Ok(timer),
            other => Err(kind_conflict(name, &other)),
        }
    }

    pub fn counter(&self, name: &str) -> Result<Arc<Counter>, MetricsError> {
        match self.get_or_register(name, || Metric::Counter(Arc::default()))? {
            Metric::Counter(counter) => Ok(counter),
            other => Err(kind_conflict(name, &other)),
        }
    }

    /// Registers a gauge, replacing an earlier gauge of the same name.
    pub fn gauge(
        &self,
        name: &str,
        read: impl Fn() -> f64 + Send + Sync + 'static,
    ) -> Result<Arc<Gauge>, MetricsError> {
        let gauge = Arc::new(Gauge::new(read));
        let mut metrics = self.write();
        if let Some(existing) = metrics.get(name) {
            if existing.kind() != MetricKind::Gauge {
                return Err(kind_conflict(name, existing));
            }
        } else {
            check_edges(&metrics, name)?;
        }
        metrics.insert(name.to_owned(), Metric::Gauge(Arc::clone(&gauge)));
        Ok(gauge)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.read().get(name).cloned()
    }

    /// Resolves `<metric name>.<property>` to a number.
    #[must_use]
    pub fn value(&self, path: &str) -> Option<f64> {
        let (name, property) = path.rsplit_once('.')?;
        self.get(name)?.property(property)
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Lists `name.property  kind` for every metric under `prefix`, sorted.
    #[must_use]
    pub fn describe(&self, prefix: &str) -> Vec<String> {
        let metrics = self.read();
        let mut lines: Vec<String> = metrics
            .iter()
            .filter(|(name, _)| under_prefix(name, prefix))
            .flat_map(|(name, metric)| {
                metric
                    .properties()
                    .iter()
                    .map(move |property| format!("{name}.{property}  {}", metric.kind()))
            })
            .collect();
        lines.sort();
        lines
    }

    /// Drops every metric under `prefix` (the prefix itself included).
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut metrics = self.write();
        let before = metrics.len();
        metrics.retain(|name, _| !under_prefix(name, prefix));
        let removed = before - metrics.len();
        trace!(prefix, removed, "removed metrics");
        removed
    }

    fn get_or_register(
        &self,
        name: &str,
        create: impl FnOnce() -> Metric,
    ) -> Result<Metric, MetricsError> {
        if name.is_empty() {
            return Err(MetricsError::EmptyName);
        }
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }

        let mut metrics = self.write();
        if let Some(existing) = metrics.get(name) {
            return Ok(existing.clone());
        }
        check_edges(&metrics, name)?;
        let metric = create();
        trace!(name, kind = %metric.kind(), "registered metric");
        metrics.insert(name.to_owned(), metric.clone());
        Ok(metric)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Metric>> {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Metric>> {
        self.metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn under_prefix(name: &str, prefix: &str) -> bool {
    name == prefix
        || name
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

fn check_edges(metrics: &BTreeMap<String, Metric>, name: &str) -> Result<(), MetricsError> {
    let conflict = metrics.keys().find(|existing| {
        under_prefix(existing, name) || under_prefix(name, existing.as_str())
    });
    match conflict {
        Some(existing) => Err(MetricsError::EdgeConflict {
            name: name.to_owned(),
            existing: existing.clone(),
        }),
        None => Ok(()),
    }
}

fn kind_conflict(name: &str, existing: &Metric) -> MetricsError {
    MetricsError::KindConflict {
        name: name.to_owned(),
        existing: existing.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_properties_are_addressable_by_path() {
        let registry = MetricsRegistry::new();
        let timer = registry.timer("foo.cycles.servicetime").unwrap();
        timer.update(Duration::from_nanos(100));
        timer.update(Duration::from_nanos(300));

        assert_eq!(registry.value("foo.cycles.servicetime.count"), Some(2.0));
        assert_eq!(registry.value("foo.cycles.servicetime.min"), Some(100.0));
        assert_eq!(registry.value("foo.cycles.servicetime.max"), Some(300.0));
        assert_eq!(registry.value("foo.cycles.servicetime.mean"), Some(200.0));
        assert_eq!(registry.value("foo.cycles.servicetime.p99"), None);
        assert_eq!(registry.value("foo.cycles.servicetime"), None);
    }

    #[test]
    fn empty_timer_reports_zero_min() {
        let timer = Timer::default();
        assert_eq!(timer.snapshot(), TimerSnapshot::default());
    }

    #[test]
    fn get_or_register_returns_the_same_handle() {
        let registry = MetricsRegistry::new();
        let a = registry.counter("foo.errors.Injected").unwrap();
        let b = registry.counter("foo.errors.Injected").unwrap();
        a.inc();
        b.add(2);
        assert_eq!(registry.value("foo.errors.Injected.count"), Some(3.0));
    }

    #[test]
    fn kinds_and_edges_may_not_collide() {
        let registry = MetricsRegistry::new();
        registry.timer("foo.result").unwrap();

        assert_eq!(
            registry.counter("foo.result").unwrap_err(),
            MetricsError::KindConflict {
                name: "foo.result".into(),
                existing: MetricKind::Timer
            }
        );
        assert!(matches!(
            registry.timer("foo.result.inner").unwrap_err(),
            MetricsError::EdgeConflict { .. }
        ));
        assert!(matches!(
            registry.timer("foo").unwrap_err(),
            MetricsError::EdgeConflict { .. }
        ));
        // a shared name prefix that is not a path edge is fine
        registry.timer("foo.result-success").unwrap();
    }

    #[test]
    fn gauges_read_live_values() {
        let registry = MetricsRegistry::new();
        let source = Arc::new(AtomicU64::new(5));
        let observed = Arc::clone(&source);
        registry
            .gauge("foo.cycles.waittime", move || {
                observed.load(Ordering::Relaxed) as f64
            })
            .unwrap();

        assert_eq!(registry.value("foo.cycles.waittime.value"), Some(5.0));
        source.store(42, Ordering::Relaxed);
        assert_eq!(registry.value("foo.cycles.waittime.value"), Some(42.0));
    }

    #[test]
    fn describe_and_remove_by_prefix() {
        let registry = MetricsRegistry::new();
        registry.counter("foo.errors.X").unwrap();
        registry.gauge("foo.cycles.waittime", || 0.0).unwrap();
        registry.counter("foobar.errors.X").unwrap();

        assert_eq!(
            registry.describe("foo"),
            vec![
                "foo.cycles.waittime.value  gauge".to_owned(),
                "foo.errors.X.count  counter".to_owned(),
            ]
        );

        assert_eq!(registry.remove_prefix("foo"), 2);
        assert_eq!(registry.names(), vec!["foobar.errors.X".to_owned()]);
    }
}

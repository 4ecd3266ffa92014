//! # Stage: Metrics Collector
//!
//! ## Responsibility
//! Stores named metric series (counters, histograms, gauges, timers) as
//! bounded ring buffers of labelled data points, computes windowed statistics
//! and trends, and exports everything as JSON or Prometheus text.
//! Optional custom collectors run on tokio intervals.
//!
//! ## Guarantees
//! - Thread-safe: the collector is a cheap `Clone` handle over shared state
//! - Bounded: each series keeps at most `max_points_per_metric` points
//! - Infallible recording: `record_*` never returns an error
//! - Collector callbacks that fail are logged and never stop the interval
//!
//! ## NOT Responsible For
//! - Alerting on thresholds (see [`super::monitor`])
//! - Shipping metrics anywhere (exports are returned to the caller)

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::strategy::context::now_ms;

/// Default number of points kept per metric series.
pub const DEFAULT_MAX_POINTS: usize = 10_000;

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

/// Fixed-capacity ring buffer. Oldest values are overwritten when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    buf: Vec<T>,
    head: usize,
    cap: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self { buf: Vec::with_capacity(cap.min(1024)), head: 0, cap }
    }

    /// Push a value, evicting the oldest when full.
    pub fn push(&mut self, value: T) {
        if self.buf.len() < self.cap {
            self.buf.push(value);
        } else {
            self.buf[self.head] = value;
            self.head = (self.head + 1) % self.cap;
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Iterate values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let len = self.buf.len();
        let start = if len == self.cap { self.head } else { 0 };
        (0..len).map(move |i| &self.buf[(start + i) % len])
    }

    pub fn last(&self) -> Option<&T> {
        if self.buf.is_empty() {
            return None;
        }
        let idx = if self.buf.len() == self.cap { (self.head + self.cap - 1) % self.cap } else { self.buf.len() - 1 };
        self.buf.get(idx)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
    }
}

// ---------------------------------------------------------------------------
// Metric types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Histogram,
    Gauge,
    Timer,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MetricType::Counter => "counter",
            MetricType::Histogram => "histogram",
            MetricType::Gauge => "gauge",
            MetricType::Timer => "timer",
        };
        write!(f, "{s}")
    }
}

pub type Labels = BTreeMap<String, String>;

/// Build a label map from string pairs.
pub fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// One observation.
#[derive(Debug, Clone, Serialize)]
pub struct MetricDataPoint {
    pub timestamp_ms: u64,
    pub value: f64,
    pub labels: Labels,
    #[serde(skip)]
    recorded_at: Instant,
}

impl MetricDataPoint {
    pub fn new(value: f64, labels: Labels) -> Self {
        Self { timestamp_ms: now_ms(), value, labels, recorded_at: Instant::now() }
    }

    pub fn age(&self) -> Duration {
        self.recorded_at.elapsed()
    }
}

/// Summary statistics over a set of points.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStatistics {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub p99: f64,
}

impl MetricStatistics {
    /// `None` for an empty slice.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let sum: f64 = sorted.iter().sum();
        let mean = sum / n as f64;
        let std_dev = if n > 1 {
            let var = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        Some(Self {
            count: n,
            sum,
            mean,
            median: percentile(&sorted, 0.5),
            std_dev,
            min: sorted[0],
            max: sorted[n - 1],
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        })
    }
}

/// Linear-interpolated percentile of an ascending, non-empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = idx - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// A named, bounded series of data points.
#[derive(Debug, Clone)]
pub struct PerformanceMetric {
    pub name: String,
    pub metric_type: MetricType,
    pub description: String,
    pub unit: String,
    points: RingBuffer<MetricDataPoint>,
}

impl PerformanceMetric {
    pub fn new(name: impl Into<String>, metric_type: MetricType, capacity: usize) -> Self {
        Self {
            name: name.into(),
            metric_type,
            description: String::new(),
            unit: String::new(),
            points: RingBuffer::new(capacity),
        }
    }

    pub fn add_point(&mut self, value: f64, labels: Labels) {
        self.points.push(MetricDataPoint::new(value, labels));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = &MetricDataPoint> + '_ {
        self.points.iter()
    }

    pub fn latest(&self) -> Option<f64> {
        self.points.last().map(|p| p.value)
    }

    fn values(&self, window: Option<Duration>) -> Vec<f64> {
        self.points
            .iter()
            .filter(|p| window.map_or(true, |w| p.age() <= w))
            .map(|p| p.value)
            .collect()
    }

    /// Statistics over the points recorded within `window` (all when `None`).
    pub fn statistics(&self, window: Option<Duration>) -> Option<MetricStatistics> {
        MetricStatistics::from_values(&self.values(window))
    }

    /// Compare the mean of the newer half of the window against the older half.
    pub fn trend(&self, window: Option<Duration>) -> Trend {
        let values = self.values(window);
        if values.len() < 2 {
            return Trend::InsufficientData;
        }
        let mid = values.len() / 2;
        let first = values[..mid].iter().sum::<f64>() / mid as f64;
        let second = values[mid..].iter().sum::<f64>() / (values.len() - mid) as f64;
        if second > first * 1.05 {
            Trend::Increasing
        } else if second < first * 0.95 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub max_points_per_metric: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { max_points_per_metric: DEFAULT_MAX_POINTS }
    }
}

/// Periodic callback that records into the collector it is handed.
pub type CollectorFn = Arc<dyn Fn(&MetricsCollector) -> Result<(), String> + Send + Sync>;

struct CustomCollector {
    name: String,
    interval: Duration,
    run: CollectorFn,
}

struct CollectorState {
    config: CollectorConfig,
    metrics: RwLock<BTreeMap<String, PerformanceMetric>>,
    custom: Mutex<Vec<CustomCollector>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for CollectorState {
    fn drop(&mut self) {
        for t in self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            t.abort();
        }
    }
}

/// Shared metrics store. Clone freely; clones share the same series.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<CollectorState>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(CollectorConfig::default())
    }
}

impl MetricsCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            inner: Arc::new(CollectorState {
                config,
                metrics: RwLock::new(BTreeMap::new()),
                custom: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, PerformanceMetric>> {
        self.inner.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, PerformanceMetric>> {
        self.inner.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create (or redescribe) a metric series. Existing points are kept.
    pub fn create_metric(&self, name: &str, metric_type: MetricType, description: &str, unit: &str) {
        let mut metrics = self.write();
        let metric = metrics
            .entry(name.to_string())
            .or_insert_with(|| PerformanceMetric::new(name, metric_type, self.inner.config.max_points_per_metric));
        metric.description = description.to_string();
        metric.unit = unit.to_string();
    }

    fn record(&self, name: &str, metric_type: MetricType, value: f64, labels: Labels) {
        self.write()
            .entry(name.to_string())
            .or_insert_with(|| PerformanceMetric::new(name, metric_type, self.inner.config.max_points_per_metric))
            .add_point(value, labels);
    }

    pub fn record_counter(&self, name: &str, value: f64, labels: Labels) {
        self.record(name, MetricType::Counter, value, labels);
    }

    pub fn record_histogram(&self, name: &str, value: f64, labels: Labels) {
        self.record(name, MetricType::Histogram, value, labels);
    }

    pub fn record_gauge(&self, name: &str, value: f64, labels: Labels) {
        self.record(name, MetricType::Gauge, value, labels);
    }

    /// Timer values are milliseconds.
    pub fn record_timer(&self, name: &str, value_ms: f64, labels: Labels) {
        self.record(name, MetricType::Timer, value_ms, labels);
    }

    /// Snapshot of one series.
    pub fn get_metric(&self, name: &str) -> Option<PerformanceMetric> {
        self.read().get(name).cloned()
    }

    pub fn statistics(&self, name: &str, window: Option<Duration>) -> Option<MetricStatistics> {
        self.read().get(name)?.statistics(window)
    }

    pub fn trend(&self, name: &str, window: Option<Duration>) -> Trend {
        self.read().get(name).map_or(Trend::InsufficientData, |metric| metric.trend(window))
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// Statistics for every non-empty series.
    pub fn all_statistics(&self, window: Option<Duration>) -> BTreeMap<String, MetricStatistics> {
        self.read()
            .iter()
            .filter_map(|(name, m)| m.statistics(window).map(|s| (name.clone(), s)))
            .collect()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    pub fn export_json(&self, window: Option<Duration>) -> serde_json::Value {
        let metrics = self.read();
        let mut out = serde_json::Map::new();
        for (name, m) in metrics.iter() {
            out.insert(
                name.clone(),
                serde_json::json!({
                    "type": m.metric_type,
                    "description": m.description,
                    "unit": m.unit,
                    "statistics": m.statistics(window),
                    "trend": m.trend(window),
                    "latest": m.latest(),
                }),
            );
        }
        serde_json::json!({ "timestamp_ms": now_ms(), "metrics": out })
    }

    /// Prometheus text exposition. Counters are summed, gauges report their
    /// latest value, histograms and timers are exposed as summaries.
    pub fn export_prometheus(&self) -> String {
        let metrics = self.read();
        let mut out = String::new();
        for (name, m) in metrics.iter() {
            let prom = prometheus_name(name);
            if !m.description.is_empty() {
                let _ = writeln!(out, "# HELP {prom} {}", m.description);
            }
            match m.metric_type {
                MetricType::Counter => {
                    let total: f64 = m.points().map(|p| p.value).sum();
                    let _ = writeln!(out, "# TYPE {prom} counter");
                    let _ = writeln!(out, "{prom} {total}");
                }
                MetricType::Gauge => {
                    let _ = writeln!(out, "# TYPE {prom} gauge");
                    let _ = writeln!(out, "{prom} {}", m.latest().unwrap_or(0.0));
                }
                MetricType::Histogram | MetricType::Timer => {
                    let _ = writeln!(out, "# TYPE {prom} summary");
                    if let Some(s) = m.statistics(None) {
                        let _ = writeln!(out, "{prom}{{quantile=\"0.5\"}} {}", s.median);
                        let _ = writeln!(out, "{prom}{{quantile=\"0.95\"}} {}", s.p95);
                        let _ = writeln!(out, "{prom}{{quantile=\"0.99\"}} {}", s.p99);
                        let _ = writeln!(out, "{prom}_sum {}", s.sum);
                        let _ = writeln!(out, "{prom}_count {}", s.count);
                    }
                }
            }
        }
        out
    }

    // -----------------------------------------------------------------------
    // Custom collectors
    // -----------------------------------------------------------------------

    pub fn register_collector<F>(&self, name: &str, interval: Duration, f: F)
    where
        F: Fn(&MetricsCollector) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut custom = self.inner.custom.lock().unwrap_or_else(PoisonError::into_inner);
        custom.retain(|c| c.name != name);
        custom.push(CustomCollector { name: name.to_string(), interval, run: Arc::new(f) });
    }

    /// Spawn one interval task per registered collector. Must be called from
    /// within a tokio runtime. Calling it again restarts the tasks. Tasks end
    /// once every handle to this collector is dropped.
    pub fn start_collection(&self) {
        self.stop_collection();
        let custom = self.inner.custom.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for c in custom.iter() {
            let weak: Weak<CollectorState> = Arc::downgrade(&self.inner);
            let run = Arc::clone(&c.run);
            let name = c.name.clone();
            let period = c.interval.max(Duration::from_millis(1));
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    ticker.tick().await;
                    let Some(inner) = weak.upgrade() else { break };
                    if let Err(e) = run(&MetricsCollector { inner }) {
                        warn!(collector = %name, error = %e, "custom collector failed");
                    }
                }
            }));
        }
        debug!(collectors = tasks.len(), "metric collection started");
    }

    pub fn stop_collection(&self) {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for t in tasks.drain(..) {
            t.abort();
        }
    }

    pub fn is_collecting(&self) -> bool {
        !self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

fn prometheus_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect()
}

//! Metrics collected and aggregated during load tests.
//!
//! Every virtual user records into one shared [`MetricCollector`]. The collector holds
//! named metrics of three kinds:
//!  - [`Counter`]: a monotonic count, for example `http_reqs`;
//!  - [`Rate`]: the fraction of `true` values added, for example `errors`;
//!  - [`Trend`]: a distribution of values supporting average, minimum, maximum, median
//!    and percentile queries, for example `query_latency_ms`.
//!
//! Counters and rates are lock-free atomics. Trends are protected by a mutex which is
//! only held while a single value is pushed or while the samples are summarized, never
//! across an `.await`.
//!
//! When the load test finishes, [`MetricCollector::snapshot`] returns a serializable
//! [`MetricsSnapshot`] of every metric.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use strum::IntoEnumIterator;

use crate::request::{FailureKind, RequestOutcome};
use crate::SkeinError;

/// Counts every completed request.
pub const HTTP_REQS: &str = "http_reqs";
/// Latency reported by the transport, in milliseconds.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Wall-clock latency of each request measured around the transport, in milliseconds.
pub const QUERY_LATENCY: &str = "query_latency_ms";
/// Rate of failed requests: `true` is recorded for every failure.
pub const ERRORS: &str = "errors";

/// Name of the counter tracking one [`FailureKind`], for example `errors_transport`.
pub fn failure_metric_name(kind: FailureKind) -> String {
    format!("{}_{}", ERRORS, kind.as_ref())
}

/// The three kinds of metric.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

/// A monotonic non-negative count.
///
/// Adding zero still counts as an update, so a counter that was checked but never
/// incremented holds data with a value of 0.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
    updates: AtomicU64,
}
impl Counter {
    /// Increment the counter by `n`.
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    /// The current count.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// How many times the counter was updated.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

/// The fraction of `true` values out of all values added.
#[derive(Debug, Default)]
pub struct Rate {
    trues: AtomicU64,
    total: AtomicU64,
}
impl Rate {
    /// Record one boolean value.
    pub fn add(&self, value: bool) {
        if value {
            self.trues.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// How many `true` values were added.
    pub fn trues(&self) -> u64 {
        self.trues.load(Ordering::Relaxed)
    }

    /// How many values were added.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// `trues / total`, or 0 if nothing was added.
    pub fn rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.trues() as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct TrendSamples {
    values: Vec<f64>,
    sum: f64,
    min: f64,
    max: f64,
}

/// A distribution of values.
#[derive(Debug, Default)]
pub struct Trend {
    samples: Mutex<TrendSamples>,
}
impl Trend {
    fn lock(&self) -> MutexGuard<'_, TrendSamples> {
        // A panic while holding the lock can't leave the samples half-written.
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one value.
    pub fn add(&self, value: f64) {
        let mut samples = self.lock();
        if samples.values.is_empty() {
            samples.min = value;
            samples.max = value;
        } else {
            samples.min = samples.min.min(value);
            samples.max = samples.max.max(value);
        }
        samples.sum += value;
        samples.values.push(value);
    }

    /// How many values were added.
    pub fn count(&self) -> usize {
        self.lock().values.len()
    }

    /// The `p`th percentile of all values, `None` if nothing was added.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let mut sorted = self.lock().values.clone();
        sorted.sort_by(f64::total_cmp);
        percentile(&sorted, p)
    }

    /// Summarize the distribution.
    pub fn summary(&self) -> TrendSummary {
        let (mut sorted, sum, min, max) = {
            let samples = self.lock();
            (samples.values.clone(), samples.sum, samples.min, samples.max)
        };
        if sorted.is_empty() {
            return TrendSummary::default();
        }
        sorted.sort_by(f64::total_cmp);
        let at = |p: f64| percentile(&sorted, p).unwrap_or(0.0);
        TrendSummary {
            count: sorted.len(),
            avg: sum / sorted.len() as f64,
            min,
            max,
            med: at(50.0),
            p90: at(90.0),
            p95: at(95.0),
            p99: at(99.0),
        }
    }
}

/// Percentile of sorted values, linearly interpolating between the closest ranks.
///
/// The rank of percentile `p` is `p / 100 * (n - 1)`. Values outside 0-100 are clamped.
///
/// # Example
/// ```rust
/// use skein::metrics::percentile;
///
/// let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
/// assert_eq!(percentile(&sorted, 50.0), Some(30.0));
/// assert!((percentile(&sorted, 95.0).unwrap() - 48.0).abs() < 1e-9);
/// assert_eq!(percentile(&[], 95.0), None);
/// ```
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = p.clamp(0.0, 100.0) / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

/// Summary statistics of a [`Trend`]. Everything is zero for an empty trend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// A named metric. Cloning is cheap and clones share the same underlying values.
#[derive(Clone, Debug)]
pub enum Metric {
    Counter(Arc<Counter>),
    Rate(Arc<Rate>),
    Trend(Arc<Trend>),
}
impl Metric {
    fn new(kind: MetricKind) -> Metric {
        match kind {
            MetricKind::Counter => Metric::Counter(Arc::default()),
            MetricKind::Rate => Metric::Rate(Arc::default()),
            MetricKind::Trend => Metric::Trend(Arc::default()),
        }
    }

    /// What kind of metric this is.
    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::Counter(_) => MetricKind::Counter,
            Metric::Rate(_) => MetricKind::Rate,
            Metric::Trend(_) => MetricKind::Trend,
        }
    }

    /// Returns `true` if no value has been recorded yet.
    pub fn is_empty(&self) -> bool {
        match self {
            Metric::Counter(counter) => counter.updates() == 0,
            Metric::Rate(rate) => rate.total() == 0,
            Metric::Trend(trend) => trend.count() == 0,
        }
    }

    /// A point-in-time copy of this metric. Per-second rates are calculated over
    /// `duration`.
    pub fn snapshot(&self, duration: Duration) -> MetricSnapshot {
        match self {
            Metric::Counter(counter) => {
                let count = counter.value();
                MetricSnapshot::Counter {
                    count,
                    rate: per_second(count, duration),
                }
            }
            Metric::Rate(rate) => {
                let trues = rate.trues();
                let total = rate.total();
                MetricSnapshot::Rate {
                    trues,
                    falses: total.saturating_sub(trues),
                    total,
                    rate: rate.rate(),
                }
            }
            Metric::Trend(trend) => MetricSnapshot::Trend(trend.summary()),
        }
    }
}

/// Serializable copy of a [`Metric`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSnapshot {
    Counter { count: u64, rate: f64 },
    /// For the `errors` rate, `trues` counts failed requests and `falses` successful ones.
    Rate {
        trues: u64,
        falses: u64,
        total: u64,
        rate: f64,
    },
    Trend(TrendSummary),
}

/// Serializable copy of every metric in a [`MetricCollector`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Every metric, sorted by name.
    pub metrics: BTreeMap<String, MetricSnapshot>,
    /// Distinct error details, and how often each was seen.
    pub errors: BTreeMap<String, usize>,
}

/// Helper to calculate an event rate per second.
pub(crate) fn per_second(count: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        count as f64 / seconds
    } else {
        0.0
    }
}

// The metrics every request updates, resolved once so recording never looks up a name.
#[derive(Debug)]
struct BuiltinMetrics {
    http_reqs: Arc<Counter>,
    http_req_duration: Arc<Trend>,
    query_latency: Arc<Trend>,
    errors: Arc<Rate>,
    failures: Vec<(FailureKind, Arc<Counter>)>,
}

/// Thread-safe registry of named metrics, shared by all virtual users through an [`Arc`].
///
/// Metrics are created on first use and never removed.
#[derive(Debug)]
pub struct MetricCollector {
    metrics: RwLock<HashMap<String, Metric>>,
    errors: Mutex<BTreeMap<String, usize>>,
    builtin: BuiltinMetrics,
}
impl Default for MetricCollector {
    fn default() -> Self {
        MetricCollector::new()
    }
}
impl MetricCollector {
    /// Create a collector with the built-in request metrics already registered.
    pub fn new() -> MetricCollector {
        let builtin = BuiltinMetrics {
            http_reqs: Arc::default(),
            http_req_duration: Arc::default(),
            query_latency: Arc::default(),
            errors: Arc::default(),
            failures: FailureKind::iter()
                .map(|kind| (kind, Arc::default()))
                .collect(),
        };

        let mut metrics = HashMap::new();
        metrics.insert(
            HTTP_REQS.to_string(),
            Metric::Counter(builtin.http_reqs.clone()),
        );
        metrics.insert(
            HTTP_REQ_DURATION.to_string(),
            Metric::Trend(builtin.http_req_duration.clone()),
        );
        metrics.insert(
            QUERY_LATENCY.to_string(),
            Metric::Trend(builtin.query_latency.clone()),
        );
        metrics.insert(ERRORS.to_string(), Metric::Rate(builtin.errors.clone()));
        for (kind, counter) in &builtin.failures {
            metrics.insert(failure_metric_name(*kind), Metric::Counter(counter.clone()));
        }

        MetricCollector {
            metrics: RwLock::new(metrics),
            errors: Mutex::new(BTreeMap::new()),
            builtin,
        }
    }

    /// Returns the kind of metric the built-in `name` is, if it is one.
    pub fn builtin_kind(name: &str) -> Option<MetricKind> {
        match name {
            HTTP_REQS => Some(MetricKind::Counter),
            HTTP_REQ_DURATION | QUERY_LATENCY => Some(MetricKind::Trend),
            ERRORS => Some(MetricKind::Rate),
            _ => FailureKind::iter()
                .any(|kind| failure_metric_name(kind) == name)
                .then_some(MetricKind::Counter),
        }
    }

    /// Look up a metric by name.
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Look up a metric by name, creating it if it doesn't exist yet.
    ///
    /// Concurrent calls with the same name all return the same metric. Asking for an
    /// existing name with a different kind is an error.
    pub fn get_or_create(&self, name: &str, kind: MetricKind) -> Result<Metric, SkeinError> {
        let metric = match self.get(name) {
            Some(metric) => metric,
            None => self
                .metrics
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(name.to_string())
                .or_insert_with(|| Metric::new(kind))
                .clone(),
        };
        if metric.kind() != kind {
            return Err(SkeinError::InvalidMetric {
                name: name.to_string(),
                detail: format!("{} is a {}, not a {}", name, metric.kind(), kind),
            });
        }
        Ok(metric)
    }

    /// The named [`Counter`], created if needed.
    pub fn counter(&self, name: &str) -> Result<Arc<Counter>, SkeinError> {
        match self.get_or_create(name, MetricKind::Counter)? {
            Metric::Counter(counter) => Ok(counter),
            _ => unreachable!("get_or_create checks the metric kind"),
        }
    }

    /// The named [`Rate`], created if needed.
    pub fn rate(&self, name: &str) -> Result<Arc<Rate>, SkeinError> {
        match self.get_or_create(name, MetricKind::Rate)? {
            Metric::Rate(rate) => Ok(rate),
            _ => unreachable!("get_or_create checks the metric kind"),
        }
    }

    /// The named [`Trend`], created if needed.
    pub fn trend(&self, name: &str) -> Result<Arc<Trend>, SkeinError> {
        match self.get_or_create(name, MetricKind::Trend)? {
            Metric::Trend(trend) => Ok(trend),
            _ => unreachable!("get_or_create checks the metric kind"),
        }
    }

    /// Record the outcome of one request into the built-in metrics.
    ///
    /// This is a single synchronous call, so an outcome is either fully recorded or not
    /// recorded at all.
    pub fn record(&self, outcome: &RequestOutcome) {
        let wall_clock = duration_ms(outcome.latency);
        self.builtin.http_reqs.add(1);
        self.builtin.errors.add(!outcome.success);
        self.builtin.query_latency.add(wall_clock);
        self.builtin.http_req_duration.add(
            outcome
                .transport_latency
                .map(duration_ms)
                .unwrap_or(wall_clock),
        );
        // Every request updates every failure counter, so a clean run reports zeros.
        for (kind, counter) in self.builtin.failures.iter() {
            counter.add(u64::from(outcome.failure == Some(*kind)));
        }
        if let Some(detail) = outcome.error_detail.as_ref() {
            self.record_error(detail);
        }
    }

    /// Count one occurrence of an error.
    pub fn record_error(&self, detail: &str) {
        let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
        *errors.entry(detail.to_string()).or_insert(0) += 1;
    }

    /// Distinct errors, and how often each was seen.
    pub fn errors(&self) -> BTreeMap<String, usize> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many failures of each kind were recorded.
    pub fn failure_breakdown(&self) -> BTreeMap<FailureKind, u64> {
        self.builtin
            .failures
            .iter()
            .map(|(kind, counter)| (*kind, counter.value()))
            .collect()
    }

    /// Copy every metric. Per-second rates are calculated over `duration`.
    pub fn snapshot(&self, duration: Duration) -> MetricsSnapshot {
        let metrics = self
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, metric)| (name.to_string(), metric.snapshot(duration)))
            .collect();
        MetricsSnapshot {
            metrics,
            errors: self.errors(),
        }
    }
}

// Latencies are tracked as fractional milliseconds.
fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

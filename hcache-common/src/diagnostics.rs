//! # Diagnostics
//!
//! Purpose: Publish operation activities (start/stop pairs for get, set,
//! delete) and discrete counters (hit, miss, error) to a single injected
//! listener, and aggregate them into atomic totals for metrics export.
//!
//! ## Design Principles
//! 1. **Pay Only When Observed**: With no listener subscribed, every call is a
//!    single `OnceLock` load and returns immediately.
//! 2. **Explicit Ownership**: The emitter is constructed by the composition
//!    root and shared by `Arc`; there is no process-global registry.
//! 3. **Accumulator Pattern**: `MetricsListener` uses `AtomicU64` with
//!    `Ordering::Relaxed`; no locks on the hot path.
//! 4. **Subscribe Once**: The first listener wins; later subscriptions are
//!    ignored so nothing is counted twice.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use crate::error::CacheError;

/// Publisher name consumers subscribe to.
pub const PUBLISHER_NAME: &str = "hcache";

pub const EVENT_GET: &str = "hcache.Get";
pub const EVENT_SET: &str = "hcache.Set";
pub const EVENT_DELETE: &str = "hcache.Delete";
pub const EVENT_HIT: &str = "hcache.Hit";
pub const EVENT_MISS: &str = "hcache.Miss";
pub const EVENT_ERROR: &str = "hcache.Error";

/// Operations observed as start/stop activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Get,
    Set,
    Delete,
}

impl ActivityKind {
    pub const fn event_name(self) -> &'static str {
        match self {
            ActivityKind::Get => EVENT_GET,
            ActivityKind::Set => EVENT_SET,
            ActivityKind::Delete => EVENT_DELETE,
        }
    }

    pub const fn start_event_name(self) -> &'static str {
        match self {
            ActivityKind::Get => "hcache.Get.Start",
            ActivityKind::Set => "hcache.Set.Start",
            ActivityKind::Delete => "hcache.Delete.Start",
        }
    }

    pub const fn stop_event_name(self) -> &'static str {
        match self {
            ActivityKind::Get => "hcache.Get.Stop",
            ActivityKind::Set => "hcache.Set.Stop",
            ActivityKind::Delete => "hcache.Delete.Stop",
        }
    }
}

/// Keys an activity covers: one named key or a batch of `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyContext<'a> {
    Single(&'a str),
    Batch(usize),
}

impl KeyContext<'_> {
    pub fn count(&self) -> usize {
        match self {
            KeyContext::Single(_) => 1,
            KeyContext::Batch(count) => *count,
        }
    }
}

/// Opaque handle returned by `start_activity`; pass it to `stop_activity`.
#[derive(Debug)]
pub struct Activity {
    kind: ActivityKind,
    key: Option<String>,
    count: usize,
    started: Instant,
}

impl Activity {
    pub fn kind(&self) -> ActivityKind {
        self.kind
    }
}

/// One diagnostic event, borrowed for the duration of the listener call.
#[derive(Debug)]
pub enum DiagnosticEvent<'a> {
    ActivityStarted {
        kind: ActivityKind,
        key: Option<&'a str>,
        count: usize,
    },
    ActivityStopped {
        kind: ActivityKind,
        key: Option<&'a str>,
        count: usize,
        elapsed: Duration,
    },
    Hit {
        count: u64,
    },
    Miss {
        count: u64,
    },
    Error {
        keys: &'a [String],
        error: &'a CacheError,
    },
}

impl DiagnosticEvent<'_> {
    /// Fully qualified event name, e.g. `hcache.Get.Start`.
    pub fn name(&self) -> &'static str {
        match self {
            DiagnosticEvent::ActivityStarted { kind, .. } => kind.start_event_name(),
            DiagnosticEvent::ActivityStopped { kind, .. } => kind.stop_event_name(),
            DiagnosticEvent::Hit { .. } => EVENT_HIT,
            DiagnosticEvent::Miss { .. } => EVENT_MISS,
            DiagnosticEvent::Error { .. } => EVENT_ERROR,
        }
    }
}

/// Receives diagnostic events from an emitter.
pub trait DiagnosticListener: Send + Sync {
    /// Filters by base event name (`hcache.Get`, `hcache.Hit`, ...).
    fn is_enabled(&self, _name: &str) -> bool {
        true
    }

    fn on_event(&self, event: &DiagnosticEvent<'_>);
}

/// Named publish channel the stores raise events on.
#[derive(Default)]
pub struct DiagnosticEmitter {
    listener: OnceLock<Arc<dyn DiagnosticListener>>,
}

impl fmt::Debug for DiagnosticEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticEmitter")
            .field("name", &PUBLISHER_NAME)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

impl DiagnosticEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &'static str {
        PUBLISHER_NAME
    }

    /// Subscribes `listener`. Returns false when a listener is already active.
    pub fn subscribe(&self, listener: Arc<dyn DiagnosticListener>) -> bool {
        let accepted = self.listener.set(listener).is_ok();
        if !accepted {
            tracing::debug!(publisher = PUBLISHER_NAME, "listener already subscribed, ignoring");
        }
        accepted
    }

    pub fn is_subscribed(&self) -> bool {
        self.listener.get().is_some()
    }

    fn enabled(&self, name: &str) -> Option<&Arc<dyn DiagnosticListener>> {
        self.listener
            .get()
            .filter(|listener| listener.is_enabled(name))
    }

    /// Starts an activity, or returns `None` when nobody is listening.
    pub fn start_activity(&self, context: KeyContext<'_>, kind: ActivityKind) -> Option<Activity> {
        let listener = self.enabled(kind.event_name())?;
        let key = match context {
            KeyContext::Single(key) => Some(key.to_owned()),
            KeyContext::Batch(_) => None,
        };
        let activity = Activity {
            kind,
            key,
            count: context.count(),
            started: Instant::now(),
        };
        listener.on_event(&DiagnosticEvent::ActivityStarted {
            kind,
            key: activity.key.as_deref(),
            count: activity.count,
        });
        Some(activity)
    }

    /// Stops an activity started by `start_activity`.
    pub fn stop_activity(&self, activity: Option<Activity>) {
        let Some(activity) = activity else {
            return;
        };
        if let Some(listener) = self.enabled(activity.kind.event_name()) {
            listener.on_event(&DiagnosticEvent::ActivityStopped {
                kind: activity.kind,
                key: activity.key.as_deref(),
                count: activity.count,
                elapsed: activity.started.elapsed(),
            });
        }
    }

    pub fn report_hits(&self, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(listener) = self.enabled(EVENT_HIT) {
            listener.on_event(&DiagnosticEvent::Hit { count });
        }
    }

    pub fn report_misses(&self, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(listener) = self.enabled(EVENT_MISS) {
            listener.on_event(&DiagnosticEvent::Miss { count });
        }
    }

    /// Reports a failed operation with every key it touched.
    pub fn report_error(&self, keys: &[String], error: &CacheError) {
        if let Some(listener) = self.enabled(EVENT_ERROR) {
            listener.on_event(&DiagnosticEvent::Error { keys, error });
        }
    }
}

/// Default latency bucket boundaries in microseconds.
///
/// Sized for network round-trips rather than in-process calls.
pub const DEFAULT_LATENCY_BUCKETS_US: [u64; 12] = [
    50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000,
];

/// Point-in-time copy of all totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Keys requested by get activities.
    pub get_count: u64,
    /// Keys written by set activities.
    pub set_count: u64,
    /// Keys removed by delete activities.
    pub delete_count: u64,
    pub hits: u64,
    pub misses: u64,
    /// Error events observed.
    pub exceptions: u64,
    /// Activities started and not yet stopped.
    pub inflight: u64,
    pub latency: LatencySnapshot,
}

/// Snapshot of the latency histogram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencySnapshot {
    /// Bucket boundaries in microseconds.
    pub bounds_us: Vec<u64>,
    /// Bucket counts, including the overflow bucket at the end.
    pub buckets: Vec<u64>,
    pub samples: u64,
    pub sum_us: u64,
}

/// Listener aggregating every event into process-wide atomic totals.
///
/// `Ordering::Relaxed` is enough: the counters are independent and only need
/// to be eventually consistent for export.
pub struct MetricsListener {
    get_count: AtomicU64,
    set_count: AtomicU64,
    delete_count: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    exceptions: AtomicU64,
    inflight: AtomicU64,
    latency: LatencyHistogram,
}

impl Default for MetricsListener {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsListener {
    pub fn new() -> Self {
        Self::with_latency_buckets(DEFAULT_LATENCY_BUCKETS_US.to_vec())
    }

    /// Creates a listener with custom latency bucket boundaries.
    ///
    /// The boundaries must be sorted ascending and represent microseconds.
    ///
    /// **Input**: `bounds_us` (ascending microsecond thresholds).
    /// **Output**: a listener with zeroed counters and those buckets.
    pub fn with_latency_buckets(bounds_us: Vec<u64>) -> Self {
        MetricsListener {
            get_count: AtomicU64::new(0),
            set_count: AtomicU64::new(0),
            delete_count: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            exceptions: AtomicU64::new(0),
            inflight: AtomicU64::new(0),
            latency: LatencyHistogram::new(bounds_us),
        }
    }

    /// Returns a copy of every total for export.
    ///
    /// **Input**: none.
    /// **Output**: `MetricsSnapshot` with point-in-time values.
    ///
    /// **Logic**:
    /// 1. Load each counter independently (no cross-counter consistency).
    /// 2. Ask the histogram for its own snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            get_count: self.get_count.load(Ordering::Relaxed),
            set_count: self.set_count.load(Ordering::Relaxed),
            delete_count: self.delete_count.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            inflight: self.inflight.load(Ordering::Relaxed),
            latency: self.latency.snapshot(),
        }
    }

    fn counter_for(&self, kind: ActivityKind) -> &AtomicU64 {
        match kind {
            ActivityKind::Get => &self.get_count,
            ActivityKind::Set => &self.set_count,
            ActivityKind::Delete => &self.delete_count,
        }
    }
}

impl DiagnosticListener for MetricsListener {
    fn on_event(&self, event: &DiagnosticEvent<'_>) {
        match event {
            DiagnosticEvent::ActivityStarted { kind, count, .. } => {
                self.counter_for(*kind)
                    .fetch_add(*count as u64, Ordering::Relaxed);
                self.inflight.fetch_add(1, Ordering::Relaxed);
            }
            DiagnosticEvent::ActivityStopped { elapsed, .. } => {
                self.inflight.fetch_sub(1, Ordering::Relaxed);
                self.latency.record(*elapsed);
            }
            DiagnosticEvent::Hit { count } => {
                self.hits.fetch_add(*count, Ordering::Relaxed);
            }
            DiagnosticEvent::Miss { count } => {
                self.misses.fetch_add(*count, Ordering::Relaxed);
            }
            DiagnosticEvent::Error { .. } => {
                self.exceptions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Fixed-bucket latency histogram.
///
/// Linear bucket scan: the list is short and stays hot in cache.
pub struct LatencyHistogram {
    bounds_us: Vec<u64>,
    buckets: Vec<AtomicU64>,
    sum_us: AtomicU64,
    samples: AtomicU64,
}

impl LatencyHistogram {
    /// Creates a histogram with `bounds_us.len() + 1` buckets (last is overflow).
    pub fn new(bounds_us: Vec<u64>) -> Self {
        let buckets = (0..=bounds_us.len()).map(|_| AtomicU64::new(0)).collect();
        LatencyHistogram {
            bounds_us,
            buckets,
            sum_us: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    /// Adds one sample.
    ///
    /// **Input**: `latency` of one finished activity.
    /// **Output**: none (side-effects only).
    ///
    /// **Logic**:
    /// 1. Add the sample to `samples` and `sum_us`.
    /// 2. Bump the first bucket whose bound is >= the sample, else overflow.
    pub fn record(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(micros, Ordering::Relaxed);

        let idx = self
            .bounds_us
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(self.bounds_us.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            bounds_us: self.bounds_us.clone(),
            buckets: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            samples: self.samples.load(Ordering::Relaxed),
            sum_us: self.sum_us.load(Ordering::Relaxed),
        }
    }
}

//! Prometheus metrics for cells.
//!
//! All metrics follow the naming convention: `cells_<component>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // COLLECTION METRICS
    // =========================================================================

    /// Writes persisted through collection cells
    pub static ref CELL_WRITES: IntCounterVec = IntCounterVec::new(
        Opts::new("cells_collection_writes_total", "Total writes persisted by collection cells"),
        &["cell"]
    ).expect("metric creation failed");

    /// Values rejected by a schema
    pub static ref VALIDATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("cells_collection_validation_failures_total", "Values rejected by a cell schema"),
        &["cell", "direction"]  // direction: read/write
    ).expect("metric creation failed");

    /// Defaults materialized on first read
    pub static ref DEFAULTS_MATERIALIZED: IntCounterVec = IntCounterVec::new(
        Opts::new("cells_collection_defaults_materialized_total", "Defaults computed and persisted on first read"),
        &["cell"]
    ).expect("metric creation failed");

    // =========================================================================
    // LONG-POLL METRICS
    // =========================================================================

    /// Long-poll waits by outcome
    pub static ref LONG_POLL_WAITS: IntCounterVec = IntCounterVec::new(
        Opts::new("cells_longpoll_waits_total", "Long-poll waits by outcome"),
        &["outcome"]  // outcome: value/retry/cancelled/rejected
    ).expect("metric creation failed");

    /// Waits currently outstanding
    pub static ref LONG_POLL_PENDING: IntGauge = IntGauge::new(
        "cells_longpoll_pending_waits",
        "Long-poll waits currently outstanding"
    ).expect("metric creation failed");

    /// Time from request to resolution
    pub static ref LONG_POLL_WAIT_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "cells_longpoll_wait_duration_seconds",
            "Time a long-poll wait stayed open"
        ).buckets(exponential_buckets(0.001, 4.0, 12).expect("valid buckets"))
    ).expect("metric creation failed");
}

/// Handle to the registered metrics.
pub struct MetricsHandle {
    _registry: Registry,
}

/// Register all metrics with the global registry.
///
/// Calling this more than once is allowed; metrics already present are kept.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Collection
        Box::new(CELL_WRITES.clone()),
        Box::new(VALIDATION_FAILURES.clone()),
        Box::new(DEFAULTS_MATERIALIZED.clone()),
        // Long-poll
        Box::new(LONG_POLL_WAITS.clone()),
        Box::new(LONG_POLL_PENDING.clone()),
        Box::new(LONG_POLL_WAIT_DURATION.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        _registry: REGISTRY.clone(),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

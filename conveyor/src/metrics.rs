//! Prometheus metrics for conveyor.
//!
//! Compiled only with the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `conveyor_jobs_pushed_total` - jobs pushed by the dispatcher
//! - `conveyor_jobs_completed_total` - handler outcomes by status
//! - `conveyor_events_dispatched_total` - events handed to the bus
//!
//! ## Gauges
//! - `conveyor_queue_depth` - ready jobs per queue
//!
//! ## Histograms
//! - `conveyor_job_duration_seconds` - handler duration
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, GaugeVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for conveyor metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `queue`.
pub static JOBS_PUSHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("conveyor_jobs_pushed_total", "Total number of jobs pushed");
    CounterVec::new(opts, &["queue"]).expect("conveyor_jobs_pushed_total metric creation failed")
});

/// Labels: `queue`, `job_name`, `status` (success, retried, failed).
pub static JOBS_COMPLETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "conveyor_jobs_completed_total",
        "Total number of handler invocations by outcome",
    );
    CounterVec::new(opts, &["queue", "job_name", "status"])
        .expect("conveyor_jobs_completed_total metric creation failed")
});

/// Labels: `event`, `mode` (sync, async).
pub static EVENTS_DISPATCHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "conveyor_events_dispatched_total",
        "Total number of events dispatched",
    );
    CounterVec::new(opts, &["event", "mode"])
        .expect("conveyor_events_dispatched_total metric creation failed")
});

/// Labels: `queue`.
pub static QUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("conveyor_queue_depth", "Ready jobs per queue");
    GaugeVec::new(opts, &["queue"]).expect("conveyor_queue_depth metric creation failed")
});

/// Labels: `queue`, `job_name`, `status`.
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.001, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "conveyor_job_duration_seconds",
        "Handler duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["queue", "job_name", "status"])
        .expect("conveyor_job_duration_seconds metric creation failed")
});

/// Register all collectors with [`REGISTRY`]. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_PUSHED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_COMPLETED_TOTAL.clone()),
        Box::new(EVENTS_DISPATCHED_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        match registry.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

pub fn record_job_pushed(queue: &str) {
    JOBS_PUSHED_TOTAL.with_label_values(&[queue]).inc();
}

pub fn record_job_completed(queue: &str, job_name: &str, status: &str) {
    JOBS_COMPLETED_TOTAL
        .with_label_values(&[queue, job_name, status])
        .inc();
}

pub fn record_event_dispatched(event: &str, mode: &str) {
    EVENTS_DISPATCHED_TOTAL.with_label_values(&[event, mode]).inc();
}

pub fn set_queue_depth(queue: &str, depth: f64) {
    QUEUE_DEPTH.with_label_values(&[queue]).set(depth);
}

pub fn observe_job_duration(queue: &str, job_name: &str, status: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[queue, job_name, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

//! Tracing and telemetry instrumentation for conveyor.
//!
//! Span constructors and `record_*` helpers used by the dispatcher, event bus
//! and workers. Every helper logs through `tracing`; with the `metrics`
//! feature enabled it also updates the Prometheus collectors in
//! [`crate::metrics`].
//!
//! # Example
//!
//! ```ignore
//! use conveyor::telemetry::{init_tracing, job_handle_span};
//!
//! init_tracing(false);
//! let span = job_handle_span("job-123", "send-welcome", "mail", 0);
//! let _enter = span.enter();
//! ```

use tracing::{info_span, Span};
use tracing_subscriber::EnvFilter;

/// Install a global `tracing` subscriber filtered by `RUST_LOG`.
///
/// Falls back to `info` when `RUST_LOG` is unset or invalid. Returns false if
/// a global subscriber was already installed.
pub fn init_tracing(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}

/// Span covering a push onto a queue.
#[must_use]
pub fn job_push_span(job_id: impl AsRef<str>, queue: impl AsRef<str>) -> Span {
    info_span!(
        "conveyor.push",
        job_id = %job_id.as_ref(),
        queue = %queue.as_ref(),
    )
}

/// Span covering a synchronous dispatch.
#[must_use]
pub fn job_dispatch_span(name: impl AsRef<str>, queue: impl AsRef<str>) -> Span {
    info_span!(
        "conveyor.dispatch",
        job_name = %name.as_ref(),
        queue = %queue.as_ref(),
    )
}

/// Span covering one handler invocation on a worker.
#[must_use]
pub fn job_handle_span(
    job_id: impl AsRef<str>,
    name: impl AsRef<str>,
    queue: impl AsRef<str>,
    attempts: u32,
) -> Span {
    info_span!(
        "conveyor.handle",
        job_id = %job_id.as_ref(),
        job_name = %name.as_ref(),
        queue = %queue.as_ref(),
        attempts = attempts,
    )
}

/// Span covering the fan-out of one event to its listeners.
#[must_use]
pub fn event_span(name: impl AsRef<str>, listeners: usize) -> Span {
    info_span!(
        "conveyor.event",
        event = %name.as_ref(),
        listeners = listeners,
    )
}

/// Record a job pushed onto `queue`.
pub fn record_job_pushed(queue: impl AsRef<str>) {
    tracing::debug!(queue = %queue.as_ref(), "job pushed");

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_pushed(queue.as_ref());
}

/// Record the outcome of a handler invocation.
///
/// `status` is one of `success`, `retried` or `failed`.
pub fn record_job_completed(queue: impl AsRef<str>, name: impl AsRef<str>, status: impl AsRef<str>) {
    tracing::debug!(
        queue = %queue.as_ref(),
        job_name = %name.as_ref(),
        status = %status.as_ref(),
        "job completed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_completed(queue.as_ref(), name.as_ref(), status.as_ref());
}

/// Record an event handed to the bus; `mode` is `sync` or `async`.
pub fn record_event_dispatched(name: impl AsRef<str>, mode: &str) {
    tracing::debug!(event = %name.as_ref(), mode, "event dispatched");

    #[cfg(feature = "metrics")]
    crate::metrics::record_event_dispatched(name.as_ref(), mode);
}

/// Update the ready-job gauge for `queue`.
pub fn set_queue_depth(queue: impl AsRef<str>, depth: usize) {
    tracing::trace!(queue = %queue.as_ref(), depth, "queue depth updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_queue_depth(queue.as_ref(), depth as f64);
}

/// Observe the duration of a handler invocation.
pub fn observe_job_duration(
    queue: impl AsRef<str>,
    name: impl AsRef<str>,
    status: impl AsRef<str>,
    duration_secs: f64,
) {
    tracing::debug!(
        queue = %queue.as_ref(),
        job_name = %name.as_ref(),
        status = %status.as_ref(),
        duration_secs,
        "job duration observed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::observe_job_duration(queue.as_ref(), name.as_ref(), status.as_ref(), duration_secs);
}

/// Start timing a handler invocation.
pub fn record_job_start(job_id: impl AsRef<str>) -> JobTimingHandle {
    JobTimingHandle {
        job_id: job_id.as_ref().to_string(),
        start: std::time::Instant::now(),
    }
}

/// Finish timing a handler invocation and record its outcome.
pub fn record_job_end(
    handle: JobTimingHandle,
    queue: impl AsRef<str>,
    name: impl AsRef<str>,
    status: impl AsRef<str>,
) {
    let duration_secs = handle.start.elapsed().as_secs_f64();
    observe_job_duration(queue.as_ref(), name.as_ref(), status.as_ref(), duration_secs);
    record_job_completed(queue, name, status);
}

/// Returned by [`record_job_start`] and consumed by [`record_job_end`].
#[derive(Debug)]
pub struct JobTimingHandle {
    job_id: String,
    start: std::time::Instant,
}

impl JobTimingHandle {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}

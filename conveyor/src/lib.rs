//! Conveyor - in-process job queue, event bus and queue workers.
//!
//! A small runtime for deferring work inside one process: named FIFO queues
//! with bounded retries, a dispatcher that routes payloads onto them, an
//! event bus that fans events out to listeners, and workers that drain
//! queues under cancellation and deadlines.
//!
//! # Core Concepts
//!
//! - **Scope**: [`Scope`] carries cancellation and an optional deadline.
//!   Every `*_with_scope` operation checks it on entry.
//!
//! - **Queue**: [`Queue`] is a named FIFO of [`Job`]s. Retries go to the
//!   tail with `attempts + 1`; jobs at their ceiling are rejected by
//!   [`Queue::retry`] and recorded by [`Queue::fail`].
//!
//! - **Dispatcher**: [`JobDispatcher`] wraps payloads implementing
//!   [`JobPayload`] into jobs and appends them to their queue, or runs
//!   [`Runnable`] payloads in place.
//!
//! - **Events**: [`EventBus`] invokes [`Listener`]s in registration order,
//!   either in the caller's scope or through a queue as an [`EventJob`].
//!
//! - **Workers**: [`Worker`] pops batches and runs them through a
//!   [`Handler`], retrying and failing jobs per their retry ceiling.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use conveyor::*;
//! use std::sync::Arc;
//!
//! let queues = Arc::new(QueueSet::new(QueueConfig::default()));
//! let dispatcher = JobDispatcher::new(Arc::clone(&queues));
//! dispatcher.dispatch(SendWelcome { user_id: 7 })?;
//!
//! let worker = WorkerBuilder::new(WorkerOptions::new("w1"))
//!     .with_queues(queues)
//!     .with_handler(Arc::new(RunnableHandler::<SendWelcome>::new()))
//!     .build()?;
//! worker.run(&Scope::new()).await;
//! ```

/// Capabilities supplied by the host: logging, mail and key-value cache.
pub mod capability;

/// Queue and worker configuration, including named worker profiles.
pub mod config;

/// Payload routing onto queues and synchronous dispatch.
pub mod dispatch;

/// Error taxonomy shared by queues, the dispatcher and the event bus.
pub mod error;

/// Named events, listeners and the event bus.
pub mod events;

/// Failure records and sinks for jobs that exhaust their retries.
pub mod failure;

/// Payload and handler traits.
pub mod handler;

/// Job envelope, identifiers and lifecycle states.
pub mod job;

/// Broadcast of job lifecycle transitions.
pub mod lifecycle;

/// Stock listeners over the host capabilities.
pub mod listeners;

/// Named FIFO queues with retry and dead-letter support.
pub mod queue;

/// Retry policy.
pub mod retry;

/// Workers draining queues through handlers.
pub mod runtime;

/// Cancellation and deadline propagation.
pub mod scope;

/// Tracing spans and telemetry helpers.
pub mod telemetry;

#[cfg(feature = "metrics")]
/// Prometheus collectors.
pub mod metrics;

pub use capability::*;
pub use config::*;
pub use dispatch::*;
pub use error::*;
pub use events::*;
pub use failure::*;
pub use handler::*;
pub use job::*;
pub use lifecycle::*;
pub use listeners::*;
pub use queue::*;
pub use retry::{decide, should_fail, RetryDecision};
pub use runtime::*;
pub use scope::*;

use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::failure::FailureSink;
use crate::handler::{Handler, JobPayload};
use crate::lifecycle::LifecycleBus;
use crate::queue::QueueSet;

use super::supervisor::Worker;
use super::worker::WorkerOptions;

/// Builder for a [`Worker`] with explicit dependencies.
///
/// The queue set and handler are required; the failure sink defaults to
/// [`LogFailureSink`](crate::failure::LogFailureSink) and lifecycle events
/// are off unless a bus is given.
///
/// # Example
///
/// ```ignore
/// let worker = WorkerBuilder::new(WorkerOptions::from(profiles.select("mail")?))
///     .with_queues(queues)
///     .with_handler(Arc::new(RunnableHandler::<MailJob>::new()))
///     .with_lifecycle(bus)
///     .build()?;
/// let reason = worker.run(&scope).await;
/// ```
pub struct WorkerBuilder<T, H> {
    options: WorkerOptions,
    queues: Option<Arc<QueueSet<T>>>,
    handler: Option<Arc<H>>,
    failures: Option<Arc<dyn FailureSink>>,
    lifecycle: Option<Arc<LifecycleBus>>,
}

impl<T, H> fmt::Debug for WorkerBuilder<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("WorkerBuilder");
        debug.field("options", &self.options);
        debug.field("queues_set", &self.queues.is_some());
        debug.field("handler_set", &self.handler.is_some());
        debug.field("failures_set", &self.failures.is_some());
        debug.field("lifecycle_set", &self.lifecycle.is_some());

        if self.handler.is_some() {
            debug.field("handler_type", &type_name::<H>());
        }

        debug.finish()
    }
}

impl<T, H> WorkerBuilder<T, H>
where
    T: JobPayload,
    H: Handler<T> + 'static,
{
    pub fn new(options: WorkerOptions) -> Self {
        Self {
            options,
            queues: None,
            handler: None,
            failures: None,
            lifecycle: None,
        }
    }

    /// Start from a worker profile; the worker id is `worker_id`.
    pub fn from_config(worker_id: impl Into<String>, config: &WorkerConfig) -> Self {
        let options = WorkerOptions {
            worker_id: worker_id.into(),
            ..WorkerOptions::from(config)
        };
        Self::new(options)
    }

    pub fn with_queues(mut self, queues: Arc<QueueSet<T>>) -> Self {
        self.queues = Some(queues);
        self
    }

    pub fn with_handler(mut self, handler: Arc<H>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_failure_sink(mut self, failures: Arc<dyn FailureSink>) -> Self {
        self.failures = Some(failures);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<LifecycleBus>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// # Errors
    ///
    /// Returns an error if a required dependency is missing or the options
    /// name no queues.
    pub fn build(self) -> anyhow::Result<Worker<T, H>> {
        self.options.validate()?;
        let queues = self
            .queues
            .ok_or_else(|| anyhow::anyhow!("queues dependency missing"))?;
        let handler = self
            .handler
            .ok_or_else(|| anyhow::anyhow!("handler dependency missing"))?;

        let mut worker = Worker::new(self.options, queues, handler);
        if let Some(failures) = self.failures {
            worker = worker.with_failure_sink(failures);
        }
        if let Some(lifecycle) = self.lifecycle {
            worker = worker.with_lifecycle(lifecycle);
        }
        Ok(worker)
    }
}

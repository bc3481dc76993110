use std::collections::HashMap;
use std::sync::Arc;

use tracing::Instrument;

use crate::error::{QueueError, Result};
use crate::handler::{JobPayload, Runnable};
use crate::job::{Job, JobId};
use crate::lifecycle::{JobLifecycleEvent, LifecycleBus, LifecycleMeta};
use crate::queue::QueueSet;
use crate::scope::Scope;
use crate::telemetry;

/// Routes payloads onto their queues, or runs them in place.
///
/// Cloning is cheap; clones share the queue set and lifecycle bus.
pub struct JobDispatcher<T> {
    queues: Arc<QueueSet<T>>,
    lifecycle: Option<Arc<LifecycleBus>>,
    default_max_retries: u32,
}

impl<T> Clone for JobDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            queues: Arc::clone(&self.queues),
            lifecycle: self.lifecycle.clone(),
            default_max_retries: self.default_max_retries,
        }
    }
}

impl<T> std::fmt::Debug for JobDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("queues", &self.queues.names())
            .field("lifecycle_set", &self.lifecycle.is_some())
            .field("default_max_retries", &self.default_max_retries)
            .finish()
    }
}

impl<T: JobPayload> JobDispatcher<T> {
    /// Dispatcher over `queues`, taking the retry default from their config.
    pub fn new(queues: Arc<QueueSet<T>>) -> Self {
        let default_max_retries = queues.config().default_max_retries;
        Self {
            queues,
            lifecycle: None,
            default_max_retries,
        }
    }

    /// Publish an `Enqueued` event for every dispatched job.
    pub fn with_lifecycle(mut self, lifecycle: Arc<LifecycleBus>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Retry ceiling for payloads that do not declare one.
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn queues(&self) -> Arc<QueueSet<T>> {
        Arc::clone(&self.queues)
    }

    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries
    }

    /// Wrap `data` in a fresh job and append it to the payload's queue.
    pub fn dispatch(&self, data: T) -> Result<JobId> {
        let job = self.wrap(data);
        let id = job.id().clone();
        let span = telemetry::job_push_span(id.as_str(), job.queue_name());
        let _enter = span.enter();

        let meta = self
            .lifecycle
            .as_ref()
            .map(|_| LifecycleMeta::for_job(&job, job.data().name()));
        let queue = self.queues.get_or_create(job.queue_name());
        queue.push(job);

        telemetry::record_job_pushed(queue.name());
        telemetry::set_queue_depth(queue.name(), queue.size());
        if let (Some(bus), Some(meta)) = (&self.lifecycle, meta) {
            bus.publish(JobLifecycleEvent::Enqueued { meta });
        }
        Ok(id)
    }

    /// [`dispatch`](Self::dispatch), refused once `scope` is done.
    pub fn dispatch_with_scope(&self, scope: &Scope, data: T) -> Result<JobId> {
        scope.check()?;
        self.dispatch(data)
    }

    /// Dispatch several payloads.
    ///
    /// Payloads bound for the same queue are appended in one step, in the
    /// order given.
    pub fn dispatch_many(&self, scope: &Scope, payloads: Vec<T>) -> Result<Vec<JobId>> {
        scope.check()?;
        let mut ids = Vec::with_capacity(payloads.len());
        let mut by_queue: HashMap<String, Vec<Job<T>>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for data in payloads {
            let job = self.wrap(data);
            ids.push(job.id().clone());
            let name = job.queue_name().to_string();
            if !by_queue.contains_key(&name) {
                order.push(name.clone());
            }
            by_queue.entry(name).or_default().push(job);
        }

        for name in order {
            let Some(jobs) = by_queue.remove(&name) else {
                continue;
            };
            let metas: Vec<LifecycleMeta> = match &self.lifecycle {
                Some(_) => jobs
                    .iter()
                    .map(|job| LifecycleMeta::for_job(job, job.data().name()))
                    .collect(),
                None => Vec::new(),
            };
            let queue = self.queues.get_or_create(&name);
            let count = jobs.len();
            queue.push_many(jobs);

            for _ in 0..count {
                telemetry::record_job_pushed(&name);
            }
            telemetry::set_queue_depth(&name, queue.size());
            if let Some(bus) = &self.lifecycle {
                for meta in metas {
                    bus.publish(JobLifecycleEvent::Enqueued { meta });
                }
            }
        }
        Ok(ids)
    }

    fn wrap(&self, data: T) -> Job<T> {
        let declared = data.max_retries();
        let queue = data.queue().into_owned();
        let job = Job::new(data).on_queue(queue);
        match declared {
            Some(max_retries) => job.with_max_retries(max_retries),
            None => job.with_default_max_retries(self.default_max_retries),
        }
    }
}

impl<T: Runnable> JobDispatcher<T> {
    /// Run `data` immediately in the caller's scope, bypassing the queue.
    ///
    /// Handler errors come back as [`QueueError::Handler`]; nothing is retried.
    pub async fn dispatch_sync(&self, scope: &Scope, data: T) -> Result<T::Output> {
        scope.check()?;
        let name = data.name().into_owned();
        let span = telemetry::job_dispatch_span(&name, data.queue());
        data.handle(scope)
            .instrument(span)
            .await
            .map_err(QueueError::Handler)
    }
}

use std::any::type_name;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::QueueError;
use crate::failure::{FailureRecord, FailureSink, LogFailureSink};
use crate::handler::{Handler, JobPayload, PermanentFailure};
use crate::job::Job;
use crate::lifecycle::{JobLifecycleEvent, LifecycleBus, LifecycleMeta};
use crate::queue::{Queue, QueueSet};
use crate::scope::Scope;
use crate::telemetry;

use super::worker::{resident_memory_mb, WorkerOptions, WorkerStopReason};

/// Drains one or more queues, running each job through a [`Handler`].
///
/// One task per configured queue pops batches and processes them in order.
/// Each handler call gets a child of the caller's scope bounded by the
/// configured timeout. On failure the job is retried while it has attempts
/// left and otherwise goes to the queue's dead-letter buffer and the
/// [`FailureSink`].
///
/// When `max_jobs` or the memory limit is hit, the worker stops popping,
/// lets in-flight jobs finish and returns unprocessed jobs from the current
/// batch to the tail of their queue.
pub struct Worker<T, H> {
    options: WorkerOptions,
    queues: Arc<QueueSet<T>>,
    handler: Arc<H>,
    failures: Arc<dyn FailureSink>,
    lifecycle: Option<Arc<LifecycleBus>>,
    processed: Arc<AtomicU64>,
}

impl<T, H> Clone for Worker<T, H> {
    fn clone(&self) -> Self {
        Self {
            options: self.options.clone(),
            queues: Arc::clone(&self.queues),
            handler: Arc::clone(&self.handler),
            failures: Arc::clone(&self.failures),
            lifecycle: self.lifecycle.clone(),
            processed: Arc::clone(&self.processed),
        }
    }
}

impl<T, H> fmt::Debug for Worker<T, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("options", &self.options)
            .field("handler_type", &type_name::<H>())
            .field("lifecycle_set", &self.lifecycle.is_some())
            .field("processed", &self.processed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T, H> Worker<T, H>
where
    T: JobPayload,
    H: Handler<T> + 'static,
{
    pub fn new(options: WorkerOptions, queues: Arc<QueueSet<T>>, handler: Arc<H>) -> Self {
        Self {
            options,
            queues,
            handler,
            failures: Arc::new(LogFailureSink::default()),
            lifecycle: None,
            processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_failure_sink(mut self, failures: Arc<dyn FailureSink>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<LifecycleBus>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Jobs taken for processing since the worker was built.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Run [`run`](Self::run) on a new task.
    pub fn spawn(&self, scope: Scope) -> JoinHandle<WorkerStopReason> {
        let worker = self.clone();
        tokio::spawn(async move { worker.run(&scope).await })
    }

    /// Drain the configured queues until `scope` ends or a limit is hit.
    pub async fn run(&self, scope: &Scope) -> WorkerStopReason {
        let stop = scope.child();
        tracing::info!(
            worker_id = %self.options.worker_id,
            queues = ?self.options.queues,
            "worker started"
        );

        let handles: Vec<JoinHandle<WorkerStopReason>> = self
            .options
            .queues
            .iter()
            .map(|name| {
                let worker = self.clone();
                let queue = self.queues.get_or_create(name);
                let task_id = format!("{}:{}", self.options.worker_id, name);
                let scope = scope.clone();
                let stop = stop.clone();
                tokio::spawn(async move { worker.drain(task_id, queue, scope, stop).await })
            })
            .collect();

        let mut reason = WorkerStopReason::Cancelled;
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(task_reason) => {
                    if reason == WorkerStopReason::Cancelled {
                        reason = task_reason;
                    }
                }
                Err(err) => {
                    tracing::error!(worker_id = %self.options.worker_id, error = %err, "worker task failed")
                }
            }
        }
        stop.cancel();

        tracing::info!(
            worker_id = %self.options.worker_id,
            reason = %reason,
            processed = self.processed(),
            "worker stopped"
        );
        if let Some(bus) = &self.lifecycle {
            bus.publish(JobLifecycleEvent::WorkerStopped {
                worker_id: self.options.worker_id.clone(),
                reason,
            });
        }
        reason
    }

    async fn drain(
        &self,
        task_id: String,
        queue: Arc<Queue<T>>,
        scope: Scope,
        stop: Scope,
    ) -> WorkerStopReason {
        loop {
            let Some(limit) = self.batch_limit() else {
                stop.cancel();
                return WorkerStopReason::MaxJobs;
            };
            let batch = match queue.pop_many_with_scope(&stop, limit) {
                Ok(batch) => batch,
                Err(_) => return WorkerStopReason::Cancelled,
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = stop.done() => return WorkerStopReason::Cancelled,
                    _ = tokio::time::sleep(self.options.sleep) => continue,
                }
            }
            telemetry::set_queue_depth(queue.name(), queue.size());

            let mut pending = batch.into_iter();
            while let Some(job) = pending.next() {
                let stop_reason = if stop.is_done() {
                    Some(WorkerStopReason::Cancelled)
                } else if !self.reserve_slot() {
                    Some(WorkerStopReason::MaxJobs)
                } else {
                    None
                };
                if let Some(reason) = stop_reason {
                    let mut unprocessed = vec![job];
                    unprocessed.extend(pending);
                    queue.requeue_front(unprocessed);
                    stop.cancel();
                    return reason;
                }

                self.process(&task_id, &queue, &scope, job).await;

                if let Some(reason) = self.limit_reached() {
                    queue.requeue_front(pending.collect());
                    stop.cancel();
                    return reason;
                }
            }
        }
    }

    /// Jobs to pop next: the batch size capped by what is left of `max_jobs`.
    /// `None` once the budget is used up.
    fn batch_limit(&self) -> Option<usize> {
        match self.options.max_jobs {
            Some(max) => {
                let left = usize::try_from(max.saturating_sub(self.processed())).unwrap_or(usize::MAX);
                (left > 0).then(|| self.options.batch_size.min(left))
            }
            None => Some(self.options.batch_size),
        }
    }

    /// Count a job against `max_jobs`; false once the budget is used up.
    fn reserve_slot(&self) -> bool {
        match self.options.max_jobs {
            Some(max) => self
                .processed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
                .is_ok(),
            None => {
                self.processed.fetch_add(1, Ordering::SeqCst);
                true
            }
        }
    }

    fn limit_reached(&self) -> Option<WorkerStopReason> {
        if let Some(max) = self.options.max_jobs {
            if self.processed() >= max {
                return Some(WorkerStopReason::MaxJobs);
            }
        }
        if let Some(limit) = self.options.memory_limit_mb {
            if resident_memory_mb().is_some_and(|mb| mb >= limit) {
                tracing::warn!(worker_id = %self.options.worker_id, limit_mb = limit, "memory limit reached");
                return Some(WorkerStopReason::MemoryLimit);
            }
        }
        None
    }

    async fn process(&self, task_id: &str, queue: &Queue<T>, scope: &Scope, mut job: Job<T>) {
        if let Some(tries) = self.options.tries {
            job.apply_default_max_retries(tries);
        }
        let name = job.data().name().into_owned();
        if let Some(bus) = &self.lifecycle {
            bus.publish(JobLifecycleEvent::Popped {
                meta: LifecycleMeta::for_job(&job, name.as_str()),
                worker_id: task_id.to_string(),
            });
        }

        let span = telemetry::job_handle_span(job.id().as_str(), &name, queue.name(), job.attempts());
        let timing = telemetry::record_job_start(job.id().as_str());
        let job_scope = scope.child_with_timeout(self.options.timeout);
        let outcome = job_scope
            .run(self.handler.handle(&job_scope, &job))
            .instrument(span)
            .await;

        let err = match outcome {
            Ok(Ok(())) => {
                telemetry::record_job_end(timing, queue.name(), &name, "success");
                if let Some(bus) = &self.lifecycle {
                    bus.publish(JobLifecycleEvent::Completed {
                        meta: LifecycleMeta::for_job(&job, name.as_str()),
                        worker_id: task_id.to_string(),
                    });
                }
                return;
            }
            Ok(Err(err)) => QueueError::Handler(err),
            Err(scope_err) => scope_err,
        };

        let kind = err.kind();
        let permanent = matches!(&err, QueueError::Handler(inner) if PermanentFailure::is_permanent(inner));

        if !permanent && job.may_retry() {
            let mut meta = LifecycleMeta::for_job(&job, name.as_str());
            meta.attempts += 1;
            tracing::warn!(
                job_id = %job.id(),
                attempts = meta.attempts,
                max_retries = job.max_retries(),
                error = %err,
                "job failed, retrying"
            );
            match queue.retry_or_return(job) {
                Ok(()) => {
                    telemetry::record_job_end(timing, queue.name(), &name, "retried");
                    if let Some(bus) = &self.lifecycle {
                        bus.publish(JobLifecycleEvent::Retried {
                            meta,
                            worker_id: task_id.to_string(),
                            kind,
                        });
                    }
                    return;
                }
                Err(rejected) => {
                    tracing::error!(job_id = %rejected.id(), "retry rejected at ceiling");
                    job = rejected;
                }
            }
        }

        let record = FailureRecord::for_job(&job, name.as_str(), kind, err.to_string());
        let meta = LifecycleMeta::for_job(&job, name.as_str());
        tracing::error!(
            job_id = %job.id(),
            attempts = job.attempts(),
            permanent,
            error = %err,
            "job failed permanently"
        );
        queue.fail(job, &err);
        if let Err(sink_err) = self.failures.record(&record).await {
            tracing::error!(job_id = %record.job_id, error = %sink_err, "failure sink rejected record");
        }
        telemetry::record_job_end(timing, queue.name(), &name, "failed");
        if let Some(bus) = &self.lifecycle {
            bus.publish(JobLifecycleEvent::Failed {
                meta,
                worker_id: task_id.to_string(),
                kind,
            });
        }
    }
}

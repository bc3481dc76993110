use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorKind;
use crate::job::{Job, JobId, JobState};
use crate::runtime::WorkerStopReason;

/// Identity of the job a lifecycle event is about.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleMeta {
    pub job_id: JobId,
    pub queue: String,
    pub name: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleMeta {
    pub fn for_job<T>(job: &Job<T>, name: impl Into<String>) -> Self {
        Self {
            job_id: job.id().clone(),
            queue: job.queue_name().to_string(),
            name: name.into(),
            attempts: job.attempts(),
            timestamp: Utc::now(),
        }
    }
}

/// Notification emitted as jobs move through the dispatcher and workers.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum JobLifecycleEvent {
    /// Job was pushed onto its queue by the dispatcher.
    Enqueued { meta: LifecycleMeta },
    /// Job was popped by a worker.
    Popped { meta: LifecycleMeta, worker_id: String },
    /// Handler succeeded; the job is released.
    Completed { meta: LifecycleMeta, worker_id: String },
    /// Handler failed and the job went back to the tail of its queue.
    Retried {
        meta: LifecycleMeta,
        worker_id: String,
        kind: ErrorKind,
    },
    /// Handler failed with no retries left; the job went to the failure path.
    Failed {
        meta: LifecycleMeta,
        worker_id: String,
        kind: ErrorKind,
    },
    /// A worker task stopped.
    WorkerStopped {
        worker_id: String,
        reason: WorkerStopReason,
    },
}

impl JobLifecycleEvent {
    /// The job this event is about, `None` for worker events.
    pub fn meta(&self) -> Option<&LifecycleMeta> {
        match self {
            Self::Enqueued { meta }
            | Self::Popped { meta, .. }
            | Self::Completed { meta, .. }
            | Self::Retried { meta, .. }
            | Self::Failed { meta, .. } => Some(meta),
            Self::WorkerStopped { .. } => None,
        }
    }

    /// The state the job entered with this event.
    pub fn state(&self) -> Option<JobState> {
        match self {
            Self::Enqueued { .. } | Self::Retried { .. } => Some(JobState::Enqueued),
            Self::Popped { .. } => Some(JobState::Popped),
            Self::Completed { .. } => Some(JobState::HandledOk),
            Self::Failed { .. } => Some(JobState::Failed),
            Self::WorkerStopped { .. } => None,
        }
    }
}

/// In-process fan-out of lifecycle events over a tokio broadcast channel.
///
/// Publishing never blocks. A subscriber that falls more than `capacity`
/// events behind receives `RecvError::Lagged`; with no subscribers events are
/// dropped.
pub struct LifecycleBus {
    sender: broadcast::Sender<JobLifecycleEvent>,
    capacity: usize,
}

impl std::fmt::Debug for LifecycleBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for LifecycleBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl LifecycleBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, event: JobLifecycleEvent) {
        let _ = self.sender.send(event);
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<JobLifecycleEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn enqueued(id: &str) -> JobLifecycleEvent {
        let job = Job::new(()).with_id(id);
        JobLifecycleEvent::Enqueued {
            meta: LifecycleMeta::for_job(&job, "test"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_multiple_subscribers() {
        let bus = LifecycleBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        for i in 0..3 {
            bus.publish(enqueued(&format!("j-{i}")));
        }

        for i in 0..3 {
            let a = timeout(Duration::from_millis(100), rx1.recv()).await.unwrap().unwrap();
            let b = timeout(Duration::from_millis(100), rx2.recv()).await.unwrap().unwrap();
            let expected = format!("j-{i}");
            assert_eq!(a.meta().unwrap().job_id.as_str(), expected);
            assert_eq!(b.meta().unwrap().job_id.as_str(), expected);
        }
    }

    #[tokio::test]
    async fn test_lagged_subscriber_does_not_block_publisher() {
        let bus = LifecycleBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(enqueued(&format!("j-{i}")));
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(skipped)) => assert!(skipped > 0),
            other => panic!("expected lag, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_capacity_is_raised_to_one() {
        let bus = LifecycleBus::new(0);
        assert_eq!(bus.capacity(), 1);
        let mut rx = bus.subscribe();
        bus.publish(enqueued("only"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.meta().unwrap().job_id.as_str(), "only");
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = LifecycleBus::default();
        bus.publish(enqueued("lonely"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_states() {
        assert_eq!(enqueued("a").state(), Some(JobState::Enqueued));
        let stopped = JobLifecycleEvent::WorkerStopped {
            worker_id: "w".into(),
            reason: WorkerStopReason::Cancelled,
        };
        assert!(stopped.meta().is_none());
        assert!(stopped.state().is_none());
    }

    #[test]
    fn test_debug_format() {
        let bus = LifecycleBus::new(8);
        let _rx = bus.subscribe();
        let debug = format!("{bus:?}");
        assert!(debug.contains("capacity: 8"));
        assert!(debug.contains("subscribers: 1"));
    }
}

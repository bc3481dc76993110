use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::job::{Job, JobId, DEFAULT_QUEUE};
use crate::scope::Scope;

/// In-process FIFO of [`Job`]s.
///
/// All state sits behind one mutex; every operation takes it exactly once,
/// so `push_many`, `pop_many` and `retry` are each a single critical section.
/// No operation waits except [`Queue::pop_wait`].
///
/// Each operation comes in a plain form and a `*_with_scope` form. The plain
/// form behaves like the scoped form under a scope that is never cancelled.
/// The scoped form checks the scope on entry and, if it is done, returns
/// `Cancelled` or `DeadlineExceeded` without touching the queue.
///
/// The queue never logs and never panics; errors go back to the caller.
pub struct Queue<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    available: Notify,
    dead_letter_capacity: usize,
}

struct QueueState<T> {
    jobs: VecDeque<Job<T>>,
    dead_letters: VecDeque<DeadLetter<T>>,
}

/// A job released through [`Queue::fail`], with the terminal reason.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeadLetter<T> {
    pub job: Job<T>,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("size", &state.jobs.len())
            .field("dead_letters", &state.dead_letters.len())
            .field("dead_letter_capacity", &self.dead_letter_capacity)
            .finish()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE)
    }
}

impl<T> Queue<T> {
    /// Create an empty queue with the default configuration.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &QueueConfig::default())
    }

    /// Create an empty queue.
    ///
    /// A `dead_letter_capacity` of zero disables the dead-letter buffer;
    /// failed jobs are then dropped on `fail`.
    pub fn with_config(name: impl Into<String>, config: &QueueConfig) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                dead_letters: VecDeque::new(),
            }),
            available: Notify::new(),
            dead_letter_capacity: config.dead_letter_capacity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// View of this queue whose operations all run under `scope`.
    pub fn bind(&self, scope: Scope) -> BoundQueue<'_, T> {
        BoundQueue { queue: self, scope }
    }

    /// Append a job to the tail.
    pub fn push(&self, job: Job<T>) {
        self.state.lock().jobs.push_back(job);
        self.available.notify_one();
    }

    pub fn push_with_scope(&self, scope: &Scope, job: Job<T>) -> Result<()> {
        scope.check()?;
        self.push(job);
        Ok(())
    }

    /// Remove the head job, `None` when the queue is empty.
    pub fn pop(&self) -> Option<Job<T>> {
        self.state.lock().jobs.pop_front()
    }

    pub fn pop_with_scope(&self, scope: &Scope) -> Result<Option<Job<T>>> {
        scope.check()?;
        Ok(self.pop())
    }

    /// Remove the head job, waiting for one to arrive if the queue is empty.
    ///
    /// Returns as soon as `scope` is cancelled or past its deadline.
    pub async fn pop_wait(&self, scope: &Scope) -> Result<Job<T>> {
        loop {
            scope.check()?;
            let notified = self.available.notified();
            if let Some(job) = self.pop() {
                return Ok(job);
            }
            tokio::select! {
                biased;
                err = scope.done() => return Err(err),
                _ = notified => {}
            }
        }
    }

    /// Remove the first resident job whose id matches.
    pub fn delete(&self, id: impl AsRef<str>) -> Result<()> {
        let id = id.as_ref();
        let mut state = self.state.lock();
        match state.jobs.iter().position(|job| job.id().as_str() == id) {
            Some(index) => {
                state.jobs.remove(index);
                Ok(())
            }
            None => Err(QueueError::NotFound(JobId::from(id))),
        }
    }

    pub fn delete_with_scope(&self, scope: &Scope, id: impl AsRef<str>) -> Result<()> {
        scope.check()?;
        self.delete(id)
    }

    /// Append all jobs in input order; no other push lands between them.
    pub fn push_many(&self, jobs: Vec<Job<T>>) {
        if jobs.is_empty() {
            return;
        }
        let count = jobs.len();
        self.state.lock().jobs.extend(jobs);
        for _ in 0..count {
            self.available.notify_one();
        }
    }

    pub fn push_many_with_scope(&self, scope: &Scope, jobs: Vec<Job<T>>) -> Result<()> {
        scope.check()?;
        self.push_many(jobs);
        Ok(())
    }

    /// Remove up to `n` jobs from the head, in queue order.
    pub fn pop_many(&self, n: usize) -> Vec<Job<T>> {
        if n == 0 {
            return Vec::new();
        }
        let mut state = self.state.lock();
        let take = n.min(state.jobs.len());
        state.jobs.drain(..take).collect()
    }

    pub fn pop_many_with_scope(&self, scope: &Scope, n: usize) -> Result<Vec<Job<T>>> {
        scope.check()?;
        Ok(self.pop_many(n))
    }

    /// Put a previously popped job back at the tail with one more attempt.
    ///
    /// A job already at its ceiling is rejected with `ExceededMaxRetries`
    /// and is not pushed; the caller is left holding nothing.
    pub fn retry(&self, job: Job<T>) -> Result<()> {
        self.retry_or_return(job).map_err(|job| QueueError::ExceededMaxRetries {
            job_id: job.id().clone(),
            max_retries: job.max_retries(),
        })
    }

    /// [`retry`](Self::retry), handing a job at its ceiling back to the caller.
    pub(crate) fn retry_or_return(&self, mut job: Job<T>) -> std::result::Result<(), Job<T>> {
        if !job.may_retry() {
            return Err(job);
        }
        job.record_attempt();
        self.push(job);
        Ok(())
    }

    /// Return popped but unprocessed jobs to the head, keeping their order.
    pub(crate) fn requeue_front(&self, jobs: Vec<Job<T>>) {
        if jobs.is_empty() {
            return;
        }
        let count = jobs.len();
        {
            let mut state = self.state.lock();
            for job in jobs.into_iter().rev() {
                state.jobs.push_front(job);
            }
        }
        for _ in 0..count {
            self.available.notify_one();
        }
    }

    pub fn retry_with_scope(&self, scope: &Scope, job: Job<T>) -> Result<()> {
        scope.check()?;
        self.retry(job)
    }

    /// Release a popped job for good, recording it on the dead-letter buffer.
    ///
    /// When the buffer is full the oldest entry is evicted.
    pub fn fail(&self, job: Job<T>, reason: impl fmt::Display) {
        if self.dead_letter_capacity == 0 {
            return;
        }
        let letter = DeadLetter {
            job,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        let mut state = self.state.lock();
        while state.dead_letters.len() >= self.dead_letter_capacity {
            state.dead_letters.pop_front();
        }
        state.dead_letters.push_back(letter);
    }

    pub fn fail_with_scope(
        &self,
        scope: &Scope,
        job: Job<T>,
        reason: impl fmt::Display,
    ) -> Result<()> {
        scope.check()?;
        self.fail(job, reason);
        Ok(())
    }

    /// Number of resident jobs.
    pub fn size(&self) -> usize {
        self.state.lock().jobs.len()
    }

    pub fn size_with_scope(&self, scope: &Scope) -> Result<usize> {
        scope.check()?;
        Ok(self.size())
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Remove every resident job. Dead letters are kept.
    pub fn clear(&self) {
        self.state.lock().jobs.clear();
    }

    pub fn clear_with_scope(&self, scope: &Scope) -> Result<()> {
        scope.check()?;
        self.clear();
        Ok(())
    }

    /// Whether a job with this id is resident.
    pub fn contains(&self, id: impl AsRef<str>) -> bool {
        let id = id.as_ref();
        self.state
            .lock()
            .jobs
            .iter()
            .any(|job| job.id().as_str() == id)
    }

    /// Ids of the resident jobs, head first.
    pub fn ids(&self) -> Vec<JobId> {
        self.state
            .lock()
            .jobs
            .iter()
            .map(|job| job.id().clone())
            .collect()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.state.lock().dead_letters.len()
    }

    /// Remove and return everything on the dead-letter buffer, oldest first.
    pub fn drain_dead_letters(&self) -> Vec<DeadLetter<T>> {
        self.state.lock().dead_letters.drain(..).collect()
    }
}

impl<T: Clone> Queue<T> {
    /// Copy of the dead-letter buffer, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter<T>> {
        self.state.lock().dead_letters.iter().cloned().collect()
    }
}

/// A queue bound to a scope: every operation is the scoped form under that scope.
pub struct BoundQueue<'a, T> {
    queue: &'a Queue<T>,
    scope: Scope,
}

impl<T> fmt::Debug for BoundQueue<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundQueue")
            .field("queue", &self.queue.name)
            .field("scope_done", &self.scope.is_done())
            .finish()
    }
}

impl<T> BoundQueue<'_, T> {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn push(&self, job: Job<T>) -> Result<()> {
        self.queue.push_with_scope(&self.scope, job)
    }

    pub fn pop(&self) -> Result<Option<Job<T>>> {
        self.queue.pop_with_scope(&self.scope)
    }

    pub async fn pop_wait(&self) -> Result<Job<T>> {
        self.queue.pop_wait(&self.scope).await
    }

    pub fn delete(&self, id: impl AsRef<str>) -> Result<()> {
        self.queue.delete_with_scope(&self.scope, id)
    }

    pub fn push_many(&self, jobs: Vec<Job<T>>) -> Result<()> {
        self.queue.push_many_with_scope(&self.scope, jobs)
    }

    pub fn pop_many(&self, n: usize) -> Result<Vec<Job<T>>> {
        self.queue.pop_many_with_scope(&self.scope, n)
    }

    pub fn retry(&self, job: Job<T>) -> Result<()> {
        self.queue.retry_with_scope(&self.scope, job)
    }

    pub fn fail(&self, job: Job<T>, reason: impl fmt::Display) -> Result<()> {
        self.queue.fail_with_scope(&self.scope, job, reason)
    }

    pub fn size(&self) -> Result<usize> {
        self.queue.size_with_scope(&self.scope)
    }

    pub fn clear(&self) -> Result<()> {
        self.queue.clear_with_scope(&self.scope)
    }
}

/// Named queues sharing one payload type, created on first use.
pub struct QueueSet<T> {
    config: QueueConfig,
    queues: RwLock<HashMap<String, Arc<Queue<T>>>>,
}

impl<T> fmt::Debug for QueueSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSet")
            .field("config", &self.config)
            .field("queues", &self.names())
            .finish()
    }
}

impl<T> Default for QueueSet<T> {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl<T> QueueSet<T> {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            queues: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Queue registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<Queue<T>>> {
        self.queues.read().get(name).cloned()
    }

    /// Queue registered under `name`, creating it if needed.
    pub fn get_or_create(&self, name: &str) -> Arc<Queue<T>> {
        if let Some(queue) = self.get(name) {
            return queue;
        }
        let mut queues = self.queues.write();
        Arc::clone(
            queues
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Queue::with_config(name, &self.config))),
        )
    }

    /// Registered queue names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Total resident jobs across all queues.
    pub fn total_size(&self) -> usize {
        self.queues.read().values().map(|queue| queue.size()).sum()
    }

    /// Point-in-time depths of every registered queue.
    pub fn snapshot(&self) -> QueueSnapshot {
        let mut snapshot = QueueSnapshot::new(Utc::now());
        for (name, queue) in self.queues.read().iter() {
            let entry = snapshot.entry_mut(name);
            entry.ready_count = queue.size();
            entry.dead_letter_count = queue.dead_letter_count();
        }
        snapshot
    }
}

/// Snapshot of queue state at a point in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// Timestamp when the snapshot was taken.
    pub sampled_at: DateTime<Utc>,
    /// Per-queue statistics keyed by queue name.
    pub queues: HashMap<String, QueueSnapshotEntry>,
}

impl QueueSnapshot {
    pub fn new(sampled_at: DateTime<Utc>) -> Self {
        Self {
            sampled_at,
            queues: HashMap::new(),
        }
    }

    /// Get or create the entry for a queue.
    pub fn entry_mut(&mut self, name: &str) -> &mut QueueSnapshotEntry {
        self.queues.entry(name.to_string()).or_default()
    }
}

/// Statistics for a single queue.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueueSnapshotEntry {
    /// Jobs waiting to be popped.
    pub ready_count: usize,
    /// Jobs held on the dead-letter buffer.
    pub dead_letter_count: usize,
}

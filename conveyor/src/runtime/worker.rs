use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::WorkerConfig;
use crate::job::DEFAULT_QUEUE;

/// Runtime options for a single [`Worker`](super::Worker).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Identifier used in logs and lifecycle events.
    pub worker_id: String,
    /// Queues to drain, one task each.
    pub queues: Vec<String>,
    /// Jobs popped per batch.
    pub batch_size: usize,
    /// Stop after this many jobs across all queues.
    pub max_jobs: Option<u64>,
    /// Stop once resident memory reaches this many megabytes.
    pub memory_limit_mb: Option<u64>,
    /// Deadline for a single handler invocation.
    pub timeout: Duration,
    /// Back-off when a queue is empty.
    pub sleep: Duration,
    /// Retry ceiling applied to jobs that do not declare one. `None` keeps
    /// the ceiling the dispatcher assigned.
    pub tries: Option<u32>,
}

impl WorkerOptions {
    /// Create options with the given worker id and defaults for the rest.
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Self::default()
        }
    }

    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_jobs(mut self, max_jobs: u64) -> Self {
        self.max_jobs = Some(max_jobs);
        self
    }

    pub fn with_memory_limit_mb(mut self, limit: u64) -> Self {
        self.memory_limit_mb = Some(limit);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn with_tries(mut self, tries: u32) -> Self {
        self.tries = Some(tries);
        self
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.queues.is_empty(), "worker {} has no queues", self.worker_id);
        anyhow::ensure!(self.batch_size > 0, "worker {} batch size must be positive", self.worker_id);
        Ok(())
    }
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            worker_id: "default-worker".to_string(),
            queues: vec![DEFAULT_QUEUE.to_string()],
            batch_size: 10,
            max_jobs: None,
            memory_limit_mb: None,
            timeout: Duration::from_secs(60),
            sleep: Duration::from_secs(3),
            tries: None,
        }
    }
}

impl From<&WorkerConfig> for WorkerOptions {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            queues: config.queues.clone(),
            max_jobs: config.max_jobs.filter(|max| *max > 0),
            memory_limit_mb: config.memory_limit.filter(|limit| *limit > 0),
            timeout: Duration::from_secs(config.timeout),
            sleep: Duration::from_secs(config.sleep),
            tries: Some(config.tries),
            ..Self::default()
        }
    }
}

/// Why [`Worker::run`](super::Worker::run) returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStopReason {
    /// The caller's scope was cancelled or its deadline passed.
    Cancelled,
    /// The `max_jobs` budget was used up.
    MaxJobs,
    /// Resident memory reached the configured limit.
    MemoryLimit,
}

impl WorkerStopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::MaxJobs => "max_jobs",
            Self::MemoryLimit => "memory_limit",
        }
    }
}

impl fmt::Display for WorkerStopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resident set size of this process in megabytes.
///
/// Read from `/proc/self/status`; `None` where that file is unavailable.
pub fn resident_memory_mb() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss_kb(&status).map(|kb| kb / 1024)
}

fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

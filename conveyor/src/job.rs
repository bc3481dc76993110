use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue used when a job does not name one.
pub const DEFAULT_QUEUE: &str = "default";

/// Retry ceiling used when a job does not declare one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Opaque job identifier, unique among the jobs resident in a queue.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh time-ordered identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

/// A unit of deferred work: a typed payload plus queue bookkeeping.
///
/// `attempts` is only ever advanced by [`Queue::retry`](crate::Queue::retry),
/// which keeps `attempts <= max_retries` for every job resident in a queue.
///
/// A ceiling set through [`with_max_retries`](Self::with_max_retries) is
/// declared and kept as is. Otherwise the ceiling is a default that a
/// worker's `tries` setting replaces.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job<T> {
    id: JobId,
    data: T,
    attempts: u32,
    max_retries: u32,
    #[serde(default)]
    max_retries_declared: bool,
    created_at: DateTime<Utc>,
    queue_name: String,
}

impl<T> Job<T> {
    /// Wrap `data` with a fresh id, zero attempts and default routing.
    pub fn new(data: T) -> Self {
        Self {
            id: JobId::new(),
            data,
            attempts: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            max_retries_declared: false,
            created_at: Utc::now(),
            queue_name: DEFAULT_QUEUE.to_string(),
        }
    }

    /// Replace the generated id. An empty id is ignored and the generated
    /// one is kept.
    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        let id = id.into();
        if !id.as_str().is_empty() {
            self.id = id;
        }
        self
    }

    /// Declare the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.max_retries_declared = true;
        self
    }

    /// Set the ceiling without declaring it.
    pub(crate) fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether the ceiling was declared rather than defaulted.
    pub fn declares_max_retries(&self) -> bool {
        self.max_retries_declared
    }

    /// Replace a defaulted ceiling; a declared one is left alone.
    pub(crate) fn apply_default_max_retries(&mut self, max_retries: u32) {
        if !self.max_retries_declared {
            self.max_retries = max_retries;
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Whether a failed run of this job may be retried.
    pub fn may_retry(&self) -> bool {
        crate::retry::may_retry(self)
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts += 1;
    }
}

/// States a job passes through between construction and release.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Enqueued,
    Popped,
    HandledOk,
    HandledErr,
    Failed,
    Released,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Enqueued => "enqueued",
            Self::Popped => "popped",
            Self::HandledOk => "handled_ok",
            Self::HandledErr => "handled_err",
            Self::Failed => "failed",
            Self::Released => "released",
        }
    }

    /// Whether the queue no longer tracks a job in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released)
    }
}

impl Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

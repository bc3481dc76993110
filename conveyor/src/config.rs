use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::{DEFAULT_MAX_RETRIES, DEFAULT_QUEUE};

/// Errors raised while loading or selecting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unknown worker profile: {0}")]
    UnknownProfile(String),

    #[error("invalid worker profile {profile}: {reason}")]
    Invalid { profile: String, reason: String },
}

/// Configuration for queue behaviour and retry defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum failed jobs kept per queue; zero disables the buffer.
    pub dead_letter_capacity: usize,
    /// Retry ceiling for jobs that do not declare one.
    pub default_max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dead_letter_capacity: 1000,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Worker settings as they appear in a configuration document.
///
/// The recognised keys are `queues`, `max_jobs`, `memory_limit`, `timeout`,
/// `sleep` and `tries`. Missing keys take their defaults and unknown keys
/// are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Queues to drain, one worker task each.
    pub queues: Vec<String>,
    /// Stop after this many jobs in total; `None` or zero runs until cancelled.
    pub max_jobs: Option<u64>,
    /// Stop once resident memory exceeds this many megabytes.
    pub memory_limit: Option<u64>,
    /// Per-job handler deadline in seconds.
    pub timeout: u64,
    /// Idle back-off in seconds when a queue is empty.
    pub sleep: u64,
    /// Retry ceiling for jobs that do not declare one.
    pub tries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: vec![DEFAULT_QUEUE.to_string()],
            max_jobs: None,
            memory_limit: None,
            timeout: 60,
            sleep: 3,
            tries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl WorkerConfig {
    /// Default settings draining the given queues.
    pub fn for_queues<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queues: queues.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse a single worker configuration map.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    fn validate(&self, profile: &str) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::Invalid {
                profile: profile.to_string(),
                reason: "at least one queue is required".to_string(),
            });
        }
        if self.queues.iter().any(|queue| queue.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                profile: profile.to_string(),
                reason: "queue names must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Named worker configurations, selected by a single tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerProfiles {
    profiles: HashMap<String, WorkerConfig>,
}

impl Default for WorkerProfiles {
    /// Built-in `default`, `jobs`, `mail` and `events` profiles.
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert("default".to_string(), WorkerConfig::default());
        profiles.insert("jobs".to_string(), WorkerConfig::for_queues(["jobs"]));
        profiles.insert(
            "mail".to_string(),
            WorkerConfig {
                timeout: 120,
                tries: 5,
                ..WorkerConfig::for_queues(["mail"])
            },
        );
        profiles.insert(
            "events".to_string(),
            WorkerConfig {
                sleep: 1,
                ..WorkerConfig::for_queues(["events"])
            },
        );
        Self { profiles }
    }
}

impl WorkerProfiles {
    /// An empty profile set.
    pub fn empty() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    /// Parse a JSON object mapping profile tags to worker configurations.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let profiles: Self = serde_json::from_str(raw)?;
        for (tag, config) in &profiles.profiles {
            config.validate(tag)?;
        }
        Ok(profiles)
    }

    /// Overlay `other` on top of these profiles; same tags are replaced.
    pub fn merge(mut self, other: WorkerProfiles) -> Self {
        self.profiles.extend(other.profiles);
        self
    }

    pub fn insert(&mut self, tag: impl Into<String>, config: WorkerConfig) {
        self.profiles.insert(tag.into(), config);
    }

    /// Profile tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// The configuration registered under `tag`.
    pub fn select(&self, tag: &str) -> Result<&WorkerConfig, ConfigError> {
        self.profiles
            .get(tag)
            .ok_or_else(|| ConfigError::UnknownProfile(tag.to_string()))
    }
}

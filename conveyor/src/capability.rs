//! Capabilities the core consumes but does not implement.
//!
//! Log handlers, mail transports and cache stores live in the host
//! application. The core only calls them from listeners and failure sinks
//! the host registers.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Structured fields attached to a log line.
pub type LogFields = Map<String, Value>;

/// Severity of a log line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for log lines.
///
/// Implementations fail only on permanent transport failure.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn write(&self, level: LogLevel, message: &str, fields: &LogFields) -> anyhow::Result<()>;
}

/// Outbound mail transport.
///
/// Implementations fail only on permanent transport failure.
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Key-value cache store.
#[async_trait]
pub trait KVStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;

    /// Store `value`; `ttl` of `None` keeps it until deleted or flushed.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> anyhow::Result<()>;

    /// Remove `key`, returning whether it was present.
    async fn del(&self, key: &str) -> anyhow::Result<bool>;

    async fn has(&self, key: &str) -> anyhow::Result<bool>;

    async fn flush(&self) -> anyhow::Result<()>;
}

/// [`LogSink`] that forwards every line to `tracing`.
///
/// This is the default sink for worker failure records.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn write(&self, level: LogLevel, message: &str, fields: &LogFields) -> anyhow::Result<()> {
        let fields = Value::Object(fields.clone());
        match level {
            LogLevel::Debug => tracing::debug!(%fields, "{message}"),
            LogLevel::Info | LogLevel::Notice => tracing::info!(%level, %fields, "{message}"),
            LogLevel::Warning => tracing::warn!(%fields, "{message}"),
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(%level, %fields, "{message}")
            }
        }
        Ok(())
    }
}

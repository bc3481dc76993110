use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::{LogFields, LogLevel, LogSink, TracingLogSink};
use crate::error::ErrorKind;
use crate::job::{Job, JobId};

/// Structured record of a job that exhausted its retries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub job_id: JobId,
    /// Display name of the job, or the event name for event jobs.
    pub name: String,
    pub queue: String,
    pub attempts: u32,
    pub reason: String,
    pub kind: ErrorKind,
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    pub fn for_job<T>(
        job: &Job<T>,
        name: impl Into<String>,
        kind: ErrorKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job.id().clone(),
            name: name.into(),
            queue: job.queue_name().to_string(),
            attempts: job.attempts(),
            reason: reason.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    fn to_fields(&self) -> LogFields {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            _ => LogFields::new(),
        }
    }
}

/// Where workers send terminal failures.
///
/// Whether delivery is synchronous or buffered is up to the implementation.
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn record(&self, record: &FailureRecord) -> anyhow::Result<()>;
}

/// [`FailureSink`] writing each record as an error line to a [`LogSink`].
#[derive(Clone)]
pub struct LogFailureSink {
    log: Arc<dyn LogSink>,
}

impl std::fmt::Debug for LogFailureSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFailureSink").finish_non_exhaustive()
    }
}

impl LogFailureSink {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self { log }
    }
}

impl Default for LogFailureSink {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogSink))
    }
}

#[async_trait]
impl FailureSink for LogFailureSink {
    async fn record(&self, record: &FailureRecord) -> anyhow::Result<()> {
        let message = format!("job {} ({}) failed permanently", record.job_id, record.name);
        self.log
            .write(LogLevel::Error, &message, &record.to_fields())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingLog {
        lines: Mutex<Vec<(LogLevel, String, LogFields)>>,
    }

    #[async_trait]
    impl LogSink for CapturingLog {
        async fn write(
            &self,
            level: LogLevel,
            message: &str,
            fields: &LogFields,
        ) -> anyhow::Result<()> {
            self.lines
                .lock()
                .push((level, message.to_string(), fields.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_record_for_job() {
        let job = Job::new(()).with_id("j-9").on_queue("mail");
        let record = FailureRecord::for_job(&job, "send-welcome", ErrorKind::Handler, "smtp down");
        assert_eq!(record.job_id.as_str(), "j-9");
        assert_eq!(record.queue, "mail");
        assert_eq!(record.attempts, 0);
        assert_eq!(record.kind, ErrorKind::Handler);
    }

    #[tokio::test]
    async fn test_log_failure_sink_writes_error_line() {
        let log = Arc::new(CapturingLog::default());
        let sink = LogFailureSink::new(log.clone());
        let job = Job::new(()).with_id("j-1");
        let record = FailureRecord::for_job(&job, "report", ErrorKind::Deadline, "too slow");

        sink.record(&record).await.unwrap();

        let lines = log.lines.lock();
        assert_eq!(lines.len(), 1);
        let (level, message, fields) = &lines[0];
        assert_eq!(*level, LogLevel::Error);
        assert!(message.contains("j-1"));
        assert_eq!(fields["job_id"], "j-1");
        assert_eq!(fields["kind"], "deadline");
        assert_eq!(fields["reason"], "too slow");
    }
}

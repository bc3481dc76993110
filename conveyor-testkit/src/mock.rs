use async_trait::async_trait;
use conveyor::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct HandleRecord {
    pub job_id: JobId,
    pub queue: String,
    pub attempts: u32,
}

/// [`Handler`] recording every job it sees.
///
/// By default every call succeeds. `failing_first(n)` makes the first `n`
/// calls for each job id fail; `with_delay` makes each call sleep first,
/// returning early if the scope ends.
#[derive(Clone)]
pub struct MockHandler {
    handled: Arc<Mutex<Vec<HandleRecord>>>,
    failures_per_job: u32,
    calls_per_job: Arc<Mutex<HashMap<JobId, u32>>>,
    delay: Option<Duration>,
}

impl MockHandler {
    pub fn new() -> Self {
        Self {
            handled: Arc::new(Mutex::new(Vec::new())),
            failures_per_job: 0,
            calls_per_job: Arc::new(Mutex::new(HashMap::new())),
            delay: None,
        }
    }

    pub fn failing_first(mut self, failures: u32) -> Self {
        self.failures_per_job = failures;
        self
    }

    /// Fail every call.
    pub fn always_failing() -> Self {
        Self::new().failing_first(u32::MAX)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn record(&self) -> Vec<HandleRecord> {
        self.handled.lock().clone()
    }

    pub fn handled_ids(&self) -> Vec<JobId> {
        self.handled.lock().iter().map(|r| r.job_id.clone()).collect()
    }

    pub fn assert_handle_count_eq(&self, expected: usize) {
        let actual = self.handled.lock().len();
        assert_eq!(actual, expected, "Expected {} handled jobs, got {}", expected, actual);
    }

    pub fn clear(&self) {
        self.handled.lock().clear();
        self.calls_per_job.lock().clear();
    }
}

impl Default for MockHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Handler<T> for MockHandler {
    async fn handle(&self, scope: &Scope, job: &Job<T>) -> anyhow::Result<()> {
        self.handled.lock().push(HandleRecord {
            job_id: job.id().clone(),
            queue: job.queue_name().to_string(),
            attempts: job.attempts(),
        });

        if let Some(delay) = self.delay {
            scope.run(tokio::time::sleep(delay)).await?;
        }

        let call = {
            let mut calls = self.calls_per_job.lock();
            let count = calls.entry(job.id().clone()).or_insert(0);
            *count += 1;
            *count
        };
        if call <= self.failures_per_job {
            anyhow::bail!("scripted failure {call} for job {}", job.id());
        }
        Ok(())
    }
}

/// [`FailureSink`] keeping every record in memory.
#[derive(Clone, Default)]
pub struct RecordingFailureSink {
    records: Arc<Mutex<Vec<FailureRecord>>>,
}

impl RecordingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<FailureRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl FailureSink for RecordingFailureSink {
    async fn record(&self, record: &FailureRecord) -> anyhow::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

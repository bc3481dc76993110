use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use conveyor::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TestJob {
    Simple { name: String },
    Slow { duration_ms: u64, name: String },
    Failing { error: String, name: String },
}

impl TestJob {
    pub fn simple(name: impl Into<String>) -> Self {
        Self::Simple { name: name.into() }
    }

    pub fn slow(name: impl Into<String>, duration: Duration) -> Self {
        Self::Slow {
            duration_ms: duration.as_millis() as u64,
            name: name.into(),
        }
    }

    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Failing {
            error: error.into(),
            name: name.into(),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            TestJob::Simple { name } | TestJob::Slow { name, .. } | TestJob::Failing { name, .. } => name,
        }
    }

    pub fn kind(&self) -> TestJobKind {
        match self {
            TestJob::Simple { .. } => TestJobKind::Simple,
            TestJob::Slow { .. } => TestJobKind::Slow,
            TestJob::Failing { .. } => TestJobKind::Failing,
        }
    }
}

impl JobPayload for TestJob {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.kind().as_str())
    }

    fn queue(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.kind().queue())
    }
}

#[async_trait]
impl Runnable for TestJob {
    type Output = String;

    async fn handle(&self, scope: &Scope) -> anyhow::Result<String> {
        match self {
            TestJob::Simple { name } => Ok(name.clone()),
            TestJob::Slow { duration_ms, name } => {
                tokio::select! {
                    err = scope.done() => Err(err.into()),
                    _ = tokio::time::sleep(Duration::from_millis(*duration_ms)) => Ok(name.clone()),
                }
            }
            TestJob::Failing { error, .. } => Err(anyhow::anyhow!("{error}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestJobKind {
    Simple,
    Slow,
    Failing,
}

impl TestJobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestJobKind::Simple => "simple",
            TestJobKind::Slow => "slow",
            TestJobKind::Failing => "failing",
        }
    }

    /// Queue each kind is routed to.
    pub fn queue(&self) -> &'static str {
        match self {
            TestJobKind::Slow => "slow",
            TestJobKind::Simple | TestJobKind::Failing => DEFAULT_QUEUE,
        }
    }
}

impl std::fmt::Display for TestJobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

use async_trait::async_trait;
use conveyor::*;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
    pub fields: LogFields,
}

/// [`LogSink`] keeping every line in memory.
#[derive(Clone, Default)]
pub struct MemoryLogSink {
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lines.lock().iter().map(|l| l.message.clone()).collect()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn write(&self, level: LogLevel, message: &str, fields: &LogFields) -> anyhow::Result<()> {
        self.lines.lock().push(LogLine {
            level,
            message: message.to_string(),
            fields: fields.clone(),
        });
        Ok(())
    }
}

/// [`MailSink`] collecting outgoing mail; can be switched to fail.
#[derive(Clone, Default)]
pub struct MemoryMailSink {
    sent: Arc<Mutex<Vec<Mail>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemoryMailSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MailSink for MemoryMailSink {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        if *self.failing.lock() {
            anyhow::bail!("mail transport unavailable");
        }
        self.sent.lock().push(Mail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// [`KVStore`] backed by a map, honouring TTLs on read.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<HashMap<String, (Value, Option<Instant>)>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn live(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl KVStore for MemoryKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> anyhow::Result<()> {
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn has(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.live(key).is_some())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        self.entries.lock().clear();
        Ok(())
    }
}

//! Stock listeners wiring events to the host's log, mail and cache capabilities.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::capability::{KVStore, LogFields, LogLevel, LogSink, MailSink};
use crate::events::{Event, Listener};
use crate::scope::Scope;

/// Writes one log line per event.
pub struct LogListener {
    log: Arc<dyn LogSink>,
    level: LogLevel,
}

impl LogListener {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self {
            log,
            level: LogLevel::Info,
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }
}

#[async_trait]
impl<E: Serialize + Send + Sync + 'static> Listener<E> for LogListener {
    async fn handle(&self, scope: &Scope, event: &Event<E>) -> anyhow::Result<()> {
        scope.check()?;
        let mut fields = LogFields::new();
        fields.insert("event_id".into(), Value::from(event.id().to_string()));
        fields.insert("event".into(), Value::from(event.name()));
        fields.insert("source".into(), Value::from(event.source()));
        fields.insert("timestamp".into(), Value::from(event.timestamp().to_rfc3339()));
        fields.insert("data".into(), serde_json::to_value(event.data())?);

        let message = format!("event {}", event.name());
        self.log.write(self.level, &message, &fields).await
    }

    fn label(&self) -> &str {
        "log"
    }
}

/// A rendered message for [`MailListener`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

type RenderMail<E> = dyn Fn(&Event<E>) -> Option<Mail> + Send + Sync;

/// Renders an event into a mail and sends it. Events rendering to `None`
/// are skipped.
pub struct MailListener<E> {
    mailer: Arc<dyn MailSink>,
    render: Box<RenderMail<E>>,
}

impl<E> MailListener<E> {
    pub fn new<F>(mailer: Arc<dyn MailSink>, render: F) -> Self
    where
        F: Fn(&Event<E>) -> Option<Mail> + Send + Sync + 'static,
    {
        Self {
            mailer,
            render: Box::new(render),
        }
    }
}

#[async_trait]
impl<E: Send + Sync + 'static> Listener<E> for MailListener<E> {
    async fn handle(&self, scope: &Scope, event: &Event<E>) -> anyhow::Result<()> {
        let Some(mail) = (self.render)(event) else {
            return Ok(());
        };
        scope.check()?;
        self.mailer.send(&mail.to, &mail.subject, &mail.body).await
    }

    fn label(&self) -> &str {
        "mail"
    }
}

type CacheKeys<E> = dyn Fn(&Event<E>) -> Vec<String> + Send + Sync;

/// Deletes the cache keys an event invalidates.
pub struct CacheForgetListener<E> {
    store: Arc<dyn KVStore>,
    keys: Box<CacheKeys<E>>,
}

impl<E> CacheForgetListener<E> {
    pub fn new<F>(store: Arc<dyn KVStore>, keys: F) -> Self
    where
        F: Fn(&Event<E>) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            store,
            keys: Box::new(keys),
        }
    }
}

#[async_trait]
impl<E: Send + Sync + 'static> Listener<E> for CacheForgetListener<E> {
    async fn handle(&self, scope: &Scope, event: &Event<E>) -> anyhow::Result<()> {
        for key in (self.keys)(event) {
            scope.check()?;
            let removed = self.store.del(&key).await?;
            tracing::debug!(event = %event.name(), key = %key, removed, "cache key forgotten");
        }
        Ok(())
    }

    fn label(&self) -> &str {
        "cache_forget"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Default)]
    struct Lines(Mutex<Vec<(LogLevel, String, LogFields)>>);

    #[async_trait]
    impl LogSink for Lines {
        async fn write(&self, level: LogLevel, message: &str, fields: &LogFields) -> anyhow::Result<()> {
            self.0.lock().push((level, message.to_string(), fields.clone()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<Mail>>);

    #[async_trait]
    impl MailSink for Outbox {
        async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
            self.0.lock().push(Mail {
                to: to.into(),
                subject: subject.into(),
                body: body.into(),
            });
            Ok(())
        }
    }

    #[derive(Default)]
    struct Cache(Mutex<HashMap<String, Value>>);

    #[async_trait]
    impl KVStore for Cache {
        async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
            Ok(self.0.lock().get(key).cloned())
        }

        async fn set(&self, key: &str, value: Value, _ttl: Option<Duration>) -> anyhow::Result<()> {
            self.0.lock().insert(key.to_string(), value);
            Ok(())
        }

        async fn del(&self, key: &str) -> anyhow::Result<bool> {
            Ok(self.0.lock().remove(key).is_some())
        }

        async fn has(&self, key: &str) -> anyhow::Result<bool> {
            Ok(self.0.lock().contains_key(key))
        }

        async fn flush(&self) -> anyhow::Result<()> {
            self.0.lock().clear();
            Ok(())
        }
    }

    fn order_shipped() -> Event<u64> {
        Event::new("order.shipped", 42)
    }

    #[tokio::test]
    async fn test_log_listener_writes_event_fields() {
        let lines = Arc::new(Lines::default());
        let listener = LogListener::new(lines.clone()).with_level(LogLevel::Notice);

        listener.handle(&Scope::new(), &order_shipped()).await.unwrap();

        let lines = lines.0.lock();
        let (level, message, fields) = &lines[0];
        assert_eq!(*level, LogLevel::Notice);
        assert_eq!(message, "event order.shipped");
        assert_eq!(fields["data"], 42);
        assert_eq!(fields["source"], "app");
    }

    #[tokio::test]
    async fn test_mail_listener_renders_and_skips() {
        let outbox = Arc::new(Outbox::default());
        let listener = MailListener::new(outbox.clone(), |event: &Event<u64>| {
            (*event.data() > 10).then(|| Mail {
                to: "ops@example.com".into(),
                subject: format!("order {}", event.data()),
                body: "shipped".into(),
            })
        });

        listener.handle(&Scope::new(), &order_shipped()).await.unwrap();
        listener
            .handle(&Scope::new(), &Event::new("order.shipped", 3))
            .await
            .unwrap();

        let sent = outbox.0.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "order 42");
    }

    #[tokio::test]
    async fn test_cache_forget_listener_deletes_keys() {
        let cache = Arc::new(Cache::default());
        cache.set("order:42", Value::from("cached"), None).await.unwrap();
        cache.set("orders:recent", Value::from("cached"), None).await.unwrap();
        cache.set("order:7", Value::from("cached"), None).await.unwrap();

        let listener = CacheForgetListener::new(cache.clone(), |event: &Event<u64>| {
            vec![format!("order:{}", event.data()), "orders:recent".to_string()]
        });
        listener.handle(&Scope::new(), &order_shipped()).await.unwrap();

        assert!(!cache.has("order:42").await.unwrap());
        assert!(!cache.has("orders:recent").await.unwrap());
        assert!(cache.has("order:7").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_scope_stops_listener() {
        let lines = Arc::new(Lines::default());
        let listener = LogListener::new(lines.clone());
        let scope = Scope::new();
        scope.cancel();

        assert!(listener.handle(&scope, &order_shipped()).await.is_err());
        assert!(lines.0.lock().is_empty());
    }
}

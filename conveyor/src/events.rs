//! Named application events with listener fan-out.
//!
//! Listeners register under an event name and run either in the emitter's
//! scope ([`EventBus::dispatch_sync`]) or later on a worker, by way of an
//! [`EventJob`] placed on a queue ([`EventBus::dispatch_async`]).

use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::dispatch::JobDispatcher;
use crate::error::{QueueError, Result};
use crate::handler::{Handler, JobPayload};
use crate::job::{Job, JobId, DEFAULT_QUEUE};
use crate::scope::Scope;
use crate::telemetry;

/// Default `source` of events built with [`Event::new`].
pub const DEFAULT_EVENT_SOURCE: &str = "app";

/// An immutable notification that something happened.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event<E> {
    id: Uuid,
    name: String,
    data: E,
    timestamp: DateTime<Utc>,
    source: String,
}

impl<E> Event<E> {
    pub fn new(name: impl Into<String>, data: E) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            data,
            timestamp: Utc::now(),
            source: DEFAULT_EVENT_SOURCE.to_string(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &E {
        &self.data
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Reacts to events registered under a name.
#[async_trait]
pub trait Listener<E>: Send + Sync {
    async fn handle(&self, scope: &Scope, event: &Event<E>) -> anyhow::Result<()>;

    /// Label used when logging listener failures.
    fn label(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// [`Listener`] backed by a closure.
pub struct FnListener<F> {
    f: F,
}

/// Build a [`Listener`] from an `async` closure.
pub fn listener_fn<E, F, Fut>(f: F) -> FnListener<F>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(Scope, Event<E>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnListener { f }
}

#[async_trait]
impl<E, F, Fut> Listener<E> for FnListener<F>
where
    E: Clone + Send + Sync + 'static,
    F: Fn(Scope, Event<E>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, scope: &Scope, event: &Event<E>) -> anyhow::Result<()> {
        (self.f)(scope.clone(), event.clone()).await
    }
}

/// Queue payload carrying an event to a worker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventJob<E> {
    event: Event<E>,
    queue: String,
    max_retries: Option<u32>,
}

impl<E> EventJob<E> {
    pub fn new(event: Event<E>) -> Self {
        Self {
            event,
            queue: DEFAULT_QUEUE.to_string(),
            max_retries: None,
        }
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn event(&self) -> &Event<E> {
        &self.event
    }
}

impl<E: Send + Sync + 'static> JobPayload for EventJob<E> {
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.event.name())
    }

    fn queue(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.queue)
    }

    fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }
}

type ListenerMap<E> = HashMap<String, Vec<Arc<dyn Listener<E>>>>;

/// Registry of listeners keyed by event name.
///
/// Registration takes a write lock; dispatch clones the listener list under
/// a read lock and runs it without holding the lock.
pub struct EventBus<E> {
    listeners: RwLock<ListenerMap<E>>,
    dispatcher: JobDispatcher<EventJob<E>>,
    queue: String,
    max_retries: Option<u32>,
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        let mut names: Vec<&String> = listeners.keys().collect();
        names.sort_unstable();
        f.debug_struct("EventBus")
            .field("events", &names)
            .field("queue", &self.queue)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl<E: Send + Sync + 'static> EventBus<E> {
    /// Bus whose asynchronous dispatch goes through `dispatcher`.
    pub fn new(dispatcher: JobDispatcher<EventJob<E>>) -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            dispatcher,
            queue: DEFAULT_QUEUE.to_string(),
            max_retries: None,
        }
    }

    /// Queue that asynchronously dispatched events are placed on.
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Retry ceiling for asynchronously dispatched events.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn dispatcher(&self) -> &JobDispatcher<EventJob<E>> {
        &self.dispatcher
    }

    /// Register `listener` for `name`. Registration order is invocation order.
    pub fn listen(&self, name: impl Into<String>, listener: Arc<dyn Listener<E>>) {
        self.listeners
            .write()
            .entry(name.into())
            .or_default()
            .push(listener);
    }

    /// Register an `async` closure for `name`.
    pub fn listen_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        E: Clone,
        F: Fn(Scope, Event<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.listen(name, Arc::new(listener_fn(f)));
    }

    /// Remove every listener registered for `name`.
    pub fn forget(&self, name: &str) {
        self.listeners.write().remove(name);
    }

    pub fn has_listeners(&self, name: &str) -> bool {
        self.listener_count(name) > 0
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.read().get(name).map_or(0, Vec::len)
    }

    fn listeners_for(&self, name: &str) -> Vec<Arc<dyn Listener<E>>> {
        self.listeners.read().get(name).cloned().unwrap_or_default()
    }

    /// Invoke every listener for the event's name, in registration order.
    ///
    /// A failing listener does not stop the others. The first error is
    /// returned; later ones are logged. An event with no listeners succeeds.
    pub async fn dispatch_sync(&self, scope: &Scope, event: &Event<E>) -> Result<()> {
        scope.check()?;
        let listeners = self.listeners_for(event.name());
        telemetry::record_event_dispatched(event.name(), "sync");

        let span = telemetry::event_span(event.name(), listeners.len());
        async {
            let mut first_err: Option<anyhow::Error> = None;
            for listener in &listeners {
                if let Err(err) = listener.handle(scope, event).await {
                    if first_err.is_none() {
                        first_err = Some(err);
                    } else {
                        tracing::warn!(
                            event = %event.name(),
                            listener = %listener.label(),
                            error = %err,
                            "listener failed"
                        );
                    }
                }
            }
            match first_err {
                Some(err) => Err(QueueError::Handler(err)),
                None => Ok(()),
            }
        }
        .instrument(span)
        .await
    }

    /// Enqueue the event; a worker running this bus as its handler will
    /// invoke the listeners.
    pub fn dispatch_async(&self, event: Event<E>) -> Result<JobId> {
        let mut job = EventJob::new(event).on_queue(self.queue.clone());
        if let Some(max) = self.max_retries {
            job = job.with_max_retries(max);
        }
        telemetry::record_event_dispatched(job.event().name(), "async");
        self.dispatcher.dispatch(job)
    }

    /// [`dispatch_async`](Self::dispatch_async), refused once `scope` is done.
    pub fn dispatch_async_with_scope(&self, scope: &Scope, event: Event<E>) -> Result<JobId> {
        scope.check()?;
        self.dispatch_async(event)
    }

    /// Build an event from `name` and `data` and dispatch it synchronously.
    pub async fn emit(&self, scope: &Scope, name: impl Into<String>, data: E) -> Result<()> {
        self.dispatch_sync(scope, &Event::new(name, data)).await
    }
}

#[async_trait]
impl<E: Send + Sync + 'static> Handler<EventJob<E>> for EventBus<E> {
    async fn handle(&self, scope: &Scope, job: &Job<EventJob<E>>) -> anyhow::Result<()> {
        match self.dispatch_sync(scope, job.data().event()).await {
            Ok(()) => Ok(()),
            Err(QueueError::Handler(err)) => Err(err),
            Err(other) => Err(other.into()),
        }
    }
}

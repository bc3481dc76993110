//! Job payload and handler capabilities.
//!
//! A payload type describes where it is routed ([`JobPayload`]). Workers run
//! popped jobs through a [`Handler`]. Payloads that carry their own logic
//! implement [`Runnable`], which both the dispatcher's synchronous path and
//! [`RunnableHandler`] call.

use std::borrow::Cow;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{Job, DEFAULT_QUEUE};
use crate::scope::Scope;

/// Routing metadata a payload declares about itself.
pub trait JobPayload: Send + Sync + 'static {
    /// Name used in logs, lifecycle events and failure records.
    fn name(&self) -> Cow<'_, str> {
        Cow::Borrowed(std::any::type_name::<Self>())
    }

    /// Queue the dispatcher appends this payload to.
    fn queue(&self) -> Cow<'_, str> {
        Cow::Borrowed(DEFAULT_QUEUE)
    }

    /// Retry ceiling; `None` takes the dispatcher's default.
    fn max_retries(&self) -> Option<u32> {
        None
    }
}

/// A payload that knows how to execute itself.
#[async_trait]
pub trait Runnable: JobPayload {
    type Output: Send;

    async fn handle(&self, scope: &Scope) -> anyhow::Result<Self::Output>;
}

/// Capability a worker invokes for every popped job.
///
/// Implementations should return promptly once `scope` is cancelled.
#[async_trait]
pub trait Handler<T>: Send + Sync {
    async fn handle(&self, scope: &Scope, job: &Job<T>) -> anyhow::Result<()>;
}

/// Marker error: the job must not be retried, regardless of attempts left.
///
/// Return it (or wrap it with `anyhow`) from a handler to send the job
/// straight to the failure path.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PermanentFailure(pub String);

impl PermanentFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// Whether `err` carries a [`PermanentFailure`] anywhere in its chain.
    pub fn is_permanent(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| cause.is::<PermanentFailure>())
    }
}

/// [`Handler`] running [`Runnable`] payloads and discarding their output.
pub struct RunnableHandler<T> {
    _payload: PhantomData<fn(T)>,
}

impl<T> RunnableHandler<T> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for RunnableHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for RunnableHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnableHandler")
            .field("payload", &std::any::type_name::<T>())
            .finish()
    }
}

#[async_trait]
impl<T: Runnable> Handler<T> for RunnableHandler<T> {
    async fn handle(&self, scope: &Scope, job: &Job<T>) -> anyhow::Result<()> {
        job.data().handle(scope).await.map(|_| ())
    }
}

/// [`Handler`] backed by a closure.
pub struct FnHandler<F> {
    f: F,
}

/// Build a [`Handler`] from `async` closure-like functions.
pub fn handler_fn<T, F, Fut>(f: F) -> FnHandler<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Scope, Job<T>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<T, F, Fut> Handler<T> for FnHandler<F>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(Scope, Job<T>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, scope: &Scope, job: &Job<T>) -> anyhow::Result<()> {
        (self.f)(scope.clone(), job.clone()).await
    }
}

//! Cancellation scopes.
//!
//! A [`Scope`] is an externally controllable "stop now" signal plus an
//! optional deadline. Every cancellable queue, dispatcher and bus operation
//! takes one. Cancelling a scope cancels every scope derived from it with
//! [`Scope::child`]; deadlines only ever tighten down the chain.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{QueueError, Result};

/// Cancellation context shared between a caller and the work it starts.
///
/// Cloning a scope yields a handle to the same signal: cancelling any clone
/// cancels all of them.
#[derive(Clone, Debug)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    /// A fresh, uncancelled scope with no deadline.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A scope that nobody else holds a handle to, so it is never cancelled.
    ///
    /// Plain (context-free) queue operations run under this.
    pub fn background() -> Self {
        Self::new()
    }

    /// A fresh scope that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A fresh scope that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Derive a scope cancelled together with this one.
    ///
    /// Cancelling the child does not affect the parent.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child whose deadline is at most `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Signal cancellation to this scope and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether cancellation was signalled (ignores the deadline).
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the scope is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }

    /// Pre-check used at the entry of every cancellable operation.
    ///
    /// Explicit cancellation wins over an expired deadline.
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(QueueError::DeadlineExceeded)
            }
            _ => Ok(()),
        }
    }

    /// Wait until the scope is cancelled or its deadline passes.
    ///
    /// Returns the error describing which of the two happened.
    pub async fn done(&self) -> QueueError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => QueueError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => QueueError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                QueueError::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the scope finishes first.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        self.check()?;
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

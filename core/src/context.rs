//! Cancellation and deadline propagation for dispatch calls.
//!
//! A [`Context`] is handed to every `Commands::handle` call and forwarded to each
//! handler invocation. Cancelling a context cancels all contexts derived from it,
//! never its ancestors. Deadlines are inherited: a child is done no later than its
//! parent.
//!
//! # Example
//!
//! ```
//! use mediator_core::context::{Context, ContextError};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let root = Context::background();
//! let call = root.with_timeout(Duration::from_millis(10));
//! let step = call.with_cancel();
//!
//! assert_eq!(step.cancelled().await, ContextError::DeadlineExceeded);
//! assert!(root.err().is_none());
//! # }
//! ```

use std::fmt;
use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

/// Why a context is done.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextError {
    /// The context, or one of its ancestors, was cancelled explicitly.
    #[error("context canceled")]
    Canceled,

    /// The context's deadline, or an ancestor's, has passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Boxed future returned by [`Context::cancelled`].
pub type Cancelled<'a> = Pin<Box<dyn Future<Output = ContextError> + Send + 'a>>;

/// Cancellation scope shared by one call and all handler invocations in it.
///
/// Cheap to clone; clones observe and control the same scope.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    parent: Option<Context>,
    deadline: Option<Instant>,
    state: watch::Sender<Option<ContextError>>,
}

impl Context {
    /// A root context that is never done unless cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self::build(None, None)
    }

    /// Derive a child that can be cancelled independently of `self`.
    #[must_use]
    pub fn with_cancel(&self) -> Self {
        Self::build(Some(self.clone()), None)
    }

    /// Derive a child that is done once `timeout` has elapsed.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child that is done at `deadline`.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self::build(Some(self.clone()), Some(deadline))
    }

    fn build(parent: Option<Self>, deadline: Option<Instant>) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                parent,
                deadline,
                state,
            }),
        }
    }

    /// Cancel this context and every context derived from it.
    ///
    /// Idempotent: the first reason recorded wins.
    pub fn cancel(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(ContextError::Canceled);
            true
        });
    }

    /// Why the context is done, or `None` while it is still live.
    ///
    /// An ancestor's reason takes precedence over this context's own state.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if let Some(err) = self.inner.parent.as_ref().and_then(Self::err) {
            return Some(err);
        }
        if let Some(err) = *self.inner.state.borrow() {
            return Some(err);
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Whether the context is done.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// The earliest deadline of this context and its ancestors.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        let parent = self.inner.parent.as_ref().and_then(Self::deadline);
        match (parent, self.inner.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Resolves once the context is done, yielding the reason.
    pub fn cancelled(&self) -> Cancelled<'_> {
        Box::pin(async move {
            if let Some(err) = self.err() {
                return err;
            }

            let mut state = self.inner.state.subscribe();
            let own = async move {
                match state.wait_for(Option::is_some).await {
                    Ok(reason) => (*reason).unwrap_or(ContextError::Canceled),
                    Err(_) => ContextError::Canceled,
                }
            };
            let deadline = async {
                match self.inner.deadline {
                    Some(deadline) => {
                        sleep_until(deadline).await;
                        ContextError::DeadlineExceeded
                    },
                    None => pending().await,
                }
            };
            let parent = async {
                match &self.inner.parent {
                    Some(parent) => parent.cancelled().await,
                    None => pending().await,
                }
            };

            let reason = tokio::select! {
                reason = own => reason,
                reason = deadline => reason,
                reason = parent => reason,
            };

            self.err().unwrap_or(reason)
        })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("err", &self.err())
            .finish_non_exhaustive()
    }
}

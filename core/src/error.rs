//! Error taxonomy of the dispatch engine.

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Shareable error carried inside events.
///
/// Events are cloned freely between tasks, so their errors are reference counted.
pub type BoxError = Arc<dyn StdError + Send + Sync + 'static>;

/// Convert any boxable error into a [`BoxError`].
///
/// Accepts concrete error types, `anyhow::Error`, `String` and `&str`.
pub fn box_error(err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> BoxError {
    Arc::from(err.into())
}

/// Errors raised by the engine itself, as opposed to handler failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No handler is registered for the event type.
    #[error("handler not found for event {event_type}")]
    HandlerNotFound {
        /// Type of the event that could not be routed
        event_type: String,
    },

    /// A handler was registered with an empty event type.
    #[error("handler registered at position {position} has an empty event type")]
    IncorrectHandler {
        /// Registration index of the offending handler
        position: usize,
    },

    /// An event without a type tag reached the dispatch loop.
    #[error("got event with value of nil")]
    NilEvent,

    /// More than one handler was registered for the catch-all error type.
    #[error("you can use only one handler for \"{}\" event", crate::event::CATCH_ALL_ERROR_EVENT_TYPE)]
    MoreThanOneCatchAllHandler,

    /// The configured concurrency limit is zero.
    #[error("concurrency limit should be at least 1")]
    LimitLessThanOne,

    /// A handler invocation panicked before finishing.
    #[error("handler for event {event_type} panicked")]
    HandlerPanicked {
        /// Type of the event being handled
        event_type: String,
    },

    /// The worker's supervising task has exited.
    #[error("worker is stopped")]
    WorkerStopped,
}

impl DispatchError {
    /// Shorthand for [`DispatchError::HandlerNotFound`].
    #[must_use]
    pub fn handler_not_found(event_type: impl Into<String>) -> Self {
        Self::HandlerNotFound {
            event_type: event_type.into(),
        }
    }

    /// Stable label used for metrics and structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::HandlerNotFound { .. } => "handler_not_found",
            Self::IncorrectHandler { .. } => "incorrect_handler",
            Self::NilEvent => "nil_event",
            Self::MoreThanOneCatchAllHandler => "more_than_one_catch_all_handler",
            Self::LimitLessThanOne => "limit_less_than_one",
            Self::HandlerPanicked { .. } => "handler_panicked",
            Self::WorkerStopped => "worker_stopped",
        }
    }
}

//! Events flowing through the dispatch engine.
//!
//! An [`Event`] is an immutable value with a type tag, a payload and optional
//! causality [`Metadata`]. The type tag is the dispatch key. "Mutating" an event
//! always means wrapping it:
//!
//! | constructor          | `event_type()`          | meaning                              |
//! |----------------------|-------------------------|--------------------------------------|
//! | [`Event::new`]       | the given type          | a plain message                      |
//! | [`Event::done`]      | `DONE#<wrapped type>`   | a result fragment for the caller     |
//! | [`Event::failed`]    | `ERROR#<causing type>`  | a failure, routed like any event     |
//! | [`ErrAggregatedEvent`] | `ERROR#<initial type>` | every failure of one call            |
//!
//! # Example
//!
//! ```
//! use mediator_core::event::{Event, error_event_type};
//!
//! let placed = Event::new("order.placed", br#"{"id":1}"#.to_vec());
//! let failed = Event::failed(placed.clone(), "out of stock");
//!
//! assert_eq!(failed.event_type(), error_event_type("order.placed"));
//! assert_eq!(failed.payload(), placed.payload());
//! assert_eq!(
//!     failed.err().map(|e| e.to_string()).as_deref(),
//!     Some("failed to process event order.placed: out of stock"),
//! );
//! ```

use crate::error::{BoxError, box_error};
use crate::metadata::Metadata;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// Type of the single optional handler that receives unhandled error events.
pub const CATCH_ALL_ERROR_EVENT_TYPE: &str = "ERROR#*";

/// Prefix of error event types.
pub const ERROR_EVENT_PREFIX: &str = "ERROR#";

/// Prefix of done event types.
pub const DONE_EVENT_PREFIX: &str = "DONE#";

/// Error event type for events of `event_type`: `ERROR#<event_type>`.
#[must_use]
pub fn error_event_type(event_type: &str) -> String {
    format!("{ERROR_EVENT_PREFIX}{event_type}")
}

/// Done event type for events of `event_type`: `DONE#<event_type>`.
#[must_use]
pub fn done_event_type(event_type: &str) -> String {
    format!("{DONE_EVENT_PREFIX}{event_type}")
}

/// The shape of an event.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// A plain typed message.
    Message {
        /// Dispatch key
        event_type: String,
        /// Opaque payload bytes
        payload: Vec<u8>,
    },

    /// Successful completion of one link, contributing to the call's result.
    Done(Box<Event>),

    /// A failure caused by an event.
    Failed(ErrEvent),

    /// Every failure collected while processing one call.
    Aggregated(ErrAggregatedEvent),
}

/// An immutable event, optionally carrying causality metadata.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    metadata: Option<Metadata>,
}

impl Event {
    /// Create a plain message event.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::from_kind(EventKind::Message {
            event_type: event_type.into(),
            payload: payload.into(),
        })
    }

    /// Create a message event with an empty payload.
    #[must_use]
    pub fn named(event_type: impl Into<String>) -> Self {
        Self::new(event_type, Vec::new())
    }

    /// Create a message event whose payload is `value` encoded as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(
        event_type: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_vec(value)?))
    }

    /// Mark `event` as a successful result.
    #[must_use]
    pub fn done(event: Self) -> Self {
        Self::from_kind(EventKind::Done(Box::new(event)))
    }

    /// Create an error event caused by `event`.
    #[must_use]
    pub fn failed(event: Self, err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        ErrEvent::new(event, err).into()
    }

    const fn from_kind(kind: EventKind) -> Self {
        Self {
            kind,
            metadata: None,
        }
    }

    /// The shape of this event.
    #[must_use]
    pub const fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Dispatch key of this event.
    #[must_use]
    pub fn event_type(&self) -> Cow<'_, str> {
        match &self.kind {
            EventKind::Message { event_type, .. } => Cow::Borrowed(event_type),
            EventKind::Done(inner) => Cow::Owned(done_event_type(&inner.event_type())),
            EventKind::Failed(err) => Cow::Owned(error_event_type(&err.event().event_type())),
            EventKind::Aggregated(err) => {
                Cow::Owned(error_event_type(&err.initial().event_type()))
            },
        }
    }

    /// Payload bytes; wrappers expose the payload of the event they wrap.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match &self.kind {
            EventKind::Message { payload, .. } => payload,
            EventKind::Done(inner) => inner.payload(),
            EventKind::Failed(err) => err.event().payload(),
            EventKind::Aggregated(err) => err.initial().payload(),
        }
    }

    /// Decode the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload is not valid JSON for `T`.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.payload())
    }

    /// The error carried by this event, if any.
    ///
    /// This is the single check callers need on a returned event.
    #[must_use]
    pub fn err(&self) -> Option<BoxError> {
        match &self.kind {
            EventKind::Message { .. } | EventKind::Done(_) => None,
            EventKind::Failed(err) => Some(box_error(err.clone())),
            EventKind::Aggregated(err) if err.is_empty() => None,
            EventKind::Aggregated(err) => Some(box_error(err.clone())),
        }
    }

    /// Causality metadata, present once the event has entered the pipeline.
    #[must_use]
    pub const fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    /// Attach causality metadata, replacing any previous metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// A message with an empty type tag. It cannot be routed.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(&self.kind, EventKind::Message { event_type, .. } if event_type.is_empty())
    }

    /// The wrapped event if this is a done event.
    #[must_use]
    pub fn as_done(&self) -> Option<&Self> {
        match &self.kind {
            EventKind::Done(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }

    /// The error event if this is a single failure.
    #[must_use]
    pub const fn as_failed(&self) -> Option<&ErrEvent> {
        match &self.kind {
            EventKind::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// The aggregate if this is an aggregated failure.
    #[must_use]
    pub const fn as_aggregated(&self) -> Option<&ErrAggregatedEvent> {
        match &self.kind {
            EventKind::Aggregated(err) => Some(err),
            _ => None,
        }
    }

    /// Strip one `Done` wrapper; other events are returned unchanged.
    #[must_use]
    pub fn unwrap_done(self) -> Self {
        match self.kind {
            EventKind::Done(inner) => *inner,
            _ => self,
        }
    }

    /// Whether this is the error event for events of `event_type`.
    #[must_use]
    pub fn is_error_of(&self, event_type: &str) -> bool {
        self.event_type() == error_event_type(event_type)
    }
}

impl From<ErrEvent> for Event {
    fn from(err: ErrEvent) -> Self {
        Self::from_kind(EventKind::Failed(err))
    }
}

impl From<ErrAggregatedEvent> for Event {
    fn from(err: ErrAggregatedEvent) -> Self {
        Self::from_kind(EventKind::Aggregated(err))
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event {{ type: {}, size: {} bytes }}",
            self.event_type(),
            self.payload().len()
        )
    }
}

/// A failure caused by processing an event.
///
/// Dispatched like any other event under the type `ERROR#<causing type>`.
#[derive(Debug, Clone)]
pub struct ErrEvent {
    event: Box<Event>,
    cause: BoxError,
}

impl ErrEvent {
    /// Create an error event caused by `event`.
    #[must_use]
    pub fn new(event: Event, err: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self::from_shared(event, box_error(err))
    }

    /// Create an error event from an already shared error.
    #[must_use]
    pub fn from_shared(event: Event, cause: BoxError) -> Self {
        Self {
            event: Box::new(event),
            cause,
        }
    }

    /// The event whose processing failed.
    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// The underlying error.
    #[must_use]
    pub const fn cause(&self) -> &BoxError {
        &self.cause
    }
}

impl fmt::Display for ErrEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to process event {}: {}",
            self.event.event_type(),
            self.cause
        )
    }
}

impl StdError for ErrEvent {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Every error encountered while processing one top-level call.
///
/// Owned by the dispatch loop that builds it; immutable once returned.
#[derive(Debug, Clone)]
pub struct ErrAggregatedEvent {
    initial: Box<Event>,
    errors: Vec<BoxError>,
}

impl ErrAggregatedEvent {
    /// Start an empty aggregate for `initial`.
    #[must_use]
    pub fn new(initial: Event) -> Self {
        Self {
            initial: Box::new(initial),
            errors: Vec::new(),
        }
    }

    /// Record another error.
    pub fn push(&mut self, err: BoxError) {
        self.errors.push(err);
    }

    /// The event that started the call.
    #[must_use]
    pub fn initial(&self) -> &Event {
        &self.initial
    }

    /// Errors in arrival order.
    #[must_use]
    pub fn errors(&self) -> &[BoxError] {
        &self.errors
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether no error was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ErrAggregatedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "failed to process event {}: aggregated error occurred: [",
            self.initial.event_type()
        )?;
        for err in &self.errors {
            writeln!(f, "\t{err}")?;
        }
        write!(f, "]")
    }
}

impl StdError for ErrAggregatedEvent {}

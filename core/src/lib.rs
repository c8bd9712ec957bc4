//! # Mediator Core
//!
//! Core types and contracts of the mediator dispatch engine.
//!
//! The engine routes a typed [`Event`](event::Event) to exactly one registered
//! [`Handler`](handler::Handler). A handler may write follow-up events, which are
//! routed again, until the chain is exhausted or fails. The caller receives a
//! single terminal event: a done event on success, an error event otherwise.
//!
//! ## Core Concepts
//!
//! - **Event**: immutable typed value, optionally carrying [`Metadata`](metadata::Metadata)
//! - **Metadata**: `id` / `correlationId` / `causationId` triple tracking chain provenance
//! - **Handler**: processor for one event type, writing through a scoped [`Writer`](handler::Writer)
//! - **Context**: cancellation and deadline scope of one call
//! - **Done / error events**: `DONE#<type>` and `ERROR#<type>` wrappers, routed like any event
//!
//! The dispatch loop, handler registry and worker pool live in `mediator-runtime`.
//!
//! ## Example
//!
//! ```
//! use mediator_core::prelude::*;
//!
//! let create = handler_fn("user.create", |_ctx, payload| async move {
//!     if payload.is_empty() {
//!         return Err(DispatchError::NilEvent);
//!     }
//!     Ok(())
//! });
//!
//! let event = Event::new("user.create", br#"{"name":"ann"}"#.to_vec())
//!     .with_metadata(Metadata::generate());
//!
//! assert_eq!(create.event_type(), event.event_type());
//! ```

pub mod context;
pub mod error;
pub mod event;
pub mod handler;
pub mod message;
pub mod metadata;

/// Commonly used types, re-exported for glob import.
pub mod prelude {
    pub use crate::context::{Context, ContextError};
    pub use crate::error::{BoxError, DispatchError, box_error};
    pub use crate::event::{
        CATCH_ALL_ERROR_EVENT_TYPE, ErrAggregatedEvent, ErrEvent, Event, EventKind,
        done_event_type, error_event_type,
    };
    pub use crate::handler::{EventWriter, Handler, HandlerFuture, Writer, handler, handler_fn};
    pub use crate::message::EventMessage;
    pub use crate::metadata::Metadata;
}

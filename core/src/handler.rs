//! Handler and writer contracts.
//!
//! A [`Handler`] processes events of exactly one type. It receives the call's
//! [`Context`], a scoped [`Writer`] and the event. Through the writer it may emit
//! any number of follow-up events, each of which is routed again by the engine,
//! and it must finish by calling [`EventWriter::done`].
//!
//! # Example
//!
//! ```
//! use mediator_core::event::Event;
//! use mediator_core::handler::{handler, handler_fn};
//!
//! // Emits follow-up events and signals done itself.
//! let place = handler("order.place", |_ctx, writer, event| async move {
//!     writer.write(Event::new("order.placed", event.payload().to_vec()));
//!     writer.done();
//! });
//!
//! // Fallible closure; failures become `ERROR#order.placed` events.
//! let notify = handler_fn("order.placed", |_ctx, _payload| async move {
//!     Ok::<(), std::io::Error>(())
//! });
//!
//! assert_eq!(place.event_type(), "order.place");
//! assert_eq!(notify.event_type(), "order.placed");
//! ```

use crate::context::Context;
use crate::event::Event;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by [`Handler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Shared handle to the scoped writer of one handler invocation.
pub type Writer = Arc<dyn EventWriter>;

/// Sink for the events produced by one handler invocation.
///
/// `write` never blocks the handler. `done` marks the end of the invocation's
/// output and may be called more than once; only the first call counts. Writes
/// after `done` are dropped.
pub trait EventWriter: Send + Sync {
    /// Emit a follow-up event.
    fn write(&self, event: Event);

    /// Signal that this invocation will write nothing more.
    fn done(&self);
}

/// Application processor for one event type.
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns so handlers can be
/// stored as `Arc<dyn Handler>`.
pub trait Handler: Send + Sync {
    /// The event type this handler is registered for.
    fn event_type(&self) -> &str;

    /// Process `event`, writing follow-up events to `writer`.
    ///
    /// Implementations must call `writer.done()` when finished, including on
    /// failure and cancellation.
    fn handle(&self, ctx: Context, writer: Writer, event: Event) -> HandlerFuture<'_>;
}

/// Build a handler from an async closure receiving the writer directly.
///
/// The closure is responsible for calling `writer.done()`.
pub fn handler<F, Fut>(event_type: impl Into<String>, f: F) -> Arc<dyn Handler>
where
    F: Fn(Context, Writer, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler {
        event_type: event_type.into(),
        f,
    })
}

/// Build a handler from a fallible async closure over the payload.
///
/// The adapter writes `ErrEvent(event, err)` when the context is already done
/// or the closure fails, and always signals done.
pub fn handler_fn<F, Fut, E>(event_type: impl Into<String>, f: F) -> Arc<dyn Handler>
where
    F: Fn(Context, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync + 'static>>,
{
    Arc::new(ResultHandler {
        event_type: event_type.into(),
        f,
    })
}

struct FnHandler<F> {
    event_type: String,
    f: F,
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Context, Writer, Event) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn handle(&self, ctx: Context, writer: Writer, event: Event) -> HandlerFuture<'_> {
        Box::pin((self.f)(ctx, writer, event))
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

struct ResultHandler<F> {
    event_type: String,
    f: F,
}

impl<F, Fut, E> Handler for ResultHandler<F>
where
    F: Fn(Context, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync + 'static>>,
{
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn handle(&self, ctx: Context, writer: Writer, event: Event) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Some(err) = ctx.err() {
                writer.write(Event::failed(event, err));
                writer.done();
                return;
            }

            let payload = event.payload().to_vec();
            if let Err(err) = (self.f)(ctx, payload).await {
                writer.write(Event::failed(event, err));
            }
            writer.done();
        })
    }
}

impl<F> fmt::Debug for ResultHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandler")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}

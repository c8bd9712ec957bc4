//! The fan-out / fan-in dispatch loop of one `Commands::handle` call.
//!
//! One loop task owns everything mutable about a call: the coordinator, the
//! count of unfinished invocations, the per-type invocation permits, and the
//! error and result accumulators. Handlers only ever talk to it through their
//! scoped writers, so no accumulator needs a lock.
//!
//! Routing of each delivery:
//!
//! | delivery                          | action                                    |
//! |-----------------------------------|-------------------------------------------|
//! | `DoneWriting`                     | one invocation finished; stop at zero     |
//! | nil event                         | record `NilEvent`                         |
//! | `DONE#…`                          | record a result fragment                  |
//! | type with a handler               | invoke it                                 |
//! | error without a specific handler  | catch-all handler, else record the error  |
//! | anything else                     | record `HandlerNotFound`                  |

use crate::commands::Registry;
use crate::coordinator::{Delivery, EventReadWriter};
use crate::metrics::DispatchMetrics;
use futures::FutureExt;
use mediator_core::context::{Context, ContextError};
use mediator_core::error::{BoxError, DispatchError, box_error};
use mediator_core::event::{ErrAggregatedEvent, Event};
use mediator_core::handler::{Handler, Writer};
use mediator_core::message::EventMessage;
use mediator_core::metadata::Metadata;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::Instrument;

/// Stamp root metadata on `event` unless it already carries some.
pub(crate) fn ensure_metadata(event: Event) -> (Event, Metadata) {
    let metadata = event
        .metadata()
        .cloned()
        .unwrap_or_else(Metadata::generate);
    (event.with_metadata(metadata.clone()), metadata)
}

/// Resolve `initial` and everything it causes into one terminal event.
pub(crate) async fn dispatch(registry: &Registry, ctx: &Context, initial: Event) -> Event {
    let started = Instant::now();
    DispatchMetrics::record_call();

    let (initial, root) = ensure_metadata(initial);
    let event_type = initial.event_type().into_owned();
    let terminal = if initial.is_nil() {
        DispatchMetrics::record_error(DispatchError::NilEvent.kind());
        Event::failed(initial, DispatchError::NilEvent)
    } else if let Some(handler) = registry.lookup(&event_type) {
        let mut call = DispatchLoop::new(registry, ctx, initial.clone());
        call.invoke(Arc::clone(handler), initial);
        call.run().await
    } else {
        let err = DispatchError::handler_not_found(event_type);
        DispatchMetrics::record_error(err.kind());
        Event::failed(initial, err)
    };

    DispatchMetrics::record_duration(started.elapsed());
    tracing::debug!(
        event_type = %terminal.event_type(),
        failed = terminal.err().is_some(),
        "Call resolved"
    );
    terminal.with_metadata(root.derive())
}

/// Spawn one handler invocation.
///
/// The invocation waits for a permit from `permits` without blocking the
/// caller. A panicking handler is reported as `HandlerPanicked` on its writer.
pub(crate) fn spawn_invocation(
    handler: Arc<dyn Handler>,
    ctx: Context,
    writer: Writer,
    event: Event,
    permits: Arc<Semaphore>,
) {
    let span = match event.metadata() {
        Some(metadata) => tracing::debug_span!(
            "handle_event",
            event_type = %event.event_type(),
            event_id = %metadata.id(),
            correlation_id = %metadata.correlation_id(),
        ),
        None => tracing::debug_span!("handle_event", event_type = %event.event_type()),
    };
    DispatchMetrics::record_invocation(handler.event_type());

    tokio::spawn(
        async move {
            let _permit = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    tracing::trace!("Cancelled before a permit was available");
                    writer.done();
                    return;
                },
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        writer.done();
                        return;
                    },
                },
            };

            let event_type = event.event_type().into_owned();
            let handled = AssertUnwindSafe(handler.handle(ctx, Arc::clone(&writer), event.clone()))
                .catch_unwind()
                .await;

            if handled.is_err() {
                let err = DispatchError::HandlerPanicked { event_type };
                tracing::error!(error = %err, "Handler panicked");
                DispatchMetrics::record_error(err.kind());
                writer.write(Event::failed(event, err));
                writer.done();
            }
        }
        .instrument(span),
    );
}

/// State of one call, owned by the loop task.
struct DispatchLoop<'a> {
    registry: &'a Registry,
    rw: EventReadWriter,
    permits: HashMap<String, Arc<Semaphore>>,
    pending: usize,
    errors: ErrAggregatedEvent,
    fragments: Vec<EventMessage>,
    initial: Event,
}

impl<'a> DispatchLoop<'a> {
    fn new(registry: &'a Registry, ctx: &Context, initial: Event) -> Self {
        Self {
            registry,
            rw: EventReadWriter::new(ctx, registry.concurrency_limit()),
            permits: HashMap::new(),
            pending: 0,
            errors: ErrAggregatedEvent::new(initial.clone()),
            fragments: Vec::new(),
            initial,
        }
    }

    fn invoke(&mut self, handler: Arc<dyn Handler>, event: Event) {
        let limit = self.registry.concurrency_limit();
        let permits = Arc::clone(
            self.permits
                .entry(handler.event_type().to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(limit))),
        );
        let parent = event
            .metadata()
            .cloned()
            .unwrap_or_else(Metadata::generate);
        let writer = self.rw.writer(parent);

        self.pending += 1;
        spawn_invocation(handler, self.rw.context().clone(), writer, event, permits);
    }

    async fn run(mut self) -> Event {
        let ctx = self.rw.context().clone();
        let mut cancelled = ctx.cancelled();

        loop {
            let delivery = tokio::select! {
                biased;
                reason = &mut cancelled => Err(reason),
                delivery = self.rw.recv() => Ok(delivery),
            };

            match delivery {
                Ok(Some(Delivery::DoneWriting)) => {
                    self.pending = self.pending.saturating_sub(1);
                    if self.pending == 0 {
                        break;
                    }
                },
                Ok(Some(Delivery::Event(event))) => self.route(event),
                Ok(None) => return self.cancel(ctx.err().unwrap_or(ContextError::Canceled)),
                Err(reason) => return self.cancel(reason),
            }
        }

        self.rw.close();
        self.finish()
    }

    fn route(&mut self, event: Event) {
        tracing::trace!(event_type = %event.event_type(), "Routing event");

        if event.is_nil() {
            self.record(box_error(DispatchError::NilEvent), DispatchError::NilEvent.kind());
            return;
        }

        if let Some(inner) = event.as_done() {
            let metadata = inner
                .metadata()
                .or_else(|| event.metadata())
                .cloned()
                .unwrap_or_else(Metadata::generate);
            self.fragments.push(EventMessage::new(inner, &metadata));
            return;
        }

        let event_type = event.event_type().into_owned();
        if let Some(handler) = self.registry.lookup(&event_type) {
            let handler = Arc::clone(handler);
            self.invoke(handler, event);
            return;
        }

        if let Some(err) = event.err() {
            match self.registry.catch_all() {
                Some(handler) => {
                    let handler = Arc::clone(handler);
                    self.invoke(handler, event);
                },
                None => self.record(err, "handler_error"),
            }
            return;
        }

        if event.as_aggregated().is_some() {
            // empty aggregate: nothing failed
            return;
        }

        let err = DispatchError::handler_not_found(event_type);
        let kind = err.kind();
        self.record(box_error(err), kind);
    }

    fn record(&mut self, err: BoxError, kind: &'static str) {
        tracing::debug!(error = %err, "Aggregating error");
        DispatchMetrics::record_error(kind);
        self.errors.push(err);
    }

    fn cancel(mut self, reason: ContextError) -> Event {
        tracing::debug!(
            reason = %reason,
            pending = self.pending,
            "Call cancelled"
        );
        DispatchMetrics::record_cancelled();
        self.rw.close();
        Event::failed(self.initial, reason)
    }

    fn finish(self) -> Event {
        if !self.errors.is_empty() {
            return self.errors.into();
        }
        if self.fragments.is_empty() {
            return Event::done(self.initial);
        }

        let event_type = self.initial.event_type().into_owned();
        let root = self
            .initial
            .metadata()
            .cloned()
            .unwrap_or_else(Metadata::generate);
        match serde_json::to_value(&self.fragments) {
            Ok(fragments) => {
                let result = EventMessage::with_payload(event_type.clone(), fragments, &root);
                match serde_json::to_vec(&result) {
                    Ok(payload) => Event::done(Event::new(event_type, payload).with_metadata(root)),
                    Err(err) => Event::failed(self.initial, err),
                }
            },
            Err(err) => Event::failed(self.initial, err),
        }
    }
}

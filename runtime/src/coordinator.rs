//! Per-call event coordination.
//!
//! An [`EventReadWriter`] owns the bounded channel shared by every handler
//! invocation of one `Commands::handle` call. Each invocation gets its own scoped
//! [`Writer`]:
//!
//! ```text
//!  handler ──write──► per-writer queue ──forwarder task──┐
//!  handler ──write──► per-writer queue ──forwarder task──┼──► shared channel ──► dispatch loop
//!  handler ──write──► per-writer queue ──forwarder task──┘      (bounded)
//! ```
//!
//! The forwarder stamps each event with metadata derived from the event being
//! handled, forwards events in write order, and once the writer is done sends a
//! single [`Delivery::DoneWriting`]. Writes never block the handler; back-pressure
//! is absorbed by the forwarder.

use crate::metrics::DispatchMetrics;
use mediator_core::context::Context;
use mediator_core::event::Event;
use mediator_core::handler::{EventWriter, Writer};
use mediator_core::metadata::Metadata;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// An item on the shared channel of one call.
#[derive(Debug)]
pub enum Delivery {
    /// An event written by a handler, decorated with metadata.
    Event(Event),

    /// One handler invocation finished writing.
    DoneWriting,
}

/// Shared channel plus scoped-writer issuance for one call.
///
/// Owned by exactly one dispatch loop. Dropping it closes it.
#[derive(Debug)]
pub struct EventReadWriter {
    ctx: Context,
    sender: mpsc::Sender<Delivery>,
    receiver: mpsc::Receiver<Delivery>,
    closed: bool,
}

impl EventReadWriter {
    /// Create a coordinator whose context is a cancellable child of `parent`.
    ///
    /// `buffer` is the capacity of the shared channel; zero is raised to one.
    #[must_use]
    pub fn new(parent: &Context, buffer: usize) -> Self {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        Self {
            ctx: parent.with_cancel(),
            sender,
            receiver,
            closed: false,
        }
    }

    /// The coordinator's context, cancelled by [`EventReadWriter::close`].
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.ctx
    }

    /// Issue a writer for one handler invocation.
    ///
    /// `parent` is the metadata of the event being handled; events written
    /// without metadata receive `parent.derive()`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn writer(&self, parent: Metadata) -> Writer {
        let (queue, pending) = mpsc::unbounded_channel();
        tokio::spawn(forward(
            self.ctx.clone(),
            self.sender.clone(),
            pending,
            parent,
        ));

        Arc::new(ScopedWriter {
            queue: Mutex::new(Some(queue)),
        })
    }

    /// Receive the next delivery.
    ///
    /// Returns `None` only after [`EventReadWriter::close`] once buffered
    /// deliveries are drained.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Cancel the coordinator context and stop accepting deliveries.
    ///
    /// Idempotent. Pending forwarders observe the cancellation and exit.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.ctx.cancel();
        self.receiver.close();
        tracing::trace!("Event read/writer closed");
    }

    /// Whether [`EventReadWriter::close`] has run.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for EventReadWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Writer handed to one handler invocation.
///
/// Dropping the last reference has the same effect as `done()`.
struct ScopedWriter {
    queue: Mutex<Option<mpsc::UnboundedSender<Event>>>,
}

impl EventWriter for ScopedWriter {
    fn write(&self, event: Event) {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        match queue.as_ref() {
            Some(queue) => {
                if let Err(mpsc::error::SendError(event)) = queue.send(event) {
                    tracing::debug!(
                        event_type = %event.event_type(),
                        "Call already finished, write dropped"
                    );
                    DispatchMetrics::record_dropped_write();
                }
            },
            None => {
                tracing::warn!(
                    event_type = %event.event_type(),
                    "Write after done, event dropped"
                );
                DispatchMetrics::record_dropped_write();
            },
        }
    }

    fn done(&self) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Move one writer's events onto the shared channel, then signal done.
async fn forward(
    ctx: Context,
    shared: mpsc::Sender<Delivery>,
    mut pending: mpsc::UnboundedReceiver<Event>,
    parent: Metadata,
) {
    while let Some(event) = pending.recv().await {
        let event = decorate(event, &parent);
        let event_type = event.event_type().into_owned();
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                ctx.cancel();
                tracing::warn!(
                    event_type = %event_type,
                    "Call cancelled while writing, event dropped"
                );
                DispatchMetrics::record_dropped_write();
                return;
            },
            sent = shared.send(Delivery::Event(event)) => {
                if sent.is_err() {
                    return;
                }
            },
        }
    }

    tokio::select! {
        biased;
        _ = ctx.cancelled() => {},
        _ = shared.send(Delivery::DoneWriting) => {},
    }
}

fn decorate(event: Event, parent: &Metadata) -> Event {
    if event.metadata().is_some() {
        event
    } else {
        event.with_metadata(parent.derive())
    }
}

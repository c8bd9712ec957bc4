//! Canned handlers and probes for dispatch tests.
//!
//! Every handler built here calls `writer.done()` exactly once, except
//! [`panicking_handler`], which never gets the chance.

use mediator_core::context::Context;
use mediator_core::event::Event;
use mediator_core::handler::{Handler, handler, handler_fn};
use mediator_core::metadata::Metadata;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Shared invocation counter.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one call.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Calls so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracks how many invocations run at the same time.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    current: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

impl ConcurrencyProbe {
    /// Create an idle probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an invocation as running until the guard drops.
    #[must_use]
    pub fn enter(&self) -> ProbeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
        ProbeGuard(Arc::clone(&self.current))
    }

    /// Highest number of simultaneous invocations observed.
    #[must_use]
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Leaves the probe on drop.
#[derive(Debug)]
pub struct ProbeGuard(Arc<AtomicUsize>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Records the events a handler saw, in arrival order.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn record(&self, event: Event) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Metadata of every recorded event that carried some.
    #[must_use]
    pub fn metadata(&self) -> Vec<Metadata> {
        self.events()
            .iter()
            .filter_map(|event| event.metadata().cloned())
            .collect()
    }
}

/// Counts calls and finishes without writing.
pub fn counting_handler(event_type: &str, counter: CallCounter) -> Arc<dyn Handler> {
    handler(event_type, move |_ctx, writer, _event| {
        let counter = counter.clone();
        async move {
            counter.increment();
            writer.done();
        }
    })
}

/// Counts calls, then writes a copy of each of `follow_ups`.
pub fn emitting_handler(
    event_type: &str,
    counter: CallCounter,
    follow_ups: Vec<Event>,
) -> Arc<dyn Handler> {
    handler(event_type, move |_ctx, writer, _event| {
        let counter = counter.clone();
        let follow_ups = follow_ups.clone();
        async move {
            counter.increment();
            for event in follow_ups {
                writer.write(event);
            }
            writer.done();
        }
    })
}

/// Records each handled event, then writes one `next` event if given.
pub fn recording_handler(event_type: &str, log: EventLog, next: Option<String>) -> Arc<dyn Handler> {
    handler(event_type, move |_ctx, writer, event| {
        let log = log.clone();
        let next = next.clone();
        async move {
            log.record(event);
            if let Some(next) = next {
                writer.write(Event::named(next));
            }
            writer.done();
        }
    })
}

/// Writes a done event of `done_type` carrying `payload`.
pub fn done_handler(event_type: &str, done_type: &str, payload: &[u8]) -> Arc<dyn Handler> {
    let done_type = done_type.to_owned();
    let payload = payload.to_vec();
    handler(event_type, move |_ctx, writer, _event| {
        let done = Event::done(Event::new(done_type.clone(), payload.clone()));
        async move {
            writer.write(done);
            writer.done();
        }
    })
}

/// Fails every call with `message`.
pub fn failing_handler(event_type: &str, message: &str) -> Arc<dyn Handler> {
    let message = message.to_owned();
    handler_fn(event_type, move |_ctx, _payload| {
        let message = message.clone();
        async move { Err::<(), _>(message) }
    })
}

/// Sleeps for `duration`, ignoring cancellation, then finishes.
pub fn sleeping_handler(event_type: &str, duration: Duration) -> Arc<dyn Handler> {
    handler(event_type, move |_ctx, writer, _event| async move {
        tokio::time::sleep(duration).await;
        writer.done();
    })
}

/// Holds the probe for `hold` on every call.
pub fn probing_handler(event_type: &str, probe: ConcurrencyProbe, hold: Duration) -> Arc<dyn Handler> {
    handler(event_type, move |_ctx, writer, _event| {
        let probe = probe.clone();
        async move {
            let _running = probe.enter();
            tokio::time::sleep(hold).await;
            writer.done();
        }
    })
}

/// Consumes error events and finishes without writing.
pub fn absorbing_handler(event_type: &str, counter: CallCounter) -> Arc<dyn Handler> {
    handler(event_type, move |ctx: Context, writer, event: Event| {
        let counter = counter.clone();
        async move {
            if ctx.err().is_none() && event.err().is_some() {
                counter.increment();
            }
            writer.done();
        }
    })
}

/// Panics on every call.
#[allow(clippy::panic)]
pub fn panicking_handler(event_type: &str) -> Arc<dyn Handler> {
    handler(event_type, |_ctx, _writer, event| async move {
        panic!("handler for {} exploded", event.event_type());
    })
}

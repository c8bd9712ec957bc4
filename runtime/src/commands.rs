//! The handler registry and its entry points.
//!
//! [`Commands`] is an immutable table of handlers keyed by event type. It is
//! built once, validated at construction, and then shared freely: lookups never
//! lock.
//!
//! # Example
//!
//! ```
//! use mediator_core::prelude::*;
//! use mediator_runtime::commands::Commands;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), DispatchError> {
//! let commands = Commands::new(vec![
//!     handler("order.place", |_ctx, writer, event| async move {
//!         writer.write(Event::new("order.placed", event.payload().to_vec()));
//!         writer.done();
//!     }),
//!     handler_fn("order.placed", |_ctx, _payload| async move {
//!         Ok::<(), DispatchError>(())
//!     }),
//! ])?;
//!
//! let result = commands
//!     .handle(&Context::background(), Event::named("order.place"))
//!     .await;
//!
//! assert!(result.err().is_none());
//! assert_eq!(result.event_type(), "DONE#order.place");
//! # Ok(())
//! # }
//! ```

use crate::config::CommandsConfig;
use crate::coordinator::{Delivery, EventReadWriter};
use crate::dispatch::{dispatch, ensure_metadata, spawn_invocation};
use crate::metrics::DispatchMetrics;
use mediator_core::context::{Context, ContextError};
use mediator_core::error::DispatchError;
use mediator_core::event::{CATCH_ALL_ERROR_EVENT_TYPE, Event};
use mediator_core::handler::Handler;
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Validated, read-only handler table.
pub(crate) struct Registry {
    handlers: Vec<Arc<dyn Handler>>,
    index: HashMap<String, Arc<dyn Handler>>,
    concurrency_limit: usize,
}

impl Registry {
    fn build(config: CommandsConfig, handlers: Vec<Arc<dyn Handler>>) -> Result<Self, DispatchError> {
        let mut index = HashMap::with_capacity(handlers.len());
        let mut catch_all = 0usize;

        for (position, handler) in handlers.iter().enumerate() {
            let event_type = handler.event_type();
            if event_type.is_empty() {
                return Err(DispatchError::IncorrectHandler { position });
            }
            if event_type == CATCH_ALL_ERROR_EVENT_TYPE {
                catch_all += 1;
            }

            match index.entry(event_type.to_owned()) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(handler));
                },
                Entry::Occupied(_) if event_type == CATCH_ALL_ERROR_EVENT_TYPE => {},
                Entry::Occupied(_) => {
                    tracing::warn!(
                        event_type,
                        position,
                        "Duplicate handler registration ignored, first registration wins"
                    );
                },
            }
        }

        if catch_all > 1 {
            return Err(DispatchError::MoreThanOneCatchAllHandler);
        }
        if config.concurrency_limit < 1 {
            return Err(DispatchError::LimitLessThanOne);
        }

        Ok(Self {
            handlers,
            index,
            concurrency_limit: config.concurrency_limit,
        })
    }

    pub(crate) fn lookup(&self, event_type: &str) -> Option<&Arc<dyn Handler>> {
        self.index.get(event_type)
    }

    pub(crate) fn catch_all(&self) -> Option<&Arc<dyn Handler>> {
        self.lookup(CATCH_ALL_ERROR_EVENT_TYPE)
    }

    pub(crate) const fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }
}

/// The mediator: routes events to handlers and resolves whole chains.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Commands {
    inner: Arc<Registry>,
}

impl Commands {
    /// Build a registry with the default configuration (concurrency limit 1).
    ///
    /// # Errors
    ///
    /// - [`DispatchError::IncorrectHandler`] if a handler has an empty event type
    /// - [`DispatchError::MoreThanOneCatchAllHandler`] if more than one handler
    ///   is registered for `ERROR#*`
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Result<Self, DispatchError> {
        Self::with_config(CommandsConfig::default(), handlers)
    }

    /// Build a registry with an explicit configuration.
    ///
    /// # Errors
    ///
    /// As [`Commands::new`], plus [`DispatchError::LimitLessThanOne`] if the
    /// concurrency limit is zero.
    pub fn with_config(
        config: CommandsConfig,
        handlers: Vec<Arc<dyn Handler>>,
    ) -> Result<Self, DispatchError> {
        let registry = Registry::build(config, handlers)?;
        tracing::debug!(
            handlers = registry.handlers.len(),
            concurrency_limit = registry.concurrency_limit,
            "Commands created"
        );
        Ok(Self {
            inner: Arc::new(registry),
        })
    }

    /// Dispatch `event` and every event it causes, returning one terminal event.
    ///
    /// On success the result is a done event wrapping either `event` or, if any
    /// handler wrote done events, a JSON document collecting them. On failure it
    /// is an error event; [`Event::err`] is the single check callers need.
    /// Events without metadata receive fresh root metadata.
    #[tracing::instrument(skip(self, ctx, event), fields(event_type = %event.event_type()), name = "commands_handle")]
    pub async fn handle(&self, ctx: &Context, event: Event) -> Event {
        dispatch(&self.inner, ctx, event).await
    }

    /// Dispatch `event` to its handler only if its type is listed in `only`.
    ///
    /// Unlisted events are returned as a done event without invoking anything.
    /// A listed event invokes its handler exactly once; follow-up events are not
    /// routed. The first done or error event the handler writes is returned,
    /// otherwise a done event wrapping `event`.
    #[tracing::instrument(skip(self, ctx, event), fields(event_type = %event.event_type()), name = "commands_handle_only")]
    pub async fn handle_only(&self, ctx: &Context, event: Event, only: &[&str]) -> Event {
        let event_type = event.event_type().into_owned();
        if !only.contains(&event_type.as_str()) {
            tracing::trace!("Event type not selected, passing through");
            return Event::done(event);
        }

        let Some(handler) = self.inner.lookup(&event_type) else {
            let err = DispatchError::handler_not_found(event_type);
            DispatchMetrics::record_error(err.kind());
            return Event::failed(event, err);
        };

        let (event, root) = ensure_metadata(event);
        let mut rw = EventReadWriter::new(ctx, self.inner.concurrency_limit());
        let call_ctx = rw.context().clone();
        spawn_invocation(
            Arc::clone(handler),
            call_ctx.clone(),
            rw.writer(root),
            event.clone(),
            Arc::new(Semaphore::new(1)),
        );

        let mut cancelled = call_ctx.cancelled();
        let result = loop {
            let delivery = tokio::select! {
                biased;
                reason = &mut cancelled => Err(reason),
                delivery = rw.recv() => Ok(delivery),
            };

            match delivery {
                Ok(Some(Delivery::Event(produced))) => {
                    if produced.as_done().is_some() || produced.err().is_some() {
                        break produced;
                    }
                    tracing::trace!(
                        event_type = %produced.event_type(),
                        "Follow-up event ignored"
                    );
                },
                Ok(Some(Delivery::DoneWriting)) => break Event::done(event),
                Ok(None) => {
                    break Event::failed(event, call_ctx.err().unwrap_or(ContextError::Canceled));
                },
                Err(reason) => {
                    DispatchMetrics::record_cancelled();
                    break Event::failed(event, reason);
                },
            }
        };

        rw.close();
        result
    }

    /// Registered event types in registration order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&str> {
        self.inner
            .handlers
            .iter()
            .map(|handler| handler.event_type())
            .collect()
    }

    /// Concurrency limit of each call.
    #[must_use]
    pub fn concurrency_limit(&self) -> usize {
        self.inner.concurrency_limit
    }

    /// Whether a handler is registered for `event_type`.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.inner.lookup(event_type).is_some()
    }
}

impl fmt::Debug for Commands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commands")
            .field("event_types", &self.event_types())
            .field("concurrency_limit", &self.inner.concurrency_limit)
            .finish()
    }
}

/// Serializes as the JSON array of registered event types.
impl Serialize for Commands {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.inner.handlers.len()))?;
        for handler in &self.inner.handlers {
            seq.serialize_element(handler.event_type())?;
        }
        seq.end()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mediator_core::handler::handler;

    fn noop(event_type: &str) -> Arc<dyn Handler> {
        handler(event_type, |_ctx, writer, _event| async move { writer.done() })
    }

    #[test]
    fn empty_type_is_rejected() {
        let err = Commands::new(vec![noop("a"), noop("")]).unwrap_err();
        assert_eq!(err, DispatchError::IncorrectHandler { position: 1 });
    }

    #[test]
    fn second_catch_all_is_rejected() {
        let err = Commands::new(vec![noop("ERROR#*"), noop("a"), noop("ERROR#*")]).unwrap_err();
        assert_eq!(err, DispatchError::MoreThanOneCatchAllHandler);
    }

    #[test]
    fn zero_limit_is_rejected() {
        let err = Commands::with_config(CommandsConfig::new(0), vec![noop("a")]).unwrap_err();
        assert_eq!(err, DispatchError::LimitLessThanOne);
    }

    #[test]
    fn duplicates_keep_first_registration() {
        let first = noop("a");
        let commands = Commands::new(vec![Arc::clone(&first), noop("a"), noop("b")]).unwrap();

        assert!(Arc::ptr_eq(commands.inner.lookup("a").unwrap(), &first));
        assert_eq!(commands.event_types(), vec!["a", "a", "b"]);
        assert!(commands.contains("b"));
        assert!(!commands.contains("c"));
    }

    #[test]
    fn serializes_registered_types() {
        let commands = Commands::new(vec![noop("test_1"), noop("test_2")]).unwrap();
        assert_eq!(
            serde_json::to_string(&commands).unwrap(),
            r#"["test_1","test_2"]"#
        );
    }
}

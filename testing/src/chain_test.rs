//! Ergonomic testing utilities for dispatch chains
//!
//! This module provides a fluent API for testing `Commands` with readable
//! Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ChainTest is the natural name

use mediator_core::context::Context;
use mediator_core::event::Event;
use mediator_core::handler::Handler;
use mediator_runtime::{Commands, CommandsConfig};
use std::sync::Arc;
use std::time::Duration;

/// Type alias for result assertion functions
type ResultAssertion = Box<dyn FnOnce(&Event)>;

/// Fluent API for testing dispatch chains with Given-When-Then syntax
///
/// # Example
///
/// ```
/// use mediator_core::event::Event;
/// use mediator_testing::ChainTest;
/// use mediator_testing::mocks::{CallCounter, counting_handler, emitting_handler};
///
/// # #[tokio::main]
/// # async fn main() {
/// let calls = CallCounter::new();
///
/// ChainTest::new()
///     .given_handler(emitting_handler("test_1", CallCounter::new(), vec![Event::named("test_2")]))
///     .given_handler(counting_handler("test_2", calls.clone()))
///     .when_event(Event::named("test_1"))
///     .then_succeeds()
///     .run()
///     .await;
///
/// assert_eq!(calls.count(), 1);
/// # }
/// ```
pub struct ChainTest {
    handlers: Vec<Arc<dyn Handler>>,
    config: CommandsConfig,
    timeout: Option<Duration>,
    event: Option<Event>,
    only: Option<Vec<String>>,
    assertions: Vec<ResultAssertion>,
}

impl ChainTest {
    /// Create an empty chain test
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            config: CommandsConfig::default(),
            timeout: None,
            event: None,
            only: None,
            assertions: Vec::new(),
        }
    }

    /// Register a handler (Given)
    #[must_use]
    pub fn given_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Set the registry configuration
    #[must_use]
    pub const fn with_config(mut self, config: CommandsConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the call under a context with this timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the event to dispatch (When)
    #[must_use]
    pub fn when_event(mut self, event: Event) -> Self {
        self.event = Some(event);
        self
    }

    /// Dispatch with `handle_only` restricted to `only` instead of `handle`
    #[must_use]
    pub fn only(mut self, only: &[&str]) -> Self {
        self.only = Some(only.iter().map(|s| (*s).to_owned()).collect());
        self
    }

    /// Add an assertion about the terminal event (Then)
    #[must_use]
    pub fn then_result<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&Event) + 'static,
    {
        self.assertions.push(Box::new(assertion));
        self
    }

    /// Assert the call succeeded (Then)
    #[must_use]
    pub fn then_succeeds(self) -> Self {
        self.then_result(assertions::assert_succeeded)
    }

    /// Assert the call failed with exactly `message` (Then)
    #[must_use]
    pub fn then_fails_with(self, message: &str) -> Self {
        let message = message.to_owned();
        self.then_result(move |event| assertions::assert_failed_with(event, &message))
    }

    /// Run the call and execute all assertions, returning the terminal event
    ///
    /// # Panics
    ///
    /// Panics if no event is set, if the handlers fail validation, or if any
    /// assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub async fn run(self) -> Event {
        let event = self.event.expect("Event must be set with when_event()");
        let commands = Commands::with_config(self.config, self.handlers)
            .expect("Handlers must pass validation");

        let root = Context::background();
        let ctx = match self.timeout {
            Some(timeout) => root.with_timeout(timeout),
            None => root,
        };

        let result = match &self.only {
            Some(only) => {
                let only: Vec<&str> = only.iter().map(String::as_str).collect();
                commands.handle_only(&ctx, event, &only).await
            },
            None => commands.handle(&ctx, event).await,
        };

        for assertion in self.assertions {
            assertion(&result);
        }
        result
    }
}

impl Default for ChainTest {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper assertions for terminal events
pub mod assertions {
    use mediator_core::event::Event;

    /// Assert that the event carries no error
    ///
    /// # Panics
    ///
    /// Panics if the event carries an error.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_succeeded(event: &Event) {
        if let Some(err) = event.err() {
            panic!("Expected success, but got error: {err}");
        }
    }

    /// Assert that the event carries an error with exactly `message`
    ///
    /// # Panics
    ///
    /// Panics if the event carries no error or a different one.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_failed_with(event: &Event, message: &str) {
        match event.err() {
            Some(err) => assert_eq!(err.to_string(), message),
            None => panic!(
                "Expected error \"{message}\", but event {} succeeded",
                event.event_type()
            ),
        }
    }

    /// Assert the event type
    ///
    /// # Panics
    ///
    /// Panics if the type differs.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_event_type(event: &Event, expected: &str) {
        assert_eq!(
            event.event_type(),
            expected,
            "Expected event type {expected}, but found {}",
            event.event_type()
        );
    }
}

//! # Mediator Testing
//!
//! Testing utilities and helpers for the mediator dispatch engine.
//!
//! This crate provides:
//! - Canned handlers, call counters and concurrency probes
//! - A fluent Given-When-Then harness for dispatch chains
//! - Property-based testing strategies
//! - Tracing initialisation for test output
//!
//! ## Example
//!
//! ```
//! use mediator_core::event::Event;
//! use mediator_testing::ChainTest;
//! use mediator_testing::mocks::failing_handler;
//!
//! # #[tokio::main]
//! # async fn main() {
//! ChainTest::new()
//!     .given_handler(failing_handler("test_1", "some error"))
//!     .when_event(Event::named("test_1"))
//!     .then_fails_with(
//!         "failed to process event test_1: aggregated error occurred: [\n\tfailed to process event test_1: some error\n]",
//!     )
//!     .run()
//!     .await;
//! # }
//! ```

pub mod chain_test;
pub mod mocks;
pub mod properties;

pub use chain_test::{ChainTest, assertions};

/// Install a `fmt` subscriber honouring `RUST_LOG`, writing through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

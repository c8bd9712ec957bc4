//! # Mediator Runtime
//!
//! The dispatch engine of the mediator.
//!
//! ## Core Components
//!
//! - **Commands**: immutable handler registry; `handle` resolves a whole chain,
//!   `handle_only` invokes one selected handler
//! - **Coordinator**: per-call shared channel and scoped writers
//! - **Dispatch loop**: routes every written event, aggregates errors and results
//! - **Worker**: bounded asynchronous front-end feeding `Commands::handle`
//!
//! ## Call lifecycle
//!
//! ```text
//! caller ──► Commands::handle ──► handler ──write──► coordinator ──► dispatch loop
//!                 ▲                  ▲                                    │
//!                 │                  └──────────── route follow-ups ──────┤
//!                 └───────────────── terminal done / error event ─────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use mediator_core::prelude::*;
//! use mediator_runtime::{Commands, CommandsConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), DispatchError> {
//! let commands = Commands::with_config(
//!     CommandsConfig::default().with_concurrency_limit(8),
//!     vec![
//!         handler("user.create", |_ctx, writer, event| async move {
//!             writer.write(Event::done(Event::new("user.created", event.payload().to_vec())));
//!             writer.done();
//!         }),
//!     ],
//! )?;
//!
//! let ctx = Context::background().with_timeout(Duration::from_secs(1));
//! let result = commands
//!     .handle(&ctx, Event::new("user.create", br#"{"name":"ann"}"#.to_vec()))
//!     .await;
//!
//! assert!(result.err().is_none());
//! let document: serde_json::Value = result.unwrap_done().payload_json().unwrap_or_default();
//! assert_eq!(document["payload"][0]["eventType"], "user.created");
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod coordinator;
mod dispatch;
pub mod metrics;
pub mod worker;

pub use commands::Commands;
pub use config::{CommandsConfig, WorkerConfig};
pub use coordinator::{Delivery, EventReadWriter};
pub use worker::Worker;

//! Causality metadata carried by every event inside a dispatch chain.
//!
//! Each event that enters the pipeline is stamped with three identifiers:
//!
//! - `id`: unique per event instance
//! - `correlation_id`: the id of the root event of the chain, inherited unchanged
//! - `causation_id`: the id of the event whose handler produced this one
//!
//! Together they form a tree rooted at the initial call:
//!
//! ```text
//! root  { id: A, correlation: A, causation: A }
//!  ├── { id: B, correlation: A, causation: A }
//!  │    └── { id: D, correlation: A, causation: B }
//!  └── { id: C, correlation: A, causation: A }
//! ```
//!
//! # Example
//!
//! ```
//! use mediator_core::metadata::Metadata;
//!
//! let root = Metadata::root("a");
//! let child = root.next("b");
//!
//! assert_eq!(child.correlation_id(), "a");
//! assert_eq!(child.causation_id(), "a");
//! assert_eq!(child.next("c").causation_id(), "b");
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Causality identifiers of one event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    id: String,
    correlation_id: String,
    causation_id: String,
}

impl Metadata {
    /// Create metadata from explicit identifiers.
    ///
    /// Used by protocol adapters that received the triple from a transport.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        correlation_id: impl Into<String>,
        causation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            correlation_id: correlation_id.into(),
            causation_id: causation_id.into(),
        }
    }

    /// Metadata for the root of a chain: all three identifiers equal `id`.
    #[must_use]
    pub fn root(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            correlation_id: id.clone(),
            causation_id: id.clone(),
            id,
        }
    }

    /// Root metadata with a freshly generated v4 UUID.
    #[must_use]
    pub fn generate() -> Self {
        Self::root(new_id())
    }

    /// Metadata for an event caused by the event carrying `self`.
    ///
    /// The correlation id is inherited, the causation id becomes `self.id`.
    #[must_use]
    pub fn next(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            correlation_id: self.correlation_id.clone(),
            causation_id: self.id.clone(),
        }
    }

    /// Same as [`Metadata::next`] with a freshly generated id.
    #[must_use]
    pub fn derive(&self) -> Self {
        self.next(new_id())
    }

    /// Unique event id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Id of the root event that started the chain.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Id of the event that caused this one.
    #[must_use]
    pub fn causation_id(&self) -> &str {
        &self.causation_id
    }

    /// Whether this metadata describes a chain root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.id == self.correlation_id && self.id == self.causation_id
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

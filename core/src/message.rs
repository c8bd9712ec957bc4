//! JSON rendering of events, used for materialized call results.

use crate::event::Event;
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event as a JSON document.
///
/// Result fragments of a call are rendered this way so consumers can rebuild
/// the causal tree from `id` / `causationId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    /// Event type tag
    pub event_type: String,
    /// Payload, embedded as JSON when it parses and as a string otherwise
    pub payload: Value,
    /// Event id
    pub id: String,
    /// Root event id
    pub correlation_id: String,
    /// Parent event id
    pub causation_id: String,
}

impl EventMessage {
    /// Render `event` with the given metadata.
    #[must_use]
    pub fn new(event: &Event, metadata: &Metadata) -> Self {
        Self::with_payload(event.event_type().into_owned(), payload_value(event.payload()), metadata)
    }

    /// Build a message from its parts.
    #[must_use]
    pub fn with_payload(event_type: impl Into<String>, payload: Value, metadata: &Metadata) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
            id: metadata.id().to_owned(),
            correlation_id: metadata.correlation_id().to_owned(),
            causation_id: metadata.causation_id().to_owned(),
        }
    }

    /// The metadata triple of this message.
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        Metadata::new(&self.id, &self.correlation_id, &self.causation_id)
    }
}

/// Decode payload bytes as JSON, falling back to a lossy UTF-8 string.
#[must_use]
pub fn payload_value(payload: &[u8]) -> Value {
    if payload.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

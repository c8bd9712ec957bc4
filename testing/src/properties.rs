//! Property-based testing utilities using proptest.

use crate::mocks::{EventLog, recording_handler};
use mediator_core::handler::Handler;
use proptest::prelude::*;
use std::sync::Arc;

/// Strategy for valid, non-empty event types.
pub fn event_type() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_.]{0,15}"
}

/// Strategy for payload bytes.
pub fn payload() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 0..64)
}

/// Strategy for linear chain depths.
pub fn chain_depth() -> impl Strategy<Value = usize> {
    1usize..=8
}

/// Type of step `index` in a linear chain.
#[must_use]
pub fn step_type(index: usize) -> String {
    format!("step_{index}")
}

/// A linear chain `step_0 -> step_1 -> ... -> step_{depth - 1}`.
///
/// Every step records the event it handled in `log`; the last one writes nothing.
#[must_use]
pub fn linear_chain(depth: usize, log: &EventLog) -> Vec<Arc<dyn Handler>> {
    (0..depth)
        .map(|index| {
            let next = (index + 1 < depth).then(|| step_type(index + 1));
            recording_handler(&step_type(index), log.clone(), next)
        })
        .collect()
}

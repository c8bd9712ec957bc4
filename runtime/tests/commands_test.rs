//! Integration tests for `Commands::handle` and `Commands::handle_only`
//!
//! Covers routing, chaining, error aggregation, error handlers, cancellation,
//! result materialization and causality metadata.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use mediator_core::prelude::*;
use mediator_runtime::{Commands, CommandsConfig};
use mediator_testing::mocks::{
    CallCounter, ConcurrencyProbe, EventLog, absorbing_handler, counting_handler, done_handler,
    emitting_handler, failing_handler, panicking_handler, probing_handler, recording_handler,
    sleeping_handler,
};
use mediator_testing::{ChainTest, assertions, init_tracing};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

// ============================================================================
// Fixtures
// ============================================================================

fn ok_fn(event_type: &str, counter: CallCounter) -> Arc<dyn Handler> {
    handler_fn(event_type, move |_ctx, _payload| {
        let counter = counter.clone();
        async move {
            counter.increment();
            Ok::<(), DispatchError>(())
        }
    })
}

/// `test_1` writes three `test_2` and one `test_3`; `test_2` writes one `test_3`.
fn fan_out(b: CallCounter, c: CallCounter) -> Vec<Arc<dyn Handler>> {
    vec![
        emitting_handler(
            "test_1",
            CallCounter::new(),
            vec![
                Event::named("test_2"),
                Event::named("test_2"),
                Event::named("test_2"),
                Event::named("test_3"),
            ],
        ),
        emitting_handler("test_2", b, vec![Event::named("test_3")]),
        ok_fn("test_3", c),
    ]
}

fn failing_fan_out(b: CallCounter, c: CallCounter) -> Vec<Arc<dyn Handler>> {
    vec![
        handler("test_1", |_ctx, writer, event| async move {
            writer.write(Event::named("test_2"));
            writer.write(Event::named("test_2"));
            writer.write(Event::named("test_2"));
            writer.write(Event::failed(event, "some error"));
            writer.write(Event::named("test_3"));
            writer.done();
        }),
        emitting_handler("test_2", b, vec![Event::named("test_3")]),
        ok_fn("test_3", c),
    ]
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn handles_registered_event() {
    init_tracing();
    let calls = CallCounter::new();

    let result = ChainTest::new()
        .given_handler(ok_fn("test_1", calls.clone()))
        .when_event(Event::named("test_1"))
        .then_succeeds()
        .run()
        .await;

    assertions::assert_event_type(&result, "DONE#test_1");
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn unknown_initial_type_fails_without_invoking_anything() {
    let calls = CallCounter::new();

    let result = ChainTest::new()
        .given_handler(ok_fn("test_1", calls.clone()))
        .when_event(Event::named("test_2"))
        .then_fails_with("failed to process event test_2: handler not found for event test_2")
        .run()
        .await;

    let failed = result.as_failed().unwrap();
    assert_eq!(
        failed.cause().downcast_ref::<DispatchError>(),
        Some(&DispatchError::handler_not_found("test_2"))
    );
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn nil_event_is_rejected() {
    let result = ChainTest::new()
        .given_handler(ok_fn("test_1", CallCounter::new()))
        .when_event(Event::named(""))
        .run()
        .await;

    let failed = result.as_failed().unwrap();
    assert_eq!(
        failed.cause().downcast_ref::<DispatchError>(),
        Some(&DispatchError::NilEvent)
    );
}

#[tokio::test]
async fn failing_handler_fn_is_aggregated() {
    ChainTest::new()
        .given_handler(failing_handler("test_1", "some error"))
        .when_event(Event::named("test_1"))
        .then_fails_with(
            "failed to process event test_1: aggregated error occurred: [\n\tfailed to process event test_1: some error\n]",
        )
        .run()
        .await;
}

#[tokio::test]
async fn anyhow_errors_keep_their_message() {
    let commands = Commands::new(vec![handler_fn("test_1", |_ctx, payload: Vec<u8>| async move {
        let amount: u32 = serde_json::from_slice(&payload)?;
        anyhow::ensure!(amount > 0, "amount must be positive");
        Ok::<(), anyhow::Error>(())
    })])
    .unwrap();

    let result = commands
        .handle_only(&Context::background(), Event::json("test_1", &0).unwrap(), &["test_1"])
        .await;

    assert_eq!(
        result.err().unwrap().to_string(),
        "failed to process event test_1: amount must be positive"
    );
}

#[tokio::test]
async fn rejects_second_catch_all_handler() {
    let err = assert_err!(Commands::new(vec![
        absorbing_handler(CATCH_ALL_ERROR_EVENT_TYPE, CallCounter::new()),
        ok_fn("test_1", CallCounter::new()),
        absorbing_handler(CATCH_ALL_ERROR_EVENT_TYPE, CallCounter::new()),
    ]));

    assert_eq!(err, DispatchError::MoreThanOneCatchAllHandler);
    assert_eq!(err.to_string(), "you can use only one handler for \"ERROR#*\" event");
}

// ============================================================================
// Chaining
// ============================================================================

#[tokio::test]
async fn follow_up_events_are_chained() {
    let second = CallCounter::new();

    ChainTest::new()
        .given_handler(emitting_handler(
            "test_1",
            CallCounter::new(),
            vec![Event::named("test_2")],
        ))
        .given_handler(counting_handler("test_2", second.clone()))
        .when_event(Event::named("test_1"))
        .then_succeeds()
        .run()
        .await;

    assert_eq!(second.count(), 1);
}

#[tokio::test]
async fn dead_end_in_chain_is_aggregated() {
    ChainTest::new()
        .given_handler(emitting_handler(
            "test_1",
            CallCounter::new(),
            vec![Event::named("test_2")],
        ))
        .given_handler(emitting_handler(
            "test_2",
            CallCounter::new(),
            vec![Event::named("test_3")],
        ))
        .when_event(Event::named("test_1"))
        .then_fails_with(
            "failed to process event test_1: aggregated error occurred: [\n\thandler not found for event test_3\n]",
        )
        .run()
        .await;
}

#[tokio::test]
async fn fan_out_invokes_every_event() {
    let b = CallCounter::new();
    let c = CallCounter::new();

    let mut test = ChainTest::new().with_config(CommandsConfig::new(20));
    for handler in fan_out(b.clone(), c.clone()) {
        test = test.given_handler(handler);
    }
    test.when_event(Event::named("test_1"))
        .then_succeeds()
        .run()
        .await;

    assert_eq!(b.count(), 3);
    assert_eq!(c.count(), 4);
}

#[tokio::test]
async fn invocations_respect_concurrency_limit() {
    let probe = ConcurrencyProbe::new();
    let commands = Commands::with_config(
        CommandsConfig::new(2),
        vec![
            emitting_handler(
                "test_1",
                CallCounter::new(),
                (0..6).map(|_| Event::named("test_2")).collect(),
            ),
            probing_handler("test_2", probe.clone(), Duration::from_millis(30)),
        ],
    )
    .unwrap();

    let result = commands
        .handle(&Context::background(), Event::named("test_1"))
        .await;

    assertions::assert_succeeded(&result);
    assert!(probe.max() >= 1);
    assert!(probe.max() <= 2, "observed {} concurrent invocations", probe.max());
}

#[tokio::test]
async fn panicking_handler_is_reported() {
    let result = ChainTest::new()
        .given_handler(panicking_handler("test_1"))
        .when_event(Event::named("test_1"))
        .run()
        .await;

    let aggregated = result.as_aggregated().unwrap();
    assert_eq!(aggregated.len(), 1);
    assert_eq!(
        aggregated.errors()[0].to_string(),
        "failed to process event test_1: handler for event test_1 panicked"
    );
}

// ============================================================================
// Error handlers
// ============================================================================

#[tokio::test]
async fn specific_error_handler_absorbs_failure() {
    let b = CallCounter::new();
    let c = CallCounter::new();
    let absorbed = CallCounter::new();

    let mut handlers = failing_fan_out(b.clone(), c.clone());
    handlers.push(absorbing_handler(&error_event_type("test_1"), absorbed.clone()));
    let commands = Commands::with_config(CommandsConfig::new(20), handlers).unwrap();

    let result = commands
        .handle(&Context::background(), Event::named("test_1"))
        .await;

    assertions::assert_succeeded(&result);
    assert_eq!(b.count(), 3);
    assert_eq!(c.count(), 4);
    assert_eq!(absorbed.count(), 1);
}

#[tokio::test]
async fn catch_all_handler_absorbs_failure() {
    let b = CallCounter::new();
    let c = CallCounter::new();
    let absorbed = CallCounter::new();

    let mut handlers = failing_fan_out(b.clone(), c.clone());
    handlers.push(absorbing_handler(CATCH_ALL_ERROR_EVENT_TYPE, absorbed.clone()));
    let commands = Commands::with_config(CommandsConfig::new(20), handlers).unwrap();

    let result = commands
        .handle(&Context::background(), Event::named("test_1"))
        .await;

    assertions::assert_succeeded(&result);
    assert_eq!(b.count(), 3);
    assert_eq!(c.count(), 4);
    assert_eq!(absorbed.count(), 1);
}

#[tokio::test]
async fn unhandled_failure_is_aggregated() {
    let commands = Commands::with_config(
        CommandsConfig::new(20),
        failing_fan_out(CallCounter::new(), CallCounter::new()),
    )
    .unwrap();

    let result = commands
        .handle(&Context::background(), Event::named("test_1"))
        .await;

    assert_eq!(
        result.err().unwrap().to_string(),
        "failed to process event test_1: aggregated error occurred: [\n\tfailed to process event test_1: some error\n]"
    );
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn deadline_returns_before_slow_handler_finishes() {
    let started = Instant::now();
    let slow = sleeping_handler("test_3", Duration::from_millis(400));

    let mut test = ChainTest::new()
        .with_config(CommandsConfig::new(20))
        .with_timeout(Duration::from_millis(200));
    for handler in fan_out(CallCounter::new(), CallCounter::new()).into_iter().take(2) {
        test = test.given_handler(handler);
    }
    test.given_handler(slow)
        .when_event(Event::named("test_1"))
        .then_fails_with("failed to process event test_1: context deadline exceeded")
        .run()
        .await;

    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn cancelled_context_fails_the_call() {
    let commands = Commands::new(vec![counting_handler("test_1", CallCounter::new())]).unwrap();
    let ctx = Context::background().with_cancel();
    ctx.cancel();

    let result = commands.handle(&ctx, Event::named("test_1")).await;

    let failed = result.as_failed().unwrap();
    assert_eq!(
        failed.cause().downcast_ref::<ContextError>(),
        Some(&ContextError::Canceled)
    );
}

// ============================================================================
// handle_only
// ============================================================================

#[tokio::test]
async fn handle_only_runs_selected_handler() {
    let calls = CallCounter::new();

    ChainTest::new()
        .given_handler(ok_fn("test_1", calls.clone()))
        .when_event(Event::named("test_1"))
        .only(&["test_1"])
        .then_succeeds()
        .run()
        .await;

    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn handle_only_returns_handler_failure() {
    ChainTest::new()
        .given_handler(failing_handler("test_1", "some error"))
        .when_event(Event::named("test_1"))
        .only(&["test_1"])
        .then_fails_with("failed to process event test_1: some error")
        .run()
        .await;
}

#[tokio::test]
async fn handle_only_passes_unselected_events_through() {
    let calls = CallCounter::new();

    let result = ChainTest::new()
        .given_handler(ok_fn("test_1", calls.clone()))
        .when_event(Event::named("test_1"))
        .only(&["test_2"])
        .then_succeeds()
        .run()
        .await;

    assertions::assert_event_type(&result, "DONE#test_1");
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn handle_only_reports_missing_handler() {
    ChainTest::new()
        .given_handler(ok_fn("test_1", CallCounter::new()))
        .when_event(Event::named("test_2"))
        .only(&["test_2"])
        .then_fails_with("failed to process event test_2: handler not found for event test_2")
        .run()
        .await;
}

#[tokio::test]
async fn handle_only_does_not_chain() {
    let second = CallCounter::new();

    ChainTest::new()
        .given_handler(emitting_handler(
            "test_1",
            CallCounter::new(),
            vec![Event::named("test_2")],
        ))
        .given_handler(counting_handler("test_2", second.clone()))
        .when_event(Event::named("test_1"))
        .only(&["test_1"])
        .then_succeeds()
        .run()
        .await;

    assert_eq!(second.count(), 0);
}

#[tokio::test]
async fn handle_only_honours_deadline() {
    let slow = handler("test_1", |_ctx, writer, _event| async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        writer.write(Event::named("test_2"));
        writer.done();
    });

    ChainTest::new()
        .given_handler(slow)
        .with_timeout(Duration::from_millis(200))
        .when_event(Event::named("test_1"))
        .only(&["test_1"])
        .then_fails_with("failed to process event test_1: context deadline exceeded")
        .run()
        .await;
}

// ============================================================================
// Results and metadata
// ============================================================================

#[tokio::test]
async fn done_events_are_materialized_into_result() {
    let commands = Commands::with_config(
        CommandsConfig::new(20),
        vec![
            emitting_handler(
                "test_1",
                CallCounter::new(),
                vec![
                    Event::named("test_2"),
                    Event::named("test_2"),
                    Event::named("test_2"),
                ],
            ),
            emitting_handler("test_2", CallCounter::new(), vec![Event::named("test_3")]),
            handler("test_3", |_ctx, writer, event| async move {
                writer.write(Event::done(event));
                writer.write(Event::done(Event::new("done_testing", b"good".to_vec())));
                writer.done();
            }),
        ],
    )
    .unwrap();

    let result = commands
        .handle(&Context::background(), Event::named("test_1"))
        .await;
    assertions::assert_succeeded(&result);
    assertions::assert_event_type(&result, "DONE#test_1");

    let document: EventMessage = assert_ok!(result.payload_json());
    assert_eq!(document.event_type, "test_1");
    let messages: Vec<EventMessage> = assert_ok!(serde_json::from_value(document.payload));
    assert_eq!(messages.len(), 6);

    let test_3_ids: HashSet<&str> = messages
        .iter()
        .filter(|m| m.event_type == "test_3")
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(test_3_ids.len(), 3);

    let done: Vec<&EventMessage> = messages
        .iter()
        .filter(|m| m.event_type == "done_testing")
        .collect();
    assert_eq!(done.len(), 3);
    for message in done {
        assert_eq!(message.payload, serde_json::json!("good"));
        assert!(
            test_3_ids.contains(message.causation_id.as_str()),
            "unexpected causation id {}",
            message.causation_id
        );
        assert_eq!(message.correlation_id, document.correlation_id);
    }
}

#[tokio::test]
async fn single_done_event_becomes_the_result() {
    let result = ChainTest::new()
        .given_handler(emitting_handler(
            "order.place",
            CallCounter::new(),
            vec![Event::named("order.confirm")],
        ))
        .given_handler(done_handler("order.confirm", "order.placed", br#"{"id":7}"#))
        .when_event(Event::named("order.place"))
        .then_succeeds()
        .run()
        .await;

    let document: EventMessage = assert_ok!(result.payload_json());
    assert_eq!(document.event_type, "order.place");
    assert_eq!(
        document.payload,
        serde_json::json!([{
            "eventType": "order.placed",
            "payload": { "id": 7 },
            "id": document.payload[0]["id"],
            "correlationId": document.correlation_id,
            "causationId": document.payload[0]["causationId"],
        }])
    );
}

#[tokio::test]
async fn metadata_flows_through_the_chain() {
    let first = EventLog::new();
    let second = EventLog::new();
    let third = EventLog::new();
    let root = Metadata::new("root-id", "correlation-id", "causation-id");

    let commands = Commands::with_config(
        CommandsConfig::new(20),
        vec![
            recording_handler("test_1", first.clone(), Some("test_2".to_owned())),
            recording_handler("test_2", second.clone(), Some("test_3".to_owned())),
            recording_handler("test_3", third.clone(), None),
        ],
    )
    .unwrap();

    let result = commands
        .handle(
            &Context::background(),
            Event::named("test_1").with_metadata(root.clone()),
        )
        .await;
    assertions::assert_succeeded(&result);

    assert_eq!(first.metadata(), vec![root.clone()]);

    let second_md = second.metadata();
    assert_eq!(second_md.len(), 1);
    assert_ne!(second_md[0].id(), "root-id");
    assert_eq!(second_md[0].correlation_id(), "correlation-id");
    assert_eq!(second_md[0].causation_id(), "root-id");

    let third_md = third.metadata();
    assert_eq!(third_md.len(), 1);
    assert_eq!(third_md[0].correlation_id(), "correlation-id");
    assert_eq!(third_md[0].causation_id(), second_md[0].id());

    let unwrapped = result.unwrap_done();
    assert_eq!(unwrapped.metadata(), Some(&root));
}

#[tokio::test]
async fn events_without_metadata_get_root_metadata() {
    let log = EventLog::new();
    let commands = Commands::new(vec![recording_handler("test_1", log.clone(), None)]).unwrap();

    let result = commands
        .handle(&Context::background(), Event::named("test_1"))
        .await;

    let recorded = log.metadata();
    assert_eq!(recorded.len(), 1);
    assert!(recorded[0].is_root());

    let outer = result.metadata().unwrap();
    assert_eq!(outer.causation_id(), recorded[0].id());
    assert_eq!(outer.correlation_id(), recorded[0].id());
}

#[tokio::test]
async fn done_twice_is_harmless() {
    let second = CallCounter::new();
    let commands = Commands::new(vec![
        handler("test_1", |_ctx, writer, _event| async move {
            writer.write(Event::named("test_2"));
            writer.done();
            writer.done();
            writer.write(Event::named("test_2"));
        }),
        counting_handler("test_2", second.clone()),
    ])
    .unwrap();

    let result = commands
        .handle(&Context::background(), Event::named("test_1"))
        .await;

    assertions::assert_succeeded(&result);
    assert_eq!(second.count(), 1);
}

//! Property tests: causality metadata along generated handler chains

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use mediator_core::prelude::*;
use mediator_runtime::Commands;
use mediator_testing::mocks::EventLog;
use mediator_testing::properties::{chain_depth, event_type, linear_chain, payload, step_type};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_step_is_caused_by_the_previous_one(depth in chain_depth()) {
        let log = EventLog::new();
        let commands = Commands::new(linear_chain(depth, &log)).unwrap();

        let result = runtime().block_on(async {
            commands
                .handle(&Context::background(), Event::named(step_type(0)))
                .await
        });
        prop_assert!(result.err().is_none());

        let recorded = log.events();
        prop_assert_eq!(recorded.len(), depth);

        let root = recorded[0].metadata().unwrap().clone();
        prop_assert!(root.is_root());

        let mut parent = root.clone();
        for (index, event) in recorded.iter().enumerate().skip(1) {
            let metadata = event.metadata().unwrap();
            prop_assert_eq!(event.event_type(), step_type(index));
            prop_assert_eq!(metadata.correlation_id(), root.id());
            prop_assert_eq!(metadata.causation_id(), parent.id());
            prop_assert_ne!(metadata.id(), parent.id());
            parent = metadata.clone();
        }

        let unwrapped = result.unwrap_done();
        prop_assert_eq!(unwrapped.metadata(), Some(&root));
    }

    #[test]
    fn unknown_types_fail_with_their_name(event_type in event_type(), payload in payload()) {
        let commands = Commands::new(Vec::new()).unwrap();

        let result = runtime().block_on(async {
            commands
                .handle(&Context::background(), Event::new(event_type.clone(), payload.clone()))
                .await
        });

        let failed = result.as_failed().unwrap();
        prop_assert_eq!(
            failed.cause().downcast_ref::<DispatchError>(),
            Some(&DispatchError::handler_not_found(event_type.clone()))
        );
        prop_assert_eq!(failed.event().payload(), payload.as_slice());
        prop_assert!(result.is_error_of(&event_type));
    }
}

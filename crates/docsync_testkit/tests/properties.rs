//! Property tests for the session lifecycle and configuration.

use docsync_replication::{keys, ObservedState, ReplicationConfig, ReplicationProperties};
use docsync_testkit::prelude::*;
use proptest::prelude::*;

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn lifecycle_invariants(ops in lifecycle_sequence_strategy(1, 40)) {
        let mut h = TestHarness::new();
        let mut session = h.pull_session();
        let changes = session.subscribe();
        let mut effective_starts = 0u64;

        for op in ops {
            let was_started = session.started();
            match op {
                LifecycleOp::Start => {
                    session.start();
                    if !was_started {
                        effective_starts += 1;
                    }
                    prop_assert!(session.started());
                }
                LifecycleOp::Stop => {
                    session.stop();
                    prop_assert!(!session.started());
                }
                LifecycleOp::Restart => {
                    session.restart();
                    if was_started {
                        effective_starts += 1;
                    }
                    prop_assert_eq!(session.started(), was_started);
                }
                LifecycleOp::SetContinuous(continuous) => {
                    let differs = session.continuous() != continuous;
                    session.set_continuous(continuous);
                    if differs && was_started {
                        effective_starts += 1;
                    }
                    prop_assert_eq!(session.started(), was_started);
                }
                LifecycleOp::SetFilter(filter) => {
                    let differs = session.filter() != filter.as_deref();
                    prop_assert!(session.set_filter(filter).is_ok());
                    if differs && was_started {
                        effective_starts += 1;
                    }
                    prop_assert_eq!(session.started(), was_started);
                }
                LifecycleOp::Report(reading) => {
                    if let Some(engine) = h.engine() {
                        engine.report(reading);
                    }
                }
                LifecycleOp::Pump => {
                    let before = session.state().clone();
                    h.pump(&mut session);
                    if !was_started {
                        prop_assert_eq!(session.state(), &before);
                        prop_assert!(!session.started());
                    }
                }
            }
            prop_assert_eq!(session.started(), h.db.is_active(session.id()));
        }

        prop_assert_eq!(h.db.dispatcher().stats().create_requests, effective_starts);

        // Every notification reflects a real change, and the last one is current.
        let mut last = ObservedState::default();
        for change in changes.try_iter() {
            prop_assert_ne!(&change.state, &last);
            last = change.state;
        }
        prop_assert_eq!(&last, session.state());

        session.stop();
        h.pump(&mut session);
        prop_assert_eq!(h.live_engines(), 0);
    }

    #[test]
    fn stopped_session_ignores_every_later_report(
        readings in prop::collection::vec(engine_reading_strategy(), 1..20)
    ) {
        let mut h = TestHarness::deferred_stop();
        let mut session = scenarios::started_pull(&mut h);
        let frozen = session.state().clone();
        session.stop();

        let engine = h.engine().expect("engine was built");
        for reading in readings {
            engine.report(reading);
            h.pump(&mut session);
            prop_assert!(!session.started());
            prop_assert_eq!(session.state(), &frozen);
        }
    }

    #[test]
    fn channels_round_trip(channels in channel_list_strategy()) {
        let h = TestHarness::new();
        let mut session = h.pull_session();
        session.set_channels(channels.clone()).unwrap();

        prop_assert_eq!(session.channels(), channels.clone());
        prop_assert_eq!(session.filter(), Some("by-channel"));
        prop_assert_eq!(
            session.filter_params().and_then(|p| p.get("channels")),
            Some(&serde_json::Value::String(channels.join(",")))
        );

        let mut push = h.push_session();
        prop_assert!(push.set_channels(channels).is_err());
        prop_assert!(push.channels().is_empty());
    }

    #[test]
    fn extras_win_over_generated_keys(
        key in prop::sample::select(vec![keys::CONTINUOUS, keys::CREATE_TARGET, keys::FILTER, "heartbeat"]),
        value in any::<i64>()
    ) {
        let config = ReplicationConfig::pull(TEST_REMOTE)
            .with_filter("app/mine", None)
            .with_extra(key, serde_json::json!(value));
        let props = ReplicationProperties::build(&config, TEST_DATABASE);
        prop_assert_eq!(props.get(key), Some(&serde_json::json!(value)));
    }
}

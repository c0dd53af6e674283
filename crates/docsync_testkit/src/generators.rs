//! Property-based test generators using proptest.

use docsync_replication::{EngineReading, ReplicationError};
use proptest::prelude::*;

/// Strategy for engine readings with consistent counters.
pub fn engine_reading_strategy() -> impl Strategy<Value = EngineReading> {
    (
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        0u64..100,
        0u64..100,
        prop::option::weighted(0.2, 400u16..600),
    )
        .prop_map(|(running, online, active, a, b, code)| EngineReading {
            running,
            online,
            active,
            error: code.map(|c| ReplicationError::runtime(Some(c), "injected")),
            processed: a.min(b),
            total: a.max(b),
        })
}

/// Strategy for channel names (no commas, never empty).
pub fn channel_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for non-empty channel lists.
pub fn channel_list_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(channel_name_strategy(), 1..6)
}

/// One step applied to a session under test.
#[derive(Debug, Clone)]
pub enum LifecycleOp {
    /// `start()`
    Start,
    /// `stop()`
    Stop,
    /// `restart()`
    Restart,
    /// `set_continuous()`
    SetContinuous(bool),
    /// `set_filter()`
    SetFilter(Option<String>),
    /// The newest engine reports a reading.
    Report(EngineReading),
    /// Run background tasks and deliver snapshots.
    Pump,
}

/// Strategy for lifecycle steps.
pub fn lifecycle_op_strategy() -> impl Strategy<Value = LifecycleOp> {
    prop_oneof![
        3 => Just(LifecycleOp::Start),
        2 => Just(LifecycleOp::Stop),
        1 => Just(LifecycleOp::Restart),
        1 => any::<bool>().prop_map(LifecycleOp::SetContinuous),
        1 => prop::option::of(Just("app/mine".to_string())).prop_map(LifecycleOp::SetFilter),
        3 => engine_reading_strategy().prop_map(LifecycleOp::Report),
        4 => Just(LifecycleOp::Pump),
    ]
}

/// Strategy for sequences of lifecycle steps.
pub fn lifecycle_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<LifecycleOp>> {
    prop::collection::vec(lifecycle_op_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

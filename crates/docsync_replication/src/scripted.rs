//! A scripted engine for tests and simulations.
//!
//! [`ScriptedEngineFactory`] hands out [`ScriptedEngine`]s whose readings
//! are driven from outside through an [`EngineController`].

use crate::engine::{EngineFactory, ProgressListener, ReplicationEngine};
use crate::error::{ReplicationError, ReplicationResult};
use crate::properties::ReplicationProperties;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// What a scripted engine reports when read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineReading {
    /// Engine running.
    pub running: bool,
    /// Remote reachable.
    pub online: bool,
    /// Transferring documents.
    pub active: bool,
    /// Current error.
    pub error: Option<ReplicationError>,
    /// Changes processed.
    pub processed: u64,
    /// Changes known.
    pub total: u64,
}

impl EngineReading {
    /// Running without a connection.
    pub fn offline() -> Self {
        Self {
            running: true,
            ..Self::default()
        }
    }

    /// Connected with nothing to do.
    pub fn idle(processed: u64, total: u64) -> Self {
        Self {
            running: true,
            online: true,
            processed,
            total,
            ..Self::default()
        }
    }

    /// Connected and transferring.
    pub fn active(processed: u64, total: u64) -> Self {
        Self {
            running: true,
            online: true,
            active: true,
            processed,
            total,
            ..Self::default()
        }
    }

    /// Not running.
    pub fn stopped() -> Self {
        Self::default()
    }

    /// Attaches an error.
    pub fn with_error(mut self, error: ReplicationError) -> Self {
        self.error = Some(error);
        self
    }
}

#[derive(Debug, Default)]
struct ScriptedState {
    reading: EngineReading,
    listener: Option<ProgressListener>,
    properties: ReplicationProperties,
    starts: u32,
    stops: u32,
    deferred_stop: bool,
}

/// Drives one scripted engine from outside the background context.
#[derive(Debug, Clone)]
pub struct EngineController {
    state: Arc<Mutex<ScriptedState>>,
}

impl EngineController {
    /// Replaces the reading without announcing it.
    pub fn set(&self, reading: EngineReading) {
        self.state.lock().reading = reading;
    }

    /// Replaces the reading and announces progress.
    ///
    /// Returns false if the engine has been released.
    pub fn report(&self, reading: EngineReading) -> bool {
        let listener = {
            let mut state = self.state.lock();
            state.reading = reading;
            state.listener.clone()
        };
        listener.map(|l| l.notify()).unwrap_or(false)
    }

    /// Announces progress without changing the reading.
    pub fn notify(&self) -> bool {
        let listener = self.state.lock().listener.clone();
        listener.map(|l| l.notify()).unwrap_or(false)
    }

    /// Current reading.
    pub fn reading(&self) -> EngineReading {
        self.state.lock().reading.clone()
    }

    /// Properties the engine was built from.
    pub fn properties(&self) -> ReplicationProperties {
        self.state.lock().properties.clone()
    }

    /// Number of `start()` calls.
    pub fn start_count(&self) -> u32 {
        self.state.lock().starts
    }

    /// Number of `stop()` calls.
    pub fn stop_count(&self) -> u32 {
        self.state.lock().stops
    }

    /// Returns true while the background context listens to the engine.
    pub fn is_subscribed(&self) -> bool {
        self.state
            .lock()
            .listener
            .as_ref()
            .map(ProgressListener::is_subscribed)
            .unwrap_or(false)
    }
}

/// An engine whose readings come from an [`EngineController`].
///
/// `start()` puts it in the offline state. `stop()` stops it at once,
/// unless the factory was built with deferred stops, in which case it
/// keeps running until the controller reports otherwise.
#[derive(Debug)]
pub struct ScriptedEngine {
    state: Arc<Mutex<ScriptedState>>,
}

impl ReplicationEngine for ScriptedEngine {
    fn is_running(&self) -> bool {
        self.state.lock().reading.running
    }

    fn is_online(&self) -> bool {
        self.state.lock().reading.online
    }

    fn is_active(&self) -> bool {
        self.state.lock().reading.active
    }

    fn error(&self) -> Option<ReplicationError> {
        self.state.lock().reading.error.clone()
    }

    fn changes_processed(&self) -> u64 {
        self.state.lock().reading.processed
    }

    fn changes_total(&self) -> u64 {
        self.state.lock().reading.total
    }

    fn start(&mut self) {
        let mut state = self.state.lock();
        state.starts += 1;
        state.reading.running = true;
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.stops += 1;
        if !state.deferred_stop {
            state.reading.running = false;
            state.reading.online = false;
            state.reading.active = false;
        }
    }

    fn subscribe(&mut self, listener: ProgressListener) {
        self.state.lock().listener = Some(listener);
    }
}

/// Builds [`ScriptedEngine`]s and keeps a controller for each.
#[derive(Debug, Default)]
pub struct ScriptedEngineFactory {
    controllers: Mutex<Vec<EngineController>>,
    failures: Mutex<VecDeque<ReplicationError>>,
    deferred_stop: bool,
}

impl ScriptedEngineFactory {
    /// Creates a factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engines from this factory keep running after `stop()`.
    pub fn with_deferred_stop(mut self) -> Self {
        self.deferred_stop = true;
        self
    }

    /// Makes the next `create` call fail with `error`.
    pub fn fail_next(&self, error: ReplicationError) {
        self.failures.lock().push_back(error);
    }

    /// Number of engines built.
    pub fn created_count(&self) -> usize {
        self.controllers.lock().len()
    }

    /// Controller of the `index`-th engine built.
    pub fn controller(&self, index: usize) -> Option<EngineController> {
        self.controllers.lock().get(index).cloned()
    }

    /// Controller of the most recently built engine.
    pub fn last(&self) -> Option<EngineController> {
        self.controllers.lock().last().cloned()
    }
}

impl EngineFactory for ScriptedEngineFactory {
    fn create(
        &self,
        properties: &ReplicationProperties,
    ) -> ReplicationResult<Box<dyn ReplicationEngine>> {
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        let state = Arc::new(Mutex::new(ScriptedState {
            properties: properties.clone(),
            deferred_stop: self.deferred_stop,
            ..ScriptedState::default()
        }));
        self.controllers.lock().push(EngineController {
            state: Arc::clone(&state),
        });
        Ok(Box::new(ScriptedEngine { state }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;

    fn properties() -> ReplicationProperties {
        ReplicationProperties::build(&ReplicationConfig::pull("https://sync.example.com/db"), "local")
    }

    #[test]
    fn engine_follows_controller() {
        let factory = ScriptedEngineFactory::new();
        let mut engine = factory.create(&properties()).unwrap();
        let controller = factory.last().unwrap();

        assert!(!engine.is_running());
        engine.start();
        assert!(engine.is_running());
        assert!(!engine.is_online());

        controller.set(EngineReading::active(2, 10));
        assert!(engine.is_active());
        assert_eq!(engine.changes_processed(), 2);
        assert_eq!(engine.changes_total(), 10);

        engine.stop();
        assert!(!engine.is_running());
        assert_eq!(controller.stop_count(), 1);
        assert_eq!(controller.properties(), properties());
    }

    #[test]
    fn deferred_stop_keeps_running() {
        let factory = ScriptedEngineFactory::new().with_deferred_stop();
        let mut engine = factory.create(&properties()).unwrap();
        engine.start();
        engine.stop();
        assert!(engine.is_running());
    }

    #[test]
    fn queued_failures() {
        let factory = ScriptedEngineFactory::new();
        factory.fail_next(ReplicationError::construction(404, "missing"));

        assert!(factory.create(&properties()).is_err());
        assert!(factory.create(&properties()).is_ok());
        assert_eq!(factory.created_count(), 1);
    }

    #[test]
    fn report_without_subscription() {
        let factory = ScriptedEngineFactory::new();
        let _engine = factory.create(&properties()).unwrap();
        let controller = factory.controller(0).unwrap();

        assert!(!controller.report(EngineReading::offline()));
        assert!(!controller.is_subscribed());
        assert_eq!(controller.reading(), EngineReading::offline());
    }
}

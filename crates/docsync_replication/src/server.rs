//! The background "server" context.
//!
//! One worker executes [`ServerTask`]s strictly in submission order. It is
//! the only place engines are built, read, stopped and released: the
//! registry of live engines is owned by [`ServerContext`], which never
//! leaves the worker. Status flows back to sessions as immutable
//! [`StatusSnapshot`] values over each session's own channel.

use crate::config::DispatcherConfig;
use crate::engine::{EngineFactory, ReplicationEngine, Subscription};
use crate::error::ReplicationError;
use crate::properties::ReplicationProperties;
use crate::status::{ReplicationStatus, StatusSnapshot};
use crate::types::{Generation, ReplicationId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

/// Identifies one engine run of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EngineKey {
    /// Session the engine belongs to.
    pub id: ReplicationId,
    /// `start()` that created it.
    pub generation: Generation,
}

impl EngineKey {
    /// Creates a key.
    pub(crate) fn new(id: ReplicationId, generation: Generation) -> Self {
        Self { id, generation }
    }
}

/// Work item executed on the background context.
#[derive(Debug)]
pub(crate) enum ServerTask {
    /// Build, subscribe to and start an engine for a session.
    CreateEngine {
        /// Engine run to create.
        key: EngineKey,
        /// Configuration snapshot.
        properties: ReplicationProperties,
        /// Where status snapshots go.
        status: Sender<StatusSnapshot>,
    },
    /// Stop every engine of a session.
    StopEngine {
        /// Session to stop.
        id: ReplicationId,
    },
    /// An engine reported progress.
    ProgressChanged {
        /// Engine that changed.
        key: EngineKey,
    },
    /// Stop all engines and end the worker.
    Shutdown,
}

/// Counters describing dispatcher activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Create-engine tasks submitted.
    pub create_requests: u64,
    /// Stop-engine tasks submitted.
    pub stop_requests: u64,
    /// Progress events handled.
    pub progress_events: u64,
    /// Engines constructed successfully.
    pub engines_created: u64,
    /// Engine constructions that failed.
    pub construction_failures: u64,
    /// Engines currently held by the background context.
    pub live_engines: usize,
}

#[derive(Debug, Default)]
struct Counters {
    create_requests: AtomicU64,
    stop_requests: AtomicU64,
    progress_events: AtomicU64,
    engines_created: AtomicU64,
    construction_failures: AtomicU64,
    live_engines: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            create_requests: self.create_requests.load(Ordering::Relaxed),
            stop_requests: self.stop_requests.load(Ordering::Relaxed),
            progress_events: self.progress_events.load(Ordering::Relaxed),
            engines_created: self.engines_created.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            live_engines: self.live_engines.load(Ordering::Relaxed),
        }
    }
}

/// A live engine and everything tied to its lifetime.
struct EngineSlot {
    engine: Box<dyn ReplicationEngine>,
    subscription: Subscription,
    status: Sender<StatusSnapshot>,
    sequence: u64,
}

/// State owned exclusively by the background worker.
pub(crate) struct ServerContext {
    factory: Arc<dyn EngineFactory>,
    engines: HashMap<EngineKey, EngineSlot>,
    tasks: Sender<ServerTask>,
    counters: Arc<Counters>,
    /// Set once `Shutdown` ran; later tasks are rejected.
    closed: bool,
}

impl ServerContext {
    fn new(
        factory: Arc<dyn EngineFactory>,
        tasks: Sender<ServerTask>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            factory,
            engines: HashMap::new(),
            tasks,
            counters,
            closed: false,
        }
    }

    /// Executes one task. Returns false once the worker should exit.
    fn handle(&mut self, task: ServerTask) -> bool {
        if self.closed {
            self.reject(task);
            return false;
        }
        match task {
            ServerTask::CreateEngine {
                key,
                properties,
                status,
            } => self.create_engine(key, &properties, status),
            ServerTask::StopEngine { id } => self.stop_engines(id),
            ServerTask::ProgressChanged { key } => {
                self.counters.progress_events.fetch_add(1, Ordering::Relaxed);
                self.report(key);
            }
            ServerTask::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn create_engine(
        &mut self,
        key: EngineKey,
        properties: &ReplicationProperties,
        status: Sender<StatusSnapshot>,
    ) {
        let mut engine = match self.factory.create(properties) {
            Ok(engine) => engine,
            Err(err) => {
                warn!(replication = %key.id, generation = %key.generation, error = %err, "engine construction failed");
                self.counters
                    .construction_failures
                    .fetch_add(1, Ordering::Relaxed);
                let err = match err {
                    ReplicationError::EngineConstruction { .. } => err,
                    other => ReplicationError::construction(500, other.to_string()),
                };
                if status
                    .send(StatusSnapshot::construction_failed(key.generation, err))
                    .is_err()
                {
                    debug!(replication = %key.id, "session dropped before construction failure arrived");
                }
                return;
            }
        };

        let (listener, subscription) = Subscription::new(key, self.tasks.clone());
        engine.subscribe(listener);
        engine.start();
        debug!(replication = %key.id, generation = %key.generation, "engine started");

        self.counters.engines_created.fetch_add(1, Ordering::Relaxed);
        self.engines.insert(
            key,
            EngineSlot {
                engine,
                subscription,
                status,
                sequence: 0,
            },
        );
        self.publish_live_count();
        self.report(key);
    }

    fn stop_engines(&mut self, id: ReplicationId) {
        let keys: Vec<EngineKey> = self.engines.keys().filter(|k| k.id == id).copied().collect();
        if keys.is_empty() {
            debug!(replication = %id, "stop requested with no live engine");
        }
        for key in keys {
            if let Some(slot) = self.engines.get_mut(&key) {
                slot.engine.stop();
            }
            self.report(key);
        }
    }

    /// Reads the engine, sends a snapshot, and releases the engine if it stopped.
    fn report(&mut self, key: EngineKey) {
        let Some(slot) = self.engines.get_mut(&key) else {
            debug!(replication = %key.id, generation = %key.generation, "progress for released engine");
            return;
        };

        let engine = &slot.engine;
        let status =
            ReplicationStatus::from_engine(engine.is_running(), engine.is_online(), engine.is_active());
        slot.sequence += 1;
        let snapshot = StatusSnapshot {
            generation: key.generation,
            sequence: slot.sequence,
            status,
            error: engine.error(),
            completed: engine.changes_processed(),
            total: engine.changes_total(),
        };

        let delivered = slot.status.send(snapshot).is_ok();
        if !delivered {
            debug!(replication = %key.id, "session gone; stopping its engine");
            slot.engine.stop();
        }
        if status == ReplicationStatus::Stopped || !delivered {
            self.release(key);
        }
    }

    fn release(&mut self, key: EngineKey) {
        if let Some(slot) = self.engines.remove(&key) {
            slot.subscription.cancel();
            drop(slot.engine);
            debug!(replication = %key.id, generation = %key.generation, "engine released");
        }
        self.publish_live_count();
    }

    fn shutdown(&mut self) {
        self.closed = true;
        let keys: Vec<EngineKey> = self.engines.keys().copied().collect();
        for key in keys {
            if let Some(slot) = self.engines.get_mut(&key) {
                slot.engine.stop();
            }
            self.report(key);
            // Still held: the engine stops asynchronously. Release it anyway
            // and tell the session it will not hear from it again.
            if self.engines.contains_key(&key) {
                self.send_terminal(key, ReplicationError::ServerUnavailable);
                self.release(key);
            }
        }
        info!("background context shut down");
    }

    /// Sends a `Stopped` snapshot for a live engine without reading its status.
    fn send_terminal(&mut self, key: EngineKey, error: ReplicationError) {
        let Some(slot) = self.engines.get_mut(&key) else {
            return;
        };
        slot.sequence += 1;
        let snapshot = StatusSnapshot {
            generation: key.generation,
            sequence: slot.sequence,
            status: ReplicationStatus::Stopped,
            error: Some(error),
            completed: slot.engine.changes_processed(),
            total: slot.engine.changes_total(),
        };
        if slot.status.send(snapshot).is_err() {
            debug!(replication = %key.id, "session gone before shutdown notice arrived");
        }
    }

    /// Answers a task that arrived after shutdown.
    fn reject(&mut self, task: ServerTask) {
        match task {
            ServerTask::CreateEngine { key, status, .. } => {
                debug!(replication = %key.id, generation = %key.generation, "create rejected: background context is shut down");
                self.counters
                    .construction_failures
                    .fetch_add(1, Ordering::Relaxed);
                let _ = status.send(StatusSnapshot::construction_failed(
                    key.generation,
                    ReplicationError::ServerUnavailable,
                ));
            }
            other => debug!(task = ?other, "task ignored: background context is shut down"),
        }
    }

    fn publish_live_count(&self) {
        self.counters
            .live_engines
            .store(self.engines.len(), Ordering::Relaxed);
    }
}

struct DispatcherInner {
    tasks: Sender<ServerTask>,
    counters: Arc<Counters>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DispatcherInner {
    fn drop(&mut self) {
        let _ = self.tasks.send(ServerTask::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("background worker panicked");
            }
        }
    }
}

/// Serial executor for the background context.
///
/// Cloning is cheap; all clones feed the same queue.
#[derive(Clone)]
pub struct BackgroundDispatcher {
    inner: Arc<DispatcherInner>,
}

impl BackgroundDispatcher {
    /// Starts a dedicated worker thread executing tasks in submission order.
    pub fn spawn(factory: Arc<dyn EngineFactory>, config: DispatcherConfig) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let counters = Arc::new(Counters::default());
        let worker_tasks = tx.clone();
        let worker_counters = Arc::clone(&counters);

        // The context is built on the worker: engines never exist anywhere else.
        let worker = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || {
                let mut context = ServerContext::new(factory, worker_tasks, worker_counters);
                for task in rx.iter() {
                    if !context.handle(task) {
                        break;
                    }
                }
                // Whatever was queued behind the shutdown still gets an answer.
                for task in rx.try_iter() {
                    context.handle(task);
                }
            })?;
        info!(thread = %config.thread_name, "background context started");

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                tasks: tx,
                counters,
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    /// Creates a dispatcher whose tasks run only when [`ManualServer`] is pumped.
    pub fn manual(factory: Arc<dyn EngineFactory>) -> (Self, ManualServer) {
        let (tx, rx) = mpsc::channel();
        let counters = Arc::new(Counters::default());
        let context = ServerContext::new(factory, tx.clone(), Arc::clone(&counters));
        let dispatcher = Self {
            inner: Arc::new(DispatcherInner {
                tasks: tx,
                counters,
                worker: Mutex::new(None),
            }),
        };
        (dispatcher, ManualServer { tasks: rx, context })
    }

    /// Returns activity counters.
    pub fn stats(&self) -> DispatcherStats {
        self.inner.counters.snapshot()
    }

    /// Stops every live engine and ends the worker.
    pub fn shutdown(&self) {
        let _ = self.inner.tasks.send(ServerTask::Shutdown);
        if let Some(worker) = self.inner.worker.lock().take() {
            if worker.join().is_err() {
                warn!("background worker panicked");
            }
        }
    }

    /// Queues creation of an engine. Returns false if the worker is gone.
    pub(crate) fn submit_create(
        &self,
        key: EngineKey,
        properties: ReplicationProperties,
        status: Sender<StatusSnapshot>,
    ) -> bool {
        self.inner
            .counters
            .create_requests
            .fetch_add(1, Ordering::Relaxed);
        self.submit(ServerTask::CreateEngine {
            key,
            properties,
            status,
        })
    }

    /// Queues a stop for every engine of `id`.
    pub(crate) fn submit_stop(&self, id: ReplicationId) -> bool {
        self.inner
            .counters
            .stop_requests
            .fetch_add(1, Ordering::Relaxed);
        self.submit(ServerTask::StopEngine { id })
    }

    fn submit(&self, task: ServerTask) -> bool {
        match self.inner.tasks.send(task) {
            Ok(()) => true,
            Err(err) => {
                warn!(task = ?err.0, "background context is gone; task dropped");
                false
            }
        }
    }
}

impl std::fmt::Debug for BackgroundDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundDispatcher")
            .field("stats", &self.stats())
            .finish()
    }
}

/// The background context of a [`BackgroundDispatcher::manual`] dispatcher.
///
/// Whoever owns this value is the background context: tasks run on the
/// thread that calls [`ManualServer::run_pending`].
pub struct ManualServer {
    tasks: Receiver<ServerTask>,
    context: ServerContext,
}

impl ManualServer {
    /// Runs queued tasks until the queue is empty. Returns how many ran.
    ///
    /// Tasks queued while running (progress events raised by engines)
    /// run in the same call.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.tasks.try_recv() {
            self.context.handle(task);
            ran += 1;
        }
        ran
    }

    /// Runs at most one queued task. Returns false if none was queued.
    pub fn run_one(&mut self) -> bool {
        match self.tasks.try_recv() {
            Ok(task) => {
                self.context.handle(task);
                true
            }
            Err(_) => false,
        }
    }

    /// Number of engines currently held.
    pub fn live_engines(&self) -> usize {
        self.context.engines.len()
    }

    /// True once a shutdown task has run. Later tasks are rejected, not run.
    pub fn is_closed(&self) -> bool {
        self.context.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;
    use crate::scripted::{EngineReading, ScriptedEngineFactory};

    fn properties() -> ReplicationProperties {
        ReplicationProperties::build(&ReplicationConfig::pull("https://sync.example.com/db"), "local")
    }

    #[test]
    fn create_reports_initial_status() {
        let factory = Arc::new(ScriptedEngineFactory::new());
        let (dispatcher, mut server) = BackgroundDispatcher::manual(factory.clone());
        let (tx, rx) = mpsc::channel();
        let key = EngineKey::new(ReplicationId::new(), Generation(1));

        assert!(dispatcher.submit_create(key, properties(), tx));
        assert_eq!(server.run_pending(), 1);

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.status, ReplicationStatus::Offline);
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(server.live_engines(), 1);
        assert_eq!(factory.created_count(), 1);
        assert_eq!(factory.last().unwrap().start_count(), 1);
        assert!(factory.last().unwrap().is_subscribed());
    }

    #[test]
    fn stopped_engine_is_released_and_unsubscribed() {
        let factory = Arc::new(ScriptedEngineFactory::new());
        let (dispatcher, mut server) = BackgroundDispatcher::manual(factory.clone());
        let (tx, rx) = mpsc::channel();
        let key = EngineKey::new(ReplicationId::new(), Generation(1));

        dispatcher.submit_create(key, properties(), tx);
        server.run_pending();
        let engine = factory.last().unwrap();

        assert!(engine.report(EngineReading::stopped()));
        server.run_pending();

        let statuses: Vec<_> = rx.try_iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![ReplicationStatus::Offline, ReplicationStatus::Stopped]
        );
        assert_eq!(server.live_engines(), 0);
        assert!(!engine.is_subscribed());
        assert!(!engine.notify());
        assert_eq!(dispatcher.stats().live_engines, 0);
    }

    #[test]
    fn construction_failure_reported_as_stopped() {
        let factory = Arc::new(ScriptedEngineFactory::new());
        factory.fail_next(ReplicationError::construction(401, "unauthorized"));
        let (dispatcher, mut server) = BackgroundDispatcher::manual(factory.clone());
        let (tx, rx) = mpsc::channel();
        let key = EngineKey::new(ReplicationId::new(), Generation(3));

        dispatcher.submit_create(key, properties(), tx);
        server.run_pending();

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.status, ReplicationStatus::Stopped);
        assert_eq!(snapshot.generation, Generation(3));
        assert_eq!(
            snapshot.error,
            Some(ReplicationError::construction(401, "unauthorized"))
        );
        assert_eq!(server.live_engines(), 0);
        assert_eq!(dispatcher.stats().construction_failures, 1);
    }

    #[test]
    fn stop_without_engine_is_noop() {
        let factory = Arc::new(ScriptedEngineFactory::new());
        let (dispatcher, mut server) = BackgroundDispatcher::manual(factory);

        assert!(dispatcher.submit_stop(ReplicationId::new()));
        assert_eq!(server.run_pending(), 1);
        assert_eq!(dispatcher.stats().stop_requests, 1);
    }

    #[test]
    fn dropped_session_stops_engine() {
        let factory = Arc::new(ScriptedEngineFactory::new());
        let (dispatcher, mut server) = BackgroundDispatcher::manual(factory.clone());
        let (tx, rx) = mpsc::channel();
        let key = EngineKey::new(ReplicationId::new(), Generation(1));

        dispatcher.submit_create(key, properties(), tx);
        drop(rx);
        server.run_pending();

        assert_eq!(server.live_engines(), 0);
        assert_eq!(factory.last().unwrap().stop_count(), 1);
    }

    #[test]
    fn shutdown_releases_everything() {
        let factory = Arc::new(ScriptedEngineFactory::new().with_deferred_stop());
        let (dispatcher, mut server) = BackgroundDispatcher::manual(factory.clone());
        let (tx, rx) = mpsc::channel();

        dispatcher.submit_create(EngineKey::new(ReplicationId::new(), Generation(1)), properties(), tx.clone());
        dispatcher.submit_create(EngineKey::new(ReplicationId::new(), Generation(1)), properties(), tx);
        server.run_pending();
        assert_eq!(server.live_engines(), 2);
        let _ = rx.try_iter().count();

        dispatcher.shutdown();
        server.run_pending();
        assert_eq!(server.live_engines(), 0);
        assert!(server.is_closed());

        // Engines ignoring stop() still end with a terminal snapshot.
        let terminal: Vec<_> = rx
            .try_iter()
            .filter(|s| s.status == ReplicationStatus::Stopped)
            .collect();
        assert_eq!(terminal.len(), 2);
        for snapshot in terminal {
            assert_eq!(snapshot.error, Some(ReplicationError::ServerUnavailable));
            assert_eq!(snapshot.sequence, 3);
        }
    }

    #[test]
    fn tasks_after_shutdown_are_rejected() {
        let factory = Arc::new(ScriptedEngineFactory::new());
        let (dispatcher, mut server) = BackgroundDispatcher::manual(factory.clone());
        let (tx, rx) = mpsc::channel();
        let key = EngineKey::new(ReplicationId::new(), Generation(2));

        dispatcher.shutdown();
        assert!(dispatcher.submit_create(key, properties(), tx));
        assert!(dispatcher.submit_stop(key.id));
        assert_eq!(server.run_pending(), 3);

        let snapshot = rx.try_recv().unwrap();
        assert_eq!(snapshot.status, ReplicationStatus::Stopped);
        assert_eq!(snapshot.generation, Generation(2));
        assert_eq!(snapshot.error, Some(ReplicationError::ServerUnavailable));
        assert_eq!(factory.created_count(), 0);
        assert_eq!(server.live_engines(), 0);
    }

    #[test]
    fn threaded_worker_runs_tasks() {
        let factory = Arc::new(ScriptedEngineFactory::new());
        let dispatcher =
            BackgroundDispatcher::spawn(factory.clone(), DispatcherConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel();
        let key = EngineKey::new(ReplicationId::new(), Generation(1));

        dispatcher.submit_create(key, properties(), tx);
        let first = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(first.status, ReplicationStatus::Offline);

        dispatcher.submit_stop(key.id);
        let last = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(last.status, ReplicationStatus::Stopped);

        dispatcher.shutdown();
        assert_eq!(dispatcher.stats().live_engines, 0);
    }
}

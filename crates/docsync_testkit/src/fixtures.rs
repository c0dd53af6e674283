//! Test fixtures and session helpers.
//!
//! The harness runs the background context on the test thread: tasks
//! execute only when [`TestHarness::pump`] (or `run_background`) is
//! called, which makes interleavings reproducible.

use docsync_replication::{
    BackgroundDispatcher, Database, EngineController, ManualServer, ReplicationSession,
    ScriptedEngineFactory,
};
use std::sync::Arc;

/// Remote URL used by harness sessions.
pub const TEST_REMOTE: &str = "https://sync.test.invalid/db";

/// Local database name used by the harness.
pub const TEST_DATABASE: &str = "testdb";

/// A database, its background context and a scripted engine factory.
pub struct TestHarness {
    /// Factory building the engines.
    pub factory: Arc<ScriptedEngineFactory>,
    /// The background context.
    pub server: ManualServer,
    /// The database sessions replicate.
    pub db: Arc<Database>,
}

impl TestHarness {
    /// Creates a harness whose engines stop as soon as asked.
    pub fn new() -> Self {
        Self::with_factory(ScriptedEngineFactory::new())
    }

    /// Creates a harness whose engines keep running after `stop()`.
    pub fn deferred_stop() -> Self {
        Self::with_factory(ScriptedEngineFactory::new().with_deferred_stop())
    }

    /// Creates a harness around `factory`.
    pub fn with_factory(factory: ScriptedEngineFactory) -> Self {
        let factory = Arc::new(factory);
        let (dispatcher, server) = BackgroundDispatcher::manual(factory.clone());
        let db = Database::new(TEST_DATABASE, dispatcher);
        Self {
            factory,
            server,
            db,
        }
    }

    /// A stopped pull session against [`TEST_REMOTE`].
    pub fn pull_session(&self) -> ReplicationSession {
        self.db.replicate_pull(TEST_REMOTE)
    }

    /// A stopped push session against [`TEST_REMOTE`].
    pub fn push_session(&self) -> ReplicationSession {
        self.db.replicate_push(TEST_REMOTE)
    }

    /// Runs queued background tasks. Returns how many ran.
    pub fn run_background(&mut self) -> usize {
        self.server.run_pending()
    }

    /// Runs background tasks, then delivers the session's snapshots.
    pub fn pump(&mut self, session: &mut ReplicationSession) -> usize {
        self.server.run_pending();
        session.process_status_updates()
    }

    /// Controller of the most recently built engine.
    pub fn engine(&self) -> Option<EngineController> {
        self.factory.last()
    }

    /// Number of engines currently held by the background context.
    pub fn live_engines(&self) -> usize {
        self.server.live_engines()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a fresh harness.
pub fn with_harness<F, R>(f: F) -> R
where
    F: FnOnce(&mut TestHarness) -> R,
{
    let mut harness = TestHarness::new();
    f(&mut harness)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A pull session that has been started and reached its first status.
    pub fn started_pull(harness: &mut TestHarness) -> ReplicationSession {
        let mut session = harness.pull_session();
        session.start();
        harness.pump(&mut session);
        session
    }
}

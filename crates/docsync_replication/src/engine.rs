//! Engine traits and progress subscriptions.
//!
//! Engines are built by an [`EngineFactory`] on the background context and
//! stay there for their whole life. [`ReplicationEngine`] deliberately has
//! no `Send` bound: once created, a handle cannot leave the worker that
//! owns it.

use crate::error::{ReplicationError, ReplicationResult};
use crate::properties::ReplicationProperties;
use crate::server::{EngineKey, ServerTask};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// A running replication engine, as seen from the background context.
pub trait ReplicationEngine {
    /// Returns true while the engine is running.
    fn is_running(&self) -> bool;

    /// Returns true while the remote endpoint is reachable.
    fn is_online(&self) -> bool;

    /// Returns true while documents are being transferred.
    fn is_active(&self) -> bool;

    /// Returns the most recent error, if any.
    fn error(&self) -> Option<ReplicationError>;

    /// Number of changes processed.
    fn changes_processed(&self) -> u64;

    /// Number of changes known.
    fn changes_total(&self) -> u64;

    /// Starts the engine.
    fn start(&mut self);

    /// Stops the engine. Must be idempotent.
    fn stop(&mut self);

    /// Registers the listener to call whenever progress changes.
    fn subscribe(&mut self, listener: ProgressListener);
}

/// Builds engines from property snapshots.
///
/// Only ever invoked on the background context.
pub trait EngineFactory: Send + Sync {
    /// Creates an engine.
    ///
    /// Failures should be [`crate::ReplicationError::EngineConstruction`]
    /// carrying the engine status code.
    fn create(&self, properties: &ReplicationProperties)
        -> ReplicationResult<Box<dyn ReplicationEngine>>;
}

/// Handle an engine uses to announce progress.
///
/// Calling [`ProgressListener::notify`] queues a progress task on the
/// background context; it may be called from any thread. After the
/// subscription is cancelled notifications are discarded.
#[derive(Debug, Clone)]
pub struct ProgressListener {
    key: EngineKey,
    active: Arc<AtomicBool>,
    tasks: Sender<ServerTask>,
}

impl ProgressListener {
    /// Announces a progress change. Returns false if nobody is listening.
    pub fn notify(&self) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        self.tasks
            .send(ServerTask::ProgressChanged { key: self.key })
            .is_ok()
    }

    /// Returns true until the subscription is cancelled.
    pub fn is_subscribed(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// The background context's side of a progress subscription.
#[derive(Debug)]
pub(crate) struct Subscription {
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Creates a listener/subscription pair for one engine.
    pub(crate) fn new(key: EngineKey, tasks: Sender<ServerTask>) -> (ProgressListener, Self) {
        let active = Arc::new(AtomicBool::new(true));
        let listener = ProgressListener {
            key,
            active: Arc::clone(&active),
            tasks,
        };
        (listener, Self { active })
    }

    /// Stops delivery of further notifications.
    pub(crate) fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }
}

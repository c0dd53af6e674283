//! The database handle sessions replicate.

use crate::config::ReplicationConfig;
use crate::credentials::{CredentialStore, MemoryCredentialStore};
use crate::server::BackgroundDispatcher;
use crate::session::ReplicationSession;
use crate::types::ReplicationId;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// A local database as seen by its replication sessions.
///
/// Holds the open flag, the set of running sessions, the background
/// dispatcher engines run on, and the credential store.
pub struct Database {
    name: String,
    open: RwLock<bool>,
    active: RwLock<HashSet<ReplicationId>>,
    dispatcher: BackgroundDispatcher,
    credentials: Arc<dyn CredentialStore>,
}

impl Database {
    /// Creates an open database handle with an in-memory credential store.
    pub fn new(name: impl Into<String>, dispatcher: BackgroundDispatcher) -> Arc<Self> {
        Self::with_credentials(name, dispatcher, Arc::new(MemoryCredentialStore::new()))
    }

    /// Creates an open database handle with the given credential store.
    pub fn with_credentials(
        name: impl Into<String>,
        dispatcher: BackgroundDispatcher,
        credentials: Arc<dyn CredentialStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            open: RwLock::new(true),
            active: RwLock::new(HashSet::new()),
            dispatcher,
            credentials,
        })
    }

    /// Database name; used as the local side of replications.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true until [`Database::close`] is called.
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// Marks the database closed. Later `start()` calls do nothing.
    pub fn close(&self) {
        *self.open.write() = false;
        info!(database = %self.name, "database closed");
    }

    /// Creates a pull session from `remote`.
    pub fn replicate_pull(self: &Arc<Self>, remote: impl Into<String>) -> ReplicationSession {
        ReplicationSession::new(Arc::clone(self), ReplicationConfig::pull(remote))
    }

    /// Creates a push session to `remote`.
    pub fn replicate_push(self: &Arc<Self>, remote: impl Into<String>) -> ReplicationSession {
        ReplicationSession::new(Arc::clone(self), ReplicationConfig::push(remote))
    }

    /// Returns true if the session is in the active set.
    pub fn is_active(&self, id: ReplicationId) -> bool {
        self.active.read().contains(&id)
    }

    /// IDs of all sessions in the active set.
    pub fn active_replications(&self) -> Vec<ReplicationId> {
        let mut ids: Vec<_> = self.active.read().iter().copied().collect();
        ids.sort();
        ids
    }

    /// The dispatcher engines run on.
    pub fn dispatcher(&self) -> &BackgroundDispatcher {
        &self.dispatcher
    }

    /// The credential store.
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub(crate) fn add_replication(&self, id: ReplicationId) {
        self.active.write().insert(id);
    }

    pub(crate) fn forget_replication(&self, id: ReplicationId) {
        self.active.write().remove(&id);
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("active", &self.active.read().len())
            .finish()
    }
}

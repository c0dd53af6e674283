//! The replication session facade.
//!
//! A [`ReplicationSession`] lives on the caller's context. Configuration is
//! mutated here freely; `start()` freezes it into a
//! [`ReplicationProperties`] snapshot for the background context. Status
//! comes back as [`StatusSnapshot`] values queued on the session's own
//! channel and is applied only by [`ReplicationSession::process_status_updates`]
//! (or the `wait_*` variants), so observed state is written in exactly one
//! place.

use crate::config::{Direction, ReplicationConfig, CHANNEL_FILTER};
use crate::credentials::Credential;
use crate::database::Database;
use crate::error::{ReplicationError, ReplicationResult};
use crate::properties::ReplicationProperties;
use crate::server::EngineKey;
use crate::status::{ObservedState, ReplicationChange, ReplicationStatus, StatusSnapshot};
use crate::types::{Generation, ReplicationId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Control and status facade for one replication.
pub struct ReplicationSession {
    id: ReplicationId,
    database: Arc<Database>,
    config: ReplicationConfig,
    /// Desired state.
    started: bool,
    generation: Generation,
    last_sequence: u64,
    /// Observed state; written only by `update_status`.
    state: ObservedState,
    status_tx: Sender<StatusSnapshot>,
    status_rx: Receiver<StatusSnapshot>,
    observers: Vec<Sender<ReplicationChange>>,
}

impl ReplicationSession {
    /// Creates a stopped session.
    pub fn new(database: Arc<Database>, config: ReplicationConfig) -> Self {
        let (status_tx, status_rx) = mpsc::channel();
        Self {
            id: ReplicationId::new(),
            database,
            config,
            started: false,
            generation: Generation::default(),
            last_sequence: 0,
            state: ObservedState::default(),
            status_tx,
            status_rx,
            observers: Vec::new(),
        }
    }

    /// Creates a stopped session after validating `config`.
    pub fn from_config(database: Arc<Database>, config: ReplicationConfig) -> ReplicationResult<Self> {
        config.validate()?;
        Ok(Self::new(database, config))
    }

    // ---- identity -------------------------------------------------------

    /// Session ID.
    pub fn id(&self) -> ReplicationId {
        self.id
    }

    /// The local database.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Current configuration.
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Replication direction.
    pub fn direction(&self) -> Direction {
        self.config.direction
    }

    /// Returns true for pull sessions.
    pub fn is_pull(&self) -> bool {
        self.config.direction.is_pull()
    }

    /// Remote endpoint URL.
    pub fn remote(&self) -> &str {
        &self.config.remote
    }

    // ---- configuration --------------------------------------------------

    /// Continuous mode.
    pub fn continuous(&self) -> bool {
        self.config.continuous
    }

    /// Sets continuous mode; restarts a started session.
    pub fn set_continuous(&mut self, continuous: bool) {
        if self.config.continuous != continuous {
            self.config.continuous = continuous;
            self.restart();
        }
    }

    /// Create-target flag.
    pub fn create_target(&self) -> bool {
        self.config.create_target
    }

    /// Sets the create-target flag; takes effect at the next start.
    pub fn set_create_target(&mut self, create_target: bool) {
        self.config.create_target = create_target;
    }

    /// Filter name.
    pub fn filter(&self) -> Option<&str> {
        self.config.filter.as_deref()
    }

    /// Sets the filter name; restarts a started session.
    ///
    /// The channel filter is rejected on push sessions.
    pub fn set_filter(&mut self, filter: Option<String>) -> ReplicationResult<()> {
        if filter.as_deref() == Some(CHANNEL_FILTER) && !self.config.direction.is_pull() {
            return Err(ReplicationError::configuration(
                "channel filter requires a pull replication",
            ));
        }
        if self.config.filter != filter {
            self.config.filter = filter;
            self.restart();
        }
        Ok(())
    }

    /// Filter parameters.
    pub fn filter_params(&self) -> Option<&BTreeMap<String, Value>> {
        self.config.filter_params.as_ref()
    }

    /// Sets the filter parameters; restarts a started session.
    pub fn set_filter_params(&mut self, params: Option<BTreeMap<String, Value>>) {
        if self.config.filter_params != params {
            self.config.filter_params = params;
            self.restart();
        }
    }

    /// Channels selected by the channel filter.
    pub fn channels(&self) -> Vec<String> {
        self.config.channels()
    }

    /// Selects documents by channel; only legal on pull sessions.
    pub fn set_channels(&mut self, channels: Vec<String>) -> ReplicationResult<()> {
        let before = (self.config.filter.clone(), self.config.filter_params.clone());
        self.config.set_channels(channels)?;
        if before != (self.config.filter.clone(), self.config.filter_params.clone()) {
            self.restart();
        }
        Ok(())
    }

    /// Document ID allowlist.
    pub fn doc_ids(&self) -> Option<&[String]> {
        self.config.doc_ids.as_deref()
    }

    /// Sets the document ID allowlist; takes effect at the next start.
    pub fn set_doc_ids(&mut self, doc_ids: Option<Vec<String>>) {
        self.config.doc_ids = doc_ids;
    }

    /// Request headers.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.config.headers
    }

    /// Replaces the request headers; restarts a started session.
    pub fn set_headers(&mut self, headers: BTreeMap<String, String>) {
        if self.config.headers != headers {
            self.config.headers = headers;
            self.restart();
        }
    }

    /// Sets OAuth parameters; restarts a started session.
    pub fn set_oauth(&mut self, oauth: Option<BTreeMap<String, String>>) {
        if self.config.oauth != oauth {
            self.config.oauth = oauth;
            self.restart();
        }
    }

    /// Sets the Facebook login email; restarts a started session.
    pub fn set_facebook_email(&mut self, email: Option<String>) {
        if self.config.facebook_email != email {
            self.config.facebook_email = email;
            self.restart();
        }
    }

    /// Sets the Persona login email; restarts a started session.
    pub fn set_persona_email(&mut self, email: Option<String>) {
        if self.config.persona_email != email {
            self.config.persona_email = email;
            self.restart();
        }
    }

    /// Caller-supplied extra properties.
    pub fn extra_properties(&self) -> &BTreeMap<String, Value> {
        &self.config.extra
    }

    /// Sets an extra property; takes effect at the next start.
    pub fn set_extra_property(&mut self, key: impl Into<String>, value: Value) {
        self.config.extra.insert(key.into(), value);
    }

    /// Credential stored for the remote endpoint.
    pub fn credential(&self) -> Option<Credential> {
        self.database.credentials().get(&self.config.remote)
    }

    /// Stores or removes the remote credential; restarts a started session.
    pub fn set_credential(&mut self, credential: Option<Credential>) {
        if self.credential() == credential {
            return;
        }
        let store = self.database.credentials();
        match credential {
            Some(credential) => store.save(&self.config.remote, credential),
            None => {
                store.remove(&self.config.remote);
            }
        }
        self.restart();
    }

    /// Builds the property snapshot the engine would receive now.
    pub fn properties(&self) -> ReplicationProperties {
        ReplicationProperties::build(&self.config, self.database.name())
    }

    // ---- observed state -------------------------------------------------

    /// Desired state: true between `start()` and the next stop.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Observed status.
    pub fn status(&self) -> ReplicationStatus {
        self.state.status
    }

    /// True unless the observed status is `Stopped`.
    pub fn running(&self) -> bool {
        self.state.running()
    }

    /// Most recent error.
    pub fn last_error(&self) -> Option<&ReplicationError> {
        self.state.last_error.as_ref()
    }

    /// Changes processed.
    pub fn completed(&self) -> u64 {
        self.state.completed
    }

    /// Changes known.
    pub fn total(&self) -> u64 {
        self.state.total
    }

    /// All observed fields.
    pub fn state(&self) -> &ObservedState {
        &self.state
    }

    /// Subscribes to "replication changed" notifications.
    pub fn subscribe(&mut self) -> Receiver<ReplicationChange> {
        let (tx, rx) = mpsc::channel();
        self.observers.push(tx);
        rx
    }

    // ---- lifecycle ------------------------------------------------------

    /// Starts replicating.
    ///
    /// Does nothing if already started or if the database is closed.
    /// Returns as soon as the create task is queued; construction failures
    /// arrive later as a `Stopped` status carrying the error.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        if !self.database.is_open() {
            debug!(replication = %self.id, "start ignored: database is closed");
            return;
        }

        self.started = true;
        self.generation = self.generation.next();
        self.last_sequence = 0;
        let properties = self.properties();
        self.database.add_replication(self.id);
        info!(replication = %self.id, generation = %self.generation, remote = %self.config.remote, direction = ?self.config.direction, "starting replication");

        let key = EngineKey::new(self.id, self.generation);
        if !self
            .database
            .dispatcher()
            .submit_create(key, properties, self.status_tx.clone())
        {
            // Same path as any other failure: a Stopped snapshot.
            let _ = self.status_tx.send(StatusSnapshot::construction_failed(
                self.generation,
                ReplicationError::ServerUnavailable,
            ));
        }
    }

    /// Stops replicating.
    ///
    /// Takes effect immediately on this side; the engine is stopped
    /// asynchronously and any status it reports afterwards is ignored.
    pub fn stop(&mut self) {
        self.database.dispatcher().submit_stop(self.id);
        if self.started {
            info!(replication = %self.id, generation = %self.generation, "stopping replication");
        }
        self.started = false;
        self.database.forget_replication(self.id);
    }

    /// Stops and starts again so the engine picks up the current configuration.
    ///
    /// Does nothing unless started.
    pub fn restart(&mut self) {
        if !self.started {
            return;
        }
        debug!(replication = %self.id, "restarting replication");
        self.stop();
        self.start();
    }

    // ---- status delivery ------------------------------------------------

    /// Applies every status snapshot queued so far. Returns how many were delivered.
    pub fn process_status_updates(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(snapshot) = self.status_rx.try_recv() {
            self.update_status(snapshot);
            delivered += 1;
        }
        delivered
    }

    /// Waits up to `timeout` for one snapshot and applies it.
    pub fn wait_for_status_update(&mut self, timeout: Duration) -> bool {
        match self.status_rx.recv_timeout(timeout) {
            Ok(snapshot) => {
                self.update_status(snapshot);
                true
            }
            Err(_) => false,
        }
    }

    /// Applies snapshots until the session is no longer started.
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn wait_until_stopped(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.started {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.status_rx.recv_timeout(deadline - now) {
                Ok(snapshot) => {
                    self.update_status(snapshot);
                }
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        !self.started
    }

    /// The single routine that writes observed state.
    ///
    /// Returns true if a notification was raised.
    fn update_status(&mut self, mut snapshot: StatusSnapshot) -> bool {
        if !self.started {
            debug!(replication = %self.id, status = %snapshot.status, error = ?snapshot.error, "status ignored: session not started");
            return false;
        }
        if snapshot.generation != self.generation || snapshot.sequence <= self.last_sequence {
            warn!(
                replication = %self.id,
                generation = %snapshot.generation,
                sequence = snapshot.sequence,
                current_generation = %self.generation,
                last_sequence = self.last_sequence,
                "out-of-order status dropped"
            );
            return false;
        }
        if !snapshot.is_well_formed() {
            if snapshot.status != ReplicationStatus::Stopped {
                warn!(replication = %self.id, completed = snapshot.completed, total = snapshot.total, "malformed status dropped");
                return false;
            }
            // The engine is already released; keep the terminal status, not the counters.
            warn!(replication = %self.id, completed = snapshot.completed, total = snapshot.total, "malformed counters ignored on stop");
            snapshot.completed = self.state.completed;
            snapshot.total = self.state.total;
        }
        self.last_sequence = snapshot.sequence;

        let changed = self.state.apply(&snapshot);
        if snapshot.status == ReplicationStatus::Stopped {
            self.started = false;
            self.database.forget_replication(self.id);
            match &snapshot.error {
                Some(err) => warn!(replication = %self.id, error = %err, "replication stopped with error"),
                None => info!(replication = %self.id, "replication stopped"),
            }
        }
        if changed {
            self.notify();
        }
        changed
    }

    fn notify(&mut self) {
        let change = ReplicationChange {
            id: self.id,
            started: self.started,
            state: self.state.clone(),
        };
        self.observers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}

impl Drop for ReplicationSession {
    fn drop(&mut self) {
        if self.started {
            self.stop();
        }
    }
}

impl std::fmt::Debug for ReplicationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationSession")
            .field("id", &self.id)
            .field("direction", &self.config.direction)
            .field("remote", &self.config.remote)
            .field("started", &self.started)
            .field("state", &self.state)
            .finish()
    }
}

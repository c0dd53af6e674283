//! # DocSync Replication
//!
//! Control and status facade for document replication sessions.
//!
//! This crate provides:
//! - Session configuration and the property snapshot handed to engines
//! - The session lifecycle (start, stop, restart)
//! - A serial background context that owns every engine
//! - Status snapshots marshaled back to the caller, coalesced into
//!   change notifications
//!
//! ## Architecture
//!
//! ```text
//!  caller context                         background context
//!  ──────────────                         ──────────────────
//!  ReplicationSession ── CreateEngine ──►  ServerContext
//!    config (mutable)     (properties)       EngineFactory::create
//!    started                                 engine.subscribe / start
//!    ObservedState    ◄── StatusSnapshot ──  progress → status cascade
//!    observers            (per session)      Stopped → release engine
//! ```
//!
//! ## Key Invariants
//!
//! - Engines are built, read and dropped only on the background context
//! - Observed state is written only by the session's status update routine
//! - At most one notification per applied snapshot, and only on change
//! - `stop()` is effective immediately; later snapshots are ignored
//! - Every failure reaches the caller as `Stopped` plus `last_error`

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod config;
mod credentials;
mod database;
mod engine;
mod error;
mod properties;
mod scripted;
mod server;
mod session;
mod status;
mod types;

pub use config::{Direction, DispatcherConfig, ReplicationConfig, CHANNELS_PARAM, CHANNEL_FILTER};
pub use credentials::{Credential, CredentialStore, MemoryCredentialStore};
pub use database::Database;
pub use engine::{EngineFactory, ProgressListener, ReplicationEngine};
pub use error::{ReplicationError, ReplicationResult};
pub use properties::{keys, ReplicationProperties};
pub use scripted::{EngineController, EngineReading, ScriptedEngine, ScriptedEngineFactory};
pub use server::{BackgroundDispatcher, DispatcherStats, ManualServer};
pub use session::ReplicationSession;
pub use status::{ObservedState, ReplicationChange, ReplicationStatus, StatusSnapshot};
pub use types::{Generation, ReplicationId};

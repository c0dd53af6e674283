//! Replication status and the snapshots that carry it between contexts.

use crate::error::ReplicationError;
use crate::types::{Generation, ReplicationId};
use std::fmt;

/// Observed status of a replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplicationStatus {
    /// No engine is running.
    #[default]
    Stopped,
    /// The engine runs but cannot reach the remote.
    Offline,
    /// The engine is connected with nothing to transfer.
    Idle,
    /// The engine is transferring documents.
    Active,
}

impl ReplicationStatus {
    /// Derives the status from engine readings.
    ///
    /// First match wins: not running, then not online, then active.
    pub fn from_engine(running: bool, online: bool, active: bool) -> Self {
        if !running {
            ReplicationStatus::Stopped
        } else if !online {
            ReplicationStatus::Offline
        } else if active {
            ReplicationStatus::Active
        } else {
            ReplicationStatus::Idle
        }
    }

    /// Returns true for every status except `Stopped`.
    pub fn is_running(&self) -> bool {
        !matches!(self, ReplicationStatus::Stopped)
    }
}

impl fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicationStatus::Stopped => "stopped",
            ReplicationStatus::Offline => "offline",
            ReplicationStatus::Idle => "idle",
            ReplicationStatus::Active => "active",
        };
        f.write_str(name)
    }
}

/// Status captured on the background context, delivered to the session.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    /// Run that produced the snapshot.
    pub generation: Generation,
    /// Position of the snapshot within its run, starting at 1.
    pub sequence: u64,
    /// Derived status.
    pub status: ReplicationStatus,
    /// Error reported by the engine, if any.
    pub error: Option<ReplicationError>,
    /// Changes processed so far.
    pub completed: u64,
    /// Changes known so far.
    pub total: u64,
}

impl StatusSnapshot {
    /// Snapshot for a run whose engine could not be built.
    pub fn construction_failed(generation: Generation, error: ReplicationError) -> Self {
        Self {
            generation,
            sequence: 1,
            status: ReplicationStatus::Stopped,
            error: Some(error),
            completed: 0,
            total: 0,
        }
    }

    /// Returns false if the counters contradict each other.
    pub fn is_well_formed(&self) -> bool {
        self.completed <= self.total
    }
}

/// The observed state of a session, as seen on the caller's side.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObservedState {
    /// Current status.
    pub status: ReplicationStatus,
    /// Most recent error.
    pub last_error: Option<ReplicationError>,
    /// Changes processed.
    pub completed: u64,
    /// Changes known.
    pub total: u64,
}

impl ObservedState {
    /// Returns true unless the status is `Stopped`.
    pub fn running(&self) -> bool {
        self.status.is_running()
    }

    /// Copies the fields of `snapshot` that differ, returning true if any did.
    pub fn apply(&mut self, snapshot: &StatusSnapshot) -> bool {
        let mut changed = false;
        if self.status != snapshot.status {
            self.status = snapshot.status;
            changed = true;
        }
        if self.last_error != snapshot.error {
            self.last_error = snapshot.error.clone();
            changed = true;
        }
        if self.completed != snapshot.completed {
            self.completed = snapshot.completed;
            changed = true;
        }
        if self.total != snapshot.total {
            self.total = snapshot.total;
            changed = true;
        }
        changed
    }
}

/// A "replication changed" notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationChange {
    /// Session that changed.
    pub id: ReplicationId,
    /// Whether the session still wants to run after the change.
    pub started: bool,
    /// Observed state after the change.
    pub state: ObservedState,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(status: ReplicationStatus, completed: u64, total: u64) -> StatusSnapshot {
        StatusSnapshot {
            generation: Generation(1),
            sequence: 1,
            status,
            error: None,
            completed,
            total,
        }
    }

    #[test]
    fn status_cascade() {
        use ReplicationStatus::*;
        assert_eq!(ReplicationStatus::from_engine(false, true, true), Stopped);
        assert_eq!(ReplicationStatus::from_engine(true, false, true), Offline);
        assert_eq!(ReplicationStatus::from_engine(true, true, true), Active);
        assert_eq!(ReplicationStatus::from_engine(true, true, false), Idle);
    }

    #[test]
    fn running_derived_from_status() {
        assert!(!ReplicationStatus::Stopped.is_running());
        assert!(ReplicationStatus::Offline.is_running());
        assert!(ReplicationStatus::Idle.is_running());
        assert!(ReplicationStatus::Active.is_running());
        assert!(!ObservedState::default().running());
    }

    #[test]
    fn apply_reports_changes() {
        let mut state = ObservedState::default();
        assert!(!state.apply(&snapshot(ReplicationStatus::Stopped, 0, 0)));

        assert!(state.apply(&snapshot(ReplicationStatus::Active, 0, 10)));
        assert_eq!(state.status, ReplicationStatus::Active);
        assert_eq!(state.total, 10);

        assert!(!state.apply(&snapshot(ReplicationStatus::Active, 0, 10)));
        assert!(state.apply(&snapshot(ReplicationStatus::Active, 4, 10)));
        assert_eq!(state.completed, 4);
    }

    #[test]
    fn apply_tracks_errors() {
        let mut state = ObservedState::default();
        let mut snap = snapshot(ReplicationStatus::Offline, 0, 0);
        snap.error = Some(ReplicationError::runtime(Some(503), "unavailable"));
        assert!(state.apply(&snap));
        assert!(state.last_error.is_some());

        snap.error = None;
        assert!(state.apply(&snap));
        assert!(state.last_error.is_none());
    }

    #[test]
    fn well_formed_counters() {
        assert!(snapshot(ReplicationStatus::Active, 3, 10).is_well_formed());
        assert!(!snapshot(ReplicationStatus::Active, 11, 10).is_well_formed());
    }

    #[test]
    fn construction_failure_snapshot() {
        let snap = StatusSnapshot::construction_failed(
            Generation(2),
            ReplicationError::construction(401, "unauthorized"),
        );
        assert_eq!(snap.status, ReplicationStatus::Stopped);
        assert_eq!(snap.generation, Generation(2));
        assert!(snap.error.is_some());
    }
}

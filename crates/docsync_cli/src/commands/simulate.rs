//! Simulate command implementation.
//!
//! Runs a real session and background context against a scripted engine
//! that goes offline, transfers `total` changes, idles and stops.

use docsync_replication::{
    BackgroundDispatcher, Database, DispatcherConfig, EngineReading, ReplicationChange,
    ReplicationConfig, ReplicationError, ReplicationSession, ReplicationStatus,
    ScriptedEngineFactory,
};
use serde::Serialize;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Options for the simulate command.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Changes to transfer.
    pub total: u64,
    /// Changes per progress report.
    pub step: u64,
    /// Construction failure to inject.
    pub fail: Option<u16>,
    /// Wait per status update.
    pub timeout: Duration,
    /// Output format.
    pub format: String,
}

/// One printed notification.
#[derive(Debug, Serialize)]
pub struct ChangeLine {
    /// Status name.
    pub status: String,
    /// Desired state after the change.
    pub started: bool,
    /// Changes processed.
    pub completed: u64,
    /// Changes known.
    pub total: u64,
    /// Error text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ReplicationChange> for ChangeLine {
    fn from(change: &ReplicationChange) -> Self {
        Self {
            status: change.state.status.to_string(),
            started: change.started,
            completed: change.state.completed,
            total: change.state.total,
            error: change.state.last_error.as_ref().map(ToString::to_string),
        }
    }
}

/// Outcome of a simulation.
#[derive(Debug)]
pub struct SimulateSummary {
    /// Every notification, in order.
    pub changes: Vec<ChangeLine>,
    /// Final status.
    pub status: ReplicationStatus,
}

/// Runs the simulation and returns what was observed.
pub fn simulate(
    config: ReplicationConfig,
    database: &str,
    options: &SimulateOptions,
) -> Result<SimulateSummary, Box<dyn std::error::Error>> {
    let factory = Arc::new(ScriptedEngineFactory::new());
    if let Some(status) = options.fail {
        factory.fail_next(ReplicationError::construction(status, "simulated failure"));
    }
    let dispatcher = BackgroundDispatcher::spawn(factory.clone(), DispatcherConfig::default())?;
    let db = Database::new(database, dispatcher);
    let continuous = config.continuous;

    let mut session = ReplicationSession::from_config(Arc::clone(&db), config)?;
    let notifications = session.subscribe();
    let mut changes = Vec::new();

    session.start();
    session.wait_for_status_update(options.timeout);
    drain(&notifications, &mut changes);

    if let Some(engine) = factory.last().filter(|_| session.started()) {
        let step = options.step.max(1);
        let mut done = 0;
        while done < options.total && session.started() {
            engine.report(EngineReading::active(done, options.total));
            session.wait_for_status_update(options.timeout);
            drain(&notifications, &mut changes);
            done = (done + step).min(options.total);
        }
        engine.report(EngineReading::idle(options.total, options.total));
        session.wait_for_status_update(options.timeout);
        drain(&notifications, &mut changes);

        if continuous {
            info!("continuous session caught up; stopping");
            session.stop();
        } else {
            engine.report(EngineReading::stopped());
            session.wait_until_stopped(options.timeout);
        }
        drain(&notifications, &mut changes);
    }

    let status = session.status();
    drop(session);
    db.dispatcher().shutdown();
    Ok(SimulateSummary { changes, status })
}

fn drain(notifications: &Receiver<ReplicationChange>, out: &mut Vec<ChangeLine>) {
    out.extend(notifications.try_iter().map(|c| ChangeLine::from(&c)));
}

/// Runs the simulate command.
pub fn run(
    path: &Path,
    database: &str,
    options: &SimulateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ReplicationConfig::from_file(path)?;
    let summary = simulate(config, database, options)?;

    match options.format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary.changes)?);
        }
        _ => {
            for (i, change) in summary.changes.iter().enumerate() {
                print!(
                    "#{:<3} {:<8} {}/{} started={}",
                    i + 1,
                    change.status,
                    change.completed,
                    change.total,
                    change.started
                );
                match &change.error {
                    Some(err) => println!(" error={}", err),
                    None => println!(),
                }
            }
            println!("final status: {}", summary.status);
        }
    }
    Ok(())
}

//! DocSync CLI
//!
//! Command-line tools for DocSync replication sessions.
//!
//! # Commands
//!
//! - `properties` - Print the property snapshot an engine would receive
//! - `simulate` - Run a session against a scripted engine and print notifications

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// DocSync replication session tools.
#[derive(Parser)]
#[command(name = "docsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the engine property snapshot for a session configuration
    Properties {
        /// Session configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Local database name
        #[arg(short, long, default_value = "local")]
        database: String,
    },

    /// Run a session against a scripted engine
    Simulate {
        /// Session configuration file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Local database name
        #[arg(short, long, default_value = "local")]
        database: String,

        /// Number of changes the engine transfers
        #[arg(long, default_value = "10")]
        total: u64,

        /// Changes transferred per progress report
        #[arg(long, default_value = "1")]
        step: u64,

        /// Fail engine construction with this status code
        #[arg(long)]
        fail: Option<u16>,

        /// Seconds to wait for each status update
        #[arg(long, default_value = "5")]
        timeout: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Properties { config, database } => {
            commands::properties::run(&config, &database)?;
        }
        Commands::Simulate {
            config,
            database,
            total,
            step,
            fail,
            timeout,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                total,
                step,
                fail,
                timeout: std::time::Duration::from_secs(timeout),
                format,
            };
            commands::simulate::run(&config, &database, &options)?;
        }
        Commands::Version => {
            println!("DocSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

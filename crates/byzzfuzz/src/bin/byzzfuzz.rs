//! byzzfuzz command-line interface.
//!
//! Round-based fault injection for BFT consensus protocols.
//!
//! # Quick Start
//!
//! ```bash
//! # Run a stored schedule against the simulated cluster
//! byzzfuzz run-instance schedule.json --timeout-ms 1000
//!
//! # Fuzz with two drops and one corruption per instance
//! byzzfuzz fuzz --runs 50 --seed 7 --drops 2 --corruptions 1
//!
//! # Check that a known regression replays deterministically
//! byzzfuzz verify --bug bug001
//! ```
//!
//! Exit code 0 means every checked verdict held, 1 means a safety or
//! liveness violation was found, 2 means the command itself failed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use byzzfuzz::cli::{
    self, BaselineCommand, Command, FuzzCommand, OutputFormat, RunInstanceCommand, VerifyCommand,
};
use clap::{Parser, Subcommand};

/// byzzfuzz - round-based fault injection for BFT consensus protocols.
#[derive(Parser)]
#[command(name = "byzzfuzz")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one fault schedule against the simulated cluster.
    RunInstance {
        /// Instance JSON file (stdin when omitted).
        instance: Option<PathBuf>,

        /// Named regression schedule instead of a file.
        #[arg(long)]
        bug: Option<String>,

        /// Number of replicas in the cluster.
        #[arg(short = 'n', long, default_value = "4")]
        replicas: usize,

        /// Height at which the oracle caps the search.
        #[arg(long, default_value = "3")]
        bound_height: u64,

        /// Wall-clock length of one protocol slot in milliseconds.
        #[arg(long, default_value = "2")]
        slot_interval_ms: u64,

        /// Seed for per-slot delivery shuffling.
        #[arg(long, default_value = "0")]
        delivery_seed: u64,

        /// Override the schedule's fault window (milliseconds).
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Override the schedule's liveness grace window (milliseconds).
        #[arg(long)]
        liveness_timeout_ms: Option<u64>,

        /// Write the run trace as JSONL to this path.
        #[arg(long)]
        trace_out: Option<PathBuf>,

        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run unstructured per-message fault injection.
    Baseline {
        /// Chance (0-100) of dropping each message.
        #[arg(long, default_value = "10")]
        drop_percent: u8,

        /// Chance (0-100) of garbling each surviving message.
        #[arg(long, default_value = "10")]
        corrupt_percent: u8,

        /// Seed for the per-message rolls.
        #[arg(short, long, default_value = "0")]
        seed: u64,

        /// Fault window length in milliseconds.
        #[arg(long, default_value = "1000")]
        timeout_ms: u64,

        /// Liveness grace window in milliseconds.
        #[arg(long, default_value = "1000")]
        liveness_timeout_ms: u64,

        /// Number of replicas in the cluster.
        #[arg(short = 'n', long, default_value = "4")]
        replicas: usize,

        /// Height at which the oracle caps the search.
        #[arg(long, default_value = "3")]
        bound_height: u64,

        /// Wall-clock length of one protocol slot in milliseconds.
        #[arg(long, default_value = "2")]
        slot_interval_ms: u64,

        /// Emit the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run a seeded campaign of generated schedules.
    Fuzz {
        /// Number of runs in the campaign.
        #[arg(short, long, default_value = "20")]
        runs: u64,

        /// Base seed; run i uses seed + i (current time when omitted).
        #[arg(short, long)]
        seed: Option<u64>,

        /// Drop rules per generated instance.
        #[arg(long, default_value = "5")]
        drops: usize,

        /// Corruption rules per generated instance.
        #[arg(long, default_value = "5")]
        corruptions: usize,

        /// Scheduling horizon: faults land in steps 0..STEPS.
        #[arg(long, default_value = "10")]
        steps: u64,

        /// Number of replicas in the cluster.
        #[arg(short = 'n', long, default_value = "4")]
        replicas: usize,

        /// Height at which the oracle caps the search.
        #[arg(long, default_value = "3")]
        bound_height: u64,

        /// Fault window length per run in milliseconds.
        #[arg(long, default_value = "1000")]
        timeout_ms: u64,

        /// Liveness grace window per run in milliseconds.
        #[arg(long, default_value = "1000")]
        liveness_timeout_ms: u64,

        /// Wall-clock length of one protocol slot in milliseconds.
        #[arg(long, default_value = "2")]
        slot_interval_ms: u64,

        /// Append one JSON record per run to this file.
        #[arg(short = 'o', long)]
        results_out: Option<PathBuf>,

        /// Emit per-run records as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Replay a schedule twice and check the verdicts agree.
    Verify {
        /// Named regression schedule.
        #[arg(long)]
        bug: Option<String>,

        /// Instance JSON file.
        #[arg(long)]
        instance: Option<PathBuf>,

        /// List the known regression names and exit.
        #[arg(long)]
        list: bool,

        /// Number of replicas in the cluster.
        #[arg(short = 'n', long, default_value = "4")]
        replicas: usize,

        /// Height at which the oracle caps the search.
        #[arg(long, default_value = "3")]
        bound_height: u64,

        /// Wall-clock length of one protocol slot in milliseconds.
        #[arg(long, default_value = "2")]
        slot_interval_ms: u64,

        /// Seed for per-slot delivery shuffling, shared by both runs.
        #[arg(long, default_value = "0")]
        delivery_seed: u64,

        /// Fault window for both replays in milliseconds.
        #[arg(long, default_value = "1000")]
        timeout_ms: u64,

        /// Liveness grace window for both replays in milliseconds.
        #[arg(long, default_value = "1000")]
        liveness_timeout_ms: u64,

        /// Emit both reports as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn format_of(json: bool) -> OutputFormat {
    if json {
        OutputFormat::Json
    } else {
        OutputFormat::Human
    }
}

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::RunInstance {
            instance,
            bug,
            replicas,
            bound_height,
            slot_interval_ms,
            delivery_seed,
            timeout_ms,
            liveness_timeout_ms,
            trace_out,
            json,
        } => RunInstanceCommand {
            instance,
            bug,
            replicas,
            bound_height,
            slot_interval: Duration::from_millis(slot_interval_ms),
            delivery_seed,
            timeout: timeout_ms.map(Duration::from_millis),
            liveness_timeout: liveness_timeout_ms.map(Duration::from_millis),
            trace_out,
            format: format_of(json),
        }
        .execute(),

        Commands::Baseline {
            drop_percent,
            corrupt_percent,
            seed,
            timeout_ms,
            liveness_timeout_ms,
            replicas,
            bound_height,
            slot_interval_ms,
            json,
        } => BaselineCommand {
            drop_percent,
            corrupt_percent,
            seed,
            timeout: Duration::from_millis(timeout_ms),
            liveness_timeout: Duration::from_millis(liveness_timeout_ms),
            replicas,
            bound_height,
            slot_interval: Duration::from_millis(slot_interval_ms),
            format: format_of(json),
        }
        .execute(),

        Commands::Fuzz {
            runs,
            seed,
            drops,
            corruptions,
            steps,
            replicas,
            bound_height,
            timeout_ms,
            liveness_timeout_ms,
            slot_interval_ms,
            results_out,
            json,
        } => FuzzCommand {
            runs,
            seed,
            drops,
            corruptions,
            steps,
            replicas,
            bound_height,
            timeout: Duration::from_millis(timeout_ms),
            liveness_timeout: Duration::from_millis(liveness_timeout_ms),
            slot_interval: Duration::from_millis(slot_interval_ms),
            results_out,
            format: format_of(json),
        }
        .execute(),

        Commands::Verify {
            bug,
            instance,
            list,
            replicas,
            bound_height,
            slot_interval_ms,
            delivery_seed,
            timeout_ms,
            liveness_timeout_ms,
            json,
        } => VerifyCommand {
            bug,
            instance,
            list,
            replicas,
            bound_height,
            slot_interval: Duration::from_millis(slot_interval_ms),
            delivery_seed,
            timeout: Duration::from_millis(timeout_ms),
            liveness_timeout: Duration::from_millis(liveness_timeout_ms),
            format: format_of(json),
        }
        .execute(),
    };

    match result {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(err) => {
            eprintln!("{}", cli::format_error(&err.to_string()));
            ExitCode::from(2)
        }
    }
}

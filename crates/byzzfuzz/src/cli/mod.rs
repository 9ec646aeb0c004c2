//! CLI command routing and structure for the byzzfuzz binary.
//!
//! ## Commands
//!
//! - `run-instance` - Run one fault schedule against the cluster
//! - `baseline` - Run unstructured per-message fault injection
//! - `fuzz` - Run a seeded campaign of generated schedules
//! - `verify` - Replay a schedule twice and check determinism
//!
//! ## Exit Codes
//!
//! - `0` - every checked verdict held
//! - `1` - at least one safety or liveness violation was found
//! - `2` - bad configuration or an execution error
//!
//! The binary translates flags into the command structs here; the
//! structs themselves stay flag-free so tests can drive them directly.

pub mod baseline;
pub mod fuzz;
pub mod run_instance;
pub mod verify;

pub use baseline::BaselineCommand;
pub use fuzz::FuzzCommand;
pub use run_instance::RunInstanceCommand;
pub use verify::VerifyCommand;

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::engine::{Engine, RunOptions, RunReport};
use crate::error::ConfigError;
use crate::oracle::Verdict;
use crate::schedule::InstanceConfig;
use crate::sim_cluster::{SimCluster, SimOptions};
use crate::trace::{JsonlTraceSink, TraceBuffer};

// ============================================================================
// Command Trait
// ============================================================================

/// Common interface for all byzzfuzz commands.
pub trait Command {
    /// Executes the command and reports how the process should exit.
    fn execute(&self) -> Result<Outcome, CommandError>;
}

/// What a finished command tells the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every verdict the command checked held.
    Passed,
    /// At least one run violated safety or liveness.
    ViolationFound,
}

impl Outcome {
    /// The process exit code for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Passed => 0,
            Self::ViolationFound => 1,
        }
    }
}

/// Maps a run verdict onto the process outcome.
pub(crate) fn outcome_of(verdict: Verdict) -> Outcome {
    if verdict.safety_holds && verdict.liveness_holds {
        Outcome::Passed
    } else {
        Outcome::ViolationFound
    }
}

// ============================================================================
// Command Errors
// ============================================================================

/// Errors that can occur during command execution.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot encode result: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),

    #[error("replay diverged: first run {first}, second run {second}")]
    ReplayDiverged { first: String, second: String },
}

// ============================================================================
// Common CLI Types
// ============================================================================

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output.
    Human,
    /// JSON output for tooling.
    Json,
}

impl OutputFormat {
    /// Parses output format from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Signal Handling
// ============================================================================

/// Registered SIGINT/SIGTERM handlers that set a cancellation flag.
///
/// Dropping the guard unregisters the handlers, so per-run flags do not
/// accumulate registrations over a long campaign.
pub(crate) struct SignalGuard(Vec<signal_hook::SigId>);

impl SignalGuard {
    pub(crate) fn install(flag: &Arc<AtomicBool>) -> std::io::Result<Self> {
        let mut ids = Vec::with_capacity(2);
        for signal in [SIGINT, SIGTERM] {
            ids.push(signal_hook::flag::register(signal, Arc::clone(flag))?);
        }
        Ok(Self(ids))
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for id in self.0.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

// ============================================================================
// Shared Run Plumbing
// ============================================================================

/// Reads an instance from a file, or from stdin when no path is given.
pub(crate) fn read_instance(path: Option<&Path>) -> Result<InstanceConfig, CommandError> {
    let config = match path {
        Some(path) => InstanceConfig::from_json_reader(File::open(path)?)?,
        None => {
            let mut json = String::new();
            std::io::stdin().lock().read_to_string(&mut json)?;
            InstanceConfig::from_json_str(&json)?
        }
    };
    Ok(config)
}

/// Runs one instance to completion and returns its report.
///
/// Installs SIGINT/SIGTERM handlers on the engine's cancel flag for the
/// duration of the run and optionally writes the trace as JSONL.
pub(crate) fn drive_instance(
    config: InstanceConfig,
    options: &RunOptions,
    sim: &SimOptions,
    trace_out: Option<&Path>,
) -> Result<RunReport, CommandError> {
    let deadline = config.timeout() + config.liveness_timeout();
    let mut engine = Engine::start(config, options, Arc::new(crate::codec::JsonCodec::new()))?;
    let _signals = SignalGuard::install(&engine.cancel_flag())?;

    let mut cluster = SimCluster::new(options.n, sim.clone())?;
    cluster.run(&mut engine, deadline);

    if let Some(path) = trace_out {
        write_trace(path, &engine.trace_buffer())?;
    }
    Ok(engine.report())
}

/// Drains a trace buffer into a JSONL file.
pub(crate) fn write_trace(path: &Path, buffer: &TraceBuffer) -> Result<(), CommandError> {
    let mut sink = JsonlTraceSink::create(path)?;
    let written = sink.drain_from(buffer)?;
    sink.flush()?;
    tracing::info!(records = written, path = %path.display(), "trace written");
    Ok(())
}

// ============================================================================
// Result Formatting
// ============================================================================

/// Formats a success message with checkmark.
pub fn format_success(message: &str) -> String {
    format!("✓ {}", message)
}

/// Formats an error message with cross mark.
pub fn format_error(message: &str) -> String {
    format!("✗ {}", message)
}

/// Formats a warning message with warning sign.
pub fn format_warning(message: &str) -> String {
    format!("⚠ {}", message)
}

/// Prints the shared human-readable report body.
pub(crate) fn print_report_body(report: &RunReport) {
    println!("State: {}", report.state);
    println!("Verdict: {}", report.verdict);
    println!("Messages seen: {}", report.stats.messages_seen);
    println!("Drops applied: {}", report.stats.drops_applied);
    println!(
        "Corruptions applied: {} ({} failed open)",
        report.stats.corruptions_applied, report.stats.corruptions_failed_open
    );
    println!("Commits observed: {}", report.stats.commits_observed);
    println!(
        "Trace records: {} emitted, {} dropped",
        report.stats.trace_emitted, report.stats.trace_dropped
    );
}

pub(crate) const BANNER: &str = "═══════════════════════════════════════════════════════";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_parsing() {
        assert_eq!(OutputFormat::from_str("human"), Some(OutputFormat::Human));
        assert_eq!(OutputFormat::from_str("JSON"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("yaml"), None);
    }

    #[test]
    fn outcomes_map_to_exit_codes() {
        assert_eq!(Outcome::Passed.exit_code(), 0);
        assert_eq!(Outcome::ViolationFound.exit_code(), 1);
    }

    #[test]
    fn only_a_fully_clean_verdict_passes() {
        let clean = Verdict {
            safety_holds: true,
            liveness_holds: true,
        };
        let stalled = Verdict {
            safety_holds: true,
            liveness_holds: false,
        };
        let forked = Verdict {
            safety_holds: false,
            liveness_holds: true,
        };
        assert_eq!(outcome_of(clean), Outcome::Passed);
        assert_eq!(outcome_of(stalled), Outcome::ViolationFound);
        assert_eq!(outcome_of(forked), Outcome::ViolationFound);
    }

    #[test]
    fn format_messages() {
        assert!(format_success("test").starts_with('✓'));
        assert!(format_error("test").starts_with('✗'));
        assert!(format_warning("test").starts_with('⚠'));
    }
}

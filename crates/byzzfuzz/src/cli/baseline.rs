//! Baseline command for unstructured per-message fault injection.

use std::sync::Arc;
use std::time::Duration;

use super::{
    BANNER, Command, CommandError, Outcome, OutputFormat, SignalGuard, format_error,
    format_success, outcome_of, print_report_body,
};
use crate::baseline::{BaselineConfig, BaselineEngine};
use crate::codec::JsonCodec;
use crate::engine::{RunOptions, RunReport};
use crate::sim_cluster::{SimCluster, SimOptions};

// ============================================================================
// Baseline Command
// ============================================================================

/// Runs the probabilistic baseline injector against the cluster.
#[derive(Debug, Clone)]
pub struct BaselineCommand {
    /// Chance (0-100) of dropping each message.
    pub drop_percent: u8,

    /// Chance (0-100) of garbling each surviving message.
    pub corrupt_percent: u8,

    /// Seed for the per-message rolls and delivery shuffling.
    pub seed: u64,

    /// Fault window length.
    pub timeout: Duration,

    /// Liveness grace window.
    pub liveness_timeout: Duration,

    /// Size of the replica set.
    pub replicas: usize,

    /// Height at which the oracle caps the search.
    pub bound_height: u64,

    /// Wall-clock length of one protocol slot.
    pub slot_interval: Duration,

    /// Output format.
    pub format: OutputFormat,
}

impl Default for BaselineCommand {
    fn default() -> Self {
        Self {
            drop_percent: 10,
            corrupt_percent: 10,
            seed: 0,
            timeout: Duration::from_secs(1),
            liveness_timeout: Duration::from_secs(1),
            replicas: 4,
            bound_height: 3,
            slot_interval: Duration::from_millis(2),
            format: OutputFormat::Human,
        }
    }
}

impl BaselineCommand {
    /// Sets the drop probability.
    pub fn with_drop_percent(mut self, percent: u8) -> Self {
        self.drop_percent = percent;
        self
    }

    /// Sets the corruption probability.
    pub fn with_corrupt_percent(mut self, percent: u8) -> Self {
        self.corrupt_percent = percent;
        self
    }

    /// Sets the injection seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the fault window length.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the replica set size.
    pub fn with_replicas(mut self, n: usize) -> Self {
        self.replicas = n;
        self
    }

    /// Sets the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    fn run(&self) -> Result<RunReport, CommandError> {
        let config = BaselineConfig {
            drop_percent: self.drop_percent,
            corrupt_percent: self.corrupt_percent,
            seed: self.seed,
            timeout_ns: self.timeout.as_nanos() as u64,
            liveness_timeout_ns: self.liveness_timeout.as_nanos() as u64,
        };
        let options = RunOptions::default()
            .with_replicas(self.replicas)
            .with_bound_height(self.bound_height);
        let sim = SimOptions::default()
            .with_slot_interval(self.slot_interval)
            .with_delivery_seed(self.seed);
        let deadline = self.timeout + self.liveness_timeout;

        let mut engine = BaselineEngine::start(config, &options, Arc::new(JsonCodec::new()))?;
        let _signals = SignalGuard::install(&engine.cancel_flag())?;

        let mut cluster = SimCluster::new(self.replicas, sim)?;
        cluster.run(&mut engine, deadline);

        Ok(engine.report())
    }

    fn print_results(&self, report: &RunReport) -> Result<(), CommandError> {
        match self.format {
            OutputFormat::Human => self.print_human(report),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        }
        Ok(())
    }

    fn print_human(&self, report: &RunReport) {
        println!("\n{}", BANNER);
        println!("Baseline Injection Run");
        println!("{}", BANNER);
        println!(
            "Faults: drop {}% / corrupt {}% (seed {})",
            self.drop_percent, self.corrupt_percent, self.seed
        );
        print_report_body(report);

        if report.verdict.safety_holds && report.verdict.liveness_holds {
            println!("\n{}", format_success("safety and liveness hold"));
        } else {
            println!("\n{}", format_error(&report.verdict.to_string()));
        }
    }
}

impl Command for BaselineCommand {
    fn execute(&self) -> Result<Outcome, CommandError> {
        let report = self.run()?;
        self.print_results(&report)?;
        Ok(outcome_of(report.verdict))
    }
}

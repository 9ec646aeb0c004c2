//! Fuzz command for seeded campaigns over the structured fault space.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::{
    BANNER, Command, CommandError, Outcome, OutputFormat, SignalGuard, drive_instance,
    format_warning, outcome_of,
};
use crate::engine::{RunOptions, RunReport};
use crate::generate::{GeneratorParams, generate_seeded};
use crate::oracle::OracleState;
use crate::schedule::InstanceConfig;
use crate::sim_cluster::SimOptions;

// ============================================================================
// Fuzz Command
// ============================================================================

/// Runs a campaign of generated instances, one seed per run.
#[derive(Debug, Clone)]
pub struct FuzzCommand {
    /// Number of runs in the campaign.
    pub runs: u64,

    /// Base seed. Run `i` uses `seed + i`; current time when absent.
    pub seed: Option<u64>,

    /// Drop rules per generated instance.
    pub drops: usize,

    /// Corruption rules per generated instance.
    pub corruptions: usize,

    /// Scheduling horizon for generated faults.
    pub steps: u64,

    /// Size of the replica set.
    pub replicas: usize,

    /// Height at which the oracle caps the search.
    pub bound_height: u64,

    /// Fault window length per run.
    pub timeout: Duration,

    /// Liveness grace window per run.
    pub liveness_timeout: Duration,

    /// Wall-clock length of one protocol slot.
    pub slot_interval: Duration,

    /// Append one JSON record per run to this file.
    pub results_out: Option<PathBuf>,

    /// Output format.
    pub format: OutputFormat,
}

impl Default for FuzzCommand {
    fn default() -> Self {
        Self {
            runs: 20,
            seed: None,
            drops: 5,
            corruptions: 5,
            steps: 10,
            replicas: 4,
            bound_height: 3,
            timeout: Duration::from_secs(1),
            liveness_timeout: Duration::from_secs(1),
            slot_interval: Duration::from_millis(2),
            results_out: None,
            format: OutputFormat::Human,
        }
    }
}

impl FuzzCommand {
    /// Sets the number of runs.
    pub fn with_runs(mut self, runs: u64) -> Self {
        self.runs = runs;
        self
    }

    /// Sets the base seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets drop and corruption counts per instance.
    pub fn with_budget(mut self, drops: usize, corruptions: usize) -> Self {
        self.drops = drops;
        self.corruptions = corruptions;
        self
    }

    /// Sets the scheduling horizon.
    pub fn with_steps(mut self, steps: u64) -> Self {
        self.steps = steps;
        self
    }

    /// Sets the replica set size.
    pub fn with_replicas(mut self, n: usize) -> Self {
        self.replicas = n;
        self
    }

    /// Sets the results file.
    pub fn with_results_out(mut self, path: PathBuf) -> Self {
        self.results_out = Some(path);
        self
    }

    /// Sets the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    fn run_campaign(&self) -> Result<CampaignResult, CommandError> {
        let base_seed = self.seed.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs()
        });
        let params = GeneratorParams {
            n: self.replicas,
            drops: self.drops,
            corruptions: self.corruptions,
            steps: self.steps,
            timeout: self.timeout,
            liveness_timeout: self.liveness_timeout,
        };
        let options = RunOptions::default()
            .with_replicas(self.replicas)
            .with_bound_height(self.bound_height);

        let mut results_file = match &self.results_out {
            Some(path) => Some(BufWriter::new(File::create(path)?)),
            None => None,
        };

        // Campaign-level flag so a signal between runs stops the loop;
        // each run additionally registers its engine's own flag.
        let interrupted = Arc::new(AtomicBool::new(false));
        let _signals = SignalGuard::install(&interrupted)?;

        tracing::info!(
            runs = self.runs,
            base_seed,
            drops = self.drops,
            corruptions = self.corruptions,
            steps = self.steps,
            "starting campaign"
        );

        let mut completed = 0;
        let mut failures = Vec::new();
        for i in 0..self.runs {
            if interrupted.load(Ordering::Relaxed) {
                println!("{}", format_warning("interrupted, stopping campaign"));
                break;
            }

            let run_seed = base_seed.wrapping_add(i);
            let instance = generate_seeded(run_seed, &params)?;
            let sim = SimOptions::default()
                .with_slot_interval(self.slot_interval)
                .with_delivery_seed(run_seed);

            let started_at = chrono::Utc::now();
            let wall = Instant::now();
            let report = drive_instance(instance.clone(), &options, &sim, None)?;
            let duration_ms = wall.elapsed().as_millis() as u64;
            completed += 1;

            let record = CampaignRecord {
                seq: i,
                seed: run_seed,
                started_at: started_at.to_rfc3339(),
                duration_ms,
                instance,
                report: report.clone(),
            };
            if let Some(file) = &mut results_file {
                writeln!(file, "{}", serde_json::to_string(&record)?)?;
            }
            self.print_run(&record)?;

            if outcome_of(report.verdict) == Outcome::ViolationFound {
                failures.push(FailureRecord {
                    seq: i,
                    seed: run_seed,
                    state: report.state,
                });
            }
        }

        if let Some(file) = &mut results_file {
            file.flush()?;
        }
        Ok(CampaignResult {
            base_seed,
            completed,
            failures,
        })
    }

    fn print_run(&self, record: &CampaignRecord) -> Result<(), CommandError> {
        match self.format {
            OutputFormat::Human => println!(
                "run {}/{} seed={} state={} verdict=[{}] ({} ms)",
                record.seq + 1,
                self.runs,
                record.seed,
                record.report.state,
                record.report.verdict,
                record.duration_ms
            ),
            OutputFormat::Json => println!("{}", serde_json::to_string(record)?),
        }
        Ok(())
    }

    fn print_summary(&self, result: &CampaignResult) {
        if self.format == OutputFormat::Json {
            return;
        }
        println!("\n{}", BANNER);
        println!("Fuzz Campaign Results");
        println!("{}", BANNER);
        println!("Base seed: {}", result.base_seed);
        println!("Runs: {}/{}", result.completed, self.runs);
        println!("Violations: {}", result.failures.len());

        if result.failures.is_empty() {
            println!("\n✓ All runs passed!");
        } else {
            println!("\n✗ Violations detected:");
            for failure in &result.failures {
                println!(
                    "  • Run {}: {} (seed: {})",
                    failure.seq, failure.state, failure.seed
                );
            }
            println!("\nReproduce one with: byzzfuzz fuzz --runs 1 --seed <seed>");
        }
    }
}

impl Command for FuzzCommand {
    fn execute(&self) -> Result<Outcome, CommandError> {
        let result = self.run_campaign()?;
        self.print_summary(&result);

        if result.failures.is_empty() {
            Ok(Outcome::Passed)
        } else {
            Ok(Outcome::ViolationFound)
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// One line of the campaign's JSONL results file.
#[derive(Debug, Clone, Serialize)]
struct CampaignRecord {
    seq: u64,
    seed: u64,
    started_at: String,
    duration_ms: u64,
    instance: InstanceConfig,
    report: RunReport,
}

/// Record of a single violating run.
#[derive(Debug, Clone)]
struct FailureRecord {
    seq: u64,
    seed: u64,
    state: OracleState,
}

/// Outcome of a whole campaign.
#[derive(Debug)]
struct CampaignResult {
    base_seed: u64,
    completed: u64,
    failures: Vec<FailureRecord>,
}

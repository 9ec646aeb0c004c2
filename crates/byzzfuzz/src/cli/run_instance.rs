//! Run command for executing a single fault schedule.

use std::path::PathBuf;
use std::time::Duration;

use super::{
    BANNER, Command, CommandError, Outcome, OutputFormat, drive_instance, format_error,
    format_success, outcome_of, print_report_body, read_instance,
};
use crate::engine::{RunOptions, RunReport};
use crate::regressions::regression;
use crate::schedule::InstanceConfig;
use crate::sim_cluster::SimOptions;

// ============================================================================
// Run-Instance Command
// ============================================================================

/// Runs one instance against the simulated cluster.
#[derive(Debug, Clone)]
pub struct RunInstanceCommand {
    /// Instance JSON file. Read from stdin when absent.
    pub instance: Option<PathBuf>,

    /// Named regression schedule instead of a file.
    pub bug: Option<String>,

    /// Size of the replica set.
    pub replicas: usize,

    /// Height at which the oracle caps the search.
    pub bound_height: u64,

    /// Wall-clock length of one protocol slot.
    pub slot_interval: Duration,

    /// Seed for per-slot delivery shuffling.
    pub delivery_seed: u64,

    /// Fault window override. The stored schedule's value applies when
    /// absent.
    pub timeout: Option<Duration>,

    /// Liveness grace window override.
    pub liveness_timeout: Option<Duration>,

    /// Write the run trace as JSONL to this path.
    pub trace_out: Option<PathBuf>,

    /// Output format.
    pub format: OutputFormat,
}

impl Default for RunInstanceCommand {
    fn default() -> Self {
        Self {
            instance: None,
            bug: None,
            replicas: 4,
            bound_height: 3,
            slot_interval: Duration::from_millis(2),
            delivery_seed: 0,
            timeout: None,
            liveness_timeout: None,
            trace_out: None,
            format: OutputFormat::Human,
        }
    }
}

impl RunInstanceCommand {
    /// Sets the instance file to run.
    pub fn with_instance(mut self, path: PathBuf) -> Self {
        self.instance = Some(path);
        self
    }

    /// Selects a named regression schedule.
    pub fn with_bug(mut self, name: impl Into<String>) -> Self {
        self.bug = Some(name.into());
        self
    }

    /// Sets the replica set size.
    pub fn with_replicas(mut self, n: usize) -> Self {
        self.replicas = n;
        self
    }

    /// Sets the oracle's height cap.
    pub fn with_bound_height(mut self, bound_height: u64) -> Self {
        self.bound_height = bound_height;
        self
    }

    /// Overrides the fault window length.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the liveness grace window.
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = Some(timeout);
        self
    }

    /// Sets the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Resolves the instance from the bug name, the file, or stdin.
    fn load_instance(&self) -> Result<InstanceConfig, CommandError> {
        let mut config = match (&self.bug, &self.instance) {
            (Some(_), Some(_)) => {
                return Err(CommandError::Usage(
                    "give either --bug or an instance file, not both".to_owned(),
                ));
            }
            (Some(name), None) => regression(name)?,
            (None, path) => read_instance(path.as_deref())?,
        };
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        if let Some(timeout) = self.liveness_timeout {
            config = config.with_liveness_timeout(timeout);
        }
        Ok(config)
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
        println!("Fault Injection Run");
        println!("{}", BANNER);
        print_report_body(report);

        if report.verdict.safety_holds && report.verdict.liveness_holds {
            println!("\n{}", format_success("safety and liveness hold"));
        } else {
            println!("\n{}", format_error(&report.verdict.to_string()));
        }
    }
}

impl Command for RunInstanceCommand {
    fn execute(&self) -> Result<Outcome, CommandError> {
        let config = self.load_instance()?;
        let options = RunOptions::default()
            .with_replicas(self.replicas)
            .with_bound_height(self.bound_height);
        let sim = SimOptions::default()
            .with_slot_interval(self.slot_interval)
            .with_delivery_seed(self.delivery_seed);

        let report = drive_instance(config, &options, &sim, self.trace_out.as_deref())?;
        self.print_results(&report)?;
        Ok(outcome_of(report.verdict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_instance_command_builder() {
        let cmd = RunInstanceCommand::default()
            .with_bug("bug001")
            .with_replicas(7)
            .with_bound_height(5)
            .with_format(OutputFormat::Json);

        assert_eq!(cmd.bug.as_deref(), Some("bug001"));
        assert_eq!(cmd.replicas, 7);
        assert_eq!(cmd.bound_height, 5);
        assert_eq!(cmd.format, OutputFormat::Json);
    }

    #[test]
    fn bug_and_file_together_are_rejected() {
        let cmd = RunInstanceCommand::default()
            .with_bug("bug001")
            .with_instance(PathBuf::from("instance.json"));

        assert!(matches!(
            cmd.load_instance(),
            Err(CommandError::Usage(_))
        ));
    }

    #[test]
    fn named_regressions_load_with_overridden_timeouts() {
        let cmd = RunInstanceCommand::default()
            .with_bug("bug002")
            .with_timeout(Duration::from_millis(250))
            .with_liveness_timeout(Duration::from_millis(125));

        let config = cmd.load_instance().unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.liveness_timeout(), Duration::from_millis(125));
        assert_eq!(config.drops.len(), 2);
    }

    #[test]
    fn unknown_bug_names_surface_as_config_errors() {
        let cmd = RunInstanceCommand::default().with_bug("bug999");
        assert!(matches!(
            cmd.load_instance(),
            Err(CommandError::Config(_))
        ));
    }
}

//! Verify command: replay a schedule twice and require identical verdicts.
//!
//! The cluster and every injection decision are seeded, so two runs of
//! the same instance must reach the same oracle state. A divergence
//! means nondeterminism crept into the pipeline and replay can no
//! longer be trusted.

use std::path::PathBuf;
use std::time::Duration;

use super::{
    BANNER, Command, CommandError, Outcome, OutputFormat, drive_instance, format_success,
    outcome_of, read_instance,
};
use crate::engine::{RunOptions, RunReport};
use crate::regressions::{REGRESSION_NAMES, regression};
use crate::schedule::InstanceConfig;
use crate::sim_cluster::SimOptions;

// ============================================================================
// Verify Command
// ============================================================================

/// Replays one schedule twice and compares the outcomes.
#[derive(Debug, Clone)]
pub struct VerifyCommand {
    /// Named regression schedule.
    pub bug: Option<String>,

    /// Instance JSON file.
    pub instance: Option<PathBuf>,

    /// List the known regression names and exit.
    pub list: bool,

    /// Size of the replica set.
    pub replicas: usize,

    /// Height at which the oracle caps the search.
    pub bound_height: u64,

    /// Wall-clock length of one protocol slot.
    pub slot_interval: Duration,

    /// Seed for per-slot delivery shuffling, shared by both runs.
    pub delivery_seed: u64,

    /// Fault window override. Regressions store the deployment-scale
    /// window; replays want a short one.
    pub timeout: Duration,

    /// Liveness grace window override.
    pub liveness_timeout: Duration,

    /// Output format.
    pub format: OutputFormat,
}

impl Default for VerifyCommand {
    fn default() -> Self {
        Self {
            bug: None,
            instance: None,
            list: false,
            replicas: 4,
            bound_height: 3,
            slot_interval: Duration::from_millis(2),
            delivery_seed: 0,
            timeout: Duration::from_secs(1),
            liveness_timeout: Duration::from_secs(1),
            format: OutputFormat::Human,
        }
    }
}

impl VerifyCommand {
    /// Selects a named regression schedule.
    pub fn with_bug(mut self, name: impl Into<String>) -> Self {
        self.bug = Some(name.into());
        self
    }

    /// Sets the instance file to verify.
    pub fn with_instance(mut self, path: PathBuf) -> Self {
        self.instance = Some(path);
        self
    }

    /// Sets the replica set size.
    pub fn with_replicas(mut self, n: usize) -> Self {
        self.replicas = n;
        self
    }

    /// Sets the fault window for both replays.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    fn load_instance(&self) -> Result<InstanceConfig, CommandError> {
        let config = match (&self.bug, &self.instance) {
            (Some(_), Some(_)) => {
                return Err(CommandError::Usage(
                    "give either --bug or an instance file, not both".to_owned(),
                ));
            }
            (Some(name), None) => regression(name)?,
            (None, Some(path)) => read_instance(Some(path))?,
            (None, None) => {
                return Err(CommandError::Usage(format!(
                    "nothing to verify; give --bug <{}> or an instance file",
                    REGRESSION_NAMES.join("|")
                )));
            }
        };
        Ok(config
            .with_timeout(self.timeout)
            .with_liveness_timeout(self.liveness_timeout))
    }

    fn print_results(&self, first: &RunReport, second: &RunReport) -> Result<(), CommandError> {
        match self.format {
            OutputFormat::Human => {
                println!("\n{}", BANNER);
                println!("Replay Verification");
                println!("{}", BANNER);
                println!("First run:  {} [{}]", first.state, first.verdict);
                println!("Second run: {} [{}]", second.state, second.verdict);
                println!("\n{}", format_success("replays agree"));
            }
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "first": first,
                    "second": second,
                    "deterministic": true,
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
        }
        Ok(())
    }
}

impl Command for VerifyCommand {
    fn execute(&self) -> Result<Outcome, CommandError> {
        if self.list {
            for name in REGRESSION_NAMES {
                println!("{}", name);
            }
            return Ok(Outcome::Passed);
        }

        let config = self.load_instance()?;
        let options = RunOptions::default()
            .with_replicas(self.replicas)
            .with_bound_height(self.bound_height);
        let sim = SimOptions::default()
            .with_slot_interval(self.slot_interval)
            .with_delivery_seed(self.delivery_seed);

        let first = drive_instance(config.clone(), &options, &sim, None)?;
        let second = drive_instance(config, &options, &sim, None)?;

        // Stats carry wall-clock artifacts (how many messages fit in
        // the fault window), so determinism is judged on the decision.
        if first.state != second.state || first.verdict != second.verdict {
            return Err(CommandError::ReplayDiverged {
                first: format!("{} [{}]", first.state, first.verdict),
                second: format!("{} [{}]", second.state, second.verdict),
            });
        }

        self.print_results(&first, &second)?;
        Ok(outcome_of(first.verdict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_command_builder() {
        let cmd = VerifyCommand::default()
            .with_bug("lagging")
            .with_replicas(4)
            .with_timeout(Duration::from_millis(400))
            .with_format(OutputFormat::Json);

        assert_eq!(cmd.bug.as_deref(), Some("lagging"));
        assert_eq!(cmd.timeout, Duration::from_millis(400));
        assert_eq!(cmd.format, OutputFormat::Json);
    }

    #[test]
    fn loaded_regressions_use_the_replay_windows() {
        let cmd = VerifyCommand::default()
            .with_bug("bug003")
            .with_timeout(Duration::from_millis(300));

        let config = cmd.load_instance().unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(300));
        assert_eq!(config.liveness_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn missing_source_is_a_usage_error() {
        let err = VerifyCommand::default().load_instance().unwrap_err();
        let CommandError::Usage(message) = err else {
            panic!("expected usage error, got {err}");
        };
        assert!(message.contains("bug001"));
    }

    #[test]
    fn both_sources_are_a_usage_error() {
        let cmd = VerifyCommand::default()
            .with_bug("bug001")
            .with_instance(PathBuf::from("schedule.json"));
        assert!(matches!(cmd.load_instance(), Err(CommandError::Usage(_))));
    }
}

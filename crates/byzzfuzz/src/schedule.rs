//! Fault schedules: the unit of generation, persistence, and replay.
//!
//! An [`InstanceConfig`] pins down one run completely: which steps lose
//! messages across which partition, which steps get which corruption
//! from the Byzantine sender, and the two run timeouts. JSON is the
//! canonical persisted form; a stored instance replayed against the
//! same build and seeds reproduces the run exactly.

use std::io::Read;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::corruption::CorruptionKind;
use crate::error::ConfigError;
use crate::harness::ReplicaId;
use crate::partition::Partition;
use crate::step::Step;

/// Default for both run timeouts: 60 seconds.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const fn default_timeout_ns() -> u64 {
    DEFAULT_TIMEOUT.as_nanos() as u64
}

// ============================================================================
// Drop Rules
// ============================================================================

/// Suppress messages crossing `partition` at one step.
///
/// Matches any message whose sender produced it at
/// `step.global_round()`, whose kind occupies `step.slot()`, and whose
/// sender and receiver are isolated by `partition`. Partitions are not
/// restricted to catalog entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropRule {
    pub step: Step,
    pub partition: Partition,
}

// ============================================================================
// Corruption Rules
// ============================================================================

/// Apply one corruption to messages from one sender at one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorruptionRule {
    pub step: Step,
    #[serde(rename = "from_node")]
    pub from: ReplicaId,
    /// Non-empty set of receivers the mutation applies to.
    #[serde(rename = "to_nodes")]
    pub to: Vec<ReplicaId>,
    #[serde(rename = "corruption_type")]
    pub kind: CorruptionKind,
    /// Sole source of in-kind variation; stored so replays are exact.
    pub seed: u64,
}

impl CorruptionRule {
    /// True when this rule covers a message from `from` to `to`.
    pub fn covers(&self, from: ReplicaId, to: ReplicaId) -> bool {
        self.from == from && self.to.contains(&to)
    }
}

// ============================================================================
// Instance Configuration
// ============================================================================

/// One complete fault schedule plus run timeouts.
///
/// Immutable once built. Timeouts serialize as integer nanoseconds
/// under the historical field names `timeout` and `liveness_timeout`;
/// both default to 60 seconds when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(default)]
    pub drops: Vec<DropRule>,
    #[serde(default)]
    pub corruptions: Vec<CorruptionRule>,
    /// Fault window length: injection stops this long after run start.
    #[serde(rename = "timeout", default = "default_timeout_ns")]
    pub timeout_ns: u64,
    /// Extra time after the fault window for the protocol to commit
    /// again.
    #[serde(rename = "liveness_timeout", default = "default_timeout_ns")]
    pub liveness_timeout_ns: u64,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self::zero_faults()
    }
}

impl InstanceConfig {
    /// An instance that injects nothing. Useful as a control run.
    pub fn zero_faults() -> Self {
        Self {
            drops: Vec::new(),
            corruptions: Vec::new(),
            timeout_ns: default_timeout_ns(),
            liveness_timeout_ns: default_timeout_ns(),
        }
    }

    /// Replaces the fault window length.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ns = timeout.as_nanos() as u64;
        self
    }

    /// Replaces the liveness grace window.
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout_ns = timeout.as_nanos() as u64;
        self
    }

    /// Fault window as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_nanos(self.timeout_ns)
    }

    /// Liveness grace window as a [`Duration`].
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_nanos(self.liveness_timeout_ns)
    }

    /// Decodes one instance from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Decodes one instance from a JSON reader (stdin, a results log
    /// entry).
    pub fn from_json_reader(reader: impl Read) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Encodes this instance as canonical JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Validates the schedule against a replica set of size `n`.
    ///
    /// Checks well-formedness only: partitions partition `0..n`,
    /// replica indices are in range, destination sets are non-empty.
    /// A kind targeting a slot it cannot rewrite is legal and simply
    /// fails open at runtime.
    pub fn validate(&self, n: usize) -> Result<(), ConfigError> {
        for drop in &self.drops {
            drop.partition.validate(n)?;
        }
        for corruption in &self.corruptions {
            if corruption.to.is_empty() {
                return Err(ConfigError::EmptyDestinations);
            }
            if corruption.from.as_usize() >= n {
                return Err(ConfigError::ReplicaOutOfRange {
                    index: corruption.from.as_usize(),
                    n,
                });
            }
            for &to in &corruption.to {
                if to.as_usize() >= n {
                    return Err(ConfigError::ReplicaOutOfRange {
                        index: to.as_usize(),
                        n,
                    });
                }
            }
            if !corruption.kind.applies_to(corruption.step.slot()) {
                tracing::warn!(
                    step = %corruption.step,
                    kind = %corruption.kind,
                    "corruption kind cannot rewrite its target slot, rule will fail open"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Slot;

    fn sample() -> InstanceConfig {
        InstanceConfig {
            drops: vec![DropRule {
                step: Step::new(4),
                partition: Partition::new(vec![vec![0], vec![1, 2, 3]]),
            }],
            corruptions: vec![CorruptionRule {
                step: Step::new(1),
                from: ReplicaId::new(1),
                to: vec![ReplicaId::new(0), ReplicaId::new(2)],
                kind: CorruptionKind::NilifyVote,
                seed: 42,
            }],
            timeout_ns: 60_000_000_000,
            liveness_timeout_ns: 60_000_000_000,
        }
    }

    #[test]
    fn json_round_trip_is_lossless() {
        let config = sample();
        let json = config.to_json_string().unwrap();
        let back = InstanceConfig::from_json_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn decodes_the_historical_field_names() {
        let json = r#"{
            "drops": [{"step": 4, "partition": [[0], [1, 2, 3]]}],
            "corruptions": [{"step": 1, "from_node": 1, "to_nodes": [0, 2],
                             "corruption_type": 1, "seed": 42}],
            "timeout": 60000000000,
            "liveness_timeout": 60000000000
        }"#;
        let config = InstanceConfig::from_json_str(json).unwrap();
        assert_eq!(config, sample());
    }

    #[test]
    fn missing_timeouts_default_to_sixty_seconds() {
        let config = InstanceConfig::from_json_str(r#"{"drops": [], "corruptions": []}"#).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.liveness_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn unknown_corruption_codes_fail_at_decode() {
        let json = r#"{
            "drops": [],
            "corruptions": [{"step": 0, "from_node": 0, "to_nodes": [1],
                             "corruption_type": 9, "seed": 0}]
        }"#;
        assert!(InstanceConfig::from_json_str(json).is_err());
    }

    #[test]
    fn validation_checks_ranges_and_destinations() {
        let mut config = sample();
        assert!(config.validate(4).is_ok());

        config.corruptions[0].to.clear();
        assert!(matches!(
            config.validate(4),
            Err(ConfigError::EmptyDestinations)
        ));

        let mut config = sample();
        config.corruptions[0].from = ReplicaId::new(9);
        assert!(matches!(
            config.validate(4),
            Err(ConfigError::ReplicaOutOfRange { index: 9, n: 4 })
        ));

        let mut config = sample();
        config.drops[0].partition = Partition::new(vec![vec![0], vec![1, 2]]);
        assert!(config.validate(4).is_err());
    }

    #[test]
    fn corruption_rule_coverage() {
        let rule = CorruptionRule {
            step: Step::at(0, Slot::Prevote),
            from: ReplicaId::new(1),
            to: vec![ReplicaId::new(2), ReplicaId::new(3)],
            kind: CorruptionKind::Omit,
            seed: 0,
        };
        assert!(rule.covers(ReplicaId::new(1), ReplicaId::new(2)));
        assert!(!rule.covers(ReplicaId::new(1), ReplicaId::new(0)));
        assert!(!rule.covers(ReplicaId::new(2), ReplicaId::new(3)));
    }
}

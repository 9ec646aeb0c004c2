//! The safety/liveness oracle.
//!
//! Consumes commit observations and decides the run. Safety is
//! agreement: no two replicas may commit different blocks at the same
//! height. Liveness is judged only after fault injection goes quiet:
//! once the shared test-finished flag is set by the watchdog, the next
//! consistent commit proves the protocol recovered.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::codec::BlockId;
use crate::harness::ReplicaId;

// ============================================================================
// Liveness Flag
// ============================================================================

/// Shared marker that the fault window is over.
///
/// Set once by the watchdog, read on every rule evaluation and commit.
/// Clones share the underlying flag. Readers need only eventual,
/// atomic visibility, hence relaxed ordering throughout.
#[derive(Debug, Clone, Default)]
pub struct LivenessFlag(Arc<AtomicBool>);

impl LivenessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the fault window as over. Idempotent.
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Oracle States
// ============================================================================

/// Where the oracle stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OracleState {
    /// No verdict-relevant observation yet.
    Running,
    /// Some replica committed at or past the bound height. Caps the
    /// search depth; not terminal by itself.
    MaxHeightReached,
    /// Two different blocks were committed at the same height.
    /// Terminal, failing, and permanent.
    DiffCommits,
    /// A consistent commit happened after the fault window. Terminal,
    /// passing.
    Success,
}

impl OracleState {
    /// True when the run is decided and event intake should stop.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::DiffCommits | Self::Success)
    }
}

impl std::fmt::Display for OracleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::MaxHeightReached => "max-height-reached",
            Self::DiffCommits => "diff-commits",
            Self::Success => "success",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Verdict
// ============================================================================

/// The run's outcome, produced once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// No conflicting commits were ever observed.
    pub safety_holds: bool,
    /// The protocol committed again after faults stopped.
    pub liveness_holds: bool,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "safety {} / liveness {}",
            if self.safety_holds { "ok" } else { "VIOLATED" },
            if self.liveness_holds { "ok" } else { "VIOLATED" }
        )
    }
}

// ============================================================================
// Oracle
// ============================================================================

/// Tracks commits and derives the run verdict.
///
/// Created fresh per run. Per height it keeps the first committed block
/// id ever observed; any later mismatch at that height is a safety
/// violation regardless of which replicas were involved.
#[derive(Debug)]
pub struct SafetyLivenessOracle {
    state: OracleState,
    bound_height: u64,
    first_commit: HashMap<u64, BlockId>,
    flag: LivenessFlag,
    commits_observed: u64,
}

impl SafetyLivenessOracle {
    /// Creates an oracle bounding the search at `bound_height`.
    pub fn new(bound_height: u64, flag: LivenessFlag) -> Self {
        Self {
            state: OracleState::Running,
            bound_height,
            first_commit: HashMap::new(),
            flag,
            commits_observed: 0,
        }
    }

    /// Feeds one commit observation. Returns the state afterwards.
    ///
    /// Terminal states are sticky; once decided, further observations
    /// change nothing.
    pub fn observe_commit(
        &mut self,
        replica: ReplicaId,
        height: u64,
        block_id: &BlockId,
    ) -> OracleState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.commits_observed += 1;

        match self.first_commit.entry(height) {
            Entry::Occupied(first) => {
                if first.get() != block_id {
                    tracing::error!(
                        height,
                        first = %first.get(),
                        conflicting = %block_id,
                        replica = %replica,
                        "conflicting commits at the same height"
                    );
                    self.state = OracleState::DiffCommits;
                    return self.state;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(block_id.clone());
            }
        }

        if self.flag.is_set() {
            tracing::info!(height, replica = %replica, "commit after the fault window");
            self.state = OracleState::Success;
        } else if height >= self.bound_height {
            tracing::debug!(height, bound = self.bound_height, "bound height reached");
            self.state = OracleState::MaxHeightReached;
        }
        self.state
    }

    pub fn state(&self) -> OracleState {
        self.state
    }

    /// Total commits fed to this oracle.
    pub fn commits_observed(&self) -> u64 {
        self.commits_observed
    }

    /// The verdict for the current state. Meaningful once the run has
    /// stopped (terminal state, timeout, or cancellation).
    pub fn verdict(&self) -> Verdict {
        Verdict {
            safety_holds: self.state != OracleState::DiffCommits,
            liveness_holds: self.state == OracleState::Success,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const R0: ReplicaId = ReplicaId::new(0);
    const R1: ReplicaId = ReplicaId::new(1);

    fn block(id: &str) -> BlockId {
        BlockId::new(id)
    }

    #[test]
    fn consistent_commits_keep_running() {
        let mut oracle = SafetyLivenessOracle::new(10, LivenessFlag::new());
        assert_eq!(oracle.observe_commit(R0, 1, &block("a")), OracleState::Running);
        assert_eq!(oracle.observe_commit(R1, 1, &block("a")), OracleState::Running);
        assert_eq!(oracle.observe_commit(R0, 2, &block("b")), OracleState::Running);
        let verdict = oracle.verdict();
        assert!(verdict.safety_holds);
        assert!(!verdict.liveness_holds);
    }

    #[test]
    fn conflicting_commits_are_terminal_and_sticky() {
        let mut oracle = SafetyLivenessOracle::new(10, LivenessFlag::new());
        oracle.observe_commit(R0, 5, &block("a"));
        assert_eq!(
            oracle.observe_commit(R1, 5, &block("b")),
            OracleState::DiffCommits
        );
        // Nothing rescues a safety violation.
        oracle.observe_commit(R0, 6, &block("c"));
        oracle.observe_commit(R1, 6, &block("c"));
        assert_eq!(oracle.state(), OracleState::DiffCommits);
        assert!(!oracle.verdict().safety_holds);
    }

    #[test]
    fn same_replica_may_repeat_its_commit() {
        let mut oracle = SafetyLivenessOracle::new(10, LivenessFlag::new());
        oracle.observe_commit(R0, 1, &block("a"));
        assert_eq!(oracle.observe_commit(R0, 1, &block("a")), OracleState::Running);
    }

    #[test]
    fn bound_height_is_not_terminal() {
        let flag = LivenessFlag::new();
        let mut oracle = SafetyLivenessOracle::new(3, flag.clone());
        assert_eq!(
            oracle.observe_commit(R0, 3, &block("a")),
            OracleState::MaxHeightReached
        );
        assert!(!oracle.state().is_terminal());

        // Flag flips, next consistent commit decides the run.
        flag.set();
        assert_eq!(
            oracle.observe_commit(R1, 4, &block("b")),
            OracleState::Success
        );
        let verdict = oracle.verdict();
        assert!(verdict.safety_holds);
        assert!(verdict.liveness_holds);
    }

    #[test]
    fn success_needs_the_flag() {
        let flag = LivenessFlag::new();
        let mut oracle = SafetyLivenessOracle::new(100, flag.clone());
        oracle.observe_commit(R0, 1, &block("a"));
        assert_eq!(oracle.state(), OracleState::Running);
        flag.set();
        assert_eq!(
            oracle.observe_commit(R0, 2, &block("b")),
            OracleState::Success
        );
    }

    #[test]
    fn conflict_beats_success_on_the_same_observation() {
        let flag = LivenessFlag::new();
        let mut oracle = SafetyLivenessOracle::new(10, flag.clone());
        oracle.observe_commit(R0, 1, &block("a"));
        flag.set();
        assert_eq!(
            oracle.observe_commit(R1, 1, &block("z")),
            OracleState::DiffCommits
        );
        assert!(!oracle.verdict().safety_holds);
        assert!(!oracle.verdict().liveness_holds);
    }

    #[test]
    fn flag_clones_share_state() {
        let flag = LivenessFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_set());
        flag.set();
        assert!(clone.is_set());
    }
}

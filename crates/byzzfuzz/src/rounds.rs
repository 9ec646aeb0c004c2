//! Per-replica global round derivation.
//!
//! Protocol rounds restart at every height, so `(height, round)` pairs
//! cannot index a schedule directly. The [`RoundClock`] renumbers each
//! replica's step transitions into a single monotonic *global round*:
//! entering a new height costs one transition plus however many rounds
//! the new height starts past zero; advancing rounds within a height
//! costs the round delta. The clock also remembers the global round at
//! which each `(height, round)` position was entered, because a message
//! carries the position it was *produced* at and may be evaluated after
//! its sender has moved on.

use std::collections::HashMap;

use crate::harness::ReplicaId;

// ============================================================================
// Per-Replica State
// ============================================================================

#[derive(Debug)]
struct ReplicaRounds {
    /// Last observed height. Heights start at 1.
    height: u64,
    /// Last observed round within `height`.
    round: u32,
    /// Derived global round.
    global: u64,
    /// Global round at which each observed position was entered.
    entered_at: HashMap<(u64, u32), u64>,
}

impl Default for ReplicaRounds {
    fn default() -> Self {
        Self {
            height: 1,
            round: 0,
            global: 0,
            entered_at: HashMap::new(),
        }
    }
}

impl ReplicaRounds {
    fn observe(&mut self, height: u64, round: u32) {
        if height > self.height {
            self.global += 1 + u64::from(round);
        } else if round > self.round {
            self.global += u64::from(round - self.round);
        }
        self.height = height;
        self.round = round;
        self.entered_at.insert((height, round), self.global);
    }
}

// ============================================================================
// Round Clock
// ============================================================================

/// Tracks every replica's global round over one run.
///
/// Created fresh per run, fed exclusively by `NewStep` events. For
/// replicas with no observed step yet, both accessors return `None` and
/// round rules evaluate false; a Byzantine sender emitting messages
/// outside any tracked round must not fault the engine.
#[derive(Debug, Default)]
pub struct RoundClock {
    replicas: HashMap<ReplicaId, ReplicaRounds>,
}

impl RoundClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `replica` entered `(height, round)`.
    ///
    /// Repeated observations of the same position are no-ops on the
    /// derived global round.
    pub fn observe(&mut self, replica: ReplicaId, height: u64, round: u32) {
        self.replicas.entry(replica).or_default().observe(height, round);
    }

    /// The replica's current global round, if any step was observed.
    pub fn global_round_of(&self, replica: ReplicaId) -> Option<u64> {
        self.replicas.get(&replica).map(|state| state.global)
    }

    /// The global round at which `replica` entered `(height, round)`.
    ///
    /// `round` is the message-carried round and may be negative; a
    /// negative round never resolves. Positions the replica was never
    /// observed at do not resolve either.
    pub fn global_round_at(&self, replica: ReplicaId, height: u64, round: i64) -> Option<u64> {
        let round = u32::try_from(round).ok()?;
        self.replicas
            .get(&replica)?
            .entered_at
            .get(&(height, round))
            .copied()
    }
}

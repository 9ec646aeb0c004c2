//! The fault-scheduling coordinate.
//!
//! A consensus round consists of three message slots in fixed order:
//! proposal, prevote, precommit. Faults target one `(global round, slot)`
//! coordinate, serialized as the single integer
//! `step = global_round * 3 + slot_index`. The generator draws steps and
//! the evaluator matches them; both use this module, so the two can never
//! disagree on the encoding.

use serde::{Deserialize, Serialize};

use crate::codec::MessageKind;

/// Message slots per consensus round.
pub const SLOTS_PER_ROUND: u64 = 3;

// ============================================================================
// Slot
// ============================================================================

/// Position of a message kind within one consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Proposal,
    Prevote,
    Precommit,
}

impl Slot {
    /// The slot a message kind occupies, or `None` for kinds outside
    /// the round structure.
    pub fn of(kind: MessageKind) -> Option<Self> {
        match kind {
            MessageKind::Proposal => Some(Self::Proposal),
            MessageKind::Prevote => Some(Self::Prevote),
            MessageKind::Precommit => Some(Self::Precommit),
            MessageKind::Other => None,
        }
    }

    /// Index of this slot within its round.
    pub const fn index(self) -> u64 {
        match self {
            Self::Proposal => 0,
            Self::Prevote => 1,
            Self::Precommit => 2,
        }
    }

    /// Inverse of [`Slot::index`].
    pub const fn from_index(index: u64) -> Self {
        match index % SLOTS_PER_ROUND {
            0 => Self::Proposal,
            1 => Self::Prevote,
            _ => Self::Precommit,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Proposal => "proposal",
            Self::Prevote => "prevote",
            Self::Precommit => "precommit",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Step
// ============================================================================

/// A `(global round, slot)` coordinate in serialized form.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Step(u64);

impl Step {
    /// Creates a step from its serialized integer form.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Creates a step from a global round and a slot.
    pub const fn at(global_round: u64, slot: Slot) -> Self {
        Self(global_round * SLOTS_PER_ROUND + slot.index())
    }

    /// The serialized integer form.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The global round this step targets.
    pub const fn global_round(self) -> u64 {
        self.0 / SLOTS_PER_ROUND
    }

    /// The slot within the round this step targets.
    pub const fn slot(self) -> Slot {
        Slot::from_index(self.0 % SLOTS_PER_ROUND)
    }

    /// True when this step targets the given round/slot coordinate.
    pub fn matches(self, global_round: u64, slot: Slot) -> bool {
        self.global_round() == global_round && self.slot() == slot
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.global_round(), self.slot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_round_trips_round_and_slot() {
        for round in 0..10 {
            for slot in [Slot::Proposal, Slot::Prevote, Slot::Precommit] {
                let step = Step::at(round, slot);
                assert_eq!(step.global_round(), round);
                assert_eq!(step.slot(), slot);
            }
        }
    }

    #[test]
    fn slot_indices_follow_round_order() {
        assert_eq!(Step::new(0).slot(), Slot::Proposal);
        assert_eq!(Step::new(1).slot(), Slot::Prevote);
        assert_eq!(Step::new(2).slot(), Slot::Precommit);
        assert_eq!(Step::new(3).slot(), Slot::Proposal);
        assert_eq!(Step::new(3).global_round(), 1);
    }

    #[test]
    fn slot_of_message_kinds() {
        assert_eq!(Slot::of(MessageKind::Proposal), Some(Slot::Proposal));
        assert_eq!(Slot::of(MessageKind::Prevote), Some(Slot::Prevote));
        assert_eq!(Slot::of(MessageKind::Precommit), Some(Slot::Precommit));
        assert_eq!(Slot::of(MessageKind::Other), None);
    }

    #[test]
    fn matches_compares_both_coordinates() {
        let step = Step::at(4, Slot::Prevote);
        assert!(step.matches(4, Slot::Prevote));
        assert!(!step.matches(4, Slot::Precommit));
        assert!(!step.matches(5, Slot::Prevote));
    }
}

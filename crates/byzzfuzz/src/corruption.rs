//! The corruption catalog: small semantic message rewrites.
//!
//! Each corruption kind is a targeted, protocol-meaningful mutation of
//! one message, not random bit noise. Kinds form a closed union with
//! stable wire codes; an unknown code is a configuration error at
//! decode time, so rule evaluation never meets a kind it cannot
//! dispatch.
//!
//! Mutators are **fail-open**: if a rewrite cannot be performed (wrong
//! message kind, unresolvable signer, no known blocks yet), the
//! original message passes unchanged. A corruption bug must never
//! masquerade as a drop bug.

use serde::{Deserialize, Serialize};

use crate::codec::{BlockId, ConsensusMessage, ProtocolCodec};
use crate::error::ConfigError;
use crate::harness::RawMessage;
use crate::step::Slot;

// ============================================================================
// Corruption Kinds
// ============================================================================

/// One semantic mutation, wire-encoded as a stable `u8` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CorruptionKind {
    /// Rewrite a proposal's block reference to nil. Code 0.
    NilifyProposal,
    /// Rewrite a vote's block reference to nil. Code 1.
    NilifyVote,
    /// Rewrite a vote's round to a different round. Code 2.
    ShiftVoteRound,
    /// Suppress the message entirely. Code 3.
    Omit,
    /// Rewrite a vote's block reference to a block id already observed
    /// in proposals this run. Code 4.
    ChangeToKnownBlockId,
}

/// Kinds applicable to the proposal slot.
pub const PROPOSAL_KINDS: &[CorruptionKind] = &[CorruptionKind::NilifyProposal, CorruptionKind::Omit];

/// Kinds applicable to the vote slots.
pub const VOTE_KINDS: &[CorruptionKind] = &[
    CorruptionKind::NilifyVote,
    CorruptionKind::ShiftVoteRound,
    CorruptionKind::ChangeToKnownBlockId,
    CorruptionKind::Omit,
];

impl CorruptionKind {
    /// The stable wire code.
    pub const fn code(self) -> u8 {
        match self {
            Self::NilifyProposal => 0,
            Self::NilifyVote => 1,
            Self::ShiftVoteRound => 2,
            Self::Omit => 3,
            Self::ChangeToKnownBlockId => 4,
        }
    }

    /// True when this kind can rewrite messages in `slot`.
    pub fn applies_to(self, slot: Slot) -> bool {
        match self {
            Self::NilifyProposal => slot == Slot::Proposal,
            Self::NilifyVote | Self::ShiftVoteRound | Self::ChangeToKnownBlockId => {
                matches!(slot, Slot::Prevote | Slot::Precommit)
            }
            Self::Omit => true,
        }
    }
}

impl From<CorruptionKind> for u8 {
    fn from(kind: CorruptionKind) -> Self {
        kind.code()
    }
}

impl TryFrom<u8> for CorruptionKind {
    type Error = ConfigError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::NilifyProposal),
            1 => Ok(Self::NilifyVote),
            2 => Ok(Self::ShiftVoteRound),
            3 => Ok(Self::Omit),
            4 => Ok(Self::ChangeToKnownBlockId),
            other => Err(ConfigError::UnknownCorruptionCode(other)),
        }
    }
}

impl std::fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NilifyProposal => "nilify-proposal",
            Self::NilifyVote => "nilify-vote",
            Self::ShiftVoteRound => "shift-vote-round",
            Self::Omit => "omit",
            Self::ChangeToKnownBlockId => "change-to-known-block-id",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Mutator Application
// ============================================================================

/// Result of applying one mutator to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Deliver this rewritten message instead of the original.
    Replaced(RawMessage),
    /// Deliver nothing; suppression was the intended mutation.
    Suppressed,
    /// The rewrite could not be performed; the original passes
    /// unchanged.
    FailedOpen,
}

/// Applies `kind` to an intercepted message.
///
/// `message` is the parsed view of `raw`; `known_blocks` is the run's
/// observed-proposal history in first-seen order. The stored `seed` is
/// the only source of variation within a kind, so replays are exact.
pub fn apply_corruption(
    kind: CorruptionKind,
    seed: u64,
    raw: &RawMessage,
    message: &ConsensusMessage,
    known_blocks: &[BlockId],
    codec: &dyn ProtocolCodec,
) -> MutationOutcome {
    let outcome = match kind {
        CorruptionKind::Omit => {
            log_applied(kind, message);
            return MutationOutcome::Suppressed;
        }
        CorruptionKind::NilifyProposal => codec.nilify_proposal(message),
        CorruptionKind::NilifyVote => rewrite_vote(codec, message, || codec.nilify_vote(message)),
        CorruptionKind::ShiftVoteRound => {
            // Deterministic in the stored seed; never the original round.
            let shifted = message.round + 1 + (seed % 3) as i64;
            rewrite_vote(codec, message, || codec.change_vote_round(message, shifted))
        }
        CorruptionKind::ChangeToKnownBlockId => {
            if known_blocks.is_empty() {
                tracing::debug!(
                    kind = %kind,
                    from = %message.from,
                    "no proposals observed yet, corruption fails open"
                );
                return MutationOutcome::FailedOpen;
            }
            let target = &known_blocks[(seed as usize) % known_blocks.len()];
            rewrite_vote(codec, message, || codec.change_vote_block(message, target))
        }
    };

    match outcome.and_then(|rewritten| codec.encode(&rewritten)) {
        Ok(payload) => {
            log_applied(kind, message);
            MutationOutcome::Replaced(raw.with_payload(payload))
        }
        Err(err) => {
            tracing::debug!(kind = %kind, error = %err, "corruption fails open");
            MutationOutcome::FailedOpen
        }
    }
}

/// Resolves the vote's signer before rewriting, the way a production
/// codec re-signs under the original validator key. Votes with an
/// unresolvable signer cannot be re-signed and fail the rewrite.
fn rewrite_vote<F>(
    codec: &dyn ProtocolCodec,
    message: &ConsensusMessage,
    rewrite: F,
) -> Result<ConsensusMessage, crate::codec::CodecError>
where
    F: FnOnce() -> Result<ConsensusMessage, crate::codec::CodecError>,
{
    let signer = codec.vote_validator(message)?;
    let rewritten = rewrite()?;
    tracing::trace!(signer = %signer, "re-signing rewritten vote");
    Ok(rewritten)
}

fn log_applied(kind: CorruptionKind, message: &ConsensusMessage) {
    tracing::info!(
        height = message.height,
        round = message.round,
        from = %message.from,
        to = %message.to,
        kind = %kind,
        "corrupting message"
    );
}

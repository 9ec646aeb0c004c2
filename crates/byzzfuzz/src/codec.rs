//! The protocol codec seam.
//!
//! The engine never understands wire bytes itself. A [`ProtocolCodec`]
//! parses intercepted payloads into the [`ConsensusMessage`] view the
//! rules match on, and performs the semantic rewrites (nilify a
//! proposal, shift a vote round, swap a vote's block reference),
//! re-signing each rewritten message under its original sender.
//! Production deployments plug in their protocol's real codec;
//! [`JsonCodec`] is the reference implementation used by the scripted
//! cluster and the test suite.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::harness::{RawMessage, ReplicaId};

// ============================================================================
// Block Identity
// ============================================================================

/// Identity of a proposed block, opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

// ============================================================================
// Parsed Message View
// ============================================================================

/// Kind of a consensus message, as far as fault scheduling cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Proposal,
    Prevote,
    Precommit,
    /// Anything outside the three-slot round structure (block parts,
    /// catch-up traffic). Never matched by round rules.
    Other,
}

impl MessageKind {
    /// True for the two vote kinds.
    pub fn is_vote(self) -> bool {
        matches!(self, Self::Prevote | Self::Precommit)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Proposal => "proposal",
            Self::Prevote => "prevote",
            Self::Precommit => "precommit",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// The codec's parsed view of one wire message.
///
/// `round` is `i64` because the wire legitimately carries round `-1`
/// (nil-round votes); such messages never match any round rule.
/// `block_id = None` is the nil block reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusMessage {
    pub kind: MessageKind,
    pub from: ReplicaId,
    pub to: ReplicaId,
    pub height: u64,
    pub round: i64,
    pub block_id: Option<BlockId>,
}

impl ConsensusMessage {
    /// True for prevotes and precommits.
    pub fn is_vote(&self) -> bool {
        self.kind.is_vote()
    }
}

// ============================================================================
// Codec Errors
// ============================================================================

/// Errors from parsing or rewriting wire messages.
///
/// Inside a run these never propagate: a failing rewrite fails open and
/// the original message passes unchanged.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unparseable payload: {0}")]
    Unparseable(String),

    #[error("cannot encode message: {0}")]
    Encode(String),

    #[error("{operation} applies to {expected}, message is {actual}")]
    WrongKind {
        operation: &'static str,
        expected: &'static str,
        actual: MessageKind,
    },

    #[error("cannot resolve the signer of this message")]
    UnknownSigner,
}

// ============================================================================
// Codec Trait
// ============================================================================

/// Parsing and semantic rewriting for one protocol's wire format.
///
/// Every rewrite returns a *new* message re-signed under the original
/// sender; implementations must not mutate in place. A rewrite may fail
/// for protocol-specific reasons (unresolvable signer, unsignable
/// payload); the engine treats any failure as "leave the message
/// alone".
pub trait ProtocolCodec: Send + Sync {
    /// Parses an intercepted payload into the scheduling view.
    fn parse(&self, raw: &RawMessage) -> Result<ConsensusMessage, CodecError>;

    /// Serializes a (possibly rewritten) message back to wire bytes.
    fn encode(&self, message: &ConsensusMessage) -> Result<Bytes, CodecError>;

    /// Resolves the replica whose key signed this vote.
    fn vote_validator(&self, message: &ConsensusMessage) -> Result<ReplicaId, CodecError>;

    /// Rewrites a proposal's block reference to nil.
    fn nilify_proposal(&self, message: &ConsensusMessage) -> Result<ConsensusMessage, CodecError>;

    /// Rewrites a vote's block reference to nil.
    fn nilify_vote(&self, message: &ConsensusMessage) -> Result<ConsensusMessage, CodecError>;

    /// Rewrites a vote's round field.
    fn change_vote_round(
        &self,
        message: &ConsensusMessage,
        new_round: i64,
    ) -> Result<ConsensusMessage, CodecError>;

    /// Rewrites a vote's block reference to a specific block id.
    fn change_vote_block(
        &self,
        message: &ConsensusMessage,
        block_id: &BlockId,
    ) -> Result<ConsensusMessage, CodecError>;
}

// ============================================================================
// Reference JSON Codec
// ============================================================================

/// JSON wire format used by the scripted cluster and the tests.
///
/// The "signature" is a deterministic tag over the signed fields; it
/// stands in for the real curve signature a production codec would
/// produce, so that re-signing after a rewrite is observable in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[derive(Serialize, Deserialize)]
struct WireMessage {
    kind: MessageKind,
    from: usize,
    to: usize,
    height: u64,
    round: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_id: Option<String>,
    signature: String,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    fn signature_for(message: &ConsensusMessage) -> String {
        let block = message
            .block_id
            .as_ref()
            .map_or("nil", |id| id.as_str());
        format!(
            "sig:{}:{}:{}:{}:{}",
            message.from,
            message.kind,
            message.height,
            message.round,
            block
        )
    }

    fn require_vote(
        message: &ConsensusMessage,
        operation: &'static str,
    ) -> Result<(), CodecError> {
        if message.is_vote() {
            Ok(())
        } else {
            Err(CodecError::WrongKind {
                operation,
                expected: "prevote/precommit",
                actual: message.kind,
            })
        }
    }
}

impl ProtocolCodec for JsonCodec {
    fn parse(&self, raw: &RawMessage) -> Result<ConsensusMessage, CodecError> {
        let wire: WireMessage = serde_json::from_slice(&raw.payload)
            .map_err(|err| CodecError::Unparseable(err.to_string()))?;
        Ok(ConsensusMessage {
            kind: wire.kind,
            from: ReplicaId::new(wire.from),
            to: ReplicaId::new(wire.to),
            height: wire.height,
            round: wire.round,
            block_id: wire.block_id.map(BlockId::new),
        })
    }

    fn encode(&self, message: &ConsensusMessage) -> Result<Bytes, CodecError> {
        let wire = WireMessage {
            kind: message.kind,
            from: message.from.as_usize(),
            to: message.to.as_usize(),
            height: message.height,
            round: message.round,
            block_id: message.block_id.as_ref().map(|id| id.as_str().to_owned()),
            signature: Self::signature_for(message),
        };
        let bytes = serde_json::to_vec(&wire).map_err(|err| CodecError::Encode(err.to_string()))?;
        Ok(Bytes::from(bytes))
    }

    fn vote_validator(&self, message: &ConsensusMessage) -> Result<ReplicaId, CodecError> {
        Self::require_vote(message, "vote_validator")?;
        Ok(message.from)
    }

    fn nilify_proposal(&self, message: &ConsensusMessage) -> Result<ConsensusMessage, CodecError> {
        if message.kind != MessageKind::Proposal {
            return Err(CodecError::WrongKind {
                operation: "nilify_proposal",
                expected: "proposal",
                actual: message.kind,
            });
        }
        let mut rewritten = message.clone();
        rewritten.block_id = None;
        Ok(rewritten)
    }

    fn nilify_vote(&self, message: &ConsensusMessage) -> Result<ConsensusMessage, CodecError> {
        Self::require_vote(message, "nilify_vote")?;
        let mut rewritten = message.clone();
        rewritten.block_id = None;
        Ok(rewritten)
    }

    fn change_vote_round(
        &self,
        message: &ConsensusMessage,
        new_round: i64,
    ) -> Result<ConsensusMessage, CodecError> {
        Self::require_vote(message, "change_vote_round")?;
        let mut rewritten = message.clone();
        rewritten.round = new_round;
        Ok(rewritten)
    }

    fn change_vote_block(
        &self,
        message: &ConsensusMessage,
        block_id: &BlockId,
    ) -> Result<ConsensusMessage, CodecError> {
        Self::require_vote(message, "change_vote_block")?;
        let mut rewritten = message.clone();
        rewritten.block_id = Some(block_id.clone());
        Ok(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prevote() -> ConsensusMessage {
        ConsensusMessage {
            kind: MessageKind::Prevote,
            from: ReplicaId::new(1),
            to: ReplicaId::new(2),
            height: 3,
            round: 0,
            block_id: Some(BlockId::new("block-a")),
        }
    }

    #[test]
    fn wire_round_trip() {
        let codec = JsonCodec::new();
        let message = prevote();
        let bytes = codec.encode(&message).unwrap();
        let raw = RawMessage::new(message.from, message.to, bytes);
        let parsed = codec.parse(&raw).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn parse_rejects_garbage() {
        let codec = JsonCodec::new();
        let raw = RawMessage::new(
            ReplicaId::new(0),
            ReplicaId::new(1),
            Bytes::from_static(b"not json"),
        );
        assert!(matches!(
            codec.parse(&raw),
            Err(CodecError::Unparseable(_))
        ));
    }

    #[test]
    fn nilify_vote_clears_block_and_resigns() {
        let codec = JsonCodec::new();
        let message = prevote();
        let nilified = codec.nilify_vote(&message).unwrap();
        assert_eq!(nilified.block_id, None);
        assert_eq!(nilified.round, message.round);
        let before = codec.encode(&message).unwrap();
        let after = codec.encode(&nilified).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn nilify_proposal_rejects_votes() {
        let codec = JsonCodec::new();
        assert!(matches!(
            codec.nilify_proposal(&prevote()),
            Err(CodecError::WrongKind { .. })
        ));
    }

    #[test]
    fn change_vote_round_rewrites_round_only() {
        let codec = JsonCodec::new();
        let shifted = codec.change_vote_round(&prevote(), 2).unwrap();
        assert_eq!(shifted.round, 2);
        assert_eq!(shifted.block_id, prevote().block_id);
        assert_eq!(shifted.height, prevote().height);
    }

    #[test]
    fn vote_validator_is_the_sender() {
        let codec = JsonCodec::new();
        assert_eq!(codec.vote_validator(&prevote()).unwrap(), ReplicaId::new(1));
        let mut proposal = prevote();
        proposal.kind = MessageKind::Proposal;
        assert!(codec.vote_validator(&proposal).is_err());
    }
}

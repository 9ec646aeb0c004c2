//! The interception boundary: what the harness delivers and how the
//! engine answers.
//!
//! An external interception harness (or the in-process
//! [`crate::sim_cluster`]) observes a running protocol deployment and
//! forwards lifecycle events here: outbound messages before delivery,
//! inbound deliveries, step transitions, and commits. The engine answers
//! every event with an [`Intercept`] telling the harness what to do with
//! the message in flight. All per-run state lives in the engine's run
//! context; events carry everything the engine needs, there is no shared
//! session store.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Replica Identity
// ============================================================================

/// Index of a replica in the fixed replica set of a run.
///
/// Replicas are labeled `node0..nodeN-1` by the setup hook; the label is
/// the display form and is what appears in logs and trace records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(usize);

impl ReplicaId {
    /// Creates a replica id from its zero-based index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the zero-based index.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the stable partition label (`node0`, `node1`, ...).
    pub fn label(self) -> String {
        format!("node{}", self.0)
    }
}

impl std::fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node{}", self.0)
    }
}

impl From<usize> for ReplicaId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

// ============================================================================
// Messages in Flight
// ============================================================================

/// An intercepted wire message with its routing metadata.
///
/// The payload is opaque at this layer; the protocol codec parses it.
/// Replacement messages are built with [`RawMessage::with_payload`] so
/// routing metadata survives mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub from: ReplicaId,
    pub to: ReplicaId,
    pub payload: Bytes,
}

impl RawMessage {
    /// Creates a message between two replicas.
    pub fn new(from: ReplicaId, to: ReplicaId, payload: Bytes) -> Self {
        Self { from, to, payload }
    }

    /// Returns a copy of this message carrying a different payload.
    pub fn with_payload(&self, payload: Bytes) -> Self {
        Self {
            from: self.from,
            to: self.to,
            payload,
        }
    }
}

// ============================================================================
// Replica Events
// ============================================================================

/// One lifecycle event observed by the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaEvent {
    /// The replica this event happened on (the sender for
    /// `MessageSend`, the receiver for `MessageReceive`).
    pub replica: ReplicaId,
    pub body: EventBody,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBody {
    /// A message is about to leave the sender. The engine may suppress
    /// or replace it.
    MessageSend(RawMessage),
    /// A message arrived at its receiver. Observed for tracing only.
    MessageReceive(RawMessage),
    /// The replica entered a new `(height, round)` step.
    NewStep { height: u64, round: u32 },
    /// The replica committed a block at a height.
    CommittingBlock { height: u64, block_id: String },
}

impl ReplicaEvent {
    /// Convenience constructor for a send event.
    pub fn send(message: RawMessage) -> Self {
        Self {
            replica: message.from,
            body: EventBody::MessageSend(message),
        }
    }

    /// Convenience constructor for a receive event.
    pub fn receive(message: RawMessage) -> Self {
        Self {
            replica: message.to,
            body: EventBody::MessageReceive(message),
        }
    }

    /// Convenience constructor for a step transition.
    pub fn new_step(replica: ReplicaId, height: u64, round: u32) -> Self {
        Self {
            replica,
            body: EventBody::NewStep { height, round },
        }
    }

    /// Convenience constructor for a commit.
    pub fn commit(replica: ReplicaId, height: u64, block_id: impl Into<String>) -> Self {
        Self {
            replica,
            body: EventBody::CommittingBlock {
                height,
                block_id: block_id.into(),
            },
        }
    }
}

// ============================================================================
// Engine Answers
// ============================================================================

/// The engine's answer to one event.
///
/// For non-message events there is nothing to veto and the answer is
/// always [`Intercept::Deliver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intercept {
    /// Deliver the original message (or nothing to do for non-message
    /// events).
    Deliver,
    /// Deliver this mutated message instead of the original.
    Replace(RawMessage),
    /// Do not deliver the message at all.
    Suppress,
}

impl Intercept {
    /// True when the original message should reach its receiver
    /// unmodified.
    pub fn is_deliver(&self) -> bool {
        matches!(self, Self::Deliver)
    }
}

// ============================================================================
// Interceptor
// ============================================================================

/// Anything that answers harness events.
///
/// Implemented by the structured engine and the baseline engine; a
/// harness drives whichever it was handed without knowing which.
pub trait Interceptor {
    /// Feeds one event and answers what to do with it.
    fn handle_event(&mut self, event: &ReplicaEvent) -> Intercept;

    /// True once the backing run is decided or cancelled.
    fn is_ended(&self) -> bool;
}

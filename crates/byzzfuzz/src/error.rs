//! Error types for instance construction and run setup.
//!
//! Configuration problems are the only errors surfaced to callers: a
//! malformed instance must abort before the run starts. Everything that
//! can go wrong *during* a run (mutator failures, missing round state)
//! is absorbed by the fail-open rules in the engine and never appears
//! here.

// ============================================================================
// Configuration Errors
// ============================================================================

/// Errors raised while decoding or validating an instance before a run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("instance JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown corruption code {0}")]
    UnknownCorruptionCode(u8),

    #[error("partition is not a partition of 0..{n}: {reason}")]
    MalformedPartition { n: usize, reason: String },

    #[error("corruption rule has an empty destination set")]
    EmptyDestinations,

    #[error("replica index {index} out of range for {n} replicas")]
    ReplicaOutOfRange { index: usize, n: usize },

    #[error("cannot place {drops} distinct drop steps in {steps} steps")]
    TooManyDrops { drops: usize, steps: u64 },

    #[error("cannot place {corruptions} corruptions in an empty step horizon")]
    EmptyHorizon { corruptions: usize },

    #[error("{field} must be at most 100, got {value}")]
    InvalidPercentage { field: &'static str, value: u8 },

    #[error("replica set must have at least {min} members, got {n}")]
    TooFewReplicas { n: usize, min: usize },

    #[error("unknown regression instance {0:?}")]
    UnknownRegression(String),
}

//! # byzzfuzz: Round-Based Fault Injection for BFT Consensus
//!
//! A testing engine that subjects a Byzantine fault tolerant consensus
//! implementation to *structured* faults — network drops scoped to
//! single protocol steps and small-scope semantic message corruptions —
//! and judges every run with a safety/liveness oracle.
//!
//! ## Philosophy
//!
//! Random message fuzzing almost never finds consensus bugs: arbitrary
//! byte flips break signatures and get rejected at the wire. The
//! round-based approach instead mutates *within the protocol's own
//! vocabulary* (a nil block reference, a shifted vote round, an omitted
//! message) and targets faults at exact round/slot coordinates, so
//! every run is a meaningful adversarial schedule and every schedule
//! replays exactly from its JSON form.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        Fault Injection Engine                  │
//! │                                                                │
//! │  events   ┌────────────┐   ┌────────────┐   ┌──────────────┐   │
//! │ ────────▶ │ RoundClock │──▶│ Drop rules │──▶│ Corruptions  │   │
//! │           │ (renumber) │   │ (partition)│   │ (mutator)    │   │
//! │           └────────────┘   └────────────┘   └──────┬───────┘   │
//! │                                                    │intercepts │
//! │  commits  ┌──────────────────────┐                 ▼           │
//! │ ────────▶ │ SafetyLivenessOracle │──▶ verdict   deliver /      │
//! │           │ (DiffCommits? flag?) │              replace /      │
//! │           └──────────────────────┘              suppress       │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use byzzfuzz::{Engine, GeneratorParams, RunOptions, generate_seeded};
//!
//! // Draw one fault schedule from a seed, then run it.
//! let instance = generate_seeded(42, &GeneratorParams::default())?;
//! let mut engine = Engine::start(instance, &RunOptions::default(), codec)?;
//! // ... feed harness events, then:
//! println!("{}", engine.verdict());
//! ```
//!
//! ## Key Concepts
//!
//! - **`Step`**: one `(global round, slot)` fault coordinate
//! - **`RoundClock`**: renumbers per-height protocol rounds into global rounds
//! - **`Partition`**: a network partition; drops apply across its blocks
//! - **`CorruptionKind`**: the closed set of semantic mutations
//! - **`SafetyLivenessOracle`**: turns commit observations into a verdict

#![allow(clippy::doc_markdown)] // Protocol names in prose

pub mod cli;
pub mod sim_cluster;

mod baseline;
mod codec;
mod corruption;
mod engine;
mod error;
mod generate;
mod harness;
mod oracle;
mod partition;
mod regressions;
mod rounds;
mod schedule;
mod step;
mod trace;

pub use baseline::{BaselineConfig, BaselineEngine};
pub use codec::{BlockId, CodecError, ConsensusMessage, JsonCodec, MessageKind, ProtocolCodec};
pub use corruption::{
    CorruptionKind, MutationOutcome, PROPOSAL_KINDS, VOTE_KINDS, apply_corruption,
};
pub use engine::{
    Engine, EngineStats, LivenessWatchdog, RunOptions, RunReport, SharedEngine,
};
pub use error::ConfigError;
pub use generate::{GeneratorParams, generate_instance, generate_seeded};
pub use harness::{
    EventBody, Intercept, Interceptor, RawMessage, ReplicaEvent, ReplicaId,
};
pub use oracle::{LivenessFlag, OracleState, SafetyLivenessOracle, Verdict};
pub use partition::{Partition, enumerate_partitions, sample_partition};
pub use regressions::{REGRESSION_NAMES, regression};
pub use schedule::{CorruptionRule, DEFAULT_TIMEOUT, DropRule, InstanceConfig};
pub use sim_cluster::{SimCluster, SimOptions};
pub use step::{SLOTS_PER_ROUND, Slot, Step};
pub use trace::{
    DEFAULT_TRACE_CAPACITY, JsonlTraceSink, TraceBuffer, TraceRecord, TraceRecorder,
};

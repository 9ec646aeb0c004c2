//! Unstructured baseline fuzzing.
//!
//! The control arm for the structured engine: no rounds, no schedule,
//! just a per-message dice roll. A message is dropped with one
//! probability or garbled with another by flipping a single random
//! payload bit. Garbling keeps the wire format parseable — a flip that
//! breaks framing fails open — so baseline corruption stresses the
//! protocol, not the codec. Everything draws from one seeded RNG, so a
//! baseline run replays exactly given the same event sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::codec::ProtocolCodec;
use crate::engine::{Counters, EngineStats, LivenessWatchdog, RunOptions, RunReport};
use crate::error::ConfigError;
use crate::harness::{EventBody, Intercept, RawMessage, ReplicaEvent};
use crate::oracle::{LivenessFlag, OracleState, SafetyLivenessOracle, Verdict};
use crate::schedule::DEFAULT_TIMEOUT;
use crate::trace::{TraceBuffer, TraceRecorder};

// ============================================================================
// Baseline Configuration
// ============================================================================

/// Probabilities and seed for one baseline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Chance (0-100) of dropping each outbound message.
    pub drop_percent: u8,
    /// Chance (0-100) of garbling each surviving message.
    pub corrupt_percent: u8,
    /// Seed for all per-message rolls.
    pub seed: u64,
    #[serde(rename = "timeout", default = "default_timeout_ns")]
    pub timeout_ns: u64,
    #[serde(rename = "liveness_timeout", default = "default_timeout_ns")]
    pub liveness_timeout_ns: u64,
}

const fn default_timeout_ns() -> u64 {
    DEFAULT_TIMEOUT.as_nanos() as u64
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            drop_percent: 10,
            corrupt_percent: 10,
            seed: 0,
            timeout_ns: default_timeout_ns(),
            liveness_timeout_ns: default_timeout_ns(),
        }
    }
}

impl BaselineConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.timeout_ns)
    }

    pub fn liveness_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_nanos(self.liveness_timeout_ns)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.drop_percent > 100 {
            return Err(ConfigError::InvalidPercentage {
                field: "drop_percent",
                value: self.drop_percent,
            });
        }
        if self.corrupt_percent > 100 {
            return Err(ConfigError::InvalidPercentage {
                field: "corrupt_percent",
                value: self.corrupt_percent,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Baseline Engine
// ============================================================================

/// Per-message random fault injection with the same oracle, watchdog,
/// and trace plumbing as the structured engine.
pub struct BaselineEngine {
    config: BaselineConfig,
    codec: Arc<dyn ProtocolCodec>,
    rng: ChaCha8Rng,
    oracle: SafetyLivenessOracle,
    finished: LivenessFlag,
    recorder: TraceRecorder,
    trace: TraceBuffer,
    watchdog: LivenessWatchdog,
    cancelled: Arc<AtomicBool>,
    counters: Counters,
}

impl BaselineEngine {
    /// Validates the probabilities and starts a run.
    pub fn start(
        config: BaselineConfig,
        options: &RunOptions,
        codec: Arc<dyn ProtocolCodec>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let finished = LivenessFlag::new();
        let trace = TraceBuffer::with_capacity(options.trace_capacity);
        let recorder = TraceRecorder::new(trace.clone(), finished.clone());
        let oracle = SafetyLivenessOracle::new(options.bound_height, finished.clone());
        let watchdog = LivenessWatchdog::arm(&finished, config.timeout());
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        tracing::info!(
            drop_percent = config.drop_percent,
            corrupt_percent = config.corrupt_percent,
            seed = config.seed,
            "starting baseline injection"
        );

        Ok(Self {
            config,
            codec,
            rng,
            oracle,
            finished,
            recorder,
            trace,
            watchdog,
            cancelled: Arc::new(AtomicBool::new(false)),
            counters: Counters::default(),
        })
    }

    /// Feeds one harness event.
    pub fn handle_event(&mut self, event: &ReplicaEvent) -> Intercept {
        if self.is_ended() {
            return Intercept::Deliver;
        }
        match &event.body {
            EventBody::NewStep { height, round } => {
                self.recorder.record_step(event.replica, *height, *round);
                Intercept::Deliver
            }
            EventBody::CommittingBlock { height, block_id } => {
                let block = crate::codec::BlockId::new(block_id.as_str());
                let state = self.oracle.observe_commit(event.replica, *height, &block);
                if state.is_terminal() {
                    tracing::info!(state = %state, "run decided");
                    self.watchdog.disarm();
                }
                Intercept::Deliver
            }
            EventBody::MessageReceive(raw) => {
                if let Ok(message) = self.codec.parse(raw) {
                    if message.is_vote() && message.round >= 0 {
                        self.recorder
                            .record_vote(raw.from, raw.to, message.height, message.round);
                    }
                }
                Intercept::Deliver
            }
            EventBody::MessageSend(raw) => self.evaluate_send(raw),
        }
    }

    fn evaluate_send(&mut self, raw: &RawMessage) -> Intercept {
        self.counters.messages_seen += 1;
        if self.finished.is_set() {
            return Intercept::Deliver;
        }
        if self.roll(self.config.drop_percent) {
            self.counters.drops_applied += 1;
            tracing::info!(from = %raw.from, to = %raw.to, "dropping message");
            return Intercept::Suppress;
        }
        if self.roll(self.config.corrupt_percent) {
            return self.garble(raw);
        }
        Intercept::Deliver
    }

    fn roll(&mut self, percent: u8) -> bool {
        self.rng.gen_range(0..100u32) < u32::from(percent)
    }

    /// Flips one random bit of the payload. A flip the codec can no
    /// longer parse fails open.
    fn garble(&mut self, raw: &RawMessage) -> Intercept {
        if raw.payload.is_empty() {
            self.counters.corruptions_failed_open += 1;
            return Intercept::Deliver;
        }
        let bit = self.rng.gen_range(0..raw.payload.len() * 8);
        let mut bytes = raw.payload.to_vec();
        bytes[bit / 8] ^= 1 << (bit % 8);
        let garbled = raw.with_payload(Bytes::from(bytes));

        match self.codec.parse(&garbled) {
            Ok(_) => {
                self.counters.corruptions_applied += 1;
                tracing::info!(from = %raw.from, to = %raw.to, bit, "garbling message");
                Intercept::Replace(garbled)
            }
            Err(_) => {
                self.counters.corruptions_failed_open += 1;
                Intercept::Deliver
            }
        }
    }

    pub fn is_ended(&self) -> bool {
        self.oracle.state().is_terminal() || self.cancelled.load(Ordering::Relaxed)
    }

    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.watchdog.disarm();
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn finished_flag(&self) -> LivenessFlag {
        self.finished.clone()
    }

    pub fn trace_buffer(&self) -> TraceBuffer {
        self.trace.clone()
    }

    pub fn oracle_state(&self) -> OracleState {
        self.oracle.state()
    }

    pub fn verdict(&self) -> Verdict {
        self.oracle.verdict()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            messages_seen: self.counters.messages_seen,
            drops_applied: self.counters.drops_applied,
            corruptions_applied: self.counters.corruptions_applied,
            corruptions_failed_open: self.counters.corruptions_failed_open,
            unparseable_passed: self.counters.unparseable_passed,
            commits_observed: self.oracle.commits_observed(),
            trace_emitted: self.recorder.emitted(),
            trace_dropped: self.recorder.dropped(),
        }
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            verdict: self.verdict(),
            state: self.oracle_state(),
            stats: self.stats(),
        }
    }
}

impl crate::harness::Interceptor for BaselineEngine {
    fn handle_event(&mut self, event: &ReplicaEvent) -> Intercept {
        BaselineEngine::handle_event(self, event)
    }

    fn is_ended(&self) -> bool {
        BaselineEngine::is_ended(self)
    }
}

impl std::fmt::Debug for BaselineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaselineEngine")
            .field("config", &self.config)
            .field("state", &self.oracle.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ConsensusMessage, JsonCodec, MessageKind};
    use crate::harness::ReplicaId;

    fn codec() -> Arc<dyn ProtocolCodec> {
        Arc::new(JsonCodec::new())
    }

    fn vote(from: usize, to: usize) -> RawMessage {
        let message = ConsensusMessage {
            kind: MessageKind::Prevote,
            from: ReplicaId::new(from),
            to: ReplicaId::new(to),
            height: 1,
            round: 0,
            block_id: Some(crate::codec::BlockId::new("block-a")),
        };
        let payload = JsonCodec::new().encode(&message).unwrap();
        RawMessage::new(message.from, message.to, payload)
    }

    fn config(drop: u8, corrupt: u8, seed: u64) -> BaselineConfig {
        BaselineConfig {
            drop_percent: drop,
            corrupt_percent: corrupt,
            seed,
            ..BaselineConfig::default()
        }
    }

    #[test]
    fn full_drop_probability_suppresses_everything() {
        let mut engine =
            BaselineEngine::start(config(100, 0, 1), &RunOptions::default(), codec()).unwrap();
        for i in 0..10 {
            let outcome = engine.handle_event(&ReplicaEvent::send(vote(i % 4, (i + 1) % 4)));
            assert_eq!(outcome, Intercept::Suppress);
        }
        assert_eq!(engine.stats().drops_applied, 10);
    }

    #[test]
    fn zero_probabilities_deliver_everything() {
        let mut engine =
            BaselineEngine::start(config(0, 0, 1), &RunOptions::default(), codec()).unwrap();
        for i in 0..10 {
            let outcome = engine.handle_event(&ReplicaEvent::send(vote(i % 4, (i + 1) % 4)));
            assert_eq!(outcome, Intercept::Deliver);
        }
        let stats = engine.stats();
        assert_eq!(stats.drops_applied, 0);
        assert_eq!(stats.corruptions_applied, 0);
    }

    #[test]
    fn garbled_replacements_differ_from_the_original() {
        let mut engine =
            BaselineEngine::start(config(0, 100, 7), &RunOptions::default(), codec()).unwrap();
        for i in 0..20 {
            let original = vote(i % 4, (i + 1) % 4);
            match engine.handle_event(&ReplicaEvent::send(original.clone())) {
                Intercept::Replace(garbled) => {
                    assert_ne!(garbled.payload, original.payload);
                    assert_eq!(garbled.from, original.from);
                }
                Intercept::Deliver => {} // flip broke framing, failed open
                Intercept::Suppress => panic!("baseline corrupt must never suppress"),
            }
        }
        let stats = engine.stats();
        assert_eq!(stats.corruptions_applied + stats.corruptions_failed_open, 20);
    }

    #[test]
    fn runs_are_deterministic_per_seed() {
        let run = |seed: u64| {
            let mut engine =
                BaselineEngine::start(config(30, 30, seed), &RunOptions::default(), codec())
                    .unwrap();
            let outcomes: Vec<Intercept> = (0..30)
                .map(|i| engine.handle_event(&ReplicaEvent::send(vote(i % 4, (i + 1) % 4))))
                .collect();
            (outcomes, engine.stats())
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42).0, run(43).0);
    }

    #[test]
    fn probabilities_above_one_hundred_are_rejected() {
        let result = BaselineEngine::start(config(101, 0, 0), &RunOptions::default(), codec());
        assert!(matches!(
            result,
            Err(ConfigError::InvalidPercentage { field: "drop_percent", .. })
        ));
    }

    #[test]
    fn injection_stops_after_the_fault_window() {
        let mut engine =
            BaselineEngine::start(config(100, 100, 1), &RunOptions::default(), codec()).unwrap();
        engine.finished_flag().set();
        assert_eq!(
            engine.handle_event(&ReplicaEvent::send(vote(0, 1))),
            Intercept::Deliver
        );
    }
}

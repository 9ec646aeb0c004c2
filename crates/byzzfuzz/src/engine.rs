//! The fault-injection engine: one instance per run.
//!
//! The engine consumes harness events and answers with intercept
//! decisions. Outbound messages are matched against the instance's drop
//! rules first, then its corruption rules, in configuration order; the
//! first match wins and a mutated message is never re-evaluated. All
//! verdict-relevant state — round clock, oracle, observed proposal
//! blocks — lives in one run context created at start and discarded
//! with the engine, so no state leaks between runs.
//!
//! Fault injection is bounded in time: an independent watchdog thread
//! sets the shared liveness flag once the fault window elapses, after
//! which every rule is permanently inert and the oracle starts judging
//! liveness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{BlockId, MessageKind, ProtocolCodec};
use crate::corruption::{MutationOutcome, apply_corruption};
use crate::error::ConfigError;
use crate::harness::{EventBody, Intercept, RawMessage, ReplicaEvent};
use crate::oracle::{LivenessFlag, OracleState, SafetyLivenessOracle, Verdict};
use crate::rounds::RoundClock;
use crate::schedule::InstanceConfig;
use crate::step::Slot;
use crate::trace::{DEFAULT_TRACE_CAPACITY, TraceBuffer, TraceRecorder};

// ============================================================================
// Run Options
// ============================================================================

/// Deployment-side parameters of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Size of the replica set.
    pub n: usize,
    /// Height at which the oracle caps the search.
    pub bound_height: u64,
    /// Capacity of the trace hand-off buffer.
    pub trace_capacity: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            n: 4,
            bound_height: 3,
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

impl RunOptions {
    pub fn with_replicas(mut self, n: usize) -> Self {
        self.n = n;
        self
    }

    pub fn with_bound_height(mut self, bound_height: u64) -> Self {
        self.bound_height = bound_height;
        self
    }

    pub fn with_trace_capacity(mut self, capacity: usize) -> Self {
        self.trace_capacity = capacity;
        self
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters for one run. Identical replays produce identical stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub messages_seen: u64,
    pub drops_applied: u64,
    pub corruptions_applied: u64,
    pub corruptions_failed_open: u64,
    pub unparseable_passed: u64,
    pub commits_observed: u64,
    pub trace_emitted: u64,
    pub trace_dropped: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) messages_seen: u64,
    pub(crate) drops_applied: u64,
    pub(crate) corruptions_applied: u64,
    pub(crate) corruptions_failed_open: u64,
    pub(crate) unparseable_passed: u64,
}

// ============================================================================
// Run Report
// ============================================================================

/// Everything a campaign records about one finished run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub verdict: Verdict,
    pub state: OracleState,
    pub stats: EngineStats,
}

// ============================================================================
// Liveness Watchdog
// ============================================================================

/// Timer thread that ends the fault window.
///
/// Sleeps interruptibly for the fault timeout, then sets the shared
/// liveness flag. Disarming (or dropping) before the timeout stops the
/// thread without setting the flag.
#[derive(Debug)]
pub struct LivenessWatchdog {
    cancel: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LivenessWatchdog {
    /// Starts the timer.
    pub fn arm(flag: &LivenessFlag, timeout: Duration) -> Self {
        let flag = flag.clone();
        let (cancel, wait) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            // The sender never sends; disarming drops it and wakes us.
            if wait.recv_timeout(timeout) == Err(mpsc::RecvTimeoutError::Timeout) {
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "fault window over");
                flag.set();
            }
        });
        Self {
            cancel: Some(cancel),
            handle: Some(handle),
        }
    }

    /// Stops the timer early without setting the flag. Idempotent.
    pub fn disarm(&mut self) {
        drop(self.cancel.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LivenessWatchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

// ============================================================================
// Run Context
// ============================================================================

/// The verdict-relevant state of one run, mutated only by the event
/// stream and discarded with the engine.
#[derive(Debug)]
struct RunContext {
    clock: RoundClock,
    oracle: SafetyLivenessOracle,
    /// Block ids observed in proposals, first-seen order. Source pool
    /// for `ChangeToKnownBlockId`.
    known_blocks: Vec<BlockId>,
    recorder: TraceRecorder,
    finished: LivenessFlag,
}

// ============================================================================
// Engine
// ============================================================================

/// Evaluates one instance against one run of the protocol.
pub struct Engine {
    config: InstanceConfig,
    codec: Arc<dyn ProtocolCodec>,
    ctx: RunContext,
    counters: Counters,
    trace: TraceBuffer,
    watchdog: LivenessWatchdog,
    cancelled: Arc<AtomicBool>,
}

impl Engine {
    /// Validates the instance and starts a run.
    ///
    /// The fault-window watchdog is armed here; the run clock starts
    /// ticking when this returns.
    pub fn start(
        config: InstanceConfig,
        options: &RunOptions,
        codec: Arc<dyn ProtocolCodec>,
    ) -> Result<Self, ConfigError> {
        if options.n < 2 {
            return Err(ConfigError::TooFewReplicas {
                n: options.n,
                min: 2,
            });
        }
        config.validate(options.n)?;

        let finished = LivenessFlag::new();
        let trace = TraceBuffer::with_capacity(options.trace_capacity);
        let recorder = TraceRecorder::new(trace.clone(), finished.clone());
        let oracle = SafetyLivenessOracle::new(options.bound_height, finished.clone());
        let watchdog = LivenessWatchdog::arm(&finished, config.timeout());

        tracing::info!(
            replicas = options.n,
            drops = config.drops.len(),
            corruptions = config.corruptions.len(),
            timeout_ms = config.timeout().as_millis() as u64,
            "starting fault injection"
        );

        Ok(Self {
            config,
            codec,
            ctx: RunContext {
                clock: RoundClock::new(),
                oracle,
                known_blocks: Vec::new(),
                recorder,
                finished,
            },
            counters: Counters::default(),
            trace,
            watchdog,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Feeds one harness event and answers what to do with it.
    ///
    /// After the run is decided or cancelled, intake stops: everything
    /// passes untouched.
    pub fn handle_event(&mut self, event: &ReplicaEvent) -> Intercept {
        if self.is_ended() {
            return Intercept::Deliver;
        }
        match &event.body {
            EventBody::NewStep { height, round } => {
                self.ctx.clock.observe(event.replica, *height, *round);
                self.ctx.recorder.record_step(event.replica, *height, *round);
                Intercept::Deliver
            }
            EventBody::CommittingBlock { height, block_id } => {
                let block = BlockId::new(block_id.as_str());
                let state = self.ctx.oracle.observe_commit(event.replica, *height, &block);
                if state.is_terminal() {
                    tracing::info!(state = %state, "run decided");
                    self.watchdog.disarm();
                }
                Intercept::Deliver
            }
            EventBody::MessageReceive(raw) => {
                if let Ok(message) = self.codec.parse(raw) {
                    if message.is_vote() && message.round >= 0 {
                        self.ctx
                            .recorder
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

        // Rules are permanently inert once the fault window ends.
        if self.ctx.finished.is_set() {
            return Intercept::Deliver;
        }

        let message = match self.codec.parse(raw) {
            Ok(message) => message,
            Err(err) => {
                self.counters.unparseable_passed += 1;
                tracing::trace!(from = %raw.from, error = %err, "unparseable message passes");
                return Intercept::Deliver;
            }
        };

        // Auxiliary observer: remember proposal blocks for
        // ChangeToKnownBlockId, whatever the rules decide below.
        if message.kind == MessageKind::Proposal {
            if let Some(block_id) = &message.block_id {
                if !self.ctx.known_blocks.contains(block_id) {
                    self.ctx.known_blocks.push(block_id.clone());
                }
            }
        }

        let Some(slot) = Slot::of(message.kind) else {
            return Intercept::Deliver;
        };
        // A message resolves against the round its sender produced it
        // in, not the sender's live round; negative or untracked rounds
        // match nothing.
        let Some(global_round) =
            self.ctx
                .clock
                .global_round_at(raw.from, message.height, message.round)
        else {
            return Intercept::Deliver;
        };

        for rule in &self.config.drops {
            if rule.step.matches(global_round, slot) && rule.partition.isolates(raw.from, raw.to) {
                self.counters.drops_applied += 1;
                tracing::info!(
                    height = message.height,
                    round = message.round,
                    global_round,
                    slot = %slot,
                    from = %raw.from,
                    to = %raw.to,
                    partition = %rule.partition,
                    "dropping message"
                );
                return Intercept::Suppress;
            }
        }

        for rule in &self.config.corruptions {
            if rule.step.matches(global_round, slot) && rule.covers(raw.from, raw.to) {
                return match apply_corruption(
                    rule.kind,
                    rule.seed,
                    raw,
                    &message,
                    &self.ctx.known_blocks,
                    self.codec.as_ref(),
                ) {
                    MutationOutcome::Replaced(replacement) => {
                        self.counters.corruptions_applied += 1;
                        Intercept::Replace(replacement)
                    }
                    MutationOutcome::Suppressed => {
                        self.counters.corruptions_applied += 1;
                        Intercept::Suppress
                    }
                    MutationOutcome::FailedOpen => {
                        self.counters.corruptions_failed_open += 1;
                        Intercept::Deliver
                    }
                };
            }
        }

        Intercept::Deliver
    }

    /// True once the run is decided or cancelled.
    pub fn is_ended(&self) -> bool {
        self.ctx.oracle.state().is_terminal() || self.cancelled.load(Ordering::Relaxed)
    }

    /// Stops event intake, leaving the verdict as last observed.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.watchdog.disarm();
    }

    /// Flag an operator-interrupt handler can set; equivalent to
    /// [`Engine::cancel`] minus the watchdog teardown, which happens on
    /// drop.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// The shared fault-window flag.
    pub fn finished_flag(&self) -> LivenessFlag {
        self.ctx.finished.clone()
    }

    /// Handle for draining trace records.
    pub fn trace_buffer(&self) -> TraceBuffer {
        self.trace.clone()
    }

    pub fn oracle_state(&self) -> OracleState {
        self.ctx.oracle.state()
    }

    pub fn verdict(&self) -> Verdict {
        self.ctx.oracle.verdict()
    }

    /// Snapshot of the run counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            messages_seen: self.counters.messages_seen,
            drops_applied: self.counters.drops_applied,
            corruptions_applied: self.counters.corruptions_applied,
            corruptions_failed_open: self.counters.corruptions_failed_open,
            unparseable_passed: self.counters.unparseable_passed,
            commits_observed: self.ctx.oracle.commits_observed(),
            trace_emitted: self.ctx.recorder.emitted(),
            trace_dropped: self.ctx.recorder.dropped(),
        }
    }

    /// The campaign-facing summary of this run.
    pub fn report(&self) -> RunReport {
        RunReport {
            verdict: self.verdict(),
            state: self.oracle_state(),
            stats: self.stats(),
        }
    }
}

impl crate::harness::Interceptor for Engine {
    fn handle_event(&mut self, event: &ReplicaEvent) -> Intercept {
        Engine::handle_event(self, event)
    }

    fn is_ended(&self) -> bool {
        Engine::is_ended(self)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("state", &self.ctx.oracle.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Shared Engine
// ============================================================================

/// An engine behind a single guard, for harnesses that deliver events
/// from multiple threads.
///
/// All round-clock and oracle mutation serializes with rule evaluation;
/// no rule evaluation can race a clock update.
#[derive(Debug, Clone)]
pub struct SharedEngine {
    inner: Arc<std::sync::Mutex<Engine>>,
}

impl SharedEngine {
    pub fn new(engine: Engine) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(engine)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Engine> {
        // A panicking holder cannot leave partial state worth keeping;
        // continue with whatever was last written.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn handle_event(&self, event: &ReplicaEvent) -> Intercept {
        self.lock().handle_event(event)
    }

    pub fn is_ended(&self) -> bool {
        self.lock().is_ended()
    }

    pub fn cancel(&self) {
        self.lock().cancel();
    }

    pub fn verdict(&self) -> Verdict {
        self.lock().verdict()
    }

    pub fn report(&self) -> RunReport {
        self.lock().report()
    }
}

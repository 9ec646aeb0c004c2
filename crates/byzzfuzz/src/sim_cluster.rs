//! A scripted in-process consensus cluster.
//!
//! Runs N honest replicas through a three-slot round script (propose,
//! prevote, precommit) in lockstep, pushing every message through an
//! [`Interceptor`] before delivery. This is the deployment the CLI runs
//! instances against: small enough to execute thousands of runs, real
//! enough that drops delay or stall commits and semantic corruptions
//! change what receivers tally.
//!
//! The script always advances: a replica with no proposal prevotes nil,
//! one without a precommit quorum moves to the next round. Replicas cut
//! off long enough fall behind and stay behind; the healthy majority
//! keeps committing, which is exactly the situation the liveness oracle
//! judges. All replica decisions are deterministic; the only randomness
//! is the seeded delivery shuffle within a slot.

use std::collections::{BTreeMap, HashMap};
use std::thread;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use crate::codec::{BlockId, ConsensusMessage, JsonCodec, MessageKind, ProtocolCodec};
use crate::error::ConfigError;
use crate::harness::{Intercept, Interceptor, RawMessage, ReplicaEvent, ReplicaId};
use crate::step::Slot;

// ============================================================================
// Options
// ============================================================================

/// Pacing and determinism knobs for one cluster run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimOptions {
    /// Wall-clock pause after each slot, so run timeouts measured in
    /// real time span a sensible number of rounds.
    pub slot_interval: Duration,
    /// Seed for the per-slot delivery shuffle.
    pub delivery_seed: u64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            slot_interval: Duration::from_millis(2),
            delivery_seed: 0,
        }
    }
}

impl SimOptions {
    pub fn with_slot_interval(mut self, interval: Duration) -> Self {
        self.slot_interval = interval;
        self
    }

    pub fn with_delivery_seed(mut self, seed: u64) -> Self {
        self.delivery_seed = seed;
        self
    }
}

// ============================================================================
// Replica State
// ============================================================================

/// Votes per `(height, round)`, one recorded choice per validator.
///
/// Keyed by the round as carried on the wire, so a vote shifted into a
/// future round lands in that round's tally.
type VoteTally = HashMap<(u64, i64), HashMap<ReplicaId, Option<BlockId>>>;

#[derive(Debug)]
struct ReplicaState {
    id: ReplicaId,
    height: u64,
    round: u32,
    proposals: HashMap<(u64, i64), BlockId>,
    prevotes: VoteTally,
    precommits: VoteTally,
    committed: BTreeMap<u64, BlockId>,
}

impl ReplicaState {
    fn new(id: ReplicaId) -> Self {
        Self {
            id,
            height: 1,
            round: 0,
            proposals: HashMap::new(),
            prevotes: HashMap::new(),
            precommits: HashMap::new(),
            committed: BTreeMap::new(),
        }
    }
}

/// The block holding at least `quorum` votes in one tally, if any.
/// Nil votes back no block.
fn quorum_choice(tally: &VoteTally, height: u64, round: u32, quorum: usize) -> Option<BlockId> {
    let votes = tally.get(&(height, i64::from(round)))?;
    let mut counts: HashMap<&BlockId, usize> = HashMap::new();
    for block in votes.values().flatten() {
        *counts.entry(block).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .find(|&(_, count)| count >= quorum)
        .map(|(block, _)| block.clone())
}

// ============================================================================
// Cluster
// ============================================================================

/// N scripted replicas and the wiring to an interceptor.
#[derive(Debug)]
pub struct SimCluster {
    replicas: Vec<ReplicaState>,
    quorum: usize,
    codec: JsonCodec,
    rng: ChaCha8Rng,
    phase: Slot,
    options: SimOptions,
}

impl SimCluster {
    /// Creates a cluster of `n` replicas at height 1, round 0.
    pub fn new(n: usize, options: SimOptions) -> Result<Self, ConfigError> {
        if n < 2 {
            return Err(ConfigError::TooFewReplicas { n, min: 2 });
        }
        Ok(Self {
            replicas: (0..n).map(|i| ReplicaState::new(ReplicaId::new(i))).collect(),
            // The +2/3 threshold.
            quorum: 2 * n / 3 + 1,
            codec: JsonCodec::new(),
            rng: ChaCha8Rng::seed_from_u64(options.delivery_seed),
            phase: Slot::Proposal,
            options,
        })
    }

    /// Runs slots until the interceptor ends the run or the deadline
    /// passes. Returns the number of slots executed.
    pub fn run<I: Interceptor>(&mut self, interceptor: &mut I, deadline: Duration) -> u64 {
        let started = Instant::now();
        let mut ticks = 0u64;
        while !interceptor.is_ended() && started.elapsed() < deadline {
            self.tick(interceptor);
            ticks += 1;
            if !self.options.slot_interval.is_zero() {
                thread::sleep(self.options.slot_interval);
            }
        }
        tracing::debug!(ticks, top_height = self.top_height(), "cluster stopped");
        ticks
    }

    /// Executes one slot across all replicas.
    pub fn tick<I: Interceptor>(&mut self, interceptor: &mut I) {
        match self.phase {
            Slot::Proposal => self.proposal_phase(interceptor),
            Slot::Prevote => self.prevote_phase(interceptor),
            Slot::Precommit => {
                self.precommit_phase(interceptor);
                self.advance_positions(interceptor);
            }
        }
        self.phase = Slot::from_index(self.phase.index() + 1);
    }

    /// The highest height any replica has committed.
    pub fn top_height(&self) -> u64 {
        self.replicas
            .iter()
            .map(|replica| replica.height - 1)
            .max()
            .unwrap_or(0)
    }

    /// The `(height, round)` position of every replica, in id order.
    pub fn positions(&self) -> Vec<(u64, u32)> {
        self.replicas
            .iter()
            .map(|replica| (replica.height, replica.round))
            .collect()
    }

    /// The block a replica committed at a height, if it has.
    pub fn committed_block(&self, replica: ReplicaId, height: u64) -> Option<&BlockId> {
        self.replicas
            .get(replica.as_usize())?
            .committed
            .get(&height)
    }

    fn proposer(height: u64, round: u32, n: usize) -> usize {
        ((height + u64::from(round)) % n as u64) as usize
    }

    fn position(&self, i: usize) -> (u64, u32) {
        (self.replicas[i].height, self.replicas[i].round)
    }

    fn fan_out(
        outbound: &mut Vec<ConsensusMessage>,
        n: usize,
        from: usize,
        kind: MessageKind,
        height: u64,
        round: u32,
        block: Option<BlockId>,
    ) {
        for to in (0..n).filter(|&to| to != from) {
            outbound.push(ConsensusMessage {
                kind,
                from: ReplicaId::new(from),
                to: ReplicaId::new(to),
                height,
                round: i64::from(round),
                block_id: block.clone(),
            });
        }
    }

    fn proposal_phase<I: Interceptor>(&mut self, interceptor: &mut I) {
        let n = self.replicas.len();
        let mut outbound = Vec::new();
        for i in 0..n {
            let (height, round) = self.position(i);
            interceptor.handle_event(&ReplicaEvent::new_step(self.replicas[i].id, height, round));
            if Self::proposer(height, round, n) == i {
                let block = BlockId::new(format!("blk-{height}-{round}-n{i}"));
                self.replicas[i]
                    .proposals
                    .insert((height, i64::from(round)), block.clone());
                Self::fan_out(
                    &mut outbound,
                    n,
                    i,
                    MessageKind::Proposal,
                    height,
                    round,
                    Some(block),
                );
            }
        }
        self.route(interceptor, outbound);
    }

    fn prevote_phase<I: Interceptor>(&mut self, interceptor: &mut I) {
        let n = self.replicas.len();
        let mut outbound = Vec::new();
        for i in 0..n {
            let (height, round) = self.position(i);
            // Prevote the proposal if one arrived, nil otherwise.
            let choice = self.replicas[i]
                .proposals
                .get(&(height, i64::from(round)))
                .cloned();
            let id = self.replicas[i].id;
            self.replicas[i]
                .prevotes
                .entry((height, i64::from(round)))
                .or_default()
                .insert(id, choice.clone());
            Self::fan_out(&mut outbound, n, i, MessageKind::Prevote, height, round, choice);
        }
        self.route(interceptor, outbound);
    }

    fn precommit_phase<I: Interceptor>(&mut self, interceptor: &mut I) {
        let n = self.replicas.len();
        let quorum = self.quorum;
        let mut outbound = Vec::new();
        for i in 0..n {
            let (height, round) = self.position(i);
            let choice = quorum_choice(&self.replicas[i].prevotes, height, round, quorum);
            let id = self.replicas[i].id;
            self.replicas[i]
                .precommits
                .entry((height, i64::from(round)))
                .or_default()
                .insert(id, choice.clone());
            Self::fan_out(&mut outbound, n, i, MessageKind::Precommit, height, round, choice);
        }
        self.route(interceptor, outbound);
    }

    fn advance_positions<I: Interceptor>(&mut self, interceptor: &mut I) {
        let quorum = self.quorum;
        for replica in &mut self.replicas {
            let (height, round) = (replica.height, replica.round);
            match quorum_choice(&replica.precommits, height, round, quorum) {
                Some(block) => {
                    interceptor
                        .handle_event(&ReplicaEvent::commit(replica.id, height, block.as_str()));
                    tracing::debug!(replica = %replica.id, height, block = %block, "committed");
                    replica.committed.insert(height, block);
                    replica.height += 1;
                    replica.round = 0;
                }
                None => replica.round += 1,
            }
        }
    }

    /// Pushes outbound messages through the interceptor, then delivers
    /// the survivors in shuffled order.
    fn route<I: Interceptor>(&mut self, interceptor: &mut I, outbound: Vec<ConsensusMessage>) {
        let mut deliveries = Vec::new();
        for message in outbound {
            let payload = match self.codec.encode(&message) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::error!(error = %err, "cannot encode outbound message");
                    continue;
                }
            };
            let raw = RawMessage::new(message.from, message.to, payload);
            match interceptor.handle_event(&ReplicaEvent::send(raw.clone())) {
                Intercept::Deliver => deliveries.push(raw),
                Intercept::Replace(replacement) => deliveries.push(replacement),
                Intercept::Suppress => {}
            }
        }
        // Delivery order within a slot is arbitrary in a real network.
        deliveries.shuffle(&mut self.rng);
        for raw in deliveries {
            interceptor.handle_event(&ReplicaEvent::receive(raw.clone()));
            match self.codec.parse(&raw) {
                Ok(message) => self.deliver(message),
                // A replacement that broke framing is simply lost.
                Err(err) => tracing::trace!(error = %err, "dropping unparseable delivery"),
            }
        }
    }

    fn deliver(&mut self, message: ConsensusMessage) {
        let Some(replica) = self.replicas.get_mut(message.to.as_usize()) else {
            return;
        };
        let position = (message.height, message.round);
        match message.kind {
            MessageKind::Proposal => {
                // First proposal wins; a nilified proposal carries no
                // block and leaves the receiver without one.
                if let Some(block) = message.block_id {
                    replica.proposals.entry(position).or_insert(block);
                }
            }
            MessageKind::Prevote => {
                replica
                    .prevotes
                    .entry(position)
                    .or_default()
                    .insert(message.from, message.block_id);
            }
            MessageKind::Precommit => {
                replica
                    .precommits
                    .entry(position)
                    .or_default()
                    .insert(message.from, message.block_id);
            }
            MessageKind::Other => {}
        }
    }
}

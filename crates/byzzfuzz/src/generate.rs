//! Randomized instance generation.
//!
//! Draws one fault schedule from the structured fault space: a handful
//! of drop steps (distinct, via a permutation draw), one Byzantine
//! sender for the whole instance, and per-corruption kinds chosen from
//! the set applicable to the targeted slot. All randomness flows from
//! the caller's seeded RNG; a campaign records the seed next to the
//! instance, and either is enough to reproduce the run.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::corruption::{PROPOSAL_KINDS, VOTE_KINDS};
use crate::error::ConfigError;
use crate::harness::ReplicaId;
use crate::partition::sample_partition;
use crate::schedule::{CorruptionRule, DropRule, InstanceConfig};
use crate::step::{Slot, Step};

// ============================================================================
// Generator Parameters
// ============================================================================

/// Bounds of the fault space to draw from.
///
/// Counts are exact: the generated instance carries exactly `drops`
/// drop rules and exactly `corruptions` corruption rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorParams {
    /// Size of the replica set.
    pub n: usize,
    /// Number of drop rules.
    pub drops: usize,
    /// Number of corruption rules.
    pub corruptions: usize,
    /// Scheduling horizon: steps are drawn from `0..steps`.
    pub steps: u64,
    /// Fault window length for generated instances.
    pub timeout: Duration,
    /// Liveness grace window for generated instances.
    pub liveness_timeout: Duration,
}

impl Default for GeneratorParams {
    fn default() -> Self {
        Self {
            n: 4,
            drops: 5,
            corruptions: 5,
            steps: 10,
            timeout: Duration::from_secs(60),
            liveness_timeout: Duration::from_secs(60),
        }
    }
}

impl GeneratorParams {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.n < 2 {
            return Err(ConfigError::TooFewReplicas {
                n: self.n,
                min: 2,
            });
        }
        if self.drops as u64 > self.steps {
            return Err(ConfigError::TooManyDrops {
                drops: self.drops,
                steps: self.steps,
            });
        }
        if self.corruptions > 0 && self.steps == 0 {
            return Err(ConfigError::EmptyHorizon {
                corruptions: self.corruptions,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Draws one instance from the fault space.
pub fn generate_instance<R: Rng>(
    rng: &mut R,
    params: &GeneratorParams,
) -> Result<InstanceConfig, ConfigError> {
    params.validate()?;

    // Permutation draw keeps drop steps distinct.
    let mut step_pool: Vec<u64> = (0..params.steps).collect();
    step_pool.shuffle(rng);

    let mut drops = Vec::with_capacity(params.drops);
    for &raw_step in &step_pool[..params.drops] {
        drops.push(DropRule {
            step: Step::new(raw_step),
            partition: sample_partition(rng, params.n)?,
        });
    }

    // One Byzantine sender per instance.
    let byzantine = ReplicaId::new(rng.gen_range(0..params.n));

    let mut corruptions = Vec::with_capacity(params.corruptions);
    for _ in 0..params.corruptions {
        let step = Step::new(rng.gen_range(0..params.steps));
        let kinds = if step.slot() == Slot::Proposal {
            PROPOSAL_KINDS
        } else {
            VOTE_KINDS
        };
        corruptions.push(CorruptionRule {
            step,
            from: byzantine,
            to: random_destinations(rng, params.n),
            kind: kinds[rng.gen_range(0..kinds.len())],
            seed: rng.next_u64(),
        });
    }

    Ok(InstanceConfig {
        drops,
        corruptions,
        timeout_ns: params.timeout.as_nanos() as u64,
        liveness_timeout_ns: params.liveness_timeout.as_nanos() as u64,
    })
}

/// [`generate_instance`] with its own RNG seeded from `seed`.
pub fn generate_seeded(seed: u64, params: &GeneratorParams) -> Result<InstanceConfig, ConfigError> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    generate_instance(&mut rng, params)
}

/// A non-empty random subset of the replica set, sorted ascending.
fn random_destinations<R: Rng>(rng: &mut R, n: usize) -> Vec<ReplicaId> {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    let size = 1 + rng.gen_range(0..n);
    let mut picked = indices[..size].to_vec();
    picked.sort_unstable();
    picked.into_iter().map(ReplicaId::new).collect()
}

//! Network partitions and the partition catalog.
//!
//! A drop rule carries a partition of the replica indices; a message is
//! droppable when its sender and receiver land in different blocks.
//! Drop rules accept *any* well-formed partition. The enumerated
//! catalog exists only as a sampling convenience for the generator: all
//! set partitions of the replica set except the trivial single-block
//! one, which is equivalent to having no partition at all.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::harness::ReplicaId;

/// Largest replica-set size for which the full catalog is enumerated.
/// Beyond this the catalog grows with the Bell numbers and sampling
/// switches to randomized construction.
const MAX_ENUMERATED_N: usize = 8;

// ============================================================================
// Partition
// ============================================================================

/// A partition of the replica indices into disjoint blocks.
///
/// Serialized as a list of lists of indices, e.g. `[[0], [1, 2, 3]]`.
/// Well-formedness (disjoint, non-empty blocks covering exactly
/// `0..n`) is checked by [`Partition::validate`] at configuration time,
/// not on every evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Partition(Vec<Vec<usize>>);

impl Partition {
    /// Creates a partition from its blocks, unvalidated.
    pub fn new(blocks: Vec<Vec<usize>>) -> Self {
        Self(blocks)
    }

    /// The blocks of this partition.
    pub fn blocks(&self) -> &[Vec<usize>] {
        &self.0
    }

    /// True when no block contains both replicas.
    ///
    /// Symmetric by construction. A replica that shares a block with
    /// itself (any well-formed partition) is never isolated from
    /// itself.
    pub fn isolates(&self, a: ReplicaId, b: ReplicaId) -> bool {
        !self
            .0
            .iter()
            .any(|block| block.contains(&a.as_usize()) && block.contains(&b.as_usize()))
    }

    /// Checks that this is a partition of `0..n`.
    pub fn validate(&self, n: usize) -> Result<(), ConfigError> {
        let malformed = |reason: String| ConfigError::MalformedPartition { n, reason };
        let mut seen = vec![false; n];
        for block in &self.0 {
            if block.is_empty() {
                return Err(malformed("empty block".to_owned()));
            }
            for &index in block {
                if index >= n {
                    return Err(malformed(format!("index {index} out of range")));
                }
                if seen[index] {
                    return Err(malformed(format!("index {index} appears twice")));
                }
                seen[index] = true;
            }
        }
        if let Some(missing) = seen.iter().position(|covered| !covered) {
            return Err(malformed(format!("index {missing} is not covered")));
        }
        Ok(())
    }

    /// True for the single-block partition, which isolates nobody.
    pub fn is_trivial(&self) -> bool {
        self.0.len() <= 1
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, block) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str("{")?;
            for (j, index) in block.iter().enumerate() {
                if j > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{index}")?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// All non-trivial set partitions of `0..n`, in canonical order: blocks
/// sorted by smallest element, indices ascending within each block.
pub fn enumerate_partitions(n: usize) -> Vec<Partition> {
    let mut catalog = Vec::new();
    let mut blocks: Vec<Vec<usize>> = Vec::new();
    assign(0, n, &mut blocks, &mut catalog);
    catalog
}

fn assign(index: usize, n: usize, blocks: &mut Vec<Vec<usize>>, catalog: &mut Vec<Partition>) {
    if index == n {
        if blocks.len() > 1 {
            catalog.push(Partition::new(blocks.clone()));
        }
        return;
    }
    for existing in 0..blocks.len() {
        blocks[existing].push(index);
        assign(index + 1, n, blocks, catalog);
        blocks[existing].pop();
    }
    blocks.push(vec![index]);
    assign(index + 1, n, blocks, catalog);
    blocks.pop();
}

/// Draws a non-trivial partition of `0..n`.
///
/// Uniform over the enumerated catalog for small `n`; for larger
/// replica sets each index is assigned to an existing or fresh block
/// and the trivial outcome is redrawn (not uniform over set partitions,
/// but every non-trivial partition remains reachable).
pub fn sample_partition<R: Rng>(rng: &mut R, n: usize) -> Result<Partition, ConfigError> {
    if n < 2 {
        return Err(ConfigError::TooFewReplicas { n, min: 2 });
    }
    if n <= MAX_ENUMERATED_N {
        let catalog = enumerate_partitions(n);
        let pick = rng.gen_range(0..catalog.len());
        return Ok(catalog[pick].clone());
    }
    loop {
        let mut blocks: Vec<Vec<usize>> = Vec::new();
        for index in 0..n {
            let slot = rng.gen_range(0..=blocks.len());
            if slot == blocks.len() {
                blocks.push(vec![index]);
            } else {
                blocks[slot].push(index);
            }
        }
        let partition = Partition::new(blocks);
        if !partition.is_trivial() {
            return Ok(partition);
        }
    }
}

use std::fmt::{self, Display, Formatter};

use log::{debug, trace};
use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::distance_matrix::DistanceMatrix;
use crate::error::{ClusterError, Result};

/// One merge step of a hierarchical clustering.
///
/// Cluster ids are the smallest original index each side contains, so
/// `left_child < right_child` and the merged cluster continues as `left_child`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinaryTreeNode {
    pub left_child: usize,
    pub right_child: usize,
    pub distance: f32,
}

impl BinaryTreeNode {
    pub fn new(left_child: usize, right_child: usize, distance: f32) -> Self {
        BinaryTreeNode { left_child, right_child, distance }
    }
}

impl Display for BinaryTreeNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.left_child, self.right_child, self.distance)
    }
}

/// Strategy that turns a distance matrix into a sequence of merges.
pub trait ClusterFunctor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Merges clusters until one remains or the closest pair is farther apart
    /// than `threshold`. A threshold of 1.0 always merges down to one cluster.
    ///
    /// # Arguments
    ///
    /// * `original` - reference distances, left untouched
    /// * `working` - scratch copy of the same dimension, its contents are undefined afterwards
    /// * `threshold` - distance cutoff in (0, 1]
    ///
    /// # Returns
    ///
    /// The merge steps in the order they were performed.
    fn cluster(
        &self,
        original: &DistanceMatrix,
        working: &mut DistanceMatrix,
        threshold: f32,
    ) -> Result<Vec<BinaryTreeNode>>;
}

/// Agglomerative linkage policies, i.e. how the distance from a freshly
/// merged cluster to every other cluster is derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    /// minimum over members
    #[default]
    Single,
    /// maximum over members
    Complete,
    /// size-weighted mean (UPGMA)
    Average,
    /// plain mean of both children (WPGMA)
    Weighted,
}

impl Linkage {
    /// Distance from cluster `k` to the union of `i` and `j`.
    #[inline]
    pub fn update(&self, d_ik: f32, d_jk: f32, n_i: usize, n_j: usize) -> f32 {
        match self {
            Linkage::Single => d_ik.min(d_jk),
            Linkage::Complete => d_ik.max(d_jk),
            Linkage::Average => {
                let (n_i, n_j) = (n_i as f32, n_j as f32);
                (n_i * d_ik + n_j * d_jk) / (n_i + n_j)
            }
            Linkage::Weighted => (d_ik + d_jk) / 2.0,
        }
    }
}

pub(crate) fn check_threshold(threshold: f32) -> Result<()> {
    if threshold > 0.0 && threshold <= 1.0 {
        Ok(())
    } else {
        Err(ClusterError::InvalidParameter(format!(
            "threshold must lie in (0, 1], got {}",
            threshold
        )))
    }
}

/// Nearest active neighbour of one slot. Ties go to the lower slot.
#[derive(Clone, Copy, Debug)]
struct Neighbour {
    distance: f32,
    slot: usize,
}

impl Neighbour {
    const NONE: Neighbour = Neighbour { distance: f32::INFINITY, slot: usize::MAX };

    #[inline]
    fn key(&self) -> (OrderedFloat<f32>, usize) {
        (OrderedFloat(self.distance), self.slot)
    }
}

#[inline]
fn distance(matrix: &DistanceMatrix, a: usize, b: usize) -> f32 {
    if a > b { matrix.cell(a, b) } else { matrix.cell(b, a) }
}

fn nearest(matrix: &DistanceMatrix, active: &[bool], slot: usize) -> Neighbour {
    (0..active.len())
        .filter(|&other| other != slot && active[other])
        .map(|other| Neighbour { distance: distance(matrix, slot, other), slot: other })
        .min_by_key(Neighbour::key)
        .unwrap_or(Neighbour::NONE)
}

impl ClusterFunctor for Linkage {
    fn name(&self) -> &'static str {
        match self {
            Linkage::Single => "single_linkage",
            Linkage::Complete => "complete_linkage",
            Linkage::Average => "average_linkage",
            Linkage::Weighted => "weighted_linkage",
        }
    }

    /// Slots keep their original index; a merge folds the higher slot into the
    /// lower one, so a slot's index is always the smallest member of its
    /// cluster. Every slot caches its nearest neighbour and only rows whose
    /// cached neighbour moved away are rescanned.
    fn cluster(
        &self,
        original: &DistanceMatrix,
        working: &mut DistanceMatrix,
        threshold: f32,
    ) -> Result<Vec<BinaryTreeNode>> {
        let n = original.size();
        if working.size() != n {
            return Err(ClusterError::CanNotRun(format!(
                "working matrix has dimension {}, original has {}",
                working.size(),
                n
            )));
        }
        if n < 2 {
            return Err(ClusterError::CanNotRun(format!("need at least 2 items, got {}", n)));
        }
        check_threshold(threshold)?;

        let merge_all = threshold >= 1.0;
        let mut active = vec![true; n];
        let mut sizes = vec![1usize; n];
        let mut neighbours: Vec<Neighbour> = {
            let matrix = &*working;
            let active = &active;
            (0..n).into_par_iter().map(|slot| nearest(matrix, active, slot)).collect()
        };
        let mut tree = Vec::with_capacity(n - 1);
        let mut rescans = 0usize;

        while tree.len() < n - 1 {
            // closest pair, ties resolved to the lowest (higher slot, lower slot)
            let Some((kept, absorbed, distance_ij)) = (0..n)
                .filter(|&slot| active[slot])
                .map(|slot| {
                    let nb = neighbours[slot];
                    (nb.distance, slot.max(nb.slot), slot.min(nb.slot))
                })
                .min_by_key(|&(d, hi, lo)| (OrderedFloat(d), hi, lo))
                .map(|(d, hi, lo)| (lo, hi, d))
            else {
                break;
            };
            if !merge_all && distance_ij > threshold {
                break;
            }

            for k in 0..n {
                if !active[k] || k == kept || k == absorbed {
                    continue;
                }
                let merged = self.update(
                    distance(working, k, kept),
                    distance(working, k, absorbed),
                    sizes[kept],
                    sizes[absorbed],
                );
                working.set_quick(k, kept, merged)?;
            }
            active[absorbed] = false;
            sizes[kept] += sizes[absorbed];

            let node = BinaryTreeNode::new(kept, absorbed, distance_ij);
            trace!("{}: merge {} + {} at {}", self.name(), kept, absorbed, distance_ij);
            tree.push(node);

            neighbours[absorbed] = Neighbour::NONE;
            neighbours[kept] = nearest(working, &active, kept);
            for k in 0..n {
                if !active[k] || k == kept {
                    continue;
                }
                let candidate = Neighbour { distance: distance(working, k, kept), slot: kept };
                let current = neighbours[k];
                if candidate.key() <= current.key() {
                    neighbours[k] = candidate;
                } else if current.slot == kept || current.slot == absorbed {
                    neighbours[k] = nearest(working, &active, k);
                    rescans += 1;
                }
            }
        }

        debug!(
            "{}: {} items, threshold {}, {} merges, {} row rescans, {} clusters left",
            self.name(),
            n,
            threshold,
            tree.len(),
            rescans,
            n - tree.len()
        );
        Ok(tree)
    }
}

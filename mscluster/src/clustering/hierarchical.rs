use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::clustering::analysis::{newick_tree, partition};
use crate::clustering::linkage::{check_threshold, BinaryTreeNode, ClusterFunctor};
use crate::distance_matrix::DistanceMatrix;
use crate::error::{ClusterError, Result};

/// Outcome of one clustering run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusteringResult {
    /// Partition of the input indices at the run's threshold.
    pub clusters: Vec<Vec<usize>>,
    /// Merge steps in execution order.
    pub dendrogram: Vec<BinaryTreeNode>,
}

/// Hierarchical clustering driver.
///
/// Similarities in [0, 1] are turned into distances `1 - similarity`, handed
/// to a [`ClusterFunctor`] and the resulting merges are collected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterHierarchical {
    threshold: f32,
}

impl Default for ClusterHierarchical {
    fn default() -> Self {
        // 1.0 builds the complete dendrogram
        ClusterHierarchical { threshold: 1.0 }
    }
}

impl ClusterHierarchical {
    pub fn new(threshold: f32) -> Result<Self> {
        check_threshold(threshold)?;
        Ok(ClusterHierarchical { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f32) -> Result<()> {
        check_threshold(threshold)?;
        self.threshold = threshold;
        Ok(())
    }

    /// Builds `1 - comparator(data[i], data[j])` for all pairs.
    ///
    /// The matrix is allocated before the comparator runs, then its rows are
    /// evaluated in parallel.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if the matrix cannot be allocated, `UnnormalizedComparator`
    /// as soon as a similarity falls outside [0, 1].
    pub fn distance_matrix<D, F>(&self, data: &[D], comparator: F) -> Result<DistanceMatrix>
    where
        D: Sync,
        F: Fn(&D, &D) -> f32 + Sync,
    {
        let n = data.len();
        let mut matrix = DistanceMatrix::new(n, 1.0)?;
        matrix.fill_rows(|row, cells| {
            for (col, cell) in cells.iter_mut().enumerate() {
                let similarity = comparator(&data[row], &data[col]);
                if !(0.0..=1.0).contains(&similarity) {
                    return Err(ClusterError::UnnormalizedComparator { value: similarity, row, col });
                }
                *cell = 1.0 - similarity;
            }
            Ok(())
        })?;
        if n > 0 {
            matrix.recompute_minimum()?;
        }
        Ok(matrix)
    }

    /// Clusters a prebuilt distance matrix. The matrix is copied as working scratch.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if a distance lies outside [0, 1].
    pub fn cluster_matrix(
        &self,
        original: &DistanceMatrix,
        clusterer: &dyn ClusterFunctor,
    ) -> Result<ClusteringResult> {
        if let Some((row, col, value)) = original.iter().find(|(_, _, v)| !(0.0..=1.0).contains(v)) {
            return Err(ClusterError::InvalidParameter(format!(
                "distance ({}, {}) = {} lies outside [0, 1]",
                row, col, value
            )));
        }

        let n = original.size();
        if n < 2 {
            return Ok(ClusteringResult {
                clusters: (0..n).map(|i| vec![i]).collect(),
                dendrogram: Vec::new(),
            });
        }

        let mut working = original.clone();
        let dendrogram = clusterer.cluster(original, &mut working, self.threshold)?;
        let clusters = partition(n, &dendrogram)?;

        info!(
            "{}: {} items -> {} clusters at threshold {}",
            clusterer.name(),
            n,
            clusters.len(),
            self.threshold
        );
        Ok(ClusteringResult { clusters, dendrogram })
    }

    /// Partitions `data` under `comparator` at the engine's threshold.
    pub fn cluster_for_vector<D, F>(
        &self,
        data: &[D],
        comparator: F,
        clusterer: &dyn ClusterFunctor,
    ) -> Result<Vec<Vec<usize>>>
    where
        D: Sync,
        F: Fn(&D, &D) -> f32 + Sync,
    {
        let original = self.distance_matrix(data, comparator)?;
        Ok(self.cluster_matrix(&original, clusterer)?.clusters)
    }

    /// Like [`cluster_for_vector`](Self::cluster_for_vector) but also returns the
    /// merge history and writes it to `output_path`.
    pub fn cluster_for_dendrogram<D, F, P>(
        &self,
        data: &[D],
        comparator: F,
        clusterer: &dyn ClusterFunctor,
        output_path: P,
    ) -> Result<ClusteringResult>
    where
        D: Sync,
        F: Fn(&D, &D) -> f32 + Sync,
        P: AsRef<Path>,
    {
        let original = self.distance_matrix(data, comparator)?;
        let result = self.cluster_matrix(&original, clusterer)?;
        write_dendrogram(output_path.as_ref(), &result.dendrogram)?;
        Ok(result)
    }
}

/// Writes merge steps as tab separated `left right distance` lines followed by
/// the Newick string (omitted for an empty dendrogram).
pub fn write_dendrogram(path: &Path, dendrogram: &[BinaryTreeNode]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "# left_child\tright_child\tdistance")?;
    for node in dendrogram {
        writeln!(writer, "{}", node)?;
    }
    if !dendrogram.is_empty() {
        writeln!(writer, "# newick {}", newick_tree(dendrogram, true)?)?;
    }
    writer.flush()?;
    debug!("wrote {} merge steps to {}", dendrogram.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::linkage::Linkage;

    fn identity_similarity(a: &f32, b: &f32) -> f32 {
        1.0 - (a - b).abs()
    }

    #[test]
    fn test_threshold_validation() {
        assert_eq!(ClusterHierarchical::default().threshold(), 1.0);
        assert!(ClusterHierarchical::new(0.0).is_err());
        assert!(ClusterHierarchical::new(1.5).is_err());
        let mut engine = ClusterHierarchical::new(0.3).unwrap();
        assert!(engine.set_threshold(f32::NAN).is_err());
        assert_eq!(engine.threshold(), 0.3);
    }

    #[test]
    fn test_distance_matrix_from_similarity() {
        let data = vec![0.0f32, 0.25, 0.75];
        let m = ClusterHierarchical::default().distance_matrix(&data, identity_similarity).unwrap();
        assert_eq!(m.size(), 3);
        assert!((m.get(1, 0).unwrap() - 0.25).abs() < 1e-6);
        assert!((m.get(0, 2).unwrap() - 0.75).abs() < 1e-6);
        assert_eq!(m.minimum_coordinates().unwrap(), (1, 0));
    }

    #[test]
    fn test_unnormalized_comparator_fails_fast() {
        let data = vec![0.0f32, 2.0, 3.0];
        let engine = ClusterHierarchical::default();
        let result = engine.cluster_for_vector(&data, identity_similarity, &Linkage::Single);
        assert!(matches!(result, Err(ClusterError::UnnormalizedComparator { .. })));

        let nan = engine.distance_matrix(&data, |_: &f32, _: &f32| f32::NAN);
        assert!(matches!(nan, Err(ClusterError::UnnormalizedComparator { .. })));
    }

    #[test]
    fn test_empty_and_singleton_input() {
        let engine = ClusterHierarchical::default();
        let none: Vec<f32> = Vec::new();
        assert!(engine.cluster_for_vector(&none, identity_similarity, &Linkage::Single).unwrap().is_empty());

        let one = vec![0.5f32];
        let result = engine
            .cluster_matrix(&engine.distance_matrix(&one, identity_similarity).unwrap(), &Linkage::Complete)
            .unwrap();
        assert_eq!(result.clusters, vec![vec![0]]);
        assert!(result.dendrogram.is_empty());
    }

    #[test]
    fn test_oversized_input_reports_out_of_memory() {
        let mut items: Vec<()> = Vec::new();
        // zero-sized elements: the capacity is usize::MAX and nothing needs initialising
        unsafe { items.set_len(1 << 40) };
        let engine = ClusterHierarchical::default();
        let result = engine.distance_matrix(&items, |_: &(), _: &()| -> f32 {
            panic!("comparator must not run before the matrix is allocated")
        });
        assert!(matches!(result, Err(ClusterError::OutOfMemory { .. })));
    }

    #[test]
    fn test_prebuilt_matrix_must_be_normalized() {
        let engine = ClusterHierarchical::default();
        let mut m = DistanceMatrix::new(3, 0.5).unwrap();
        m.set(2, 1, 1.5).unwrap();
        assert!(matches!(
            engine.cluster_matrix(&m, &Linkage::Single),
            Err(ClusterError::InvalidParameter(_))
        ));
        m.set(2, 1, -0.1).unwrap();
        assert!(engine.cluster_matrix(&m, &Linkage::Single).is_err());
        m.set(2, 1, f32::NAN).unwrap();
        assert!(engine.cluster_matrix(&m, &Linkage::Single).is_err());

        m.set(2, 1, 1.0).unwrap();
        assert_eq!(engine.cluster_matrix(&m, &Linkage::Single).unwrap().dendrogram.len(), 2);
    }

    #[test]
    fn test_clusters_are_sorted() {
        let data = vec![0.9f32, 0.1, 0.85, 0.15];
        let engine = ClusterHierarchical::new(0.2).unwrap();
        let clusters = engine.cluster_for_vector(&data, identity_similarity, &Linkage::Average).unwrap();
        assert_eq!(clusters, vec![vec![0, 2], vec![1, 3]]);
    }
}

//! Post-hoc analysis of a dendrogram: partitions, cuts and quality indices.

use statrs::statistics::Statistics;

use crate::clustering::linkage::BinaryTreeNode;
use crate::distance_matrix::DistanceMatrix;
use crate::error::{ClusterError, Result};

/// Applies the first `steps` merges of `tree` to `n` singletons.
///
/// Each returned cluster is sorted, clusters are ordered by their smallest member.
fn replay(n: usize, tree: &[BinaryTreeNode], steps: usize) -> Result<Vec<Vec<usize>>> {
    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

    for node in &tree[..steps.min(tree.len())] {
        let (left, right) = (node.left_child, node.right_child);
        if right >= n || left >= right || clusters[left].is_empty() || clusters[right].is_empty() {
            return Err(ClusterError::InvalidParameter(format!(
                "merge step ({}, {}) is not valid for {} items",
                left, right, n
            )));
        }
        let absorbed = std::mem::take(&mut clusters[right]);
        clusters[left].extend(absorbed);
    }

    let mut out: Vec<Vec<usize>> = clusters
        .into_iter()
        .filter(|c| !c.is_empty())
        .map(|mut c| {
            c.sort_unstable();
            c
        })
        .collect();
    out.sort_by_key(|c| c[0]);
    Ok(out)
}

/// Cluster label of every item for a given partition.
fn labels(n: usize, clusters: &[Vec<usize>]) -> Vec<usize> {
    let mut label = vec![0; n];
    for (c, members) in clusters.iter().enumerate() {
        for &i in members {
            label[i] = c;
        }
    }
    label
}

/// Partition reached after all merges in `tree`.
pub fn partition(n: usize, tree: &[BinaryTreeNode]) -> Result<Vec<Vec<usize>>> {
    replay(n, tree, tree.len())
}

/// Partition of `n` items into exactly `cluster_quantity` clusters.
pub fn cut(cluster_quantity: usize, n: usize, tree: &[BinaryTreeNode]) -> Result<Vec<Vec<usize>>> {
    if cluster_quantity == 0 {
        return Err(ClusterError::InvalidParameter(
            "requested 0 clusters, the minimal partition contains one".to_string(),
        ));
    }
    if cluster_quantity > n {
        return Err(ClusterError::InvalidParameter(format!(
            "requested {} clusters from {} items",
            cluster_quantity, n
        )));
    }
    let steps = n - cluster_quantity;
    if steps > tree.len() {
        return Err(ClusterError::NoClusterRun(format!(
            "dendrogram holds {} merges, {} are needed for {} clusters",
            tree.len(),
            steps,
            cluster_quantity
        )));
    }
    replay(n, tree, steps)
}

/// Average intra-cluster distance for each cluster.
///
/// Singletons get the average over all pairwise distances.
pub fn cohesion(clusters: &[Vec<usize>], original: &DistanceMatrix) -> Result<Vec<f32>> {
    if clusters.is_empty() || clusters.len() > original.size() {
        return Err(ClusterError::InvalidParameter(format!(
            "{} clusters for {} items is not a valid clustering",
            clusters.len(),
            original.size()
        )));
    }

    let average_distance = if original.size() > 1 {
        original.iter().map(|(_, _, d)| d as f64).mean()
    } else {
        0.0
    };

    clusters
        .iter()
        .map(|members| {
            if members.len() < 2 {
                return Ok(average_distance as f32);
            }
            let mut within = Vec::with_capacity(members.len() * (members.len() - 1) / 2);
            for (a, &i) in members.iter().enumerate() {
                for &j in &members[..a] {
                    within.push(original.get(i, j)? as f64);
                }
            }
            Ok(within.mean() as f32)
        })
        .collect()
}

/// Mean absolute deviation of cluster sizes from `n / cluster_quantity`.
pub fn average_population_aberration(
    cluster_quantity: usize,
    n: usize,
    tree: &[BinaryTreeNode],
) -> Result<f32> {
    if cluster_quantity >= n {
        return Err(ClusterError::InvalidParameter(
            "singleton partitions have no population aberration".to_string(),
        ));
    }
    let clusters = cut(cluster_quantity, n, tree)?;
    let expected = n as f64 / cluster_quantity as f64;
    Ok(clusters
        .iter()
        .map(|c| (c.len() as f64 - expected).abs())
        .mean() as f32)
}

fn ensure_tree(tree: &[BinaryTreeNode], original: &DistanceMatrix) -> Result<()> {
    if tree.is_empty() {
        return Err(ClusterError::NoClusterRun("dendrogram is empty".to_string()));
    }
    if tree.len() >= original.size() {
        return Err(ClusterError::InvalidParameter(format!(
            "{} merges cannot stem from {} items",
            tree.len(),
            original.size()
        )));
    }
    Ok(())
}

/// Average silhouette width of the partition after each merge step.
///
/// A partition with a single cluster scores 0.
pub fn average_silhouette_width(tree: &[BinaryTreeNode], original: &DistanceMatrix) -> Result<Vec<f32>> {
    ensure_tree(tree, original)?;
    let n = original.size();

    (1..=tree.len())
        .map(|steps| {
            let clusters = replay(n, tree, steps)?;
            if clusters.len() < 2 {
                return Ok(0.0);
            }
            let label = labels(n, &clusters);

            let mut widths = Vec::with_capacity(n);
            for i in 0..n {
                let own = &clusters[label[i]];
                if own.len() == 1 {
                    widths.push(0.0);
                    continue;
                }
                // summed distance from i to every cluster
                let mut sums = vec![0.0f64; clusters.len()];
                for j in 0..n {
                    if j != i {
                        sums[label[j]] += original.get(i, j)? as f64;
                    }
                }
                let a = sums[label[i]] / (own.len() - 1) as f64;
                let b = clusters
                    .iter()
                    .enumerate()
                    .filter(|(c, _)| *c != label[i])
                    .map(|(c, members)| sums[c] / members.len() as f64)
                    .fold(f64::INFINITY, f64::min);
                let scale = a.max(b);
                widths.push(if scale > 0.0 { (b - a) / scale } else { 0.0 });
            }
            Ok(widths.mean() as f32)
        })
        .collect()
}

/// Dunn index (closest inter-cluster pair over widest cluster) after each merge step.
///
/// A single cluster scores 0, a partition whose clusters all have zero diameter scores infinity.
pub fn dunn_indices(tree: &[BinaryTreeNode], original: &DistanceMatrix) -> Result<Vec<f32>> {
    ensure_tree(tree, original)?;
    let n = original.size();

    (1..=tree.len())
        .map(|steps| {
            let clusters = replay(n, tree, steps)?;
            if clusters.len() < 2 {
                return Ok(0.0);
            }
            let label = labels(n, &clusters);
            let mut min_between = f32::INFINITY;
            let mut max_within = 0.0f32;
            for (i, j, d) in original.iter() {
                if label[i] == label[j] {
                    max_within = max_within.max(d);
                } else {
                    min_between = min_between.min(d);
                }
            }
            Ok(if max_within > 0.0 { min_between / max_within } else { f32::INFINITY })
        })
        .collect()
}

/// Newick representation of the dendrogram.
///
/// Only ids that take part in a merge appear. Disconnected subtrees are joined
/// at the root with branch length 1.
pub fn newick_tree(tree: &[BinaryTreeNode], include_distance: bool) -> Result<String> {
    if tree.is_empty() {
        return Err(ClusterError::NoClusterRun("dendrogram is empty".to_string()));
    }
    let max_id = tree
        .iter()
        .map(|node| node.right_child.max(node.left_child))
        .fold(0, usize::max);

    let mut names: Vec<String> = vec![String::new(); max_id + 1];
    for node in tree {
        names[node.left_child] = node.left_child.to_string();
        names[node.right_child] = node.right_child.to_string();
    }

    let branch = |label: &str, distance: &str| {
        if include_distance { format!("{}:{}", label, distance) } else { label.to_string() }
    };

    for node in tree {
        let right = std::mem::take(&mut names[node.right_child]);
        let left = &names[node.left_child];
        if left.is_empty() || right.is_empty() {
            return Err(ClusterError::InvalidParameter(format!(
                "merge step ({}, {}) refers to an absorbed cluster",
                node.left_child, node.right_child
            )));
        }
        let distance = node.distance.to_string();
        names[node.left_child] = format!("({},{})", branch(left, &distance), branch(&right, &distance));
    }

    let roots: Vec<String> = names.into_iter().filter(|l| !l.is_empty()).collect();
    Ok(roots
        .into_iter()
        .reduce(|acc, next| format!("({},{})", branch(&acc, "1"), branch(&next, "1")))
        .unwrap_or_default())
}

use std::collections::HashSet;
use std::f64::consts::SQRT_2;

use log::trace;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::data::feature::{Feature, MapSlice, Position};
use crate::data::transform::ShiftTransform;
use crate::error::{AlignError, Result};

/// A model feature matched with a scene feature. Indices refer to the full maps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeaturePair {
    pub model_index: usize,
    pub scene_index: usize,
    pub model_position: Position,
    pub scene_position: Position,
    /// scene position after the cell transform
    pub transformed_scene_position: Position,
    pub model_intensity: f64,
    pub scene_intensity: f64,
    /// 1 for a perfect overlay, falling to 0 at the corner of the tolerance box
    pub quality: f64,
}

struct Candidate<'a> {
    distance: f64,
    model_index: usize,
    scene_index: usize,
    model: &'a Feature,
    scene: &'a Feature,
    transformed: Position,
}

/// Greedy one-to-one matching within an RT/MZ tolerance box.
///
/// All candidate pairs within tolerance are ranked by normalized distance
/// `sqrt((d_rt / tol_rt)^2 + (d_mz / tol_mz)^2)` and accepted closest-first
/// while neither side is taken yet. Ties go to the lower scene, then model index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimplePairFinder {
    tolerance_rt: f64,
    tolerance_mz: f64,
}

impl SimplePairFinder {
    pub fn new(tolerance_rt: f64, tolerance_mz: f64) -> Result<Self> {
        for (key, value) in [("pair_finder:tolerance:RT", tolerance_rt), ("pair_finder:tolerance:MZ", tolerance_mz)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(AlignError::invalid(key, format!("must be a positive number, got {}", value)));
            }
        }
        Ok(SimplePairFinder { tolerance_rt, tolerance_mz })
    }

    pub fn tolerance(&self) -> [f64; 2] {
        [self.tolerance_rt, self.tolerance_mz]
    }

    /// Pairs sorted by scene index. Inputs are not modified.
    pub fn find_pairs(
        &self,
        model: MapSlice<'_>,
        scene: MapSlice<'_>,
        transform: &ShiftTransform,
    ) -> Vec<FeaturePair> {
        let mut by_rt: Vec<(usize, &Feature)> = model.iter().collect();
        by_rt.sort_by_key(|(index, f)| (OrderedFloat(f.rt), *index));

        let mut candidates = Vec::new();
        for (scene_index, feature) in scene.iter() {
            let transformed = transform.apply(feature.position());
            let start = by_rt.partition_point(|(_, m)| m.rt < transformed.rt - self.tolerance_rt);
            for &(model_index, m) in &by_rt[start..] {
                let d_rt = (m.rt - transformed.rt) / self.tolerance_rt;
                if d_rt > 1.0 {
                    break;
                }
                let d_mz = (m.mz - transformed.mz) / self.tolerance_mz;
                if d_mz.abs() > 1.0 {
                    continue;
                }
                candidates.push(Candidate {
                    distance: d_rt.hypot(d_mz),
                    model_index,
                    scene_index,
                    model: m,
                    scene: feature,
                    transformed,
                });
            }
        }
        candidates.sort_by_key(|c| (OrderedFloat(c.distance), c.scene_index, c.model_index));

        let mut used_model = HashSet::new();
        let mut used_scene = HashSet::new();
        let mut pairs = Vec::new();
        for c in &candidates {
            if used_model.contains(&c.model_index) || used_scene.contains(&c.scene_index) {
                continue;
            }
            used_model.insert(c.model_index);
            used_scene.insert(c.scene_index);
            pairs.push(FeaturePair {
                model_index: c.model_index,
                scene_index: c.scene_index,
                model_position: c.model.position(),
                scene_position: c.scene.position(),
                transformed_scene_position: c.transformed,
                model_intensity: c.model.intensity,
                scene_intensity: c.scene.intensity,
                quality: (1.0 - c.distance / SQRT_2).clamp(0.0, 1.0),
            });
        }
        pairs.sort_by_key(|p| p.scene_index);

        trace!(
            "pair finder: {} model x {} scene features, {} candidates, {} pairs",
            model.len(),
            scene.len(),
            candidates.len(),
            pairs.len()
        );
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(points: &[(f64, f64)]) -> Vec<Feature> {
        points.iter().map(|&(rt, mz)| Feature::new(rt, mz, 100.0)).collect()
    }

    fn index_pairs(pairs: &[FeaturePair]) -> Vec<(usize, usize)> {
        pairs.iter().map(|p| (p.model_index, p.scene_index)).collect()
    }

    #[test]
    fn test_two_close_pairs() {
        let model = map(&[(0.0, 0.0), (5.0, 5.0)]);
        let scene = map(&[(0.1, 0.1), (5.05, 4.95)]);
        let finder = SimplePairFinder::new(0.5, 0.5).unwrap();
        let pairs = finder.find_pairs(MapSlice::all(&model), MapSlice::all(&scene), &ShiftTransform::identity());
        assert_eq!(index_pairs(&pairs), vec![(0, 0), (1, 1)]);
        assert!(pairs.iter().all(|p| p.quality > 0.5 && p.quality <= 1.0));
        assert_eq!(pairs[0].scene_position, Position::new(0.1, 0.1));
    }

    #[test]
    fn test_one_to_one_prefers_closest() {
        // both scene features want model 0, scene 1 is closer
        let model = map(&[(10.0, 100.0), (13.0, 100.0)]);
        let scene = map(&[(11.5, 100.0), (10.2, 100.0)]);
        let finder = SimplePairFinder::new(2.0, 0.5).unwrap();
        let pairs = finder.find_pairs(MapSlice::all(&model), MapSlice::all(&scene), &ShiftTransform::identity());
        assert_eq!(index_pairs(&pairs), vec![(1, 0), (0, 1)]);
    }

    #[test]
    fn test_tolerance_and_transform() {
        let model = map(&[(100.0, 500.0)]);
        let scene = map(&[(120.0, 500.4)]);
        let finder = SimplePairFinder::new(5.0, 0.1).unwrap();
        let identity = ShiftTransform::identity();
        assert!(finder.find_pairs(MapSlice::all(&model), MapSlice::all(&scene), &identity).is_empty());

        let shift = ShiftTransform::translation(Position::new(-20.0, -0.4));
        let pairs = finder.find_pairs(MapSlice::all(&model), MapSlice::all(&scene), &shift);
        assert_eq!(index_pairs(&pairs), vec![(0, 0)]);
        assert!((pairs[0].quality - 1.0).abs() < 1e-9);
        assert_eq!(pairs[0].scene_position, Position::new(120.0, 500.4));
        assert!((pairs[0].transformed_scene_position.rt - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_subset_indices_are_global() {
        let scene = map(&[(0.0, 0.0), (50.0, 50.0), (100.0, 100.0)]);
        let model = map(&[(100.2, 100.1)]);
        let subset = vec![2];
        let pairs = SimplePairFinder::new(1.0, 1.0)
            .unwrap()
            .find_pairs(MapSlice::all(&model), MapSlice::subset(&scene, &subset), &ShiftTransform::identity());
        assert_eq!(index_pairs(&pairs), vec![(0, 2)]);
    }

    #[test]
    fn test_invalid_tolerance() {
        assert!(SimplePairFinder::new(0.0, 1.0).is_err());
        assert!(SimplePairFinder::new(1.0, f64::NAN).is_err());
        assert_eq!(SimplePairFinder::new(2.0, 0.5).unwrap().tolerance(), [2.0, 0.5]);
    }
}

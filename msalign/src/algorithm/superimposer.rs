use std::ops::Range;

use itertools::{iproduct, Itertools};
use log::{debug, trace};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::config::matcher::{axis_key, SuperimposerParams, FEATURE_BUCKET_SIZE, MAX_CELLS};
use crate::data::feature::{Dim, Feature, MapSlice, Position};
use crate::data::transform::ShiftTransform;
use crate::error::{AlignError, Result};

/// Estimates the transform that maps scene positions onto the model.
pub trait Superimposer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the identity when either map is empty or nothing overlaps.
    fn estimate(&self, model: MapSlice<'_>, scene: MapSlice<'_>) -> Result<ShiftTransform>;

    /// Like [`estimate`](Self::estimate), plus the vote histogram if the
    /// implementation builds one.
    fn estimate_with_histogram(
        &self,
        model: MapSlice<'_>,
        scene: MapSlice<'_>,
    ) -> Result<(ShiftTransform, Option<ShiftHistogram>)> {
        Ok((self.estimate(model, scene)?, None))
    }
}

/// Quality-weighted votes for candidate shifts (scene - model) on a regular grid.
/// Cell `(i, j)` sits at `origin + (i * bucket_size[RT], j * bucket_size[MZ])`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShiftHistogram {
    pub origin: Position,
    pub bucket_size: [f64; 2],
    pub counts: [usize; 2],
    quality: Vec<f64>,
}

impl ShiftHistogram {
    fn new(origin: Position, bucket_size: [f64; 2], counts: [usize; 2]) -> Self {
        ShiftHistogram { origin, bucket_size, counts, quality: vec![0.0; counts[0] * counts[1]] }
    }

    #[inline]
    fn offset(&self, rt: usize, mz: usize) -> usize {
        rt * self.counts[1] + mz
    }

    pub fn get(&self, rt: usize, mz: usize) -> f64 {
        self.quality[self.offset(rt, mz)]
    }

    pub fn position(&self, rt: usize, mz: usize) -> Position {
        Position::new(
            self.origin.rt + rt as f64 * self.bucket_size[0],
            self.origin.mz + mz as f64 * self.bucket_size[1],
        )
    }

    /// Non-zero cells as `(position, quality)`.
    pub fn iter_nonzero(&self) -> impl Iterator<Item = (Position, f64)> + '_ {
        iproduct!(0..self.counts[0], 0..self.counts[1])
            .map(|(rt, mz)| (self.position(rt, mz), self.get(rt, mz)))
            .filter(|(_, q)| *q > 0.0)
    }

    pub fn total_quality(&self) -> f64 {
        self.quality.iter().sum()
    }

    /// Spreads `quality` over the four cells around `shift`, bilinearly.
    /// Returns false if `shift` lies outside the histogram.
    fn add(&mut self, shift: Position, quality: f64) -> bool {
        let origin = self.origin.to_array();
        let mut lower = [0usize; 2];
        let mut fraction = [0.0f64; 2];
        for (d, value) in shift.to_array().into_iter().enumerate() {
            let x = (value - origin[d]) / self.bucket_size[d];
            if !(x >= 0.0) {
                return false;
            }
            let floor = x.floor();
            let index = floor as usize;
            if index + 1 >= self.counts[d] {
                return false;
            }
            lower[d] = index;
            fraction[d] = x - floor;
        }

        let [rt, mz] = lower;
        let [f_rt, f_mz] = fraction;
        let cells = [
            (rt, mz, (1.0 - f_rt) * (1.0 - f_mz)),
            (rt + 1, mz, f_rt * (1.0 - f_mz)),
            (rt, mz + 1, (1.0 - f_rt) * f_mz),
            (rt + 1, mz + 1, f_rt * f_mz),
        ];
        for (i, j, weight) in cells {
            let offset = self.offset(i, j);
            self.quality[offset] += quality * weight;
        }
        true
    }
}

/// Features of one map hashed into square-ish buckets of a fixed size. The
/// covered box is the map's bounding box grown symmetrically to a whole
/// number of buckets.
struct FeatureBuckets<'a> {
    origin: [f64; 2],
    counts: [usize; 2],
    buckets: Vec<Vec<&'a Feature>>,
}

impl<'a> FeatureBuckets<'a> {
    fn build(map: MapSlice<'a>, bucket_size: [f64; 2]) -> Result<Self> {
        let bbox = map.bounding_box();
        let min = bbox.min.to_array();
        let diagonal = bbox.diagonal().to_array();

        let mut origin = [0.0; 2];
        let mut counts = [1usize; 2];
        for dim in Dim::ALL {
            let d = dim.index();
            let number = (1.1 + diagonal[d] / bucket_size[d]).floor().max(1.0);
            if !(number <= MAX_CELLS as f64) {
                return Err(AlignError::invalid(
                    axis_key(FEATURE_BUCKET_SIZE, dim),
                    format!("{} feature buckets needed, at most {} allowed", number, MAX_CELLS),
                ));
            }
            counts[d] = number as usize;
            let enlarged = counts[d] as f64 * bucket_size[d];
            origin[d] = min[d] - (enlarged - diagonal[d]) / 2.0;
        }
        let cells = counts[0]
            .checked_mul(counts[1])
            .filter(|&cells| cells <= MAX_CELLS)
            .ok_or_else(|| {
                AlignError::invalid(
                    FEATURE_BUCKET_SIZE,
                    format!("{}x{} feature buckets exceed {} cells", counts[0], counts[1], MAX_CELLS),
                )
            })?;

        let mut buckets = vec![Vec::new(); cells];
        for (_, feature) in map.iter() {
            let position = feature.position().to_array();
            let mut index = [0usize; 2];
            for d in 0..2 {
                let x = ((position[d] - origin[d]) / bucket_size[d]).max(0.0);
                index[d] = (x as usize).min(counts[d] - 1);
            }
            buckets[index[0] * counts[1] + index[1]].push(feature);
        }
        Ok(FeatureBuckets { origin, counts, buckets })
    }

    fn get(&self, rt: usize, mz: usize) -> &[&'a Feature] {
        &self.buckets[rt * self.counts[1] + mz]
    }
}

/// `[center + offset - window, center + offset + window]` clipped to `0..count`.
fn window(center: usize, offset: isize, window: usize, count: usize) -> Range<usize> {
    let window = isize::try_from(window).unwrap_or(isize::MAX);
    let center = (center as isize).saturating_add(offset);
    let lo = center.saturating_sub(window).max(0);
    let hi = center.saturating_add(window).saturating_add(1).min(count as isize);
    if lo >= hi {
        0..0
    } else {
        lo as usize..hi as usize
    }
}

fn intensity_quality(model: f64, scene: f64) -> f64 {
    if model > 0.0 && scene > 0.0 {
        (model / scene).min(scene / model)
    } else {
        0.0
    }
}

/// Shift estimation by geometric hashing.
///
/// Both maps are bucketed, each scene bucket is paired with the model buckets
/// around the same location, and every feature pair votes for its shift
/// weighted by intensity similarity. The strongest histogram region, averaged
/// over `shift_bucket_window`, gives the translation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeomHashShiftSuperimposer {
    params: SuperimposerParams,
}

impl GeomHashShiftSuperimposer {
    pub fn new(params: SuperimposerParams) -> Self {
        GeomHashShiftSuperimposer { params }
    }

    pub fn params(&self) -> &SuperimposerParams {
        &self.params
    }

    fn histogram(&self, model: &FeatureBuckets<'_>, scene: &FeatureBuckets<'_>) -> Result<ShiftHistogram> {
        let feature_size = self.params.feature_bucket_size;
        let feature_window = self.params.feature_bucket_window;
        let reach = self.params.shift_reach();
        let (counts, bucket_size) = self.params.shift_histogram_shape()?;

        // model bucket aligned with scene bucket 0, and the shift left over
        // after that whole-bucket alignment
        let mut offset = [0isize; 2];
        let mut origin = [0.0; 2];
        for d in 0..2 {
            let difference = scene.origin[d] - model.origin[d];
            offset[d] = (difference / feature_size[d]) as isize;
            let residual = difference - offset[d] as f64 * feature_size[d];
            origin[d] = residual - reach[d];
        }

        let mut histogram = ShiftHistogram::new(Position::from_array(origin), bucket_size, counts);
        let mut votes = 0usize;
        let mut dropped = 0usize;
        for (rt, mz) in iproduct!(0..scene.counts[0], 0..scene.counts[1]) {
            let scene_bucket = scene.get(rt, mz);
            if scene_bucket.is_empty() {
                continue;
            }
            let rt_range = window(rt, offset[0], feature_window[0], model.counts[0]);
            let mz_range = window(mz, offset[1], feature_window[1], model.counts[1]);
            for (model_rt, model_mz) in iproduct!(rt_range, mz_range) {
                for (m, s) in iproduct!(model.get(model_rt, model_mz), scene_bucket) {
                    let quality = intensity_quality(m.intensity, s.intensity);
                    if quality <= 0.0 {
                        continue;
                    }
                    if histogram.add(s.position() - m.position(), quality) {
                        votes += 1;
                    } else {
                        dropped += 1;
                    }
                }
            }
        }
        trace!(
            "shift histogram {}x{}: {} votes, {} outside",
            counts[0],
            counts[1],
            votes,
            dropped
        );
        Ok(histogram)
    }

    /// Quality-weighted mean shift around the histogram maximum.
    fn weighted_shift(&self, histogram: &ShiftHistogram) -> Option<Position> {
        let best = histogram.quality.iter().position_max_by_key(|&&q| OrderedFloat(q))?;
        if histogram.quality[best] <= 0.0 {
            return None;
        }
        let center = [best / histogram.counts[1], best % histogram.counts[1]];
        let ranges: Vec<Range<usize>> = (0..2)
            .map(|d| {
                let w = self.params.shift_bucket_window[d];
                center[d].saturating_sub(w)..center[d].saturating_add(w).saturating_add(1).min(histogram.counts[d])
            })
            .collect();

        let mut weight = 0.0;
        let mut sum = [0.0; 2];
        for (rt, mz) in iproduct!(ranges[0].clone(), ranges[1].clone()) {
            let q = histogram.get(rt, mz);
            let position = histogram.position(rt, mz);
            weight += q;
            sum[0] += q * position.rt;
            sum[1] += q * position.mz;
        }
        (weight > 0.0).then(|| Position::new(sum[0] / weight, sum[1] / weight))
    }
}

impl Superimposer for GeomHashShiftSuperimposer {
    fn name(&self) -> &'static str {
        "geomhash_shift"
    }

    fn estimate(&self, model: MapSlice<'_>, scene: MapSlice<'_>) -> Result<ShiftTransform> {
        Ok(self.estimate_with_histogram(model, scene)?.0)
    }

    /// # Errors
    ///
    /// `InvalidParameter` if the feature buckets or the shift histogram would
    /// need more than [`MAX_CELLS`] cells.
    fn estimate_with_histogram(
        &self,
        model: MapSlice<'_>,
        scene: MapSlice<'_>,
    ) -> Result<(ShiftTransform, Option<ShiftHistogram>)> {
        if model.is_empty() || scene.is_empty() {
            return Ok((ShiftTransform::identity(), None));
        }

        let model_buckets = FeatureBuckets::build(model, self.params.feature_bucket_size)?;
        let scene_buckets = FeatureBuckets::build(scene, self.params.feature_bucket_size)?;
        let histogram = self.histogram(&model_buckets, &scene_buckets)?;

        let transform = match self.weighted_shift(&histogram) {
            Some(shift) => ShiftTransform::translation(Position::new(-shift.rt, -shift.mz)),
            None => ShiftTransform::identity(),
        };
        debug!(
            "{}: {} model / {} scene features -> {}",
            self.name(),
            model.len(),
            scene.len(),
            transform
        );
        Ok((transform, Some(histogram)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_map(n: usize, seed: u64) -> Vec<Feature> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                Feature::new(
                    rng.gen_range(0.0..1000.0),
                    rng.gen_range(400.0..1200.0),
                    rng.gen_range(1e3..1e5),
                )
            })
            .collect()
    }

    fn shifted(map: &[Feature], rt: f64, mz: f64) -> Vec<Feature> {
        map.iter().map(|f| Feature::new(f.rt + rt, f.mz + mz, f.intensity)).collect()
    }

    #[test]
    fn test_recovers_translation() {
        let model = random_map(200, 11);
        let scene = shifted(&model, 12.0, 0.3);
        let superimposer = GeomHashShiftSuperimposer::default();

        let (transform, histogram) = superimposer
            .estimate_with_histogram(MapSlice::all(&model), MapSlice::all(&scene))
            .unwrap();
        assert!((transform.rt.intercept + 12.0).abs() < 1.0, "{}", transform);
        assert!((transform.mz.intercept + 0.3).abs() < 0.05, "{}", transform);
        assert_eq!(transform.rt.slope, 1.0);
        assert_eq!(transform.mz.slope, 1.0);

        let histogram = histogram.unwrap();
        assert!(histogram.total_quality() >= 199.0);
        assert!(histogram.iter_nonzero().count() > 0);
    }

    #[test]
    fn test_recovers_negative_translation() {
        let model = random_map(150, 5);
        let scene = shifted(&model, -30.0, -1.0);
        let transform = GeomHashShiftSuperimposer::default()
            .estimate(MapSlice::all(&model), MapSlice::all(&scene))
            .unwrap();
        let moved = transform.apply(scene[0].position());
        assert!((moved.rt - model[0].rt).abs() < 1.0);
        assert!((moved.mz - model[0].mz).abs() < 0.05);
    }

    #[test]
    fn test_empty_input_is_identity() {
        let model = random_map(10, 1);
        let superimposer = GeomHashShiftSuperimposer::default();
        assert!(superimposer.estimate(MapSlice::all(&model), MapSlice::all(&[])).unwrap().is_identity());
        let (transform, histogram) = superimposer
            .estimate_with_histogram(MapSlice::all(&[]), MapSlice::all(&model))
            .unwrap();
        assert!(transform.is_identity());
        assert!(histogram.is_none());
    }

    #[test]
    fn test_zero_intensity_gives_identity() {
        let model = vec![Feature::new(10.0, 500.0, 0.0)];
        let scene = vec![Feature::new(12.0, 500.5, 100.0)];
        let transform = GeomHashShiftSuperimposer::default()
            .estimate(MapSlice::all(&model), MapSlice::all(&scene))
            .unwrap();
        assert!(transform.is_identity());
    }

    #[test]
    fn test_single_pair() {
        let model = vec![Feature::new(100.0, 500.0, 10.0)];
        let scene = vec![Feature::new(103.0, 500.2, 20.0)];
        let transform = GeomHashShiftSuperimposer::default()
            .estimate(MapSlice::all(&model), MapSlice::all(&scene))
            .unwrap();
        assert!((transform.rt.intercept + 3.0).abs() < 1e-9);
        assert!((transform.mz.intercept + 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_window_clipping() {
        assert_eq!(window(0, 0, 1, 5), 0..2);
        assert_eq!(window(4, 0, 1, 5), 3..5);
        assert_eq!(window(2, -10, 1, 5), 0..0);
        assert_eq!(window(0, 3, 0, 5), 3..4);
        assert_eq!(window(2, isize::MAX, usize::MAX, 5), 0..5);
        assert_eq!(window(2, isize::MIN, 1, 5), 0..0);
        assert_eq!(intensity_quality(2.0, 8.0), 0.25);
        assert_eq!(intensity_quality(-1.0, 8.0), 0.0);
    }

    #[test]
    fn test_bucket_count_is_bounded() {
        let model = vec![Feature::new(0.0, 400.0, 10.0), Feature::new(3000.0, 1800.0, 10.0)];
        let scene = shifted(&model, 2.0, 0.1);

        let tiny_buckets = GeomHashShiftSuperimposer::new(SuperimposerParams {
            feature_bucket_size: [1e-9, 4.0],
            ..SuperimposerParams::default()
        });
        match tiny_buckets.estimate(MapSlice::all(&model), MapSlice::all(&scene)) {
            Err(AlignError::InvalidParameter { key, .. }) => {
                assert_eq!(key, "feature_map:bucket_size:RT")
            }
            other => panic!("expected InvalidParameter, got {:?}", other),
        }

        let tiny_shift = GeomHashShiftSuperimposer::new(SuperimposerParams {
            shift_bucket_size: [5.0, 1e-12],
            ..SuperimposerParams::default()
        });
        assert!(matches!(
            tiny_shift.estimate(MapSlice::all(&model), MapSlice::all(&scene)),
            Err(AlignError::InvalidParameter { .. })
        ));
    }
}

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::algorithm::grid::{Grid, SpatialGrid};
use crate::algorithm::pair_finder::{FeaturePair, SimplePairFinder};
use crate::algorithm::superimposer::{GeomHashShiftSuperimposer, ShiftHistogram, Superimposer};
use crate::config::matcher::{Algorithm, MatcherConfig};
use crate::config::param::Param;
use crate::data::feature::{BoundingBox2D, Feature, MapSlice};
use crate::data::transform::ShiftTransform;
use crate::dump;
use crate::error::{AlignError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatcherState {
    Uninitialized,
    GridBuilt,
    Matched,
}

/// Serializable outcome of a run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    pub grid: Grid,
    pub pairs: Vec<FeaturePair>,
}

struct CellResult {
    cell: usize,
    shift: Option<ShiftTransform>,
    histogram: Option<ShiftHistogram>,
    pairs: Vec<FeaturePair>,
}

/// Matches a scene map against a model map cell by cell.
///
/// The scene is partitioned by a [`SpatialGrid`]; every non-empty cell gets
/// its own shift estimate against the whole model map before pairs are
/// searched. Cells are processed in parallel and merged in cell order.
pub struct PairwiseMapMatcher<'a> {
    param: Param,
    model: &'a [Feature],
    scene: &'a [Feature],
    state: MatcherState,
    grid: Grid,
    pairs: Vec<FeaturePair>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> PairwiseMapMatcher<'a> {
    pub fn new(param: Param, model: &'a [Feature], scene: &'a [Feature]) -> Self {
        PairwiseMapMatcher {
            param,
            model,
            scene,
            state: MatcherState::Uninitialized,
            grid: Grid::default(),
            pairs: Vec::new(),
            cancel: None,
        }
    }

    /// Checked once per cell; once set, `run` fails with `Cancelled`.
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn param(&self) -> &Param {
        &self.param
    }

    /// Replaces the parameters and discards previous results.
    pub fn set_param(&mut self, param: Param) {
        self.param = param;
        self.reset();
    }

    pub fn state(&self) -> MatcherState {
        self.state
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn feature_pairs(&self) -> &[FeaturePair] {
        &self.pairs
    }

    pub fn report(&self) -> MatchReport {
        MatchReport { grid: self.grid.clone(), pairs: self.pairs.clone() }
    }

    pub fn write_report<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.report())?;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = MatcherState::Uninitialized;
        self.grid = Grid::default();
        self.pairs.clear();
    }

    pub fn run(&mut self) -> Result<&[FeaturePair]> {
        self.reset();
        let config = MatcherConfig::from_param(&self.param)?;

        let scene_box = BoundingBox2D::from_features(self.scene);
        let spatial = SpatialGrid::build(&scene_box, config.number_buckets)?;
        let buckets = spatial.assign(MapSlice::all(self.scene))?;
        self.grid = spatial.to_grid();
        self.state = MatcherState::GridBuilt;
        info!(
            "matching {} scene against {} model features on a {}x{} grid ({})",
            self.scene.len(),
            self.model.len(),
            config.number_buckets[0],
            config.number_buckets[1],
            config.algorithm
        );
        if let Some(path) = &config.debug.feature_buckets {
            dump::write_feature_buckets(path, &spatial, &buckets, self.scene)?;
        }

        let superimposer: Option<Box<dyn Superimposer>> = match config.algorithm {
            Algorithm::GeomhashShift => Some(Box::new(GeomHashShiftSuperimposer::new(config.superimposer))),
            Algorithm::Simple => None,
        };
        let pair_finder = SimplePairFinder::new(config.tolerance[0], config.tolerance[1])?;
        let keep_histograms = config.debug.shift_buckets.is_some();
        let pool = rayon::ThreadPoolBuilder::new().num_threads(config.threads).build()?;

        let model = MapSlice::all(self.model);
        let scene = self.scene;
        let cancel = self.cancel.clone();
        let results = pool.install(|| {
            buckets
                .par_iter()
                .enumerate()
                .filter(|(_, bucket)| !bucket.is_empty())
                .map(|(cell, bucket)| {
                    if cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                        return Err(AlignError::Cancelled);
                    }
                    let points = MapSlice::subset(scene, bucket);
                    let (shift, histogram) = match &superimposer {
                        Some(s) if keep_histograms => {
                            let (shift, histogram) = s.estimate_with_histogram(model, points)?;
                            (Some(shift), histogram)
                        }
                        Some(s) => (Some(s.estimate(model, points)?), None),
                        None => (None, None),
                    };
                    let transform = shift.unwrap_or_default();
                    let pairs = pair_finder.find_pairs(model, points, &transform);
                    debug!(
                        "cell {}: {} features, {} pairs, transform {}",
                        cell,
                        bucket.len(),
                        pairs.len(),
                        transform
                    );
                    Ok(CellResult { cell, shift, histogram, pairs })
                })
                .collect::<Result<Vec<CellResult>>>()
        })?;

        let matched_cells = results.len();
        let mut histograms = Vec::new();
        for result in results {
            self.grid.cells_mut()[result.cell].shift = result.shift;
            self.pairs.extend(result.pairs);
            if keep_histograms {
                histograms.push((result.cell, result.histogram));
            }
        }
        self.state = MatcherState::Matched;
        info!("{} feature pairs from {} non-empty cells", self.pairs.len(), matched_cells);

        if let Some(path) = &config.debug.shift_buckets {
            dump::write_shift_buckets(path, &self.grid, &histograms)?;
        }
        if let Some(path) = &config.debug.feature_pairs {
            dump::write_feature_pairs(path, &self.pairs)?;
        }
        Ok(&self.pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(rt: i64, mz: i64) -> Param {
        let mut param = Param::new();
        param.set("number_buckets:RT", rt).set("number_buckets:MZ", mz);
        param
    }

    #[test]
    fn test_state_transitions() {
        let model = vec![Feature::new(10.0, 500.0, 100.0), Feature::new(50.0, 800.0, 100.0)];
        let scene = vec![Feature::new(10.5, 500.1, 90.0), Feature::new(51.0, 800.1, 110.0)];
        let mut matcher = PairwiseMapMatcher::new(param(2, 2), &model, &scene);
        assert_eq!(matcher.state(), MatcherState::Uninitialized);

        let pairs = matcher.run().unwrap().to_vec();
        assert_eq!(matcher.state(), MatcherState::Matched);
        assert_eq!(pairs.len(), 2);
        assert_eq!(matcher.grid().len(), 4);

        matcher.set_param(param(1, 1));
        assert_eq!(matcher.state(), MatcherState::Uninitialized);
        assert!(matcher.feature_pairs().is_empty());
        assert!(matcher.grid().is_empty());
    }

    #[test]
    fn test_missing_buckets_fails_before_grid() {
        let model = vec![Feature::new(10.0, 500.0, 100.0)];
        let mut bad = Param::new();
        bad.set("number_buckets:MZ", 2);
        let mut matcher = PairwiseMapMatcher::new(bad, &model, &model);
        assert!(matches!(matcher.run(), Err(AlignError::ElementNotFound(key)) if key == "number_buckets:RT"));
        assert_eq!(matcher.state(), MatcherState::Uninitialized);
        assert!(matcher.grid().is_empty());
    }

    #[test]
    fn test_simple_mode_leaves_cells_untransformed() {
        let model = vec![Feature::new(10.0, 500.0, 100.0)];
        let scene = vec![Feature::new(12.0, 500.2, 100.0)];
        let mut p = param(1, 1);
        p.set("algorithm", "simple");
        let mut matcher = PairwiseMapMatcher::new(p, &model, &scene);
        let pairs = matcher.run().unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].transformed_scene_position, pairs[0].scene_position);
        assert!(matcher.grid().cells()[0].shift.is_none());
    }

    #[test]
    fn test_cancelled_run() {
        let model = vec![Feature::new(10.0, 500.0, 100.0)];
        let flag = Arc::new(AtomicBool::new(true));
        let mut matcher = PairwiseMapMatcher::new(param(1, 1), &model, &model).with_cancellation(flag);
        assert!(matches!(matcher.run(), Err(AlignError::Cancelled)));
        assert_ne!(matcher.state(), MatcherState::Matched);
    }

    #[test]
    fn test_empty_scene() {
        let model = vec![Feature::new(10.0, 500.0, 100.0)];
        let mut matcher = PairwiseMapMatcher::new(param(3, 3), &model, &[]);
        assert!(matcher.run().unwrap().is_empty());
        assert_eq!(matcher.state(), MatcherState::Matched);
        assert!(matcher.grid().cells().iter().all(|c| c.shift.is_none()));
    }

    #[test]
    fn test_report_json() {
        let model = vec![Feature::new(10.0, 500.0, 100.0)];
        let scene = vec![Feature::new(10.2, 500.01, 100.0)];
        let mut matcher = PairwiseMapMatcher::new(param(1, 1), &model, &scene);
        matcher.run().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        matcher.write_report(&path).unwrap();
        let report: MatchReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(report.grid.len(), 1);
        assert_eq!(report.pairs.len(), 1);
        assert_eq!((report.pairs[0].model_index, report.pairs[0].scene_index), (0, 0));
    }
}

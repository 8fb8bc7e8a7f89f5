use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::param::Param;
use crate::data::feature::Dim;
use crate::error::{AlignError, Result};

pub const ALGORITHM: &str = "algorithm";
pub const NUMBER_BUCKETS: &str = "number_buckets";
pub const PAIR_FINDER_TOLERANCE: &str = "pair_finder:tolerance";
pub const FEATURE_BUCKET_SIZE: &str = "feature_map:bucket_size";
pub const SHIFT_BUCKET_SIZE: &str = "shift_map:bucket_size";
pub const FEATURE_BUCKET_WINDOW: &str = "feature_map:bucket_window";
pub const SHIFT_BUCKET_WINDOW: &str = "shift_map:bucket_window";
pub const THREADS: &str = "threads";
pub const DEBUG_FEATURE_BUCKETS_FILE: &str = "debug:feature_buckets_file";
pub const DEBUG_SHIFT_BUCKETS_FILE: &str = "debug:shift_buckets_file";
pub const DEBUG_FEATURE_PAIRS_FILE: &str = "debug:feature_pairs_file";

/// `prefix:RT` / `prefix:MZ`
pub fn axis_key(prefix: &str, dim: Dim) -> String {
    format!("{}:{}", prefix, dim.short_name())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// per-cell shift estimation before pair finding
    #[default]
    GeomhashShift,
    /// pair finding on untransformed positions
    Simple,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::GeomhashShift => "geomhash_shift",
            Algorithm::Simple => "simple",
        }
    }
}

impl FromStr for Algorithm {
    type Err = AlignError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "geomhash_shift" => Ok(Algorithm::GeomhashShift),
            "simple" => Ok(Algorithm::Simple),
            other => Err(AlignError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket geometry of the geometric-hash superimposer, indexed by [`Dim::index`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuperimposerParams {
    pub feature_bucket_size: [f64; 2],
    pub shift_bucket_size: [f64; 2],
    pub feature_bucket_window: [usize; 2],
    pub shift_bucket_window: [usize; 2],
}

impl Default for SuperimposerParams {
    fn default() -> Self {
        SuperimposerParams {
            feature_bucket_size: [150.0, 4.0],
            shift_bucket_size: [5.0, 0.1],
            feature_bucket_window: [1, 1],
            shift_bucket_window: [2, 2],
        }
    }
}

/// Upper bound on cells of any grid or histogram built during matching.
pub const MAX_CELLS: usize = 1 << 22;

impl SuperimposerParams {
    /// Shift range covered per axis: the residual offset between the two
    /// bucket grids plus `(feature_window + 1)` feature buckets and half a shift bucket.
    pub fn shift_reach(&self) -> [f64; 2] {
        [0, 1].map(|d| {
            (self.feature_bucket_window[d] as f64 + 1.0) * self.feature_bucket_size[d]
                + self.shift_bucket_size[d] / 2.0
        })
    }

    /// Shift histogram buckets per axis and the refitted bucket sizes.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if the histogram would exceed [`MAX_CELLS`].
    pub fn shift_histogram_shape(&self) -> Result<([usize; 2], [f64; 2])> {
        let reach = self.shift_reach();
        let mut counts = [0usize; 2];
        let mut bucket_size = [0.0; 2];
        for dim in Dim::ALL {
            let d = dim.index();
            let extent = 2.0 * reach[d];
            let number = (extent / self.shift_bucket_size[d]).floor().max(1.0);
            if !(number < MAX_CELLS as f64) {
                return Err(AlignError::invalid(
                    axis_key(SHIFT_BUCKET_SIZE, dim),
                    format!("shift histogram would need {} buckets, at most {} allowed", number, MAX_CELLS),
                ));
            }
            counts[d] = number as usize + 1;
            bucket_size[d] = extent / number;
        }
        match counts[0].checked_mul(counts[1]) {
            Some(cells) if cells <= MAX_CELLS => Ok((counts, bucket_size)),
            _ => Err(AlignError::invalid(
                SHIFT_BUCKET_SIZE,
                format!("shift histogram of {}x{} buckets exceeds {} cells", counts[0], counts[1], MAX_CELLS),
            )),
        }
    }
}

/// Optional plaintext dump targets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugFiles {
    pub feature_buckets: Option<PathBuf>,
    pub shift_buckets: Option<PathBuf>,
    pub feature_pairs: Option<PathBuf>,
}

/// Validated matcher settings, built once from a [`Param`] before any work starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub algorithm: Algorithm,
    pub number_buckets: [usize; 2],
    pub tolerance: [f64; 2],
    pub superimposer: SuperimposerParams,
    /// worker threads, 0 lets rayon decide
    pub threads: usize,
    pub debug: DebugFiles,
}

const DEFAULT_TOLERANCE: [f64; 2] = [20.0, 0.5];

impl MatcherConfig {
    pub fn from_param(param: &Param) -> Result<Self> {
        let mut number_buckets = [0usize; 2];
        let mut tolerance = DEFAULT_TOLERANCE;
        let mut superimposer = SuperimposerParams::default();

        for dim in Dim::ALL {
            let d = dim.index();

            let key = axis_key(NUMBER_BUCKETS, dim);
            number_buckets[d] = param.require_usize(&key)?;
            if number_buckets[d] == 0 {
                return Err(AlignError::invalid(key, "at least one bucket is required"));
            }

            tolerance[d] = positive(param, &axis_key(PAIR_FINDER_TOLERANCE, dim), tolerance[d])?;
            superimposer.feature_bucket_size[d] = positive(
                param,
                &axis_key(FEATURE_BUCKET_SIZE, dim),
                superimposer.feature_bucket_size[d],
            )?;
            superimposer.shift_bucket_size[d] =
                positive(param, &axis_key(SHIFT_BUCKET_SIZE, dim), superimposer.shift_bucket_size[d])?;
            superimposer.feature_bucket_window[d] = param.usize_or(
                &axis_key(FEATURE_BUCKET_WINDOW, dim),
                superimposer.feature_bucket_window[d],
            )?;
            superimposer.shift_bucket_window[d] = param.usize_or(
                &axis_key(SHIFT_BUCKET_WINDOW, dim),
                superimposer.shift_bucket_window[d],
            )?;
        }

        match number_buckets[0].checked_mul(number_buckets[1]) {
            Some(cells) if cells <= MAX_CELLS => {}
            _ => {
                return Err(AlignError::invalid(
                    NUMBER_BUCKETS,
                    format!(
                        "grid of {}x{} buckets exceeds {} cells",
                        number_buckets[0], number_buckets[1], MAX_CELLS
                    ),
                ))
            }
        }
        superimposer.shift_histogram_shape()?;

        Ok(MatcherConfig {
            algorithm: param.str_or(ALGORITHM, Algorithm::default().as_str())?.parse()?,
            number_buckets,
            tolerance,
            superimposer,
            threads: param.usize_or(THREADS, 0)?,
            debug: DebugFiles {
                feature_buckets: optional_path(param, DEBUG_FEATURE_BUCKETS_FILE)?,
                shift_buckets: optional_path(param, DEBUG_SHIFT_BUCKETS_FILE)?,
                feature_pairs: optional_path(param, DEBUG_FEATURE_PAIRS_FILE)?,
            },
        })
    }
}

fn positive(param: &Param, key: &str, default: f64) -> Result<f64> {
    let value = param.f64_or(key, default)?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(AlignError::invalid(key, format!("must be a positive number, got {}", value)))
    }
}

fn optional_path(param: &Param, key: &str) -> Result<Option<PathBuf>> {
    let path = param.str_or(key, "")?;
    Ok((!path.is_empty()).then(|| PathBuf::from(path)))
}

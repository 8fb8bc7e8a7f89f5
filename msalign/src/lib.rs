pub mod error;
pub mod dump;

pub mod data {
    pub mod feature;
    pub mod transform;
}

pub mod config {
    pub mod param;
    pub mod matcher;
}

pub mod algorithm {
    pub mod grid;
    pub mod superimposer;
    pub mod pair_finder;
    pub mod map_matcher;
}

// Re-export commonly used types
pub use algorithm::grid::{Grid, GridCell, SpatialGrid};
pub use algorithm::map_matcher::{MatchReport, MatcherState, PairwiseMapMatcher};
pub use algorithm::pair_finder::{FeaturePair, SimplePairFinder};
pub use algorithm::superimposer::{GeomHashShiftSuperimposer, ShiftHistogram, Superimposer};
pub use config::matcher::{Algorithm, MatcherConfig, SuperimposerParams};
pub use config::param::{Param, ParamValue};
pub use data::feature::{read_feature_map, BoundingBox2D, Dim, Feature, MapSlice, Position};
pub use data::transform::{LinearMapping, ShiftTransform};
pub use error::{AlignError, Result};

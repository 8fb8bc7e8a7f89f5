use thiserror::Error;

/// Everything that can go wrong while building distance matrices or running
/// a hierarchical clustering.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("index ({row}, {col}) out of range for matrix of dimension {size}")]
    OutOfRange { row: usize, col: usize, size: usize },

    #[error("cannot allocate distance matrix of dimension {dimension}")]
    OutOfMemory { dimension: usize },

    #[error("minimum is stale after an unchecked write, call recompute_minimum() first")]
    StaleMinimum,

    #[error("matrices differ in dimension: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("comparator returned {value} for items ({row}, {col}), similarity must lie in [0, 1]")]
    UnnormalizedComparator { value: f32, row: usize, col: usize },

    #[error("clustering cannot run: {0}")]
    CanNotRun(String),

    #[error("no clustering run available: {0}")]
    NoClusterRun(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

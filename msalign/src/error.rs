use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("required parameter '{0}' not found")]
    ElementNotFound(String),

    #[error("invalid value for parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("unknown algorithm '{0}', expected 'geomhash_shift' or 'simple'")]
    UnknownAlgorithm(String),

    #[error("feature {index} at (rt={rt}, mz={mz}) lies outside the grid")]
    PointOutsideGrid { index: usize, rt: f64, mz: f64 },

    #[error("matching was cancelled")]
    Cancelled,

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AlignError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        AlignError::InvalidParameter { key: key.into(), reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, AlignError>;

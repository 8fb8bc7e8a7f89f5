// error types
pub mod error;

// lower-triangle distance storage
pub mod distance_matrix;

// clustering module
pub mod clustering {
    pub mod linkage;
    pub mod hierarchical;
    pub mod analysis;
}

// Re-export commonly used types
pub use clustering::hierarchical::{ClusterHierarchical, ClusteringResult};
pub use clustering::linkage::{BinaryTreeNode, ClusterFunctor, Linkage};
pub use distance_matrix::DistanceMatrix;
pub use error::{ClusterError, Result};

//! Crate-wide error type.

use thiserror::Error;

/// Everything that can go wrong while building or querying the kd-tree, building
/// correspondences, or solving for a pose.
#[derive(Debug, Error)]
pub enum Error {
    /// A point cloud or feature matrix had zero columns.
    #[error("input is empty")]
    EmptyInput,

    /// A cloud's point count didn't match its feature matrix's column count, or the
    /// two feature matrices disagreed on descriptor dimension.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A query was issued against a kd-tree that has no data.
    #[error("kd-tree has not been built")]
    NotReady,

    /// Fewer than the required number of correspondences survived tuple pruning.
    #[error("insufficient correspondences: found {found}, need at least {required}")]
    InsufficientCorrespondences {
        /// Number of correspondences that survived.
        found: usize,
        /// Minimum required by the solver.
        required: usize,
    },

    /// The Gauss-Newton normal equations were singular and could not be factored.
    #[error("numerical failure: JtJ is not positive definite")]
    NumericalFailure,

    /// Reading a legacy descriptor file failed.
    #[error("failed to read descriptor file: {0}")]
    IoFailure(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

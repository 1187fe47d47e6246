use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, VoxelElasticError>;

#[derive(Error, Debug)]
pub enum VoxelElasticError {
    /// Bad microstructure, phase table, spacing or settings. Raised before
    /// any mesh work.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Face pairings that do not match node for node, or constraints that
    /// contradict each other.
    #[error("Mesh consistency error: {0}")]
    MeshConsistency(String),

    /// Singular tangent, iterative solver breakdown or Newton
    /// non-convergence.
    #[error("Solver convergence error: {0}")]
    SolverConvergence(String),

    /// A per-sample failure tagged with the sample index
    #[error("sample {index} failed: {source}")]
    Sample {
        index: usize,
        #[source]
        source: Box<VoxelElasticError>,
    },

    #[error("Input error: {0}")]
    Input(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoxelElasticError {
    /// Tags an error with the sample it came from
    pub fn in_sample(self, index: usize) -> VoxelElasticError {
        VoxelElasticError::Sample {
            index,
            source: Box::new(self),
        }
    }
}

//! Error types for the dk-app service layer.

use dk_model::{ModelError, SchemaError, SolverError};

/// Application error type that wraps errors from the model and solver
/// crates and gives CLI and other frontends one error interface.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Solver '{solver}' failed: {source}")]
    Solver {
        solver: String,
        #[source]
        source: SolverError,
    },

    #[error("Too many outputs requested ({requested}): solve returns the solution only")]
    TooManyOutputs { requested: usize },

    #[error("Solving is halted")]
    Halted,

    #[error("Auxiliary outputs unavailable: {0}")]
    Aux(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for dk-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl From<SchemaError> for AppError {
    fn from(err: SchemaError) -> Self {
        AppError::Model(ModelError::Schema(err))
    }
}

impl AppError {
    pub fn unsupported_solver(solver: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Model(ModelError::UnsupportedSolver {
            solver: solver.into(),
            reason: reason.into(),
        })
    }

    /// Whether this is the unsupported-solver failure.
    pub fn is_unsupported_solver(&self) -> bool {
        matches!(self, AppError::Model(ModelError::UnsupportedSolver { .. }))
    }
}

//! System descriptions for dynkit.
//!
//! A description declares named parameters, state variables, lags and
//! auxiliary outputs, the right-hand-side functions of an ODE, DDE or SDE,
//! and the solvers it may be integrated with. This crate validates raw
//! descriptions, gives named access to their values, maps them to and from
//! flat solver vectors, and classifies their declared solvers.

pub mod codec;
pub mod functions;
pub mod obsolete;
pub mod registry;
pub mod schema;
pub mod solution;
pub mod solver;
pub mod store;
pub mod validate;

use dk_core::DkError;
use thiserror::Error;

pub use codec::{IndexMap, IndexSpan};
pub use functions::{AuxError, AuxFn, DdeFn, Functions, OdeFn, SdeFn};
pub use registry::{SolverEntry, classify, default_solver, enumerate, find_by_name};
pub use schema::{
    Bounds, Collection, CollectionKind, Entry, RawSystem, SdeOptions, SolverOptions, SystemData,
    SystemDef, TimeSpan,
};
pub use solution::Solution;
pub use solver::{
    DdeSolver, Family, OdeSolver, SdeSolver, SdeTrajectory, Solver, SolverDecls, SolverError,
    SolverHandle, SolverResult, Trajectory,
};
pub use validate::{SchemaError, ValidateOptions, validate, validate_with};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("No entry named '{name}' in {collection}")]
    NotFound {
        collection: &'static str,
        name: String,
    },

    #[error("Size mismatch for {what}: expected {expected}, got {actual}")]
    SizeMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("Solver '{solver}' cannot be used here: {reason}")]
    UnsupportedSolver { solver: String, reason: String },

    #[error("Invalid limits for '{name}': [{min}, {max}]")]
    InvalidBounds { name: String, min: f64, max: f64 },

    #[error("Invalid value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: f64,
        reason: &'static str,
    },

    #[error("Cannot serialise system description: {0}")]
    Serialize(String),

    #[error(transparent)]
    Core(#[from] DkError),
}

pub type ModelResult<T> = Result<T, ModelError>;

//! Shared application service layer for dynkit.
//!
//! This crate gives CLI and interactive frontends one interface for solving
//! validated system descriptions, holding an editable session over one
//! description, solving in the background, and querying solutions.

pub mod catalog;
pub mod error;
pub mod orchestrate;
pub mod query;
pub mod session;
pub mod worker;

// Re-export key types for convenience
pub use catalog::{ModelInfo, list_models, load_model, model_info, raw_model};
pub use error::{AppError, AppResult};
pub use orchestrate::{SolveRequest, final_state, resolve_solver, solve};
pub use query::{SolutionSummary, after_transient, list_labels, series_by_label, summary};
pub use session::Session;
pub use worker::{SolveWorker, WorkerMessage};

//! dk-core: stable foundation for dynkit.
//!
//! Contains:
//! - numeric (Real + tolerances + float helpers)
//! - value (shaped real values held by parameter/variable definitions)
//! - timing (wall-clock timers reported through tracing)
//! - error (shared error types)

pub mod error;
pub mod numeric;
pub mod timing;
pub mod value;

// Re-exports: nice ergonomics for downstream crates
pub use error::{DkError, DkResult};
pub use numeric::*;
pub use value::{Shape, Value};

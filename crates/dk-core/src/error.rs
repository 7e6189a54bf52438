use thiserror::Error;

pub type DkResult<T> = Result<T, DkError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DkError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Shape mismatch: {what} (expected {expected}, got {actual})")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },
}

//! Shared error type across meterplex crates.

use thiserror::Error;

/// Shared result type.
pub type Result<T> = std::result::Result<T, MeterError>;

/// Construction and configuration failures.
///
/// Metric operations themselves (add, set, observe, bind) never fail; every
/// variant here is raised before traffic is admitted.
#[derive(Debug, Error)]
pub enum MeterError {
    #[error("invalid time unit: {0}")]
    InvalidUnit(String),
    #[error("label arity mismatch for {metric}: expected {expected} values, found {found}")]
    LabelArityMismatch {
        metric: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("bad config: {0}")]
    BadConfig(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl MeterError {
    /// Stable string code, suitable for logs and assertions.
    pub fn code(&self) -> &'static str {
        match self {
            MeterError::InvalidUnit(_) => "INVALID_UNIT",
            MeterError::LabelArityMismatch { .. } => "LABEL_ARITY_MISMATCH",
            MeterError::BadConfig(_) => "BAD_CONFIG",
            MeterError::UnsupportedVersion => "UNSUPPORTED_VERSION",
            MeterError::Internal(_) => "INTERNAL",
        }
    }
}

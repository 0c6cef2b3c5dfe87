//! Coercion error types.

use thiserror::Error;

pub type CoerceResult<T> = Result<T, CoerceError>;

/// A raw value could not be read as the number or vector expected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoerceError {
    #[error("expected a number, got {0}")]
    NotNumeric(String),

    #[error("expected a single value, got {0} values")]
    NotScalar(usize),

    #[error("expected at least {expected} values, got {found}")]
    TooFewValues { expected: usize, found: usize },

    #[error("value is not finite: {0}")]
    NonFinite(f64),

    #[error("expected a list of instances")]
    NotAList,

    #[error("value {0} is outside [0, 1]")]
    OutOfUnitRange(f64),

    #[error("no class name for id {0}")]
    NoClassName(i64),
}

impl CoerceError {
    pub fn not_numeric(value: &serde_json::Value) -> Self {
        Self::NotNumeric(value.to_string().chars().take(64).collect())
    }
}

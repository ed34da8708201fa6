use thiserror::Error;

/// Error type for invalid operations.
///
/// Running out of draws before the convergence tests pass is not an error; see
/// [`crate::integrator::TerminalStatus`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarginalError {
    /// Empty or otherwise unusable evaluation data
    #[error("Invalid input: {0}")]
    Input(String),
    #[error("Coordinate dimension mismatch. Expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    /// Singular regression or a failed kernel optimisation
    #[error("Surrogate fit failed: {0}")]
    Fit(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Dimension name '{0}' is reserved for integrator bookkeeping")]
    ReservedName(String),
    #[error("Invalid sampling interval for '{name}': low={low} must be finite and below high={high}")]
    InvalidInterval { name: String, low: f64, high: f64 },
}

/// Convenience type for `Result<T, MarginalError>`.
pub type MarginalResult<T> = Result<T, MarginalError>;

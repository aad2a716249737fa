//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur when deriving a power figure from pulse timing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateError {
    /// Two pulses landed within the same microsecond; a rate cannot be
    /// derived from a zero gap and the previous one is kept instead.
    #[error("pulse gap shorter than one microsecond")]
    GapTooShort,
}

/// Result type for rate computations.
pub type RateResult<T> = Result<T, RateError>;

use shared_types::LogLevel;

pub use crate::transport::error::TransportError;

/// Input rejected at the boundary; the prior value is kept and nothing is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Turn amount must contain digits only, got {0:?}")]
    NotNumeric(String),

    #[error("Turn amount must be a positive integer")]
    NotPositive,

    #[error("Turn amount {0} is too large")]
    TooLarge(String),

    #[error("{0} is not a lifecycle hook")]
    NotAHook(LogLevel),
}

/// Error returned by user-facing control operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

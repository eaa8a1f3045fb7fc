//! Error Taxonomy
//!
//! Only `Validation`, `UserInput` and `Suspended` are expected to cross the
//! command → dispatcher boundary. Everything else is a defect or a backend
//! fault and is reported as a generic failure.

use crate::question::ValidationError;
use crate::response::Response;
use crate::store::StoreError;

/// Errors raised while running a command turn
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not a failure: the command needs another answer and must unwind.
    /// Commands propagate it with `?` and never match on it.
    #[error("Awaiting answer")]
    Suspended(Response),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    UserInput(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    pub fn user(msg: impl Into<String>) -> Self {
        Error::UserInput(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Errors the user can fix by resending a message
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::UserInput(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

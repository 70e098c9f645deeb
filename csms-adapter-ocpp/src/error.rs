//! Engine error types

use thiserror::Error;

use crate::ocpp::Action;

/// Errors raised while handling a station request.
///
/// Never reaches the station: each handler turns it into the negative
/// response of its action.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Domain invariant violation
    #[error("[{module}] {action} from {station}: {message}")]
    Backend {
        station: String,
        action: Action,
        module: &'static str,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{service} failed: {message}")]
    Collaborator {
        service: &'static str,
        message: String,
    },

    /// Malformed or incomplete request
    #[error("Invalid {action} request: {message}")]
    Validation { action: Action, message: String },

    #[error(transparent)]
    Core(#[from] csms_core::CoreError),
}

impl EngineError {
    pub fn backend(
        station: impl Into<String>,
        action: Action,
        module: &'static str,
        message: impl Into<String>,
    ) -> Self {
        EngineError::Backend {
            station: station.into(),
            action,
            module,
            message: message.into(),
        }
    }

    pub fn validation(action: Action, message: impl Into<String>) -> Self {
        EngineError::Validation {
            action,
            message: message.into(),
        }
    }
}

/// Errors reported by a [`Storage`](crate::services::Storage) backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Errors reported by an external collaborator
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CollaboratorError(pub String);

impl CollaboratorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

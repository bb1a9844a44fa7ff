use thiserror::Error;

use crate::app::errors::AppError;

/// Domain-specific errors for CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Operation cancelled by user")]
    UserCancelled,

    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error(transparent)]
    App(#[from] AppError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CliError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {err}"))
    }
}

impl From<inquire::InquireError> for CliError {
    fn from(err: inquire::InquireError) -> Self {
        match err {
            inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
                Self::UserCancelled
            }
            err => Self::internal(err.to_string()),
        }
    }
}

use thiserror::Error;

/// Errors raised while turning user input into a command
#[derive(Error, Debug)]
pub enum CliError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },
}

impl CliError {
    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

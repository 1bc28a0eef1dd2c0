use thiserror::Error;

/// Recoverable failures reported by the table engine.
///
/// None of these leave a dataset partially mutated: every mutating operation either
/// commits completely or leaves the previous state in place.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An operation named a row or column that no longer exists
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// A filter could not be compiled; it is excluded from the AND chain
    #[error("invalid filter #{index} ({value:?}): {reason}")]
    InvalidFilter {
        index: usize,
        value: String,
        reason: String,
    },

    /// Malformed batch-transform parameters; the whole operation was aborted
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A transform script raised, returned the wrong shape, or returned nothing
    #[error("script execution failed: {message}")]
    ScriptExecution {
        message: String,
        stdout: String,
        stderr: String,
    },

    /// Another mutating operation is still in flight
    #[error("another operation is already in progress")]
    Busy,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn invalid_reference(what: impl Into<String>) -> Self {
        Self::InvalidReference(what.into())
    }

    pub fn invalid_operation(what: impl Into<String>) -> Self {
        Self::InvalidOperation(what.into())
    }

    pub fn script(message: impl Into<String>, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::ScriptExecution {
            message: message.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

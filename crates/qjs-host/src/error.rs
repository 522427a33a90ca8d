//! Error types for the script host

use std::path::PathBuf;
use std::time::Duration;

use qjs_core::QjsError;
use thiserror::Error;

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("The script host is already initialized")]
    AlreadyInitialized,

    #[error("The script host is not initialized")]
    NotInitialized,

    #[error("A host named {0:?} already exists")]
    DuplicateKey(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid host configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Engine or script failure
    #[error(transparent)]
    Engine(#[from] QjsError),

    #[error("Global {0:?} is not a function")]
    NotAFunction(String),

    /// The call ran past the configured timeout and was interrupted
    #[error("Script timed out after {0:?}")]
    Timeout(Duration),

    /// Result cannot be shaped as the configured result mode asks
    #[error("Unsupported result: {0}")]
    UnsupportedResult(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HostError {
    /// Check if the failure came from script code rather than the host
    pub fn is_script_error(&self) -> bool {
        match self {
            Self::Engine(e) => e.is_script_error(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_is_transparent() {
        let err: HostError = QjsError::script_error("TypeError", "x is not a function").into();
        assert_eq!(err.to_string(), "TypeError: x is not a function");
        assert!(err.is_script_error());
    }

    #[test]
    fn test_timeout_display() {
        let err = HostError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Script timed out after 250ms");
        assert!(err.is_script_error());
        assert!(!HostError::NotInitialized.is_script_error());
    }
}

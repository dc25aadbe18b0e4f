use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::reinforcement::action::Difficulty;

/// Main error type for quizpilot
#[derive(Error, Debug)]
pub enum QuizError {
    #[error("Storage unavailable during {operation}: {message}")]
    StorageUnavailable { operation: String, message: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("No allowed actions for level {level}")]
    NoAllowedActions { level: String },

    #[error("Concurrent update conflict after {attempts} attempts")]
    ConcurrentUpdateConflict { attempts: u32 },

    #[error("Difficulty selection failed: {source}")]
    SelectionFailed {
        allowed: Vec<Difficulty>,
        #[source]
        source: Box<QuizError>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("IO error: {source}")]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },
}

impl QuizError {
    /// Create a new storage error for the named operation
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn no_allowed_actions(level: impl fmt::Display) -> Self {
        Self::NoAllowedActions {
            level: level.to_string(),
        }
    }

    /// Create a new configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a new IO error with path context
    pub fn io_error(err: std::io::Error, path: Option<impl Into<PathBuf>>) -> Self {
        Self::Io {
            source: err,
            path: path.map(|p| p.into()),
        }
    }

    /// Wrap a selection failure together with the actions that were allowed
    pub fn selection_failed(allowed: Vec<Difficulty>, source: QuizError) -> Self {
        Self::SelectionFailed {
            allowed,
            source: Box::new(source),
        }
    }

    /// Whether the error came from a storage boundary and may be retried by the caller
    pub fn is_storage(&self) -> bool {
        match self {
            QuizError::StorageUnavailable { .. } => true,
            QuizError::SelectionFailed { source, .. } => source.is_storage(),
            _ => false,
        }
    }

    /// Allowed actions carried by a selection failure, if any
    pub fn allowed_actions(&self) -> Option<&[Difficulty]> {
        match self {
            QuizError::SelectionFailed { allowed, .. } => Some(allowed),
            _ => None,
        }
    }
}

impl From<std::io::Error> for QuizError {
    fn from(error: std::io::Error) -> Self {
        QuizError::io_error(error, None::<PathBuf>)
    }
}

impl From<rusqlite::Error> for QuizError {
    fn from(error: rusqlite::Error) -> Self {
        QuizError::storage("sqlite", error.to_string())
    }
}

impl From<serde_json::Error> for QuizError {
    fn from(error: serde_json::Error) -> Self {
        QuizError::config(error.to_string())
    }
}

impl From<serde_yaml::Error> for QuizError {
    fn from(error: serde_yaml::Error) -> Self {
        QuizError::config(error.to_string())
    }
}

impl From<toml::de::Error> for QuizError {
    fn from(error: toml::de::Error) -> Self {
        QuizError::config(error.to_string())
    }
}

impl From<toml::ser::Error> for QuizError {
    fn from(error: toml::ser::Error) -> Self {
        QuizError::config(error.to_string())
    }
}

/// Result type alias using QuizError
pub type QuizResult<T> = Result<T, QuizError>;

/// Extension trait for converting foreign errors to QuizError
pub trait ErrorExt<T> {
    /// Treat the error as a storage failure during `operation`
    fn storage_context(self, operation: impl AsRef<str>) -> QuizResult<T>;
}

impl<T, E: fmt::Display> ErrorExt<T> for Result<T, E> {
    fn storage_context(self, operation: impl AsRef<str>) -> QuizResult<T> {
        self.map_err(|e| QuizError::storage(operation.as_ref(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_failure_exposes_allowed_actions() {
        let err = QuizError::selection_failed(
            vec![Difficulty::Easy, Difficulty::Medium],
            QuizError::storage("query_by_state", "database is locked"),
        );

        assert!(err.is_storage());
        assert_eq!(
            err.allowed_actions(),
            Some(&[Difficulty::Easy, Difficulty::Medium][..])
        );
        assert!(err.to_string().contains("database is locked"));
    }

    #[test]
    fn test_storage_context() {
        let result: Result<(), &str> = Err("disk I/O error");
        let err = result.storage_context("update").unwrap_err();

        match err {
            QuizError::StorageUnavailable { operation, message } => {
                assert_eq!(operation, "update");
                assert_eq!(message, "disk I/O error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

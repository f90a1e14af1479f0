//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Variants follow the failure classes the orchestration core distinguishes:
/// transport failures are retried by the fetcher, application failures are
/// not, missing state is treated as already-complete, and configuration
/// errors abort only the capture job they belong to.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Application error{}: {message}", status_suffix(.status))]
    Application {
        status: Option<u16>,
        message: String,
    },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn application(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Application {
            status,
            message: msg.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether this error means the addressed state no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is a connection-level failure worth retrying.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::Transport(err.to_string())
        } else {
            Self::Application {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_display_includes_status() {
        let err = Error::application(Some(404), "missing");
        assert_eq!(err.to_string(), "Application error (HTTP 404): missing");

        let err = Error::application(None, "bad payload");
        assert_eq!(err.to_string(), "Application error: bad payload");
    }

    #[test]
    fn test_classification_helpers() {
        assert!(Error::not_found("WorkQueue", "q").is_not_found());
        assert!(Error::Transport("reset".into()).is_transport());
        assert!(!Error::config("x").is_transport());
    }
}

/// Marketgate Error Module
///
/// This module defines the error types used across marketgate. The gateway
/// boundary has its own narrow taxonomy (`GatewayError`); everything around
/// it (configuration, console commands, file output) uses `ConsoleError`.
use crate::gateway::{OperationKind, Role};
use thiserror::Error;

/// Failure reported by the data access gateway.
///
/// Every fault raised while connecting, executing, fetching or committing is
/// folded into one of these three variants before it leaves the gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// The database could not be reached, or rejected the credentials
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The caller's role may not perform this kind of operation
    #[error("Authorization denied: {role} may not {operation}")]
    AuthorizationDenied { role: Role, operation: OperationKind },

    /// The statement or procedure itself failed
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl GatewayError {
    /// Denials are rendered as warnings rather than failures.
    pub fn is_warning(&self) -> bool {
        matches!(self, GatewayError::AuthorizationDenied { .. })
    }

    pub(crate) fn connection(err: impl std::fmt::Display) -> Self {
        GatewayError::ConnectionFailed(err.to_string())
    }

    pub(crate) fn execution(err: impl std::fmt::Display) -> Self {
        GatewayError::ExecutionFailed(err.to_string())
    }
}

/// Error type for the application shell around the gateway.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML syntax or shape errors in the configuration file
    #[error("Configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors during export
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Console command parsing errors
    #[error("Command error: {0}")]
    Command(String),

    /// Export and rendering errors
    #[error("UI error: {0}")]
    Ui(String),

    /// A gateway call failed
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Type alias for Result to use ConsoleError as the error type.
pub type Result<T> = std::result::Result<T, ConsoleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let conn_err = GatewayError::ConnectionFailed("unknown database 'nope'".to_string());
        assert!(conn_err.to_string().contains("Connection failed"));
        assert!(conn_err.to_string().contains("nope"));

        let denied = GatewayError::AuthorizationDenied {
            role: Role::ReadOnly,
            operation: OperationKind::Mutate,
        };
        assert_eq!(denied.to_string(), "Authorization denied: read-only user may not mutate");

        let config_err = ConsoleError::Config("duplicate account 'admin'".to_string());
        assert!(config_err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_only_denial_is_a_warning() {
        let denied = GatewayError::AuthorizationDenied {
            role: Role::ReadOnly,
            operation: OperationKind::Invoke,
        };
        assert!(denied.is_warning());
        assert!(!GatewayError::ConnectionFailed("x".into()).is_warning());
        assert!(!GatewayError::ExecutionFailed("x".into()).is_warning());
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let console_err: ConsoleError = io_err.into();
        match console_err {
            ConsoleError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }

        let gateway_err = GatewayError::ExecutionFailed("no such table: Job".to_string());
        let console_err: ConsoleError = gateway_err.clone().into();
        assert_eq!(console_err.to_string(), gateway_err.to_string());
    }
}

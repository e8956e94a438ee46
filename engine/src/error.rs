//! Error types for the session engine

use serde::Serialize;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the session engine
#[derive(Debug, Error)]
pub enum Error {
    // Script errors (2000-2999)
    #[error("Invalid script format: {0}")]
    InvalidScriptFormat(String),

    #[error("Invalid frontmatter: {0}")]
    InvalidFrontmatter(String),

    // Recording errors (3000-3999)
    #[error("Recording state error: {0}")]
    RecordingState(String),

    #[error("No recording available")]
    NoRecording,

    // Local process errors (4000-4999)
    #[error("PTY error: {0}")]
    Pty(String),

    // Container engine errors (5000-5999)
    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("Failed to create container: {0}")]
    ContainerCreateFailed(String),

    #[error("Exec failed: {0}")]
    ExecFailed(String),

    #[error("No active container")]
    NoActiveContainer,

    #[error("Docker error: {0}")]
    Docker(String),

    // General errors (1000-1999)
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the error code
    pub fn code(&self) -> u32 {
        match self {
            // Script errors (2000-2999)
            Error::InvalidScriptFormat(_) => 2001,
            Error::InvalidFrontmatter(_) => 2002,

            // Recording errors (3000-3999)
            Error::RecordingState(_) => 3001,
            Error::NoRecording => 3002,

            // Local process errors (4000-4999)
            Error::Pty(_) => 4001,

            // Container engine errors (5000-5999)
            Error::EngineUnavailable(_) => 5001,
            Error::ImagePullFailed { .. } => 5002,
            Error::ContainerCreateFailed(_) => 5003,
            Error::ExecFailed(_) => 5004,
            Error::NoActiveContainer => 5005,
            Error::Docker(_) => 5006,

            // General errors (1000-1999)
            Error::Io(_) => 1001,
            Error::Internal(_) => 1002,
        }
    }
}

/// Error payload handed to display surfaces
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Structured result returned across the control boundary.
///
/// Failures never escape as panics; the UI glue receives
/// `{"success": false, "error": {...}}` instead.
#[derive(Debug, Clone, Serialize)]
pub struct ControlResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl<T> From<Result<T>> for ControlResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            Err(err) => Self {
                success: false,
                data: None,
                error: Some(ErrorResponse::from(&err)),
            },
        }
    }
}

// Implement From for common error types
impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Error::Docker(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::InvalidFrontmatter(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_response_success() {
        let response = ControlResponse::from(Ok::<u32, Error>(7));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "data": 7 }));
    }

    #[test]
    fn test_control_response_failure_carries_code() {
        let response = ControlResponse::from(Err::<(), Error>(Error::EngineUnavailable(
            "connection refused".to_string(),
        )));
        assert!(!response.success);
        let error = response.error.unwrap();
        assert_eq!(error.code, 5001);
        assert!(error.message.contains("connection refused"));
    }
}

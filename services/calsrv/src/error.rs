//! Error handling for the calibration service

use dlt645::CodecError;
use thiserror::Error;

use crate::transport::TransportError;

/// Failure of a single request/response attempt. Every variant is retryable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    #[error("No response within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Incomplete response: {received} bytes received before timeout")]
    IncompleteResponse { received: usize },

    #[error("Response validation failed: {0}")]
    ResponseValidation(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Calibration service error type
#[derive(Error, Debug, Clone)]
pub enum CalSrvError {
    /// Frame or parameter encoding rejected before any I/O
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Device not connected")]
    NotConnected,

    /// A command or run is already in flight
    #[error("Busy: {0}")]
    Busy(String),

    /// All attempts of a command exhausted
    #[error("Command failed after {attempts} attempts ({retry_count} retries): {last}")]
    Communication {
        attempts: u32,
        retry_count: u32,
        #[source]
        last: CommError,
    },

    /// Meter answered with a payload the step cannot interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unknown calibration step: {0}")]
    UnknownStep(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Result type alias for the calibration service
pub type Result<T> = std::result::Result<T, CalSrvError>;

impl CalSrvError {
    pub fn busy(msg: impl Into<String>) -> Self {
        CalSrvError::Busy(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CalSrvError::Config(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        CalSrvError::InvalidResponse(msg.into())
    }

    /// Last attempt error of an exhausted command, if this is one
    pub fn last_comm_error(&self) -> Option<&CommError> {
        match self {
            CalSrvError::Communication { last, .. } => Some(last),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.last_comm_error(), Some(CommError::Timeout { .. }))
    }

    /// Whether repeating the operation can succeed. Encoding, configuration and
    /// lookup errors fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CalSrvError::Codec(_) | CalSrvError::Config(_) | CalSrvError::UnknownStep(_)
        )
    }
}

impl From<std::io::Error> for CalSrvError {
    fn from(err: std::io::Error) -> Self {
        CalSrvError::Io(err.to_string())
    }
}

impl From<figment::Error> for CalSrvError {
    fn from(err: figment::Error) -> Self {
        CalSrvError::Config(err.to_string())
    }
}

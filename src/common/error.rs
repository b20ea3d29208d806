//! Error types for the SCPI probe
//!
//! Every failure that can be recorded in a report keeps its original
//! message so it can be shown to the user verbatim.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the SCPI probe
#[derive(Error, Debug)]
pub enum Error {
    // === Discovery Errors ===
    #[error("Resource enumeration failed: {0}")]
    Enumeration(String),

    #[error("Invalid resource pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // === Connection Errors ===
    #[error("Invalid resource address '{0}'")]
    InvalidAddress(String),

    #[error("Failed to connect to '{address}': {message}")]
    ConnectFailed { address: String, message: String },

    // === I/O Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("VXI-11 error: {0}")]
    Rpc(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a connect error for an address
    pub fn connect_failed(address: &str, message: impl ToString) -> Self {
        Self::ConnectFailed {
            address: address.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern(pattern: &str, reason: impl ToString) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure was caused by an expired I/O timeout
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Stable code used in reports and JSON output
    pub fn code(&self) -> &'static str {
        match self {
            _ if self.is_timeout() => "PROTOCOL_TIMEOUT",
            Self::Enumeration(_) | Self::InvalidPattern { .. } => "ENUMERATION_ERROR",
            Self::ConnectFailed { .. } => "CONNECT_ERROR",
            Self::Io(_) | Self::Transport(_) | Self::Rpc(_) => "IO_ERROR",
            Self::InvalidAddress(_)
            | Self::Config(_)
            | Self::ConfigParse(_)
            | Self::FileRead { .. } => "CONFIG_ERROR",
            Self::Timeout(_) => "PROTOCOL_TIMEOUT",
            Self::Json(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error must terminate the process rather than be recorded
    pub fn is_fatal(&self) -> bool {
        matches!(self.code(), "ENUMERATION_ERROR" | "CONFIG_ERROR")
    }
}

/// Serializable snapshot of an error kept inside recorded results
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecordedError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for RecordedError {
    fn from(e: &Error) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl std::fmt::Display for RecordedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_codes() {
        assert_eq!(Error::Timeout(1000).code(), "PROTOCOL_TIMEOUT");
        let io = Error::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(io.is_timeout());
        assert_eq!(io.code(), "PROTOCOL_TIMEOUT");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Enumeration("no backend".into()).is_fatal());
        assert!(Error::InvalidAddress("FOO".into()).is_fatal());
        assert!(!Error::connect_failed("TCPIP::1.2.3.4::INSTR", "refused").is_fatal());
        assert!(!Error::Transport("broken pipe".into()).is_fatal());
    }

    #[test]
    fn test_json_errors_are_internal() {
        let err = Error::from(serde_json::from_str::<u32>("nope").unwrap_err());
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_recorded_error_keeps_message() {
        let err = Error::connect_failed("ASRL3::INSTR", "port busy");
        let recorded = RecordedError::from(&err);
        assert_eq!(recorded.code, "CONNECT_ERROR");
        assert_eq!(
            recorded.message,
            "Failed to connect to 'ASRL3::INSTR': port busy"
        );
    }
}

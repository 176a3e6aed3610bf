//! Unified error handling for thermgov
//!
//! A single error type shared by the core library, the daemon and the CLI.
//! Steady-state errors (sensor, hotplug, frequency) are never fatal to the
//! governor loop; only [`GovernorError::StartupBinding`] stops the process.

use std::io;
use std::path::PathBuf;

/// Result type alias using GovernorError
pub type Result<T> = std::result::Result<T, GovernorError>;

/// Unified error type for all thermgov operations
#[derive(thiserror::Error, Debug)]
pub enum GovernorError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Governor Errors
    // ============================================================================
    #[error("Invalid value for {field}: {reason}")]
    ConfigValidation {
        field: String,
        reason: String,
    },

    #[error("Warm frequency is fixed after startup")]
    WarmFrequencyLocked,

    #[error("Failed to read sensor {sensor_id}: {reason}")]
    Sensor {
        sensor_id: u32,
        reason: String,
    },

    #[error("Hotplug request for cpu{core} failed: {reason}")]
    Hotplug {
        core: usize,
        reason: String,
    },

    #[error("Frequency limit on cpu{core} failed: {reason}")]
    Frequency {
        core: usize,
        reason: String,
    },

    #[error("Platform binding failed: {0}")]
    StartupBinding(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Daemon not available")]
    DaemonNotAvailable,

    #[error("Daemon connection failed: {0}")]
    DaemonConnection(String),

    #[error("Daemon response error: {0}")]
    DaemonResponse(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl GovernorError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an operator input validation error
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a sensor read error
    pub fn sensor(sensor_id: u32, reason: impl Into<String>) -> Self {
        Self::Sensor {
            sensor_id,
            reason: reason.into(),
        }
    }

    /// Create a per-core hotplug error
    pub fn hotplug(core: usize, reason: impl Into<String>) -> Self {
        Self::Hotplug {
            core,
            reason: reason.into(),
        }
    }

    /// Create a per-core frequency error
    pub fn frequency(core: usize, reason: impl Into<String>) -> Self {
        Self::Frequency {
            core,
            reason: reason.into(),
        }
    }

    /// Create a startup binding error
    pub fn binding(msg: impl Into<String>) -> Self {
        Self::StartupBinding(msg.into())
    }

    /// Create a daemon error from a string
    pub fn daemon(msg: impl Into<String>) -> Self {
        Self::DaemonResponse(msg.into())
    }

    /// Whether this error must stop the governor from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StartupBinding(_))
    }

    /// Whether this error is rejected operator input (prior value retained)
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ConfigValidation { .. } | Self::WarmFrequencyLocked)
    }
}

// Allow converting from String to GovernorError
impl From<String> for GovernorError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to GovernorError
impl From<&str> for GovernorError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_startup_binding_is_fatal() {
        assert!(GovernorError::binding("no sensor id").is_fatal());
        assert!(!GovernorError::sensor(3, "EIO").is_fatal());
        assert!(!GovernorError::hotplug(2, "EBUSY").is_fatal());
        assert!(!GovernorError::validation("threshold", "out of range").is_fatal());
    }

    #[test]
    fn validation_errors_are_classified() {
        assert!(GovernorError::WarmFrequencyLocked.is_validation());
        assert!(GovernorError::validation("core0_permission", "must be 0 or 1").is_validation());
        assert!(!GovernorError::config("bad file").is_validation());
    }

    #[test]
    fn display_names_the_core() {
        let err = GovernorError::hotplug(5, "device busy");
        assert_eq!(err.to_string(), "Hotplug request for cpu5 failed: device busy");
    }
}

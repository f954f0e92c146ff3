//! Error handling module for zbc-dev-control
//!
//! Provides the error taxonomy of the control workflow using thiserror.
//! Every failure is fatal: nothing is retried, the device handle is released
//! and the error is surfaced to the caller with a descriptive message.

use thiserror::Error;

use crate::device::DriverError;

/// Main error type for zbc-dev-control
#[derive(Error, Debug)]
pub enum DevControlError {
    /// Malformed command line invocation
    #[error("Usage error: {0}")]
    Usage(String),

    /// The device could not be opened
    #[error("Failed to open {path}: {source}")]
    DeviceOpen {
        path: String,
        #[source]
        source: DriverError,
    },

    /// A capability required by the request is not advertised by the device
    #[error("{0}")]
    FeatureUnsupported(String),

    /// A device command returned a non-success status
    #[error("{operation} failed: {source}")]
    Protocol {
        operation: &'static str,
        #[source]
        source: DriverError,
    },

    /// A device reported a value that violates the protocol
    #[error("Invalid response to {operation}: {detail}")]
    InvalidResponse {
        operation: &'static str,
        detail: String,
    },

    /// Symbolic mutation target name not present in the catalog
    #[error("Unknown mutation target {0}")]
    UnknownMutationTarget(String),

    /// Buffer sizing failed while fetching supported mutations
    #[error("No memory for {0} supported mutation records")]
    Allocation(u32),

    /// Workflow stage transition errors
    #[error("Workflow transition error: {0}")]
    Transition(String),

    /// IO errors (emulated device images)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for device control operations
pub type Result<T> = std::result::Result<T, DevControlError>;

// Convenient error constructors
impl DevControlError {
    /// Create a usage error
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Create a device open error
    pub fn device_open(path: impl Into<String>, source: DriverError) -> Self {
        Self::DeviceOpen {
            path: path.into(),
            source,
        }
    }

    /// Create a feature unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::FeatureUnsupported(msg.into())
    }

    /// Create a protocol error for the named device command
    pub fn protocol(operation: &'static str, source: DriverError) -> Self {
        Self::Protocol { operation, source }
    }

    /// Create an invalid response error for the named device command
    pub fn invalid_response(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation,
            detail: detail.into(),
        }
    }

    /// Returns true for errors caused by the invocation rather than the device
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_) | Self::UnknownMutationTarget(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;

    #[test]
    fn test_error_display() {
        let err = DevControlError::usage("-ur value must be y or n");
        assert_eq!(err.to_string(), "Usage error: -ur value must be y or n");

        let err = DevControlError::unsupported("Device doesn't support MUTATE");
        assert_eq!(err.to_string(), "Device doesn't support MUTATE");

        let err = DevControlError::UnknownMutationTarget("ZD_FOO".to_string());
        assert_eq!(err.to_string(), "Unknown mutation target ZD_FOO");
    }

    #[test]
    fn test_protocol_error_names_operation() {
        let err = DevControlError::protocol("zone activation control get", Errno::EIO.into());
        let msg = err.to_string();
        assert!(msg.starts_with("zone activation control get failed"));
        assert!(msg.contains("EIO"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DevControlError = io_err.into();
        assert!(matches!(err, DevControlError::Io(_)));
    }

    #[test]
    fn test_usage_classification() {
        assert!(DevControlError::usage("bad").is_usage());
        assert!(DevControlError::UnknownMutationTarget("X".into()).is_usage());
        assert!(!DevControlError::Allocation(3).is_usage());
    }
}

//! Error types for the msgpump library.

use thiserror::Error;

use crate::ble::ChunkedWriteError;
use crate::status::{GattStatus, Normalize, Operation, TransportStatus};

/// The main error type for msgpump operations.
///
/// Errors never leave a pump or binder directly. They are reduced to a
/// [`TransportStatus`] through [`Normalize`] and published as events.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A GATT operation completed with a non-success status.
    #[error("GATT operation failed: {0}")]
    Gatt(GattStatus),

    /// Bluetooth stack error.
    #[cfg(feature = "btleplug")]
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    /// A block of a chunked write failed.
    #[error(transparent)]
    ChunkedWrite(#[from] ChunkedWriteError),

    /// A required addressing field was empty.
    #[error("required parameter `{field}` is empty")]
    EmptyParams { field: &'static str },

    /// A parameter was present but unusable.
    #[error("invalid parameter: {reason}")]
    InvalidParams { reason: String },

    /// The transport does not support the requested option.
    #[error("unsupported: {what}")]
    Unsupported { what: String },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,

    /// Operation timed out.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl Error {
    /// Builds a timeout error from a duration.
    #[must_use]
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl Normalize for Error {
    fn normalize(&self, op: Operation) -> TransportStatus {
        match self {
            Self::Serial(e) => e.normalize(op),
            Self::Io(e) => e.normalize(op),
            Self::Gatt(status) => status.normalize(op),
            #[cfg(feature = "btleplug")]
            Self::Ble(e) => e.normalize(op),
            Self::ChunkedWrite(e) => e.status(),
            Self::EmptyParams { .. } => TransportStatus::EmptyParams,
            Self::InvalidParams { .. } | Self::Unsupported { .. } => {
                TransportStatus::ProtocolError
            }
            Self::NotConnected => TransportStatus::NotConnected,
            Self::Timeout { .. } => op.failure(),
        }
    }
}

/// Result type alias for msgpump operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_params_errors_normalize() {
        let empty = Error::EmptyParams { field: "host" };
        assert_eq!(
            empty.normalize(Operation::Connect),
            TransportStatus::EmptyParams
        );
        assert_eq!(empty.to_string(), "required parameter `host` is empty");

        let unsupported = Error::Unsupported {
            what: "ssl".into(),
        };
        assert_eq!(
            unsupported.normalize(Operation::Connect),
            TransportStatus::ProtocolError
        );
    }

    #[test]
    fn test_timeout_maps_to_operation_failure() {
        let err = Error::timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "timed out after 1500ms");
        assert_eq!(
            err.normalize(Operation::Connect),
            TransportStatus::ConnectFailure
        );
        assert_eq!(err.normalize(Operation::Write), TransportStatus::WriteFailure);
    }

    #[test]
    fn test_io_error_delegates_to_kind() {
        let err = Error::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(
            err.normalize(Operation::Read),
            TransportStatus::AccessDenied
        );
    }
}

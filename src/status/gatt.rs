//! Mapping table for GATT communication statuses and ATT error codes.

use std::fmt;

use super::{Normalize, Operation, TransportStatus};

/// ATT protocol error codes (Bluetooth Core Spec Vol 3, Part F, 3.4.1.1).
pub mod att {
    /// The attribute handle is invalid on this server.
    pub const INVALID_HANDLE: u8 = 0x01;
    /// The attribute cannot be read.
    pub const READ_NOT_PERMITTED: u8 = 0x02;
    /// The attribute cannot be written.
    pub const WRITE_NOT_PERMITTED: u8 = 0x03;
    /// The attribute PDU was invalid.
    pub const INVALID_PDU: u8 = 0x04;
    /// The attribute requires authentication first.
    pub const INSUFFICIENT_AUTHENTICATION: u8 = 0x05;
    /// The server does not support the request.
    pub const REQUEST_NOT_SUPPORTED: u8 = 0x06;
    /// The offset is past the end of the attribute.
    pub const INVALID_OFFSET: u8 = 0x07;
    /// The attribute requires authorization first.
    pub const INSUFFICIENT_AUTHORIZATION: u8 = 0x08;
    /// Too many prepare writes have been queued.
    pub const PREPARE_QUEUE_FULL: u8 = 0x09;
    /// No attribute found within the handle range.
    pub const ATTRIBUTE_NOT_FOUND: u8 = 0x0A;
    /// The attribute cannot be read or written with a blob request.
    pub const ATTRIBUTE_NOT_LONG: u8 = 0x0B;
    /// The encryption key size is too short.
    pub const INSUFFICIENT_ENCRYPTION_KEY_SIZE: u8 = 0x0C;
    /// The attribute value length is invalid.
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: u8 = 0x0D;
    /// The request failed for an unlikely reason.
    pub const UNLIKELY_ERROR: u8 = 0x0E;
    /// The attribute requires encryption first.
    pub const INSUFFICIENT_ENCRYPTION: u8 = 0x0F;
    /// The grouping attribute type is not supported.
    pub const UNSUPPORTED_GROUP_TYPE: u8 = 0x10;
    /// The server ran out of resources.
    pub const INSUFFICIENT_RESOURCES: u8 = 0x11;
}

/// Outcome of a single GATT exchange as reported by the Bluetooth stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattStatus {
    /// The exchange completed.
    Success,
    /// The device could not be reached.
    Unreachable,
    /// The device answered with a protocol violation.
    ProtocolError,
    /// The device refused the exchange.
    AccessDenied,
    /// The device answered with an ATT error response.
    Att(u8),
}

impl GattStatus {
    /// Returns true if the exchange completed.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Unreachable => f.write_str("unreachable"),
            Self::ProtocolError => f.write_str("protocol error"),
            Self::AccessDenied => f.write_str("access denied"),
            Self::Att(code) => write!(f, "ATT error 0x{code:02x}"),
        }
    }
}

impl Normalize for GattStatus {
    fn normalize(&self, op: Operation) -> TransportStatus {
        match *self {
            Self::Success => TransportStatus::Connected,
            Self::Unreachable => TransportStatus::Unreachable,
            Self::ProtocolError => TransportStatus::ProtocolError,
            Self::AccessDenied => TransportStatus::AccessDenied,
            Self::Att(code) => normalize_att(code, op),
        }
    }
}

fn normalize_att(code: u8, op: Operation) -> TransportStatus {
    match code {
        att::READ_NOT_PERMITTED
        | att::WRITE_NOT_PERMITTED
        | att::INSUFFICIENT_AUTHENTICATION
        | att::INSUFFICIENT_AUTHORIZATION
        | att::INSUFFICIENT_ENCRYPTION_KEY_SIZE
        | att::INSUFFICIENT_ENCRYPTION => TransportStatus::AccessDenied,
        att::INVALID_HANDLE
        | att::INVALID_PDU
        | att::REQUEST_NOT_SUPPORTED
        | att::INVALID_OFFSET
        | att::PREPARE_QUEUE_FULL
        | att::ATTRIBUTE_NOT_FOUND
        | att::ATTRIBUTE_NOT_LONG
        | att::INVALID_ATTRIBUTE_VALUE_LENGTH
        | att::UNSUPPORTED_GROUP_TYPE => TransportStatus::ProtocolError,
        att::UNLIKELY_ERROR | att::INSUFFICIENT_RESOURCES => op.failure(),
        // Application (0x80-0x9F) and common profile (0xE0-0xFF) codes
        _ => TransportStatus::Unknown,
    }
}

#[cfg(feature = "btleplug")]
impl Normalize for btleplug::Error {
    fn normalize(&self, op: Operation) -> TransportStatus {
        match self {
            Self::PermissionDenied => TransportStatus::AccessDenied,
            Self::DeviceNotFound | Self::TimedOut(_) => TransportStatus::Unreachable,
            Self::NotConnected => TransportStatus::NotConnected,
            Self::NotSupported(_) | Self::NoSuchCharacteristic => TransportStatus::ProtocolError,
            Self::RuntimeError(_) => op.failure(),
            _ => TransportStatus::Unknown,
        }
    }
}


#[cfg(all(test, feature = "btleplug"))]
mod btleplug_tests {
    use std::time::Duration;

    use btleplug::Error;

    use super::*;

    #[test]
    fn test_btleplug_errors() {
        let cases = [
            (Error::PermissionDenied, TransportStatus::AccessDenied),
            (Error::DeviceNotFound, TransportStatus::Unreachable),
            (
                Error::TimedOut(Duration::from_secs(1)),
                TransportStatus::Unreachable,
            ),
            (Error::NotConnected, TransportStatus::NotConnected),
            (
                Error::NotSupported("indicate".to_owned()),
                TransportStatus::ProtocolError,
            ),
            (Error::NoSuchCharacteristic, TransportStatus::ProtocolError),
            (Error::UnexpectedCallback, TransportStatus::Unknown),
        ];
        for (error, expected) in cases {
            assert_eq!(error.normalize(Operation::Write), expected, "{error}");
        }
    }

    #[test]
    fn test_btleplug_runtime_error_fails_the_operation() {
        let error = Error::RuntimeError("adapter went away".to_owned());
        assert_eq!(
            error.normalize(Operation::Read),
            TransportStatus::ReadFailure
        );
        assert_eq!(
            error.normalize(Operation::Write),
            TransportStatus::WriteFailure
        );
        assert_eq!(
            error.normalize(Operation::Connect),
            TransportStatus::ConnectFailure
        );
    }
}

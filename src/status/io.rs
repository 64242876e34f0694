//! Mapping table for `std::io` error kinds.
//!
//! Sockets, serial ports and caller-supplied stream handles all surface
//! their failures as `io::Error`.

use std::io::{Error, ErrorKind};

use super::{Normalize, Operation, TransportStatus};

impl Normalize for ErrorKind {
    fn normalize(&self, op: Operation) -> TransportStatus {
        match self {
            ErrorKind::NotConnected => TransportStatus::NotConnected,
            ErrorKind::ConnectionRefused | ErrorKind::AddrInUse | ErrorKind::TimedOut => {
                TransportStatus::ConnectFailure
            }
            // Host and network unreachable subtypes all collapse here
            ErrorKind::NotFound
            | ErrorKind::HostUnreachable
            | ErrorKind::NetworkUnreachable
            | ErrorKind::NetworkDown
            | ErrorKind::AddrNotAvailable => TransportStatus::Unreachable,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::WriteZero => op.failure(),
            ErrorKind::PermissionDenied => TransportStatus::AccessDenied,
            ErrorKind::InvalidData | ErrorKind::InvalidInput | ErrorKind::Unsupported => {
                TransportStatus::ProtocolError
            }
            _ => TransportStatus::Unknown,
        }
    }
}

impl Normalize for Error {
    fn normalize(&self, op: Operation) -> TransportStatus {
        self.kind().normalize(op)
    }
}

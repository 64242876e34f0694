//! Mapping table for serial port errors.

use tokio_serial::{Error, ErrorKind};

use super::{Normalize, Operation, TransportStatus};

impl Normalize for ErrorKind {
    fn normalize(&self, op: Operation) -> TransportStatus {
        match self {
            Self::NoDevice => TransportStatus::Unreachable,
            Self::InvalidInput => TransportStatus::ProtocolError,
            Self::Io(kind) => kind.normalize(op),
            Self::Unknown => TransportStatus::Unknown,
        }
    }
}

impl Normalize for Error {
    fn normalize(&self, op: Operation) -> TransportStatus {
        self.kind.normalize(op)
    }
}

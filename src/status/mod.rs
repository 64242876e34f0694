//! Transport status taxonomy and native code normalization.
//!
//! Every transport reports outcomes in its own vocabulary: `std::io`
//! error kinds for sockets and stream handles, serial port error kinds,
//! GATT communication statuses and ATT error codes for BLE. This module
//! reduces all of them to one [`TransportStatus`] so callers branch on a
//! single taxonomy regardless of transport.
//!
//! Each native vocabulary has its own mapping table (see the submodules).
//! Where a native system distinguishes more cases than the shared
//! taxonomy they collapse to the nearest shared case. Anything a table
//! does not name maps to [`TransportStatus::Unknown`]; raw native codes
//! never travel upward.

mod gatt;
mod io;
mod serial;

use std::fmt;

pub use gatt::{GattStatus, att};

/// Shared outcome taxonomy for all transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportStatus {
    /// Link is up (or the operation completed on a live link).
    Connected,
    /// Operation attempted while no link is established.
    NotConnected,
    /// The native connect call failed.
    ConnectFailure,
    /// Reading from the link failed or the peer closed it.
    ReadFailure,
    /// Writing to the link failed.
    WriteFailure,
    /// The remote end cannot be reached.
    Unreachable,
    /// The remote end answered with something the protocol does not allow.
    ProtocolError,
    /// The operation was refused for lack of permission.
    AccessDenied,
    /// Required connect parameters were missing.
    EmptyParams,
    /// Native outcome with no shared equivalent.
    Unknown,
}

impl TransportStatus {
    /// Returns true for the success status.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns a stable name for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::NotConnected => "not connected",
            Self::ConnectFailure => "connect failure",
            Self::ReadFailure => "read failure",
            Self::WriteFailure => "write failure",
            Self::Unreachable => "unreachable",
            Self::ProtocolError => "protocol error",
            Self::AccessDenied => "access denied",
            Self::EmptyParams => "empty parameters",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation during which a native outcome was observed.
///
/// Native codes that only say "the link broke" carry no information about
/// what was being attempted; the operation supplies the matching failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Establishing the link.
    Connect,
    /// Pulling bytes from the link.
    Read,
    /// Pushing bytes to the link.
    Write,
}

impl Operation {
    /// Returns the failure status for this operation.
    #[must_use]
    pub const fn failure(self) -> TransportStatus {
        match self {
            Self::Connect => TransportStatus::ConnectFailure,
            Self::Read => TransportStatus::ReadFailure,
            Self::Write => TransportStatus::WriteFailure,
        }
    }
}

/// Maps a native outcome into the shared taxonomy.
///
/// Implementations are total: every value yields a status, never a panic.
pub trait Normalize {
    /// Normalizes this outcome as observed during `op`.
    fn normalize(&self, op: Operation) -> TransportStatus;
}

impl<T: Normalize + ?Sized> Normalize for &T {
    fn normalize(&self, op: Operation) -> TransportStatus {
        (**self).normalize(op)
    }
}

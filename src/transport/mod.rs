//! Transport layer.
//!
//! A transport is described by a [`Connector`]: given its connect
//! parameters it performs the native connect call and hands back the two
//! halves of the link, a [`ReadSource`] that the receive loop owns and a
//! [`WriteSink`] that the pump owns. The pump never looks inside either
//! half, so the same lifecycle code drives sockets, serial ports,
//! caller-supplied streams and BLE characteristics.

pub mod ble;
pub mod serial;
pub mod socket;
pub mod stream;

use std::fmt;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Parameters accepted by a connector.
pub trait ConnectParams: fmt::Display + Send + 'static {
    /// Maximum number of bytes pulled by a single read.
    fn max_read_buffer_size(&self) -> usize;

    /// Checks required fields before any native call is made.
    fn validate(&self) -> Result<()>;
}

/// The pull side of a connected transport.
pub trait ReadSource: Send + 'static {
    /// Reads at most `max` bytes.
    ///
    /// Returns `Ok(None)` once the peer has closed the link. The returned
    /// future must be safe to drop at any await point.
    fn read_chunk(&mut self, max: usize) -> BoxFuture<'_, Result<Option<Bytes>>>;

    /// Releases the source. Called once by the receive loop on exit.
    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// The push side of a connected transport.
pub trait WriteSink: Send + 'static {
    /// Writes a whole payload.
    fn write_payload<'a>(&'a mut self, payload: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Releases the sink. Called once during teardown, after the receive
    /// loop has stopped.
    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Performs the native connect call for one transport kind.
pub trait Connector: Send + Sync + 'static {
    /// Parameters of a connect attempt.
    type Params: ConnectParams;
    /// Pull side handed to the receive loop.
    type Source: ReadSource;
    /// Push side kept by the pump.
    type Sink: WriteSink;

    /// Opens the link described by `params`.
    fn connect(&self, params: Self::Params) -> BoxFuture<'_, Result<(Self::Source, Self::Sink)>>;
}

/// [`ReadSource`] over any async byte stream.
#[derive(Debug)]
pub struct StreamSource<R> {
    reader: R,
}

impl<R> StreamSource<R> {
    /// Wraps a reader.
    #[must_use]
    pub const fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> ReadSource for StreamSource<R> {
    fn read_chunk(&mut self, max: usize) -> BoxFuture<'_, Result<Option<Bytes>>> {
        Box::pin(async move {
            let mut buf = vec![0u8; max];
            let n = self.reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            Ok(Some(Bytes::from(buf)))
        })
    }
}

/// [`WriteSink`] over any async byte stream.
#[derive(Debug)]
pub struct StreamSink<W> {
    writer: W,
}

impl<W> StreamSink<W> {
    /// Wraps a writer.
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: AsyncWrite + Unpin + Send + 'static> WriteSink for StreamSink<W> {
    fn write_payload<'a>(&'a mut self, payload: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.writer.write_all(payload).await?;
            self.writer.flush().await?;
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.writer.shutdown().await?;
            Ok(())
        })
    }
}

pub use ble::{BleConnector, BleParams};
pub use serial::{SerialConnector, SerialParams};
pub use socket::{ProtectionLevel, SocketParams, TcpConnector};
pub use stream::{StreamConnector, StreamParams};

//! Transport over caller-supplied stream handles.
//!
//! Used when the link was opened elsewhere (a device session that already
//! owns the input and output streams) and the pump only has to run it.

use std::fmt;
use std::marker::PhantomData;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};
use crate::transport::{ConnectParams, Connector, StreamSink, StreamSource};

/// Default read buffer size for stream handles.
pub const DEFAULT_STREAM_READ_BUFFER_SIZE: usize = 250;

/// Already-open input and output streams.
pub struct StreamParams<R, W> {
    /// Input stream, moved into the receive loop.
    pub reader: R,
    /// Output stream, kept by the pump.
    pub writer: W,
    /// Maximum bytes per read.
    pub max_read_buffer_size: usize,
}

impl<R, W> StreamParams<R, W> {
    /// Creates parameters with the default read buffer size.
    #[must_use]
    pub const fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            max_read_buffer_size: DEFAULT_STREAM_READ_BUFFER_SIZE,
        }
    }

    /// Sets the maximum bytes per read.
    #[must_use]
    pub const fn max_read_buffer_size(mut self, size: usize) -> Self {
        self.max_read_buffer_size = size;
        self
    }
}

impl<R, W> fmt::Display for StreamParams<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream handles (read buffer {})", self.max_read_buffer_size)
    }
}

impl<R, W> ConnectParams for StreamParams<R, W>
where
    R: Send + 'static,
    W: Send + 'static,
{
    fn max_read_buffer_size(&self) -> usize {
        self.max_read_buffer_size
    }

    fn validate(&self) -> Result<()> {
        if self.max_read_buffer_size == 0 {
            return Err(Error::EmptyParams {
                field: "max_read_buffer_size",
            });
        }
        Ok(())
    }
}

/// Connector that adopts caller-supplied streams.
pub struct StreamConnector<R, W> {
    _streams: PhantomData<fn() -> (R, W)>,
}

impl<R, W> StreamConnector<R, W> {
    /// Creates a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _streams: PhantomData,
        }
    }
}

impl<R, W> Default for StreamConnector<R, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> Connector for StreamConnector<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    type Params = StreamParams<R, W>;
    type Source = StreamSource<R>;
    type Sink = StreamSink<W>;

    fn connect(&self, params: Self::Params) -> BoxFuture<'_, Result<(Self::Source, Self::Sink)>> {
        Box::pin(async move {
            Ok((
                StreamSource::new(params.reader),
                StreamSink::new(params.writer),
            ))
        })
    }
}

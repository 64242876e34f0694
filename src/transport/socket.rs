//! TCP socket transport.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::error::{Error, Result};
use crate::transport::{ConnectParams, Connector, StreamSink, StreamSource};

/// Default read buffer size for sockets.
pub const DEFAULT_SOCKET_READ_BUFFER_SIZE: usize = 256;

/// Default time allowed for the native connect call.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket security selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProtectionLevel {
    /// Unencrypted socket.
    #[default]
    PlainSocket,
    /// TLS/SSL socket.
    Ssl,
    /// Bluetooth link encryption, unauthenticated pairing allowed.
    BluetoothEncryptionAllowNullAuthentication,
    /// Bluetooth link encryption with authenticated pairing.
    BluetoothEncryptionWithAuthentication,
}

/// Parameters for a socket connect.
#[derive(Debug, Clone)]
pub struct SocketParams {
    /// Remote host name or address.
    pub host: String,
    /// Remote service, a port number.
    pub service: String,
    /// Security selector.
    pub protection: ProtectionLevel,
    /// Maximum bytes per read.
    pub max_read_buffer_size: usize,
    /// Time allowed for the native connect call.
    pub connect_timeout: Duration,
}

impl SocketParams {
    /// Creates socket parameters with default settings.
    #[must_use]
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            service: service.into(),
            protection: ProtectionLevel::PlainSocket,
            max_read_buffer_size: DEFAULT_SOCKET_READ_BUFFER_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the protection level.
    #[must_use]
    pub const fn protection(mut self, level: ProtectionLevel) -> Self {
        self.protection = level;
        self
    }

    /// Sets the maximum bytes per read.
    #[must_use]
    pub const fn max_read_buffer_size(mut self, size: usize) -> Self {
        self.max_read_buffer_size = size;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn port(&self) -> Result<u16> {
        self.service
            .trim()
            .parse()
            .map_err(|_| Error::InvalidParams {
                reason: format!("service `{}` is not a port number", self.service),
            })
    }
}

impl fmt::Display for SocketParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.service)
    }
}

impl ConnectParams for SocketParams {
    fn max_read_buffer_size(&self) -> usize {
        self.max_read_buffer_size
    }

    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::EmptyParams { field: "host" });
        }
        if self.service.trim().is_empty() {
            return Err(Error::EmptyParams { field: "service" });
        }
        if self.max_read_buffer_size == 0 {
            return Err(Error::EmptyParams {
                field: "max_read_buffer_size",
            });
        }
        Ok(())
    }
}

/// Connector for plain TCP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Params = SocketParams;
    type Source = StreamSource<OwnedReadHalf>;
    type Sink = StreamSink<OwnedWriteHalf>;

    fn connect(&self, params: Self::Params) -> BoxFuture<'_, Result<(Self::Source, Self::Sink)>> {
        Box::pin(async move {
            if params.protection != ProtectionLevel::PlainSocket {
                return Err(Error::Unsupported {
                    what: format!("{:?} on a TCP socket", params.protection),
                });
            }
            let port = params.port()?;

            tracing::info!("connecting to {}:{}", params.host, port);
            let stream = tokio::time::timeout(
                params.connect_timeout,
                TcpStream::connect((params.host.trim(), port)),
            )
            .await
            .map_err(|_| Error::timeout(params.connect_timeout))??;

            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("failed to set TCP_NODELAY: {}", e);
            }

            let (reader, writer) = stream.into_split();
            tracing::info!("connected to {}:{}", params.host, port);
            Ok((StreamSource::new(reader), StreamSink::new(writer)))
        })
    }
}

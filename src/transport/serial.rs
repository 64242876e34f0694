//! Serial/USB transport implementation.
//!
//! This module opens serial ports through tokio-serial and splits them
//! into the read and write halves driven by a message pump.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, ReadHalf, WriteHalf};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::error::{Error, Result};
use crate::transport::{ConnectParams, Connector, StreamSink, StreamSource};

/// Default baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default connection delay.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(300);

/// Default read buffer size for serial ports.
pub const DEFAULT_SERIAL_READ_BUFFER_SIZE: usize = 250;

/// How long stale bytes are drained after opening the port.
const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Parameters for a serial connect.
#[derive(Debug, Clone)]
pub struct SerialParams {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Bits per character.
    pub data_bits: DataBits,
    /// Parity checking mode.
    pub parity: Parity,
    /// Number of stop bits.
    pub stop_bits: StopBits,
    /// Flow control mode.
    pub flow_control: FlowControl,
    /// Delay after opening before the receive loop starts.
    pub connection_delay: Duration,
    /// Maximum bytes per read.
    pub max_read_buffer_size: usize,
}

impl SerialParams {
    /// Creates serial parameters with default settings (8N1, no flow control).
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            connection_delay: DEFAULT_CONNECTION_DELAY,
            max_read_buffer_size: DEFAULT_SERIAL_READ_BUFFER_SIZE,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the data bits.
    #[must_use]
    pub const fn data_bits(mut self, bits: DataBits) -> Self {
        self.data_bits = bits;
        self
    }

    /// Sets the parity.
    #[must_use]
    pub const fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Sets the stop bits.
    #[must_use]
    pub const fn stop_bits(mut self, bits: StopBits) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Sets the flow control.
    #[must_use]
    pub const fn flow_control(mut self, flow: FlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }

    /// Sets the maximum bytes per read.
    #[must_use]
    pub const fn max_read_buffer_size(mut self, size: usize) -> Self {
        self.max_read_buffer_size = size;
        self
    }
}

impl fmt::Display for SerialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {} baud", self.port, self.baud_rate)
    }
}

impl ConnectParams for SerialParams {
    fn max_read_buffer_size(&self) -> usize {
        self.max_read_buffer_size
    }

    fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(Error::EmptyParams { field: "port" });
        }
        if self.max_read_buffer_size == 0 {
            return Err(Error::EmptyParams {
                field: "max_read_buffer_size",
            });
        }
        if self.baud_rate == 0 {
            return Err(Error::InvalidParams {
                reason: "baud rate must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Connector for serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Params = SerialParams;
    type Source = StreamSource<ReadHalf<SerialStream>>;
    type Sink = StreamSink<WriteHalf<SerialStream>>;

    fn connect(&self, params: Self::Params) -> BoxFuture<'_, Result<(Self::Source, Self::Sink)>> {
        Box::pin(async move {
            tracing::info!("connecting to serial port: {}", params);

            let mut stream = tokio_serial::new(&params.port, params.baud_rate)
                .data_bits(params.data_bits)
                .parity(params.parity)
                .stop_bits(params.stop_bits)
                .flow_control(params.flow_control)
                .open_native_async()?;

            // Some adapters reset the device while RTS is asserted
            if let Err(e) = tokio_serial::SerialPort::write_request_to_send(&mut stream, false) {
                tracing::warn!("failed to set RTS: {}", e);
            }

            tokio::time::sleep(params.connection_delay).await;

            let drained = drain_stale(&mut stream).await;
            if drained > 0 {
                tracing::debug!("drained {} stale bytes from buffer", drained);
            }

            let (reader, writer) = tokio::io::split(stream);
            tracing::info!("connected to serial port");
            Ok((StreamSource::new(reader), StreamSink::new(writer)))
        })
    }
}

/// Discards bytes the device sent before the pump was listening.
async fn drain_stale(stream: &mut SerialStream) -> usize {
    let mut buf = [0u8; 1024];
    let mut total = 0usize;

    let deadline = tokio::time::Instant::now() + DRAIN_WINDOW;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => total += n,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    total
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

//! BLE GATT transport.
//!
//! A BLE link is a pair of characteristics: notifications from the notify
//! characteristic feed the receive loop, and payloads are written to the
//! write characteristic in protocol-sized blocks.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::future::BoxFuture;

use crate::ble::{BLE_BLOCK_SIZE, ChunkedWriter, GattEndpoint, NotificationStream};
use crate::error::{Error, Result};
use crate::transport::{ConnectParams, Connector, ReadSource, WriteSink};

/// Default maximum bytes handed to the receive loop per read.
pub const DEFAULT_BLE_READ_BUFFER_SIZE: usize = 256;

/// Write and notify characteristics of a BLE link.
pub struct BleParams<E: GattEndpoint + ?Sized> {
    /// Characteristic payloads are written to.
    pub write: Arc<E>,
    /// Characteristic whose notifications are received.
    pub notify: Arc<E>,
    /// Maximum bytes per block write.
    pub block_size: usize,
    /// Maximum bytes per read.
    pub max_read_buffer_size: usize,
}

impl<E: GattEndpoint + ?Sized> BleParams<E> {
    /// Creates parameters with the default block and read sizes.
    #[must_use]
    pub const fn new(write: Arc<E>, notify: Arc<E>) -> Self {
        Self {
            write,
            notify,
            block_size: BLE_BLOCK_SIZE,
            max_read_buffer_size: DEFAULT_BLE_READ_BUFFER_SIZE,
        }
    }

    /// Sets the block size, e.g. after MTU negotiation.
    #[must_use]
    pub const fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the maximum bytes per read.
    #[must_use]
    pub const fn max_read_buffer_size(mut self, size: usize) -> Self {
        self.max_read_buffer_size = size;
        self
    }
}

impl<E: GattEndpoint + ?Sized> fmt::Display for BleParams<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "write {} / notify {}",
            self.write.id(),
            self.notify.id()
        )
    }
}

impl<E: GattEndpoint + ?Sized> ConnectParams for BleParams<E> {
    fn max_read_buffer_size(&self) -> usize {
        self.max_read_buffer_size
    }

    fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::EmptyParams {
                field: "block_size",
            });
        }
        if self.max_read_buffer_size == 0 {
            return Err(Error::EmptyParams {
                field: "max_read_buffer_size",
            });
        }
        Ok(())
    }
}

/// Connector for BLE characteristic pairs.
pub struct BleConnector<E: GattEndpoint + ?Sized> {
    _endpoint: PhantomData<fn(Arc<E>)>,
}

impl<E: GattEndpoint + ?Sized> BleConnector<E> {
    /// Creates a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _endpoint: PhantomData,
        }
    }
}

impl<E: GattEndpoint + ?Sized> Default for BleConnector<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: GattEndpoint + ?Sized> Connector for BleConnector<E> {
    type Params = BleParams<E>;
    type Source = NotificationSource<E>;
    type Sink = ChunkedSink<E>;

    fn connect(&self, params: Self::Params) -> BoxFuture<'_, Result<(Self::Source, Self::Sink)>> {
        Box::pin(async move {
            let writer = ChunkedWriter::with_block_size(params.block_size).ok_or(
                Error::EmptyParams {
                    field: "block_size",
                },
            )?;

            tracing::info!("subscribing to {}", params.notify.id());
            let notifications = params.notify.subscribe().await?;

            Ok((
                NotificationSource::new(params.notify, notifications),
                ChunkedSink::new(params.write, writer),
            ))
        })
    }
}

/// [`ReadSource`] over a characteristic's notifications.
///
/// A notification longer than the requested maximum is handed out over
/// several reads.
pub struct NotificationSource<E: GattEndpoint + ?Sized> {
    endpoint: Arc<E>,
    notifications: NotificationStream,
    pending: Bytes,
}

impl<E: GattEndpoint + ?Sized> NotificationSource<E> {
    /// Wraps an active subscription on `endpoint`.
    #[must_use]
    pub fn new(endpoint: Arc<E>, notifications: NotificationStream) -> Self {
        Self {
            endpoint,
            notifications,
            pending: Bytes::new(),
        }
    }
}

impl<E: GattEndpoint + ?Sized> ReadSource for NotificationSource<E> {
    fn read_chunk(&mut self, max: usize) -> BoxFuture<'_, Result<Option<Bytes>>> {
        Box::pin(async move {
            while self.pending.is_empty() {
                match self.notifications.next().await {
                    Some(value) => self.pending = value,
                    None => return Ok(None),
                }
            }
            let n = max.min(self.pending.len());
            Ok(Some(self.pending.split_to(n)))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(e) = self.endpoint.unsubscribe().await {
                tracing::warn!("failed to unsubscribe {}: {}", self.endpoint.id(), e);
            }
        })
    }
}

/// [`WriteSink`] that splits payloads into blocks.
pub struct ChunkedSink<E: GattEndpoint + ?Sized> {
    endpoint: Arc<E>,
    writer: ChunkedWriter,
}

impl<E: GattEndpoint + ?Sized> ChunkedSink<E> {
    /// Creates a sink writing to `endpoint`.
    #[must_use]
    pub const fn new(endpoint: Arc<E>, writer: ChunkedWriter) -> Self {
        Self { endpoint, writer }
    }
}

impl<E: GattEndpoint + ?Sized> WriteSink for ChunkedSink<E> {
    fn write_payload<'a>(&'a mut self, payload: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.writer.write(&*self.endpoint, payload).await?;
            Ok(())
        })
    }
}

//! Characteristic endpoint contract.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::Result;

/// Stream of unsolicited value changes from a characteristic.
pub type NotificationStream = BoxStream<'static, Bytes>;

/// A block-oriented GATT characteristic.
///
/// Handles are shared with the Bluetooth stack and owned by the device
/// session; binders and pumps only borrow them through an `Arc`.
/// Notification delivery is an explicit pair: every successful
/// [`subscribe`](Self::subscribe) is matched by exactly one
/// [`unsubscribe`](Self::unsubscribe).
pub trait GattEndpoint: Send + Sync + 'static {
    /// Identifies the characteristic in logs and read results.
    fn id(&self) -> String;

    /// Reads the current value.
    fn read_value(&self) -> BoxFuture<'_, Result<Bytes>>;

    /// Writes one block. Blocks never exceed the link's block size.
    fn write_value<'a>(&'a self, block: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Enables notifications and returns the value stream.
    fn subscribe(&self) -> BoxFuture<'_, Result<NotificationStream>>;

    /// Disables notifications.
    fn unsubscribe(&self) -> BoxFuture<'_, Result<()>>;
}

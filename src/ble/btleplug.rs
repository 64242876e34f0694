//! [`GattEndpoint`] over btleplug peripherals.

use btleplug::api::{CharPropFlags, Characteristic, Peripheral, WriteType};
use bytes::Bytes;
use futures::StreamExt;
use futures::future::BoxFuture;

use crate::ble::{GattEndpoint, NotificationStream};
use crate::error::Result;

/// One characteristic of a connected btleplug peripheral.
///
/// The peripheral must be connected and its services discovered.
#[derive(Debug, Clone)]
pub struct BtleCharacteristic<P: Peripheral> {
    peripheral: P,
    characteristic: Characteristic,
    write_type: WriteType,
}

impl<P: Peripheral> BtleCharacteristic<P> {
    /// Wraps `characteristic`, writing with response when it supports it.
    #[must_use]
    pub fn new(peripheral: P, characteristic: Characteristic) -> Self {
        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        Self {
            peripheral,
            characteristic,
            write_type,
        }
    }

    /// Overrides the write type.
    #[must_use]
    pub const fn with_write_type(mut self, write_type: WriteType) -> Self {
        self.write_type = write_type;
        self
    }

    /// Returns the wrapped characteristic.
    #[must_use]
    pub const fn characteristic(&self) -> &Characteristic {
        &self.characteristic
    }
}

impl<P: Peripheral + 'static> GattEndpoint for BtleCharacteristic<P> {
    fn id(&self) -> String {
        self.characteristic.uuid.to_string()
    }

    fn read_value(&self) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            let value = self.peripheral.read(&self.characteristic).await?;
            Ok(Bytes::from(value))
        })
    }

    fn write_value<'a>(&'a self, block: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.peripheral
                .write(&self.characteristic, block, self.write_type)
                .await?;
            Ok(())
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<NotificationStream>> {
        Box::pin(async move {
            self.peripheral.subscribe(&self.characteristic).await?;
            let uuid = self.characteristic.uuid;
            let notifications = self.peripheral.notifications().await?;
            Ok(notifications
                .filter_map(move |n| {
                    futures::future::ready((n.uuid == uuid).then(|| Bytes::from(n.value)))
                })
                .boxed())
        })
    }

    fn unsubscribe(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.peripheral.unsubscribe(&self.characteristic).await?;
            Ok(())
        })
    }
}

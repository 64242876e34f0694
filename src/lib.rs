//! # msgpump
//!
//! Async message pumps for byte-stream transports: TCP sockets,
//! serial ports, caller-supplied streams and BLE GATT characteristics.
//!
//! Every transport is driven the same way: connect, write, receive,
//! disconnect, with completion and failures reported as events. Native
//! error codes never reach the caller; they are normalized into one
//! [`TransportStatus`] taxonomy.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Cancellable receive loops with bounded, race-free teardown
//! - Block-chunked writes for GATT characteristics (stop on first failure)
//! - Characteristic binders with symmetric subscribe/unsubscribe
//! - Optional btleplug endpoint adapter (`btleplug` feature)
//!
//! ## Quick Start
//!
//! ```no_run
//! use msgpump::{Event, SerialPump, TransportStatus};
//! use msgpump::transport::{SerialConnector, SerialParams};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pump = SerialPump::new(SerialConnector);
//!     let mut events = pump.subscribe();
//!
//!     pump.connect(SerialParams::new("/dev/ttyUSB0").baud_rate(115_200));
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             Event::ConnectResult(TransportStatus::Connected) => {
//!                 pump.write(&b"hello\r\n"[..]);
//!             }
//!             Event::ConnectResult(status) => {
//!                 eprintln!("link status: {status}");
//!                 break;
//!             }
//!             Event::MsgReceived(data) => println!("received {} bytes", data.len()),
//!             _ => {}
//!         }
//!     }
//!
//!     pump.disconnect().await;
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`status`] - Transport status taxonomy and native code normalization
//! - [`pump`] - Message pumps and the cancellable receive loop
//! - [`transport`] - Connectors for sockets, serial ports, streams and BLE
//! - [`ble`] - Chunked writes, characteristic channels and binders
//! - [`event`] - Async event system
//! - [`error`] - Error types

pub mod ble;
pub mod error;
pub mod event;
pub mod pump;
pub mod status;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use ble::{
    CharacteristicBinder, CharacteristicBinderSet, CharacteristicChannel, ChunkedWriter,
    GattEndpoint, ReadResult,
};
pub use error::{Error, Result};
pub use event::{Event, EventDispatcher, EventFilter, EventKind, Subscription};
pub use pump::{BlePump, MsgPump, PumpConfig, PumpState, SerialPump, SocketPump, StreamPump};
pub use status::{GattStatus, Normalize, Operation, TransportStatus};
pub use transport::serial::list_ports;

//! BLE GATT characteristic support.
//!
//! - [`GattEndpoint`] - the contract a characteristic handle must offer
//! - [`ChunkedWriter`] - splits payloads into fixed-size protocol blocks
//! - [`CharacteristicChannel`] - the application-facing logical channel
//! - [`CharacteristicBinder`] - binds one endpoint to one channel
//! - [`CharacteristicBinderSet`] - owns the binders of a session

pub mod binder;
pub mod binder_set;
#[cfg(feature = "btleplug")]
pub mod btleplug;
pub mod channel;
pub mod chunked;
pub mod endpoint;

pub use binder::CharacteristicBinder;
pub use binder_set::CharacteristicBinderSet;
pub use channel::{
    ChannelRequest, CharacteristicChannel, HexParser, ReadResult, Utf8Parser, ValueParser,
};
pub use chunked::{BLE_BLOCK_SIZE, ChunkedWriteError, ChunkedWriter};
pub use endpoint::{GattEndpoint, NotificationStream};

//! Application-facing characteristic channel.
//!
//! The application talks to a characteristic only through its channel:
//! it posts read and write requests and subscribes to the values and
//! errors that come back. A [`CharacteristicBinder`](crate::ble::CharacteristicBinder)
//! services the requests against the real endpoint.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::event::{Event, EventDispatcher, Subscription};
use crate::status::TransportStatus;

/// Turns raw characteristic bytes into the channel's display form.
pub trait ValueParser: Send + Sync {
    /// Parses a raw value.
    fn parse(&self, data: &[u8]) -> String;
}

/// Renders values as lowercase hex.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexParser;

impl ValueParser for HexParser {
    fn parse(&self, data: &[u8]) -> String {
        hex::encode(data)
    }
}

/// Renders values as UTF-8 text, replacing invalid sequences.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Parser;

impl ValueParser for Utf8Parser {
    fn parse(&self, data: &[u8]) -> String {
        String::from_utf8_lossy(data).into_owned()
    }
}

/// A value read from, or notified by, a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    /// Name of the channel the value belongs to.
    pub channel: Arc<str>,
    /// Raw value.
    pub data: Bytes,
    /// Parsed display form.
    pub value: String,
}

/// Request posted by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRequest {
    /// Read the current value.
    Read,
    /// Write a payload.
    Write(Bytes),
}

/// Logical read/write channel for one characteristic.
pub struct CharacteristicChannel {
    name: Arc<str>,
    parser: Box<dyn ValueParser>,
    // One unbounded queue per attached binder; posting never drops.
    handlers: Mutex<Vec<mpsc::UnboundedSender<ChannelRequest>>>,
    events: EventDispatcher,
}

impl CharacteristicChannel {
    /// Creates a channel that renders values as hex.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self::with_parser(name, HexParser)
    }

    /// Creates a channel with a custom value parser.
    #[must_use]
    pub fn with_parser(name: impl Into<Arc<str>>, parser: impl ValueParser + 'static) -> Self {
        Self {
            name: name.into(),
            parser: Box::new(parser),
            handlers: Mutex::new(Vec::new()),
            events: EventDispatcher::default(),
        }
    }

    /// Returns the channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to read values and communication errors.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Asks the bound characteristic for its current value.
    ///
    /// Returns false if no binder is attached.
    pub fn request_read(&self) -> bool {
        self.post(ChannelRequest::Read)
    }

    /// Asks the bound characteristic to write `data`.
    ///
    /// Returns false if no binder is attached.
    pub fn request_write(&self, data: impl Into<Bytes>) -> bool {
        self.post(ChannelRequest::Write(data.into()))
    }

    /// Number of binders currently listening for requests.
    #[must_use]
    pub fn attached_handlers(&self) -> usize {
        let mut handlers = self.handlers();
        handlers.retain(|tx| !tx.is_closed());
        handlers.len()
    }

    /// Parses `data` and publishes it as a read value.
    pub fn push_read_value(&self, data: Bytes) {
        let value = self.parser.parse(&data);
        tracing::debug!("{} value: {}", self.name, value);
        self.events.dispatch(Event::ReadValue(ReadResult {
            channel: Arc::clone(&self.name),
            data,
            value,
        }));
    }

    /// Publishes a communication error.
    pub fn push_communication_error(&self, status: TransportStatus) {
        tracing::warn!("{} communication error: {}", self.name, status);
        self.events.dispatch(Event::CommunicationError(status));
    }

    /// Starts listening for requests.
    pub(crate) fn attach(&self) -> mpsc::UnboundedReceiver<ChannelRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handlers().push(tx);
        rx
    }

    fn post(&self, request: ChannelRequest) -> bool {
        let mut handlers = self.handlers();
        handlers.retain(|tx| tx.send(request.clone()).is_ok());
        if handlers.is_empty() {
            tracing::warn!("{}: request dropped, no binder attached", self.name);
            return false;
        }
        true
    }

    fn handlers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<ChannelRequest>>> {
        // The guarded vector stays consistent even if a holder panicked
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CharacteristicChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacteristicChannel")
            .field("name", &self.name)
            .field("attached_handlers", &self.attached_handlers())
            .finish_non_exhaustive()
    }
}

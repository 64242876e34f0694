//! Event system for async transport notifications.
//!
//! Pumps, binders and binder sets publish everything they observe as
//! [`Event`]s; there is no polling API. Each publisher owns one bounded
//! [`EventDispatcher`] and events from one dispatcher reach every
//! subscriber in the order they were dispatched.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::ble::ReadResult;
use crate::pump::PumpState;
use crate::status::TransportStatus;

/// Default dispatcher capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Result of a connect attempt, or a later status change of the link
    /// (read failure, write on a closed pump).
    ConnectResult(TransportStatus),
    /// Bytes pulled from the transport.
    MsgReceived(Bytes),
    /// A write or characteristic exchange failed.
    CommunicationError(TransportStatus),
    /// The pump moved to a new lifecycle state.
    ConnectionStatusChanged(PumpState),
    /// A characteristic value was read or notified.
    ReadValue(ReadResult),
    /// The subscriber fell behind and this many events were dropped.
    Lagged(u64),
}

/// Discriminant of an [`Event`], used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::ConnectResult`].
    ConnectResult,
    /// [`Event::MsgReceived`].
    MsgReceived,
    /// [`Event::CommunicationError`].
    CommunicationError,
    /// [`Event::ConnectionStatusChanged`].
    ConnectionStatusChanged,
    /// [`Event::ReadValue`].
    ReadValue,
    /// [`Event::Lagged`].
    Lagged,
}

impl Event {
    /// Returns the kind of this event.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ConnectResult(_) => EventKind::ConnectResult,
            Self::MsgReceived(_) => EventKind::MsgReceived,
            Self::CommunicationError(_) => EventKind::CommunicationError,
            Self::ConnectionStatusChanged(_) => EventKind::ConnectionStatusChanged,
            Self::ReadValue(_) => EventKind::ReadValue,
            Self::Lagged(_) => EventKind::Lagged,
        }
    }

    /// Returns the status carried by this event, if any.
    #[must_use]
    pub const fn status(&self) -> Option<TransportStatus> {
        match self {
            Self::ConnectResult(status) | Self::CommunicationError(status) => Some(*status),
            _ => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// If the subscriber fell behind, [`Event::Lagged`] is returned once
    /// with the number of dropped events before delivery resumes.
    /// Returns `None` once the dispatcher and all its clones are dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        match self.receiver.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!("subscriber lagged, {} events dropped", missed);
                Some(Event::Lagged(missed))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Receives the next event matching `filter`.
    ///
    /// [`Event::Lagged`] is always returned, whatever the filter.
    pub async fn recv_matching(&mut self, filter: &EventFilter) -> Option<Event> {
        loop {
            let event = self.recv().await?;
            if matches!(event, Event::Lagged(_)) || filter.matches(&event) {
                return Some(event);
            }
        }
    }
}

/// Subscription filter for specific event kinds.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by event kinds.
    pub kinds: Option<Vec<EventKind>>,
    /// Filter for a specific status.
    pub status: Option<TransportStatus>,
}

impl EventFilter {
    /// Creates a filter for specific event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<EventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            status: None,
        }
    }

    /// Creates a filter for a connect result with the given status.
    #[must_use]
    pub fn connect_result(status: TransportStatus) -> Self {
        Self {
            kinds: Some(vec![EventKind::ConnectResult]),
            status: Some(status),
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(expected) = self.status {
            if event.status() != Some(expected) {
                return false;
            }
        }

        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher holding at most `capacity`
    /// undelivered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No receivers is fine
        if self.inner.sender.send(event).is_err() {
            tracing::trace!("event dropped, no subscribers");
        }
    }

    /// Subscribes to all subsequent events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Only events dispatched after this call are considered. Returns
    /// `None` if the timeout expires or the dispatcher is closed.
    pub async fn wait_for(
        &self,
        filter: EventFilter,
        timeout: std::time::Duration,
    ) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = subscription.recv_matching(&filter) => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

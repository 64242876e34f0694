//! Binders of a multi-characteristic session.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ble::{CharacteristicBinder, GattEndpoint};
use crate::event::{DEFAULT_EVENT_CAPACITY, Event, EventDispatcher, Subscription};

struct Entry<E: GattEndpoint + ?Sized> {
    binder: CharacteristicBinder<E>,
    forwarder: JoinHandle<()>,
    detach: CancellationToken,
}

/// Owns the binders of one device session.
///
/// Read values from every binder's channel are forwarded into one
/// aggregated stream. If the set falls behind a channel, the loss is
/// forwarded as [`Event::Lagged`]. [`clear_all`](Self::clear_all) tears
/// every binder down, even when some of them fail to.
pub struct CharacteristicBinderSet<E: GattEndpoint + ?Sized> {
    entries: Mutex<Vec<Entry<E>>>,
    events: EventDispatcher,
}

impl<E: GattEndpoint + ?Sized> CharacteristicBinderSet<E> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates an empty set buffering at most `capacity` aggregated
    /// events per subscriber.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            events: EventDispatcher::new(capacity),
        }
    }

    /// Subscribes to the read values of every binder in the set.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Registers a binder and starts forwarding its read values.
    pub async fn add(&self, binder: CharacteristicBinder<E>) {
        let detach = CancellationToken::new();
        let forwarder = tokio::spawn(forward_read_values(
            binder.channel().subscribe(),
            self.events.clone(),
            detach.clone(),
        ));

        tracing::debug!("adding binder for {}", binder.channel().name());
        self.entries.lock().await.push(Entry {
            binder,
            forwarder,
            detach,
        });
    }

    /// Number of binders in the set.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns true if the set holds no binders.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Detaches and tears down every binder, leaving the set empty.
    ///
    /// A binder that fails or panics during teardown is logged and
    /// skipped; the remaining binders are still torn down. Returns the
    /// number of binders whose teardown failed.
    pub async fn clear_all(&self) -> usize {
        let entries = std::mem::take(&mut *self.entries.lock().await);
        tracing::info!("clearing {} binders", entries.len());

        let mut failures = 0;
        for mut entry in entries {
            entry.detach.cancel();
            if let Err(e) = entry.forwarder.await {
                tracing::warn!("read value forwarder ended abnormally: {}", e);
            }

            let name = entry.binder.channel().name().to_owned();
            match AssertUnwindSafe(entry.binder.teardown()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::error!("teardown of binder for {} failed: {}", name, e);
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!("teardown of binder for {} panicked", name);
                }
            }
        }
        failures
    }
}

impl<E: GattEndpoint + ?Sized> Default for CharacteristicBinderSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

async fn forward_read_values(
    mut source: Subscription,
    events: EventDispatcher,
    detach: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = detach.cancelled() => break,
            event = source.recv() => match event {
                Some(event @ (Event::ReadValue(_) | Event::Lagged(_))) => events.dispatch(event),
                Some(_) => {}
                None => break,
            },
        }
    }
}

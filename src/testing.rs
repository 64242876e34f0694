//! Test doubles shared by unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::future::BoxFuture;

use crate::ble::{GattEndpoint, NotificationStream};
use crate::error::{Error, Result};
use crate::event::{Event, EventFilter, Subscription};
use crate::status::GattStatus;
use crate::transport::Connector;

const EVENT_TIMEOUT: Duration = Duration::from_secs(1);

/// Routes library logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Waits for the next event, panicking after a second.
pub async fn next_event(sub: &mut Subscription) -> Event {
    tokio::time::timeout(EVENT_TIMEOUT, sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("dispatcher closed")
}

/// Waits for the next event matching `filter`.
pub async fn next_matching(sub: &mut Subscription, filter: EventFilter) -> Event {
    tokio::time::timeout(EVENT_TIMEOUT, sub.recv_matching(&filter))
        .await
        .expect("timed out waiting for matching event")
        .expect("dispatcher closed")
}

/// In-memory characteristic.
#[derive(Default)]
pub struct MockEndpoint {
    id: String,
    value: Bytes,
    writes: Mutex<Vec<Vec<u8>>>,
    fail_write_at: Option<(usize, GattStatus)>,
    fail_read: Option<GattStatus>,
    fail_subscribe: Option<GattStatus>,
    fail_unsubscribe: Option<GattStatus>,
    panic_on_unsubscribe: bool,
    notifier: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl MockEndpoint {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: &'static [u8]) -> Self {
        self.value = Bytes::from_static(value);
        self
    }

    /// Fails the `call`-th write (zero-based, counted across payloads).
    pub fn failing_write_at(mut self, call: usize, status: GattStatus) -> Self {
        self.fail_write_at = Some((call, status));
        self
    }

    pub fn failing_read(mut self, status: GattStatus) -> Self {
        self.fail_read = Some(status);
        self
    }

    pub fn failing_subscribe(mut self, status: GattStatus) -> Self {
        self.fail_subscribe = Some(status);
        self
    }

    pub fn failing_unsubscribe(mut self, status: GattStatus) -> Self {
        self.fail_unsubscribe = Some(status);
        self
    }

    pub fn panicking_unsubscribe(mut self) -> Self {
        self.panic_on_unsubscribe = true;
        self
    }

    /// Every attempted write, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    /// Pushes a notification to the current subscriber.
    pub fn notify(&self, data: &'static [u8]) {
        let notifier = self.notifier.lock().unwrap();
        let tx = notifier.as_ref().expect("not subscribed");
        tx.unbounded_send(Bytes::from_static(data)).unwrap();
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }
}

impl GattEndpoint for MockEndpoint {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn read_value(&self) -> BoxFuture<'_, Result<Bytes>> {
        Box::pin(async move {
            match self.fail_read {
                Some(status) => Err(Error::Gatt(status)),
                None => Ok(self.value.clone()),
            }
        })
    }

    fn write_value<'a>(&'a self, block: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut writes = self.writes.lock().unwrap();
            let call = writes.len();
            writes.push(block.to_vec());
            match self.fail_write_at {
                Some((at, status)) if at == call => Err(Error::Gatt(status)),
                _ => Ok(()),
            }
        })
    }

    fn subscribe(&self) -> BoxFuture<'_, Result<NotificationStream>> {
        Box::pin(async move {
            if let Some(status) = self.fail_subscribe {
                return Err(Error::Gatt(status));
            }
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded();
            *self.notifier.lock().unwrap() = Some(tx);
            Ok(rx.boxed())
        })
    }

    fn unsubscribe(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
            self.notifier.lock().unwrap().take();
            assert!(!self.panic_on_unsubscribe, "{} exploded on unsubscribe", self.id);
            match self.fail_unsubscribe {
                Some(status) => Err(Error::Gatt(status)),
                None => Ok(()),
            }
        })
    }
}

/// Wraps a connector and counts native connect calls.
pub struct CountingConnector<C> {
    inner: C,
    calls: AtomicUsize,
}

impl<C> CountingConnector<C> {
    pub const fn new(inner: C) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<C: Connector> Connector for CountingConnector<C> {
    type Params = C::Params;
    type Source = C::Source;
    type Sink = C::Sink;

    fn connect(&self, params: Self::Params) -> BoxFuture<'_, Result<(Self::Source, Self::Sink)>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.connect(params)
    }
}

//! Message pumps.
//!
//! A [`MsgPump`] composes one transport [`Connector`] with a
//! [`ReceiveLoop`] and a write path:
//!
//! - [`connect`](MsgPump::connect) tears down any previous session,
//!   validates the parameters, opens the link and starts the loop
//! - [`write`](MsgPump::write) sends a payload from a background task
//! - [`disconnect`](MsgPump::disconnect) stops the loop, waits (bounded)
//!   for it to finish and only then releases the link
//!
//! Callers are never blocked on I/O. Every outcome is published as an
//! [`Event`] to the pump's subscribers.
//!
//! # Example
//!
//! ```no_run
//! use msgpump::event::Event;
//! use msgpump::pump::SocketPump;
//! use msgpump::transport::{SocketParams, TcpConnector};
//!
//! # async fn example() {
//! let pump = SocketPump::new(TcpConnector);
//! let mut events = pump.subscribe();
//!
//! pump.connect(SocketParams::new("192.168.1.10", "5000"));
//! while let Some(event) = events.recv().await {
//!     match event {
//!         Event::ConnectResult(status) if status.is_success() => {
//!             pump.write(&b"hello"[..]);
//!         }
//!         Event::MsgReceived(data) => println!("got {} bytes", data.len()),
//!         _ => {}
//!     }
//! }
//! # }
//! ```

pub mod receive;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::event::{DEFAULT_EVENT_CAPACITY, Event, EventDispatcher, Subscription};
use crate::status::{Normalize, Operation, TransportStatus};
use crate::transport::{
    BleConnector, ConnectParams, Connector, SerialConnector, StreamConnector, TcpConnector,
    WriteSink,
};

pub use receive::{DEFAULT_TEARDOWN_TIMEOUT, LoopContext, LoopState, ReceiveLoop};

/// Pump over a TCP socket.
pub type SocketPump = MsgPump<TcpConnector>;
/// Pump over a serial port.
pub type SerialPump = MsgPump<SerialConnector>;
/// Pump over caller-supplied stream handles.
pub type StreamPump<R, W> = MsgPump<StreamConnector<R, W>>;
/// Pump over a pair of BLE characteristics.
pub type BlePump<E> = MsgPump<BleConnector<E>>;

/// Lifecycle state of a pump, published as
/// [`Event::ConnectionStatusChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// No link.
    Idle,
    /// Native connect call in progress.
    Connecting,
    /// Link open, receive loop running.
    Connected,
    /// The last connect attempt failed.
    Failed,
    /// Tearing down the current link.
    Disconnecting,
}

/// Pump configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    /// Events buffered per subscriber before the oldest are dropped.
    pub event_capacity: usize,
    /// Bound on each teardown wait.
    pub teardown_timeout: Duration,
}

impl PumpConfig {
    /// Sets the event capacity.
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets the teardown timeout.
    #[must_use]
    pub const fn teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
        }
    }
}

struct Session<S> {
    sink: Arc<Mutex<S>>,
    receiver: ReceiveLoop,
}

struct Shared<C: Connector> {
    connector: C,
    config: PumpConfig,
    events: EventDispatcher,
    // Each session gets its own flag, so a loop that outlived its
    // teardown can only clear the flag of its own session.
    connected: watch::Sender<Arc<AtomicBool>>,
    session: Mutex<Option<Session<C::Sink>>>,
}

/// Connect/write/receive/disconnect over one transport.
///
/// Cloning a pump yields another handle to the same link.
pub struct MsgPump<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for MsgPump<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> MsgPump<C> {
    /// Creates a pump with the default configuration.
    #[must_use]
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, PumpConfig::default())
    }

    /// Creates a pump with a custom configuration.
    #[must_use]
    pub fn with_config(connector: C, config: PumpConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                events: EventDispatcher::new(config.event_capacity),
                connected: watch::Sender::new(Arc::new(AtomicBool::new(false))),
                session: Mutex::new(None),
            }),
        }
    }

    /// Subscribes to the pump's events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.shared.events.subscribe()
    }

    /// Returns true while the link is open and the loop is reading.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.borrow().load(Ordering::SeqCst)
    }

    /// Returns the connector.
    #[must_use]
    pub fn connector(&self) -> &C {
        &self.shared.connector
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> PumpConfig {
        self.shared.config
    }

    /// Connects in the background.
    ///
    /// Any existing session is torn down first. The outcome is published
    /// as [`Event::ConnectResult`]; the returned handle only tells when
    /// the attempt is over.
    pub fn connect(&self, params: C::Params) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move { shared.connect(params).await })
    }

    /// Tears the link down. Does nothing if not connected.
    pub async fn disconnect(&self) {
        let mut session = self.shared.session.lock().await;
        if !self.shared.teardown(&mut session).await {
            tracing::debug!("disconnect: not connected");
        }
    }

    /// Writes `payload` in the background.
    ///
    /// Returns `None` without spawning anything if the pump is not
    /// connected; [`Event::ConnectResult`] with
    /// [`TransportStatus::NotConnected`] is published instead. A failed
    /// write publishes [`Event::CommunicationError`] and leaves the pump
    /// connected.
    pub fn write(&self, payload: impl Into<Bytes>) -> Option<JoinHandle<()>> {
        if !self.is_connected() {
            tracing::warn!("write dropped, not connected");
            self.shared
                .events
                .dispatch(Event::ConnectResult(TransportStatus::NotConnected));
            return None;
        }

        let payload = payload.into();
        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(async move { shared.write(payload).await }))
    }
}

impl<C: Connector> Shared<C> {
    async fn connect(&self, params: C::Params) {
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;

        if let Err(e) = params.validate() {
            tracing::warn!("rejected connect parameters: {}", e);
            self.events
                .dispatch(Event::ConnectResult(e.normalize(Operation::Connect)));
            return;
        }

        tracing::info!("connecting to {}", params);
        self.set_state(PumpState::Connecting);
        let max_read = params.max_read_buffer_size();

        match self.connector.connect(params).await {
            Ok((source, sink)) => {
                tracing::info!("connected");
                let connected = Arc::new(AtomicBool::new(true));
                self.connected.send_replace(Arc::clone(&connected));
                self.set_state(PumpState::Connected);
                self.events
                    .dispatch(Event::ConnectResult(TransportStatus::Connected));

                let receiver = ReceiveLoop::spawn(source, max_read, connected, self.events.clone());
                *session = Some(Session {
                    sink: Arc::new(Mutex::new(sink)),
                    receiver,
                });
            }
            Err(e) => {
                let status = e.normalize(Operation::Connect);
                tracing::error!("connect failed: {} ({})", e, status);
                self.set_state(PumpState::Failed);
                self.events.dispatch(Event::ConnectResult(status));
            }
        }
    }

    /// Stops the loop, then releases the sink. Returns false if there was
    /// no session.
    async fn teardown(&self, session: &mut Option<Session<C::Sink>>) -> bool {
        let Some(Session { sink, receiver }) = session.take() else {
            return false;
        };

        tracing::info!("disconnecting");
        self.set_state(PumpState::Disconnecting);

        receiver.stop(self.config.teardown_timeout).await;
        self.connected.borrow().store(false, Ordering::SeqCst);

        let close = async { sink.lock().await.close().await };
        match tokio::time::timeout(self.config.teardown_timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("closing transport failed: {}", e),
            Err(_) => tracing::error!(
                "closing transport did not finish within {}ms",
                self.config.teardown_timeout.as_millis()
            ),
        }

        self.set_state(PumpState::Idle);
        true
    }

    async fn write(&self, payload: Bytes) {
        let sink = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|session| Arc::clone(&session.sink));
        // The loop clears the flag as soon as the link breaks, before any
        // teardown releases the session.
        let live = self.connected.borrow().load(Ordering::SeqCst);
        let Some(sink) = sink.filter(|_| live) else {
            tracing::warn!("write dropped, session closed");
            self.events
                .dispatch(Event::ConnectResult(TransportStatus::NotConnected));
            return;
        };

        tracing::trace!("writing {} bytes: {}", payload.len(), hex::encode(&payload));
        let result = sink.lock().await.write_payload(&payload).await;
        if let Err(e) = result {
            let status = e.normalize(Operation::Write);
            tracing::error!("write failed: {} ({})", e, status);
            self.events.dispatch(Event::CommunicationError(status));
        }
    }

    fn set_state(&self, state: PumpState) {
        self.events.dispatch(Event::ConnectionStatusChanged(state));
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
    use tokio::net::TcpListener;

    use super::*;
    use crate::event::{EventFilter, EventKind};
    use crate::status::GattStatus;
    use crate::testing::{CountingConnector, MockEndpoint, init_tracing, next_event, next_matching};
    use crate::transport::{BleParams, SocketParams, StreamParams};

    type DuplexPump = StreamPump<DuplexStream, DuplexStream>;

    /// Connects a stream pump and returns the peer's reader and writer.
    async fn connected_pump(pump: &DuplexPump) -> (DuplexStream, DuplexStream) {
        let (pump_reader, peer_writer) = tokio::io::duplex(256);
        let (peer_reader, pump_writer) = tokio::io::duplex(256);
        pump.connect(StreamParams::new(pump_reader, pump_writer))
            .await
            .unwrap();
        assert!(pump.is_connected());
        (peer_reader, peer_writer)
    }

    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_connect_publishes_lifecycle() {
        let pump = DuplexPump::new(StreamConnector::new());
        let mut events = pump.subscribe();

        let _peer = connected_pump(&pump).await;

        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectionStatusChanged(PumpState::Connecting)
        );
        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectionStatusChanged(PumpState::Connected)
        );
        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectResult(TransportStatus::Connected)
        );
    }

    #[tokio::test]
    async fn test_receive_and_write() {
        let pump = DuplexPump::new(StreamConnector::new());
        let mut events = pump.subscribe();
        let (mut peer_reader, mut peer_writer) = connected_pump(&pump).await;

        peer_writer.write_all(b"ping").await.unwrap();
        let received = next_matching(
            &mut events,
            EventFilter::kinds(vec![EventKind::MsgReceived]),
        )
        .await;
        assert_eq!(received, Event::MsgReceived(Bytes::from_static(b"ping")));

        pump.write(&b"pong"[..]).unwrap().await.unwrap();
        let mut buf = [0u8; 4];
        peer_reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_write_failure_keeps_pump_connected() {
        let pump = StreamPump::new(StreamConnector::new());
        let mut events = pump.subscribe();
        let (reader, _peer) = tokio::io::duplex(16);
        pump.connect(StreamParams::new(reader, BrokenWriter))
            .await
            .unwrap();

        pump.write(&b"lost"[..]).unwrap().await.unwrap();

        let error = next_matching(
            &mut events,
            EventFilter::kinds(vec![EventKind::CommunicationError]),
        )
        .await;
        assert_eq!(error, Event::CommunicationError(TransportStatus::WriteFailure));
        assert!(pump.is_connected());
    }

    #[tokio::test]
    async fn test_write_after_disconnect_is_rejected() {
        let pump = DuplexPump::new(StreamConnector::new());
        let (mut peer_reader, _peer_writer) = connected_pump(&pump).await;
        let mut events = pump.subscribe();

        pump.disconnect().await;

        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectionStatusChanged(PumpState::Disconnecting)
        );
        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectionStatusChanged(PumpState::Idle)
        );
        assert!(!pump.is_connected());

        assert!(pump.write(&b"late"[..]).is_none());
        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectResult(TransportStatus::NotConnected)
        );

        // The sink was shut down and nothing else was written
        let mut rest = Vec::new();
        peer_reader.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_quiet() {
        let pump = DuplexPump::new(StreamConnector::new());
        let _peer = connected_pump(&pump).await;
        pump.disconnect().await;

        let mut events = pump.subscribe();
        pump.disconnect().await;

        let quiet = tokio::time::timeout(Duration::from_millis(50), events.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn test_peer_close_reports_read_failure() {
        let pump = DuplexPump::new(StreamConnector::new());
        let mut events = pump.subscribe();
        let (_peer_reader, peer_writer) = connected_pump(&pump).await;

        drop(peer_writer);

        let failure = next_matching(
            &mut events,
            EventFilter::connect_result(TransportStatus::ReadFailure),
        )
        .await;
        assert_eq!(failure, Event::ConnectResult(TransportStatus::ReadFailure));
        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectionStatusChanged(PumpState::Idle)
        );
        assert!(!pump.is_connected());
        assert!(pump.write(&b"x"[..]).is_none());
    }

    #[tokio::test]
    async fn test_queued_write_after_peer_close_is_not_connected() {
        let pump = DuplexPump::new(StreamConnector::new());
        let mut events = pump.subscribe();
        let (mut peer_reader, peer_writer) = connected_pump(&pump).await;

        drop(peer_writer);
        next_matching(
            &mut events,
            EventFilter::connect_result(TransportStatus::ReadFailure),
        )
        .await;

        // Session is still held, only the loop has noticed the close
        pump.shared.write(Bytes::from_static(b"queued")).await;

        assert_eq!(
            next_matching(
                &mut events,
                EventFilter::kinds(vec![EventKind::ConnectResult, EventKind::CommunicationError]),
            )
            .await,
            Event::ConnectResult(TransportStatus::NotConnected)
        );
        let mut buf = [0u8; 6];
        let nothing =
            tokio::time::timeout(Duration::from_millis(50), peer_reader.read(&mut buf)).await;
        assert!(nothing.is_err(), "write reached a closed link");
    }

    #[tokio::test]
    async fn test_overflowed_subscriber_sees_lag() {
        let config = PumpConfig::default().event_capacity(4);
        let pump = DuplexPump::with_config(StreamConnector::new(), config);
        let mut events = pump.subscribe();
        let _peer = connected_pump(&pump).await;

        // Connecting, Connected, ConnectResult, Disconnecting, Idle
        pump.disconnect().await;

        assert_eq!(next_event(&mut events).await, Event::Lagged(1));
        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectionStatusChanged(PumpState::Connected)
        );
    }

    #[tokio::test]
    async fn test_reconnect_tears_down_previous_session() {
        let pump = DuplexPump::new(StreamConnector::new());
        let (mut old_reader, _old_writer) = connected_pump(&pump).await;

        let (_new_reader, mut new_writer) = connected_pump(&pump).await;

        // Old link was shut down
        let mut rest = Vec::new();
        old_reader.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let mut events = pump.subscribe();
        new_writer.write_all(b"new").await.unwrap();
        assert_eq!(
            next_event(&mut events).await,
            Event::MsgReceived(Bytes::from_static(b"new"))
        );
    }

    #[tokio::test]
    async fn test_empty_host_never_reaches_the_connector() {
        let pump = MsgPump::new(CountingConnector::new(TcpConnector));
        let mut events = pump.subscribe();

        pump.connect(SocketParams::new("", "5000")).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectResult(TransportStatus::EmptyParams)
        );
        assert_eq!(pump.connector().calls(), 0);
        assert!(!pump.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_loopback() {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        let pump = SocketPump::new(TcpConnector);
        let mut events = pump.subscribe();

        pump.connect(SocketParams::new("127.0.0.1", port)).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        next_matching(
            &mut events,
            EventFilter::connect_result(TransportStatus::Connected),
        )
        .await;

        peer.write_all(b"hello").await.unwrap();
        let received = next_matching(
            &mut events,
            EventFilter::kinds(vec![EventKind::MsgReceived]),
        )
        .await;
        assert_eq!(received, Event::MsgReceived(Bytes::from_static(b"hello")));

        pump.write(&b"world"[..]).unwrap().await.unwrap();
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        pump.disconnect().await;
        assert!(!pump.is_connected());
    }

    #[tokio::test]
    async fn test_tcp_refused_is_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port().to_string();
        drop(listener);
        let pump = SocketPump::new(TcpConnector);
        let mut events = pump.subscribe();

        pump.connect(SocketParams::new("127.0.0.1", port)).await.unwrap();

        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectionStatusChanged(PumpState::Connecting)
        );
        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectionStatusChanged(PumpState::Failed)
        );
        assert_eq!(
            next_event(&mut events).await,
            Event::ConnectResult(TransportStatus::ConnectFailure)
        );
    }

    #[tokio::test]
    async fn test_ble_pump_round_trip() {
        init_tracing();
        let write = Arc::new(MockEndpoint::new("tx"));
        let notify = Arc::new(MockEndpoint::new("rx"));
        let pump = BlePump::new(BleConnector::new());
        let mut events = pump.subscribe();

        pump.connect(BleParams::new(Arc::clone(&write), Arc::clone(&notify)))
            .await
            .unwrap();
        notify.notify(b"status");
        let received = next_matching(
            &mut events,
            EventFilter::kinds(vec![EventKind::MsgReceived]),
        )
        .await;
        assert_eq!(received, Event::MsgReceived(Bytes::from_static(b"status")));

        pump.write(vec![1u8; 45]).unwrap().await.unwrap();
        let sizes: Vec<_> = write.writes().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![20, 20, 5]);

        pump.disconnect().await;
        assert_eq!(notify.unsubscribe_count(), 1);
        assert_eq!(write.subscribe_count(), 0);
    }

    #[tokio::test]
    async fn test_ble_partial_write_is_reported() {
        let write = Arc::new(MockEndpoint::new("tx").failing_write_at(2, GattStatus::Unreachable));
        let notify = Arc::new(MockEndpoint::new("rx"));
        let pump = BlePump::new(BleConnector::new());
        let mut events = pump.subscribe();
        pump.connect(BleParams::new(Arc::clone(&write), notify))
            .await
            .unwrap();

        pump.write(vec![0u8; 45]).unwrap().await.unwrap();

        let error = next_matching(
            &mut events,
            EventFilter::kinds(vec![EventKind::CommunicationError]),
        )
        .await;
        assert_eq!(error, Event::CommunicationError(TransportStatus::Unreachable));
        assert_eq!(write.writes().len(), 3);
        assert!(pump.is_connected());
    }
}

//! Cancellable receive loop.
//!
//! One background task per connected session pulls bytes from the
//! transport's [`ReadSource`] and publishes them as
//! [`Event::MsgReceived`]. Each loop owns a fresh [`LoopContext`]: a
//! cancellation token that interrupts the in-flight read, and a state
//! channel whose `Stopped` value is the finished signal teardown waits on
//! before the transport's handles are released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventDispatcher};
use crate::pump::PumpState;
use crate::status::{Normalize, Operation, TransportStatus};
use crate::transport::ReadSource;

/// Default bound on how long teardown waits for a loop to finish.
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_millis(2000);

/// Lifecycle of a receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, not yet reading.
    Idle,
    /// Reading from the transport.
    Running,
    /// Cancellation requested, waiting for the read to unwind.
    Cancelling,
    /// Exited; the read source is no longer in use.
    Stopped,
}

/// Cancellation token and finished signal of one loop run.
///
/// A context is never reused: every connect attempt gets a new one, so a
/// loop left over from an earlier session can never observe or satisfy
/// the signals of a later one.
#[derive(Debug, Clone)]
pub struct LoopContext {
    cancel: CancellationToken,
    state: Arc<watch::Sender<LoopState>>,
}

impl LoopContext {
    /// Creates a context in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            cancel: CancellationToken::new(),
            state: Arc::new(state),
        }
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Returns true once the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state() == LoopState::Stopped
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Requests cancellation of the in-flight read.
    pub fn cancel(&self) {
        self.state.send_if_modified(|state| {
            if *state == LoopState::Running {
                *state = LoopState::Cancelling;
                return true;
            }
            false
        });
        self.cancel.cancel();
    }

    /// Waits for the finished signal.
    ///
    /// Returns false if the loop is still running after `timeout`.
    pub async fn wait_finished(&self, timeout: Duration) -> bool {
        let mut state = self.state.subscribe();
        let finished = state.wait_for(|state| *state == LoopState::Stopped);
        matches!(tokio::time::timeout(timeout, finished).await, Ok(Ok(_)))
    }

    fn set_state(&self, state: LoopState) {
        self.state.send_replace(state);
    }
}

impl Default for LoopContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running receive loop.
#[derive(Debug)]
pub struct ReceiveLoop {
    context: LoopContext,
}

impl ReceiveLoop {
    /// Spawns a loop reading at most `max_read` bytes at a time.
    ///
    /// `connected` is cleared when the loop exits for any reason.
    pub fn spawn<S: ReadSource>(
        source: S,
        max_read: usize,
        connected: Arc<AtomicBool>,
        events: EventDispatcher,
    ) -> Self {
        let context = LoopContext::new();
        context.set_state(LoopState::Running);
        tokio::spawn(run(source, max_read, connected, events, context.clone()));
        Self { context }
    }

    /// Current loop state.
    #[must_use]
    pub fn state(&self) -> LoopState {
        self.context.state()
    }

    /// Returns true once the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.context.is_finished()
    }

    /// Cancels the loop and waits up to `timeout` for it to finish.
    ///
    /// Returns false on timeout. The loop task is then left to unwind on
    /// its own; it is not aborted.
    pub async fn stop(self, timeout: Duration) -> bool {
        self.context.cancel();
        if self.context.wait_finished(timeout).await {
            tracing::debug!("receive loop stopped");
            return true;
        }
        tracing::error!(
            "receive loop did not finish within {}ms, tearing down anyway",
            timeout.as_millis()
        );
        false
    }
}

impl Drop for ReceiveLoop {
    fn drop(&mut self) {
        self.context.cancel.cancel();
    }
}

/// Raises the finished signal however the loop exits.
struct ExitGuard {
    connected: Arc<AtomicBool>,
    context: LoopContext,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.context.set_state(LoopState::Stopped);
    }
}

async fn run<S: ReadSource>(
    mut source: S,
    max_read: usize,
    connected: Arc<AtomicBool>,
    events: EventDispatcher,
    context: LoopContext,
) {
    let _guard = ExitGuard {
        connected: Arc::clone(&connected),
        context: context.clone(),
    };
    tracing::debug!("receive loop started");

    loop {
        let read = tokio::select! {
            biased;
            () = context.cancel.cancelled() => {
                tracing::debug!("receive loop cancelled");
                break;
            }
            read = source.read_chunk(max_read) => read,
        };

        match read {
            Ok(Some(data)) => {
                if data.is_empty() {
                    continue;
                }
                tracing::trace!("received {} bytes: {}", data.len(), hex::encode(&data));
                events.dispatch(Event::MsgReceived(data));
            }
            Ok(None) => {
                tracing::info!("transport closed by peer");
                report_failure(&connected, &events, TransportStatus::ReadFailure);
                break;
            }
            Err(e) => {
                if context.is_cancelled() {
                    break;
                }
                tracing::error!("read failed: {}", e);
                report_failure(&connected, &events, e.normalize(Operation::Read));
                break;
            }
        }
    }

    source.close().await;
}

fn report_failure(connected: &AtomicBool, events: &EventDispatcher, status: TransportStatus) {
    connected.store(false, Ordering::SeqCst);
    events.dispatch(Event::ConnectResult(status));
    events.dispatch(Event::ConnectionStatusChanged(PumpState::Idle));
}

//! Binds one characteristic endpoint to one logical channel.
//!
//! A binder attaches at construction and detaches in [`teardown`]:
//!
//! - with `subscribed`, a notification subscription whose values are
//!   pushed to the channel as read results
//! - always, a request handler that services the channel's read and
//!   write requests against the endpoint
//!
//! Requests are handled one at a time in the order they were posted, so
//! consecutive writes reach the device in order. Failures are reported on
//! the channel as communication errors and never retried.
//!
//! [`teardown`]: CharacteristicBinder::teardown

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ble::{
    ChannelRequest, CharacteristicChannel, ChunkedWriter, GattEndpoint, NotificationStream,
};
use crate::error::Result;
use crate::status::{Normalize, Operation};

/// Adapter between a [`GattEndpoint`] and a [`CharacteristicChannel`].
pub struct CharacteristicBinder<E: GattEndpoint + ?Sized> {
    endpoint: Arc<E>,
    channel: Arc<CharacteristicChannel>,
    subscribed: bool,
    attached: bool,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<E: GattEndpoint + ?Sized> CharacteristicBinder<E> {
    /// Binds `endpoint` to `channel` using the default block size.
    ///
    /// # Errors
    ///
    /// Returns an error if `subscribed` is set and the notification
    /// subscription cannot be enabled. Nothing stays attached in that case.
    pub async fn bind(
        endpoint: Arc<E>,
        channel: Arc<CharacteristicChannel>,
        subscribed: bool,
    ) -> Result<Self> {
        Self::bind_with(endpoint, channel, subscribed, ChunkedWriter::default()).await
    }

    /// Binds `endpoint` to `channel`, splitting writes with `writer`.
    ///
    /// # Errors
    ///
    /// See [`bind`](Self::bind).
    pub async fn bind_with(
        endpoint: Arc<E>,
        channel: Arc<CharacteristicChannel>,
        subscribed: bool,
        writer: ChunkedWriter,
    ) -> Result<Self> {
        let id = endpoint.id();
        tracing::info!("binding {} to channel {}", id, channel.name());

        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        if subscribed {
            let notifications = endpoint.subscribe().await?;
            tasks.push(tokio::spawn(forward_notifications(
                id.clone(),
                notifications,
                Arc::clone(&channel),
                cancel.clone(),
            )));
        }

        let requests = channel.attach();
        tasks.push(tokio::spawn(serve_requests(
            Arc::clone(&endpoint),
            Arc::clone(&channel),
            requests,
            writer,
            cancel.clone(),
        )));

        Ok(Self {
            endpoint,
            channel,
            subscribed,
            attached: true,
            cancel,
            tasks,
        })
    }

    /// Returns the bound channel.
    #[must_use]
    pub fn channel(&self) -> &Arc<CharacteristicChannel> {
        &self.channel
    }

    /// Returns the bound endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Arc<E> {
        &self.endpoint
    }

    /// Returns true if the binder listens for notifications.
    #[must_use]
    pub const fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Returns true until [`teardown`](Self::teardown) has run.
    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.attached
    }

    /// Detaches everything attached at construction.
    ///
    /// The notification subscription is released only if one was made.
    /// Calling this again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint fails to unsubscribe. The binder
    /// is detached regardless.
    pub async fn teardown(&mut self) -> Result<()> {
        if !self.attached {
            tracing::debug!("{} already torn down", self.channel.name());
            return Ok(());
        }
        self.attached = false;
        tracing::info!("tearing down binder for {}", self.channel.name());

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(
                    "binder task for {} ended abnormally: {}",
                    self.channel.name(),
                    e
                );
            }
        }

        if self.subscribed {
            self.endpoint.unsubscribe().await?;
        }
        Ok(())
    }
}

impl<E: GattEndpoint + ?Sized> Drop for CharacteristicBinder<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn forward_notifications(
    id: String,
    mut notifications: NotificationStream,
    channel: Arc<CharacteristicChannel>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            value = notifications.next() => {
                let Some(data) = value else {
                    tracing::debug!("{} notification stream ended", id);
                    break;
                };
                tracing::trace!("{} notified: {}", id, hex::encode(&data));
                channel.push_read_value(data);
            }
        }
    }
}

async fn serve_requests<E: GattEndpoint + ?Sized>(
    endpoint: Arc<E>,
    channel: Arc<CharacteristicChannel>,
    mut requests: mpsc::UnboundedReceiver<ChannelRequest>,
    writer: ChunkedWriter,
    cancel: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            request = requests.recv() => request,
        };
        let Some(request) = request else { break };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = handle_request(&*endpoint, &channel, request, writer) => {}
        }
    }
}

async fn handle_request<E: GattEndpoint + ?Sized>(
    endpoint: &E,
    channel: &CharacteristicChannel,
    request: ChannelRequest,
    writer: ChunkedWriter,
) {
    match request {
        ChannelRequest::Read => match endpoint.read_value().await {
            Ok(data) => channel.push_read_value(data),
            Err(e) => {
                tracing::error!("{} read failed: {}", endpoint.id(), e);
                channel.push_communication_error(e.normalize(Operation::Read));
            }
        },
        ChannelRequest::Write(data) => write(endpoint, channel, &data, writer).await,
    }
}

async fn write<E: GattEndpoint + ?Sized>(
    endpoint: &E,
    channel: &CharacteristicChannel,
    data: &Bytes,
    writer: ChunkedWriter,
) {
    tracing::debug!("{} write: {}", endpoint.id(), hex::encode(data));
    if let Err(e) = writer.write(endpoint, data).await {
        tracing::error!("{} write failed: {}", endpoint.id(), e);
        channel.push_communication_error(e.status());
    }
}

//! russh channels as session streams

use std::pin::Pin;

use async_trait::async_trait;
use russh::server::{Handle, Msg};
use russh::Channel;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use rsh_core::connection::RejectReason;
use rsh_core::error::ProtocolError;
use rsh_core::session::{AcceptedSession, CloseHandle, RequestEvent, REQUEST_QUEUE_CAPACITY};
use rsh_core::traits::ChannelOpenEvent;
use rsh_core::SessionId;

/// Byte stream of an SSH channel
pub trait ChannelIo: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> ChannelIo for T {}

/// Owned, pinned channel stream handed to the dispatcher
pub type ChannelByteStream = Pin<Box<dyn ChannelIo + Send>>;

/// Answer sent back to the handler; `Some` carries the new request queue
pub(crate) type OpenDecision = Option<mpsc::Sender<RequestEvent>>;

/// A channel-open request waiting for the acceptor's decision
pub struct SshChannelOpen {
    kind: String,
    id: SessionId,
    channel: Channel<Msg>,
    handle: Handle,
    decision: oneshot::Sender<OpenDecision>,
}

impl SshChannelOpen {
    pub(crate) fn new(
        kind: impl Into<String>,
        id: SessionId,
        channel: Channel<Msg>,
        handle: Handle,
        decision: oneshot::Sender<OpenDecision>,
    ) -> Self {
        Self {
            kind: kind.into(),
            id,
            channel,
            handle,
            decision,
        }
    }
}

#[async_trait]
impl ChannelOpenEvent for SshChannelOpen {
    type Stream = ChannelByteStream;

    fn kind(&self) -> &str {
        &self.kind
    }

    fn id(&self) -> SessionId {
        self.id
    }

    async fn accept(self) -> Result<AcceptedSession<ChannelByteStream>, ProtocolError> {
        let channel_id = self.channel.id();
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);

        self.decision
            .send(Some(requests_tx))
            .map_err(|_| ProtocolError::SessionGone)?;

        let handle = self.handle;
        let close = CloseHandle::new(async move {
            if handle.close(channel_id).await.is_err() {
                tracing::debug!("Channel {:?} already gone at close", channel_id);
            }
        });

        let stream: ChannelByteStream = Box::pin(self.channel.into_stream());
        Ok(AcceptedSession {
            stream,
            requests: requests_rx,
            close,
        })
    }

    fn reject(self, reason: RejectReason, description: &str) {
        tracing::debug!(
            "Refusing channel {:?} ({}): {} (code {})",
            self.channel.id(),
            self.kind,
            description,
            reason.code()
        );
        let _ = self.decision.send(None);
    }
}

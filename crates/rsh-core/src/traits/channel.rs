//! Channel-open events from an authenticated transport

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::RejectReason;
use crate::error::ProtocolError;
use crate::session::AcceptedSession;
use crate::types::SessionId;

/// A peer's request to open a channel on a connection
///
/// The transport produces one of these per channel-open message. The
/// acceptor either accepts it, obtaining the channel's byte stream and
/// request queue, or rejects it with a reason code.
#[async_trait]
pub trait ChannelOpenEvent: Send + 'static {
    /// Duplex byte stream of an accepted channel
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Declared channel type ("session", "direct-tcpip", ...)
    fn kind(&self) -> &str;

    /// Identifier the session will be known by
    fn id(&self) -> SessionId;

    /// Accept the channel
    async fn accept(self) -> Result<AcceptedSession<Self::Stream>, ProtocolError>;

    /// Refuse the channel
    fn reject(self, reason: RejectReason, description: &str);
}

//! SSH connection handler
//!
//! Implements the russh server handler for one client connection. Channel
//! opens and channel requests are translated into core events and handed to
//! the connection's acceptor; the acceptor's answers go back on the wire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, Pty, Sig};
use russh_keys::key::PublicKey;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use rsh_core::connection::GlobalRequest;
use rsh_core::error::ProtocolError;
use rsh_core::session::{RequestEvent, SessionContext, SessionRequest};
use rsh_core::{ConnectionAcceptor, PtyParams, SessionId};

use crate::auth::Authenticator;
use crate::server::channel::SshChannelOpen;

/// Capacity of the channel-open and global request queues
const EVENT_QUEUE_CAPACITY: usize = 32;

/// Senders into the running acceptor of a connection
#[derive(Clone)]
struct AcceptorLink {
    opens: mpsc::Sender<SshChannelOpen>,
    global: mpsc::Sender<GlobalRequest>,
}

/// Handler for a single SSH client connection
pub struct ConnectionHandler {
    /// Peer address of the connecting client
    peer_addr: Option<SocketAddr>,
    /// Login checks
    authenticator: Arc<Authenticator>,
    /// Handed to every session of this connection
    context: SessionContext,
    /// Cancelled when this connection goes away
    cancel: CancellationToken,
    /// Authenticated user name
    user: Option<String>,
    /// Started on the first channel or global request
    acceptor: Option<AcceptorLink>,
    /// Request queues of open session channels
    sessions: HashMap<ChannelId, mpsc::Sender<RequestEvent>>,
    /// Last session number handed out
    last_session: u32,
}

impl ConnectionHandler {
    /// Create a handler for a freshly accepted socket
    pub fn new(
        peer_addr: Option<SocketAddr>,
        authenticator: Arc<Authenticator>,
        context: SessionContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            peer_addr,
            authenticator,
            context,
            cancel,
            user: None,
            acceptor: None,
            sessions: HashMap::new(),
            last_session: 0,
        }
    }

    /// `user@peer`, as used in logs
    pub fn remote(&self) -> String {
        let peer = self
            .peer_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        match &self.user {
            Some(user) => format!("{}@{}", user, peer),
            None => peer,
        }
    }

    fn link(&mut self) -> AcceptorLink {
        if let Some(link) = &self.acceptor {
            return link.clone();
        }

        let (opens_tx, opens_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (global_tx, global_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let acceptor =
            ConnectionAcceptor::new(self.remote(), self.context.clone(), self.cancel.clone());
        tokio::spawn(acceptor.run(opens_rx, global_rx));

        let link = AcceptorLink {
            opens: opens_tx,
            global: global_tx,
        };
        self.acceptor = Some(link.clone());
        link
    }

    /// Forward a channel open and wait for the acceptor's decision
    async fn open_channel(
        &mut self,
        kind: &str,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, anyhow::Error> {
        let channel_id = channel.id();
        self.last_session += 1;
        let id = SessionId::new(self.last_session);

        let (decision_tx, decision_rx) = oneshot::channel();
        let open = SshChannelOpen::new(kind, id, channel, session.handle(), decision_tx);

        if self.link().opens.send(open).await.is_err() {
            tracing::warn!("Acceptor for {} is gone, refusing {:?}", self.remote(), channel_id);
            return Ok(false);
        }

        match decision_rx.await {
            Ok(Some(requests)) => {
                tracing::debug!("{} bound to {:?}", id, channel_id);
                self.sessions.insert(channel_id, requests);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Hand a connection-level request to the acceptor without waiting
    fn forward_global(&mut self, kind: &str) {
        if let Err(e) = self.link().global.try_send(GlobalRequest::new(kind)) {
            tracing::debug!("Dropping {} request from {}: {}", kind, self.remote(), e);
        }
    }

    /// Queue a request on its session and wait for the answer
    async fn dispatch(&self, channel: ChannelId, request: SessionRequest) -> bool {
        let Some(requests) = self.sessions.get(&channel) else {
            tracing::debug!("{} request on unknown channel {:?}", request.kind(), channel);
            return false;
        };

        let (event, reply) = RequestEvent::new(request);
        if requests.send(event).await.is_err() {
            return false;
        }
        reply.await.unwrap_or(false)
    }

    /// Dispatch a request and put the answer on the wire
    async fn answer(
        &mut self,
        channel: ChannelId,
        request: Result<SessionRequest, ProtocolError>,
        session: &mut Session,
    ) -> Result<(), anyhow::Error> {
        let accepted = match request {
            Ok(request) => self.dispatch(channel, request).await,
            Err(e) => {
                tracing::warn!("Rejecting request on {:?} from {}: {}", channel, self.remote(), e);
                false
            }
        };

        if accepted {
            session.channel_success(channel);
        } else {
            session.channel_failure(channel);
        }
        Ok(())
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
        tracing::debug!("Connection handler for {} dropped", self.remote());
    }
}

#[async_trait]
impl Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        match self.authenticator.check_password(user, password) {
            Ok(()) => {
                self.user = Some(user.to_string());
                tracing::info!("Password login accepted for {}", self.remote());
                Ok(Auth::Accept)
            }
            Err(e) => {
                tracing::warn!("Authentication from {} failed: {}", self.remote(), e);
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        match self.authenticator.check_public_key(user, public_key) {
            Ok(()) => {
                self.user = Some(user.to_string());
                tracing::info!(
                    "Public key login accepted for {} ({})",
                    self.remote(),
                    public_key.fingerprint()
                );
                Ok(Auth::Accept)
            }
            Err(e) => {
                tracing::warn!("Authentication from {} failed: {}", self.remote(), e);
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                })
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.open_channel("session", channel, session).await
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            "direct-tcpip to {}:{} requested by {}",
            host_to_connect,
            port_to_connect,
            self.remote()
        );
        self.open_channel("direct-tcpip", channel, session).await
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.open_channel("x11", channel, session).await
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let params = PtyParams {
            term: term.to_string(),
            cols: col_width,
            rows: row_height,
            pixel_width: pix_width,
            pixel_height: pix_height,
            modes: modes
                .iter()
                .map(|(opcode, value)| (*opcode as u8, *value))
                .collect(),
        };
        self.answer(channel, Ok(SessionRequest::Pty(params)), session)
            .await
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, Ok(SessionRequest::Shell), session).await
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.answer(channel, SessionRequest::exec(data), session).await
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::trace!("env {} requested on {:?}", variable_name, channel);
        self.answer(channel, Ok(SessionRequest::unknown("env")), session)
            .await
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("subsystem {} requested on {:?}", name, channel);
        self.answer(channel, Ok(SessionRequest::unknown("subsystem")), session)
            .await
    }

    // window-change and signal never ask for a reply; the answer is only logged.
    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.dispatch(channel, SessionRequest::unknown("window-change"))
            .await;
        Ok(())
    }

    async fn signal(
        &mut self,
        channel: ChannelId,
        signal: Sig,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("signal {:?} received on {:?}", signal, channel);
        self.dispatch(channel, SessionRequest::unknown("signal")).await;
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            "tcpip-forward {}:{} requested by {}",
            address,
            port,
            self.remote()
        );
        self.forward_global("tcpip-forward");
        Ok(false)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        _address: &str,
        _port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.forward_global("cancel-tcpip-forward");
        Ok(false)
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel EOF: {:?}", channel);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!("Channel closed: {:?}", channel);
        // Ends the session's request stream, which closes the session.
        self.sessions.remove(&channel);
        Ok(())
    }
}

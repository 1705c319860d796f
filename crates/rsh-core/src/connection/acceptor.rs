//! Channel acceptor for one authenticated connection
//!
//! Accepts "session" channels and hands each one to its own dispatcher
//! task; everything else is rejected without disturbing the connection.

use std::collections::HashMap;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{GlobalRequest, RejectReason};
use crate::error::ProtocolError;
use crate::session::{
    AcceptedSession, SessionContext, SessionDispatcher, SessionSnapshot, SessionState,
    SessionSummary,
};
use crate::traits::ChannelOpenEvent;
use crate::types::SessionId;

type LiveSessions = HashMap<SessionId, watch::Receiver<SessionSnapshot>>;

/// The only channel type the acceptor accepts
pub const SESSION_CHANNEL_KIND: &str = "session";

/// Counters reported when a connection ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Session channels accepted
    pub accepted: usize,
    /// Channels refused
    pub rejected: usize,
    /// Connection-level requests discarded
    pub discarded_requests: usize,
}

/// Accept loop for one connection
pub struct ConnectionAcceptor {
    /// Remote identity, used in logs
    remote: String,
    /// Shared by every session of the connection
    context: SessionContext,
    /// Cancelled when the connection goes away
    cancel: CancellationToken,
}

impl ConnectionAcceptor {
    /// Create an acceptor for the connection identified by `remote`
    pub fn new(
        remote: impl Into<String>,
        context: SessionContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            remote: remote.into(),
            context,
            cancel,
        }
    }

    /// Remote identity of the connection
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Run until the channel-open stream ends
    ///
    /// Connection-level requests arriving on `global` are drained and
    /// discarded. When the loop ends, every session still running is
    /// cancelled and awaited.
    pub async fn run<E>(
        self,
        mut opens: mpsc::Receiver<E>,
        mut global: mpsc::Receiver<GlobalRequest>,
    ) -> ConnectionSummary
    where
        E: ChannelOpenEvent,
    {
        let mut sessions: JoinSet<SessionSummary> = JoinSet::new();
        let mut live = LiveSessions::new();
        let mut summary = ConnectionSummary::default();
        let mut global_open = true;

        tracing::info!("Accepting channels from {}", self.remote);

        loop {
            tokio::select! {
                open = opens.recv() => match open {
                    Some(open) => {
                        self.on_open(open, &mut sessions, &mut live, &mut summary).await
                    }
                    None => {
                        tracing::debug!("Channel-open stream from {} ended", self.remote);
                        break;
                    }
                },

                request = global.recv(), if global_open => match request {
                    Some(request) => {
                        tracing::trace!("Discarding {} request from {}", request.kind, self.remote);
                        summary.discarded_requests += 1;
                    }
                    None => global_open = false,
                },

                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    self.on_session_end(finished, &mut live);
                }

                _ = self.cancel.cancelled() => {
                    tracing::debug!("Acceptor for {} cancelled", self.remote);
                    break;
                }
            }
        }

        for (id, status) in &live {
            let snapshot = status.borrow();
            if snapshot.state != SessionState::Closed {
                tracing::debug!(
                    "Cancelling {} of {} in {:?} (pty {:?})",
                    id,
                    self.remote,
                    snapshot.state,
                    snapshot.pty.as_ref().map(|pty| (&pty.term, pty.cols, pty.rows))
                );
            }
        }

        self.cancel.cancel();
        while let Some(finished) = sessions.join_next().await {
            self.on_session_end(finished, &mut live);
        }

        tracing::info!(
            "Connection from {} released: {} sessions accepted, {} channels rejected",
            self.remote,
            summary.accepted,
            summary.rejected
        );
        summary
    }

    async fn on_open<E>(
        &self,
        open: E,
        sessions: &mut JoinSet<SessionSummary>,
        live: &mut LiveSessions,
        summary: &mut ConnectionSummary,
    ) where
        E: ChannelOpenEvent,
    {
        if open.kind() != SESSION_CHANNEL_KIND {
            let error = ProtocolError::UnknownChannelType(open.kind().to_string());
            tracing::warn!("Rejecting channel from {}: {}", self.remote, error);
            open.reject(RejectReason::UnknownChannelType, &error.to_string());
            summary.rejected += 1;
            return;
        }

        let id = open.id();
        match open.accept().await {
            Ok(AcceptedSession {
                stream,
                requests,
                close,
            }) => {
                tracing::info!("{} opened by {}", id, self.remote);
                let dispatcher = SessionDispatcher::new(
                    id,
                    stream,
                    close,
                    self.context.clone(),
                    self.cancel.child_token(),
                );
                live.insert(id, dispatcher.watch());
                sessions.spawn(dispatcher.run(requests));
                summary.accepted += 1;
            }
            Err(e) => {
                tracing::warn!("Could not accept {} from {}: {}", id, self.remote, e);
            }
        }
    }

    fn on_session_end(
        &self,
        finished: Result<SessionSummary, tokio::task::JoinError>,
        live: &mut LiveSessions,
    ) {
        match finished {
            Ok(session) => {
                live.remove(&session.id);
                tracing::debug!(
                    "{} of {} ended in {:?} after {} requests",
                    session.id,
                    self.remote,
                    session.mode,
                    session.requests
                )
            }
            Err(e) => tracing::error!("Session task of {} failed: {}", self.remote, e),
        }
    }
}

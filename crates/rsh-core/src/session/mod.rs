//! Logical sessions multiplexed over one connection
//!
//! A session owns a duplex byte stream and an ordered queue of control
//! requests. Its dispatcher answers every request, runs at most one shell or
//! command, and closes the session exactly once.

mod dispatcher;
mod exec;
mod request;
mod shell;

pub use dispatcher::{
    SessionContext, SessionDispatcher, SessionSnapshot, SessionSummary, REQUEST_QUEUE_CAPACITY,
};
pub use exec::run_command;
pub use request::{RequestEvent, RequestKind, Reply, SessionRequest};
pub use shell::{ShellExit, ShellLoop};

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tokio::sync::mpsc;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, no requests handled yet
    Open,
    /// Terminal parameters captured
    PtyConfigured,
    /// Interactive shell loop running
    Shelling,
    /// One-shot command running
    Executing,
    /// Stream closed
    Closed,
}

impl SessionState {
    /// Whether a `pty-req`, `shell` or `exec` may still be accepted
    pub fn accepts_setup(&self) -> bool {
        matches!(self, SessionState::Open | SessionState::PtyConfigured)
    }
}

/// Deferred action that closes a session's transport channel
///
/// Runs at most once; later calls are no-ops.
pub struct CloseHandle {
    action: Option<BoxFuture<'static, ()>>,
}

impl CloseHandle {
    /// Wrap a close action
    pub fn new<F>(action: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            action: Some(action.boxed()),
        }
    }

    /// A close handle with nothing to do beyond dropping the stream
    pub fn noop() -> Self {
        Self { action: None }
    }

    /// Run the close action if it has not run yet
    pub async fn close(&mut self) {
        if let Some(action) = self.action.take() {
            action.await;
        }
    }

    /// Whether the close action is still pending
    pub fn is_pending(&self) -> bool {
        self.action.is_some()
    }
}

/// What the transport yields when a session channel is accepted
pub struct AcceptedSession<S> {
    /// Duplex byte stream of the channel
    pub stream: S,
    /// Ordered control requests for the channel
    pub requests: mpsc::Receiver<RequestEvent>,
    /// Closes the channel on the transport
    pub close: CloseHandle,
}

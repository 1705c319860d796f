//! Session control requests

use std::fmt;
use std::str::FromStr;

use tokio::sync::oneshot;

use crate::error::ProtocolError;
use crate::types::PtyParams;

/// Wire tag of a session request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Pty,
    Shell,
    Exec,
    Other(String),
}

impl RequestKind {
    /// The SSH request type string
    pub fn as_str(&self) -> &str {
        match self {
            RequestKind::Pty => "pty-req",
            RequestKind::Shell => "shell",
            RequestKind::Exec => "exec",
            RequestKind::Other(kind) => kind,
        }
    }
}

impl FromStr for RequestKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pty-req" => RequestKind::Pty,
            "shell" => RequestKind::Shell,
            "exec" => RequestKind::Exec,
            other => RequestKind::Other(other.to_string()),
        })
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded session request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    /// `pty-req`
    Pty(PtyParams),
    /// `shell`
    Shell,
    /// `exec` with its command line
    Exec { command: String },
    /// Any other request type
    Unknown { kind: String },
}

impl SessionRequest {
    /// Decode an `exec` payload (the raw command bytes)
    pub fn exec(payload: &[u8]) -> Result<Self, ProtocolError> {
        let command = std::str::from_utf8(payload).map_err(|e| ProtocolError::InvalidPayload {
            kind: RequestKind::Exec.to_string(),
            reason: e.to_string(),
        })?;
        Ok(SessionRequest::Exec {
            command: command.to_string(),
        })
    }

    /// A request of a type the dispatcher does not handle
    pub fn unknown(kind: impl Into<String>) -> Self {
        SessionRequest::Unknown { kind: kind.into() }
    }

    /// Wire tag of this request
    pub fn kind(&self) -> RequestKind {
        match self {
            SessionRequest::Pty(_) => RequestKind::Pty,
            SessionRequest::Shell => RequestKind::Shell,
            SessionRequest::Exec { .. } => RequestKind::Exec,
            SessionRequest::Unknown { kind } => RequestKind::Other(kind.clone()),
        }
    }
}

/// One-time answer to a request
///
/// Dropping a `Reply` without sending answers `false`, so every request is
/// answered exactly once.
pub struct Reply {
    tx: Option<oneshot::Sender<bool>>,
}

impl Reply {
    /// Accept (`true`) or reject (`false`) the request
    pub fn send(mut self, accepted: bool) {
        if let Some(tx) = self.tx.take() {
            // The requester may have given up; nothing to do then.
            let _ = tx.send(accepted);
        }
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(false);
        }
    }
}

/// A request paired with its reply
pub struct RequestEvent {
    /// The decoded request
    pub request: SessionRequest,
    /// Where the answer goes
    pub reply: Reply,
}

impl RequestEvent {
    /// Create an event and the receiver its answer arrives on
    pub fn new(request: SessionRequest) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                reply: Reply { tx: Some(tx) },
            },
            rx,
        )
    }
}

impl fmt::Debug for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEvent")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

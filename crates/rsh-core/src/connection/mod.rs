//! Per-connection channel acceptance

mod acceptor;

pub use acceptor::{ConnectionAcceptor, ConnectionSummary, SESSION_CHANNEL_KIND};

/// Reason codes for refusing a channel, as defined by RFC 4254
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AdministrativelyProhibited,
    ConnectFailed,
    UnknownChannelType,
    ResourceShortage,
}

impl RejectReason {
    /// Numeric code carried in SSH_MSG_CHANNEL_OPEN_FAILURE
    pub fn code(&self) -> u32 {
        match self {
            RejectReason::AdministrativelyProhibited => 1,
            RejectReason::ConnectFailed => 2,
            RejectReason::UnknownChannelType => 3,
            RejectReason::ResourceShortage => 4,
        }
    }
}

/// A connection-level request not tied to any session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRequest {
    /// Request type, e.g. "tcpip-forward"
    pub kind: String,
}

impl GlobalRequest {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

//! rsh-core: Session multiplexing and process I/O bridging for rsh
//!
//! This crate holds everything between an authenticated transport and the
//! host processes it drives: per-connection channel acceptance, per-session
//! request dispatch, process spawning, and the byte bridges that connect
//! process streams to session streams. The SSH transport itself lives in
//! `rsh-server` and `rsh-client`.

pub mod bridge;
pub mod config;
pub mod connection;
pub mod error;
pub mod process;
pub mod session;
pub mod traits;
pub mod types;

pub use connection::ConnectionAcceptor;
pub use error::{ProtocolError, SessionError};
pub use process::{ManagedProcess, ProcessOutcome, ProcessRunner};
pub use session::{SessionDispatcher, SessionState};
pub use types::{PtyParams, SessionId};

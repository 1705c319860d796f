//! rsh-client: command-line client for rsh servers
//!
//! Connects over SSH, runs one-shot commands each in its own session, or
//! attaches the local terminal to a remote shell.

pub mod connector;
pub mod session;
pub mod terminal;

pub use connector::{ConnectionError, Connector};
pub use session::{ClientSessionController, CommandError, CommandOutput, TerminalRequest};

//! rsh-server: SSH front end for the rsh session core
//!
//! Terminates SSH connections with russh, authenticates them, and feeds
//! their channels and channel requests into `rsh-core`'s acceptor and
//! dispatchers.

pub mod auth;
pub mod server;

pub use auth::Authenticator;
pub use server::{load_host_key, SshServer};

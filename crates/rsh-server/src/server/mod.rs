//! SSH server implementation

mod channel;
mod handler;
mod listener;

pub use channel::{ChannelByteStream, ChannelIo, SshChannelOpen};
pub use handler::ConnectionHandler;
pub use listener::{load_host_key, ssh_config, SshServer};

//! Core trait definitions

mod channel;

pub use channel::ChannelOpenEvent;

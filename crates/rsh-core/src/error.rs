//! Core error types for rsh

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors contained within a single session or bridge
#[derive(Error, Debug)]
pub enum SessionError {
    /// The command line had no words in it
    #[error("empty command line")]
    EmptyCommand,

    /// The executable could not be located or started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process could not be waited on
    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),

    /// The process exited with a non-zero status
    #[error("exit status {0}")]
    NonZeroExit(i32),

    /// The process was terminated by a signal
    #[error("process terminated by signal")]
    Signaled,
}

/// Per-unit protocol violations; rejected on the wire, never fatal to a connection
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Channel kind other than "session"
    #[error("unknown channel type: {0}")]
    UnknownChannelType(String),

    /// Request type the dispatcher does not handle
    #[error("unsupported request: {0}")]
    UnsupportedRequest(String),

    /// Request payload could not be decoded for its type
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    /// The other end of a session queue has gone away
    #[error("session is gone")]
    SessionGone,
}

/// Authentication failures; fatal to one connection attempt only
#[derive(Error, Debug)]
pub enum AuthError {
    /// Password did not match
    #[error("password rejected for {0:?}")]
    PasswordRejected(String),

    /// Public key is not in the authorized set
    #[error("public key {fingerprint} rejected for {user:?}")]
    KeyRejected { user: String, fingerprint: String },

    /// Authorized keys file could not be read
    #[error("failed to read authorized keys {path:?}: {source}")]
    AuthorizedKeys {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors that terminate the whole process at startup
#[derive(Error, Debug)]
pub enum StartupError {
    /// Host key missing or unparseable
    #[error("failed to load host key from {path:?}: {reason}")]
    HostKey { path: PathBuf, reason: String },

    /// Listener could not be bound
    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_message() {
        assert_eq!(SessionError::NonZeroExit(2).to_string(), "exit status 2");
    }

    #[test]
    fn test_spawn_error_names_program() {
        let err = SessionError::Spawn {
            program: "nope".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert!(err.to_string().starts_with("failed to start nope"));
    }

    #[test]
    fn test_unknown_channel_type_message() {
        let err = ProtocolError::UnknownChannelType("x11".into());
        assert_eq!(err.to_string(), "unknown channel type: x11");
    }
}

//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default SSH port appended when the host has none
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Configuration for the rsh client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host to connect to, with optional `:port`
    pub host: String,

    /// Username for SSH login
    pub user: String,

    /// Private key for public key authentication (password auth when unset)
    pub key_path: Option<PathBuf>,

    /// Password used when no key is configured
    pub password: String,

    /// Expected server host key fingerprint (any key accepted when unset)
    pub expected_host_key: Option<String>,

    /// Exit statuses of an interactive shell that count as a clean exit
    pub normal_exit_codes: Vec<u32>,

    /// Terminal name sent in `pty-req` when `$TERM` is unset
    pub term: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: "testuser".to_string(),
            key_path: None,
            password: "password123".to_string(),
            expected_host_key: None,
            normal_exit_codes: vec![1],
            term: "xterm".to_string(),
        }
    }
}

impl ClientConfig {
    /// Host with the default port appended when none was given
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, DEFAULT_SSH_PORT)
        }
    }

    /// Whether an interactive exit status is a clean termination
    pub fn is_normal_exit(&self, status: u32) -> bool {
        status == 0 || self.normal_exit_codes.contains(&status)
    }
}

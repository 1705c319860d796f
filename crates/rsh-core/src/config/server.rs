//! Server configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the rsh server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the SSH listener to
    pub bind_address: String,

    /// Path to the host private key
    pub host_key_path: PathBuf,

    /// Accepted password (None disables password authentication)
    pub password: Option<String>,

    /// OpenSSH authorized_keys files for public key authentication
    pub authorized_keys: Vec<PathBuf>,

    /// Delay applied after a rejected authentication attempt, in seconds
    pub auth_rejection_time_secs: u64,

    /// Built-in shell settings
    pub shell: ShellConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:2222".to_string(),
            host_key_path: PathBuf::from("id_rsa"),
            password: Some("password123".to_string()),
            authorized_keys: vec![],
            auth_rejection_time_secs: 1,
            shell: ShellConfig::default(),
        }
    }
}

/// Text and buffer settings of the built-in interactive shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Written once when the shell starts
    pub banner: String,
    /// Written before every read
    pub prompt: String,
    /// Written when the user types `exit`
    pub goodbye: String,
    /// Maximum bytes taken by a single read
    pub read_buffer_size: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            banner: "\r\nWelcome to the SSH server!\r\nType 'exit' to close the session\r\n"
                .to_string(),
            prompt: "\r\n$ ".to_string(),
            goodbye: "\r\nGoodbye!\r\n".to_string(),
            read_buffer_size: 1024,
        }
    }
}

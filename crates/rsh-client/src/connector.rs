//! Outbound SSH connector
//!
//! Resolves the configured host, verifies the server key and logs in with
//! either a private key or the configured password.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Config};
use russh_keys::key::{KeyPair, PublicKey};
use thiserror::Error;

use rsh_core::config::ClientConfig;

use crate::session::ClientSessionController;

/// Connection errors that may require special handling
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Private key file missing or unreadable
    #[error("Private key not found at {path}: {source}")]
    KeyNotFound {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// The server refused our credentials
    #[error("Authentication rejected by server")]
    AuthRejected,

    /// The server key did not match the expected fingerprint
    #[error("Host key verification failed: {message}")]
    HostKeyRejected { message: String },

    /// Other connection error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Opens authenticated connections to an rsh or SSH server
pub struct Connector {
    /// Client configuration
    config: ClientConfig,
    /// Private key for public key authentication
    key: Option<Arc<KeyPair>>,
}

impl Connector {
    /// Create a connector, loading the private key if one is configured
    pub fn new(config: ClientConfig) -> Result<Self, ConnectionError> {
        let key = match &config.key_path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConnectionError::KeyNotFound {
                        path: path.display().to_string(),
                        source: anyhow::anyhow!("File does not exist"),
                    });
                }
                let key = russh_keys::load_secret_key(path, None).map_err(|e| {
                    ConnectionError::KeyNotFound {
                        path: path.display().to_string(),
                        source: anyhow::anyhow!("Failed to load key: {}", e),
                    }
                })?;
                Some(Arc::new(key))
            }
            None => None,
        };

        Ok(Self { config, key })
    }

    /// Create a connector with an already loaded key
    pub fn with_key(config: ClientConfig, key: KeyPair) -> Self {
        Self {
            config,
            key: Some(Arc::new(key)),
        }
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect and authenticate
    pub async fn connect(&self) -> Result<ClientSessionController, ConnectionError> {
        let address = self.config.address();
        let host_key_rejected = Arc::new(AtomicBool::new(false));
        let handler = ClientHandler::new(
            self.config.expected_host_key.clone(),
            Arc::clone(&host_key_rejected),
        );

        tracing::debug!("Connecting to {}", address);
        let mut handle = client::connect(Arc::new(Config::default()), address.as_str(), handler)
            .await
            .map_err(|e| {
                if host_key_rejected.load(Ordering::SeqCst) {
                    ConnectionError::HostKeyRejected {
                        message: format!("server at {} presented an unexpected key", address),
                    }
                } else {
                    ConnectionError::Other(anyhow::anyhow!("Failed to dial {}: {}", address, e))
                }
            })?;

        let user = self.config.user.clone();
        let authenticated = match &self.key {
            Some(key) => {
                tracing::debug!("Authenticating as '{}' with public key", user);
                handle.authenticate_publickey(user, Arc::clone(key)).await
            }
            None => {
                tracing::debug!("Authenticating as '{}' with password", user);
                handle
                    .authenticate_password(user, self.config.password.clone())
                    .await
            }
        }
        .map_err(|e| anyhow::anyhow!("Authentication error: {}", e))?;

        if !authenticated {
            return Err(ConnectionError::AuthRejected);
        }

        tracing::info!("Connected to {} as {}", address, self.config.user);
        Ok(ClientSessionController::new(handle, self.config.clone()))
    }
}

/// russh client handler: host key verification only
pub struct ClientHandler {
    /// Expected host key fingerprint
    expected_host_key: Option<String>,
    /// Set when the server key is refused
    host_key_rejected: Arc<AtomicBool>,
}

impl ClientHandler {
    fn new(expected_host_key: Option<String>, host_key_rejected: Arc<AtomicBool>) -> Self {
        Self {
            expected_host_key,
            host_key_rejected,
        }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    /// Accept any key unless an expected fingerprint is configured
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key: {}", fingerprint);

        match &self.expected_host_key {
            Some(expected) if *expected != fingerprint => {
                tracing::warn!(
                    "Host key differs from configured: expected {}, got {}",
                    expected,
                    fingerprint
                );
                self.host_key_rejected.store(true, Ordering::SeqCst);
                Ok(false)
            }
            Some(_) => {
                tracing::debug!("Host key verified against configured fingerprint");
                Ok(true)
            }
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_file() {
        let config = ClientConfig {
            key_path: Some("/nonexistent/id_ed25519".into()),
            ..ClientConfig::default()
        };
        match Connector::new(config) {
            Err(ConnectionError::KeyNotFound { path, .. }) => {
                assert_eq!(path, "/nonexistent/id_ed25519")
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("connector built without a key"),
        }
    }

    #[test]
    fn test_password_connector_needs_no_key() {
        let connector = Connector::new(ClientConfig::default()).unwrap();
        assert!(connector.key.is_none());
        assert_eq!(connector.config().address(), "localhost:22");
    }

    #[tokio::test]
    async fn test_host_key_check() {
        let key = KeyPair::generate_ed25519().unwrap().clone_public_key().unwrap();
        let rejected = Arc::new(AtomicBool::new(false));

        let mut open = ClientHandler::new(None, Arc::clone(&rejected));
        assert!(client::Handler::check_server_key(&mut open, &key).await.unwrap());

        let mut pinned = ClientHandler::new(Some(key.fingerprint()), Arc::clone(&rejected));
        assert!(client::Handler::check_server_key(&mut pinned, &key).await.unwrap());
        assert!(!rejected.load(Ordering::SeqCst));

        let mut wrong = ClientHandler::new(Some("SHA256:nope".into()), Arc::clone(&rejected));
        assert!(!client::Handler::check_server_key(&mut wrong, &key).await.unwrap());
        assert!(rejected.load(Ordering::SeqCst));
    }
}

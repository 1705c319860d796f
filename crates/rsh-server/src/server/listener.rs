//! SSH server listener
//!
//! Accepts incoming connections and spawns a handler for each client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use rsh_core::config::ServerConfig;
use rsh_core::error::StartupError;
use rsh_core::process::ProcessRunner;
use rsh_core::session::SessionContext;

use crate::auth::Authenticator;
use crate::server::handler::ConnectionHandler;

/// SSH server bound to a listening socket
pub struct SshServer {
    /// Listening socket
    listener: TcpListener,
    /// russh server configuration
    ssh_config: Arc<russh::server::Config>,
    /// Login checks shared by every connection
    authenticator: Arc<Authenticator>,
    /// Handed to every connection
    context: SessionContext,
}

impl SshServer {
    /// Bind the listener described by `config`
    pub async fn bind(
        config: &ServerConfig,
        host_key: KeyPair,
        authenticator: Authenticator,
    ) -> Result<Self, StartupError> {
        let listener = TcpListener::bind(&config.bind_address)
            .await
            .map_err(|source| StartupError::Bind {
                address: config.bind_address.clone(),
                source,
            })?;

        Ok(Self {
            listener,
            ssh_config: Arc::new(ssh_config(
                host_key,
                Duration::from_secs(config.auth_rejection_time_secs),
            )),
            authenticator: Arc::new(authenticator),
            context: SessionContext {
                runner: ProcessRunner::new(),
                shell: config.shell.clone(),
            },
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `cancel` fires
    ///
    /// Accept errors are logged and never end the loop. Cancelling also
    /// cancels every live connection.
    pub async fn run(self, cancel: CancellationToken) {
        match self.local_addr() {
            Ok(addr) => tracing::info!("SSH server listening on {}", addr),
            Err(e) => tracing::warn!("SSH server listening on unknown address: {}", e),
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("SSH server shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            self.handle_connection(socket, peer_addr, cancel.child_token());
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }
    }

    fn handle_connection(
        &self,
        socket: TcpStream,
        peer_addr: SocketAddr,
        cancel: CancellationToken,
    ) {
        tracing::info!("New connection from {}", peer_addr);

        let config = Arc::clone(&self.ssh_config);
        let handler = ConnectionHandler::new(
            Some(peer_addr),
            Arc::clone(&self.authenticator),
            self.context.clone(),
            cancel.clone(),
        );

        tokio::spawn(async move {
            let session = match russh::server::run_stream(config, socket, handler).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!("Handshake with {} failed: {}", peer_addr, e);
                    return;
                }
            };

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Connection from {} cancelled", peer_addr);
                    return;
                }
                result = session => result,
            };

            match result {
                Ok(()) => tracing::info!("Connection from {} closed normally", peer_addr),
                Err(e) => tracing::warn!("Connection from {} closed with error: {}", peer_addr, e),
            }
        });
    }
}

/// russh configuration with the given host key
pub fn ssh_config(host_key: KeyPair, auth_rejection_time: Duration) -> russh::server::Config {
    let mut config = russh::server::Config::default();
    config.keys.push(host_key);
    config.auth_rejection_time = auth_rejection_time;
    config.auth_rejection_time_initial = Some(Duration::from_secs(0));
    config
}

/// Load the host private key
pub fn load_host_key(path: &Path) -> Result<KeyPair, StartupError> {
    tracing::info!("Loading host key from {:?}", path);
    russh_keys::load_secret_key(path, None).map_err(|e| StartupError::HostKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

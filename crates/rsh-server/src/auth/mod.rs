//! Authentication for incoming connections
//!
//! Password logins are checked against the configured password; public key
//! logins against the fingerprints in the configured authorized keys files.

mod keys;

pub use keys::{AuthorizedKey, AuthorizedKeys};

use russh_keys::key::PublicKey;
use rsh_core::config::ServerConfig;
use rsh_core::error::AuthError;

/// Decides whether a login attempt is accepted
#[derive(Debug, Default)]
pub struct Authenticator {
    password: Option<String>,
    authorized_keys: AuthorizedKeys,
}

impl Authenticator {
    /// Create an authenticator from its parts
    pub fn new(password: Option<String>, authorized_keys: AuthorizedKeys) -> Self {
        Self {
            password,
            authorized_keys,
        }
    }

    /// Build from server configuration, loading the authorized keys files
    pub fn from_config(config: &ServerConfig) -> Result<Self, AuthError> {
        let authorized_keys = AuthorizedKeys::load_from_files(&config.authorized_keys)?;
        let auth = Self::new(config.password.clone(), authorized_keys);

        if !auth.accepts_passwords() && auth.authorized_keys.is_empty() {
            tracing::warn!("No password and no authorized keys configured, rejecting all logins");
        }

        Ok(auth)
    }

    /// Check a password login
    pub fn check_password(&self, user: &str, password: &str) -> Result<(), AuthError> {
        match &self.password {
            Some(expected) if expected == password => Ok(()),
            _ => Err(AuthError::PasswordRejected(user.to_string())),
        }
    }

    /// Check a public key login
    pub fn check_public_key(&self, user: &str, key: &PublicKey) -> Result<(), AuthError> {
        let fingerprint = key.fingerprint();
        if self.authorized_keys.is_authorized(&fingerprint) {
            Ok(())
        } else {
            Err(AuthError::KeyRejected {
                user: user.to_string(),
                fingerprint,
            })
        }
    }

    /// Whether password logins are possible at all
    pub fn accepts_passwords(&self) -> bool {
        self.password.is_some()
    }
}

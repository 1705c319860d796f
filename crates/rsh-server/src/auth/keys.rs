//! Authorized keys management

use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use russh_keys::key::PublicKey;
use rsh_core::error::AuthError;

/// Public keys allowed to log in, indexed by fingerprint
#[derive(Debug, Default)]
pub struct AuthorizedKeys {
    fingerprints: HashSet<String>,
    keys: Vec<AuthorizedKey>,
}

/// One entry of an authorized keys file
#[derive(Debug, Clone)]
pub struct AuthorizedKey {
    /// Key fingerprint
    pub fingerprint: String,
    /// Trailing comment, if any
    pub comment: Option<String>,
}

impl AuthorizedKeys {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Load keys from several OpenSSH `authorized_keys` files
    ///
    /// A leading `~` is expanded to the home directory. Missing files are
    /// skipped with a warning.
    pub fn load_from_files(paths: &[impl AsRef<Path>]) -> Result<Self, AuthError> {
        let mut store = Self::new();

        for path in paths {
            let expanded = expand_home(path.as_ref());
            if expanded.exists() {
                store.load_from_file(&expanded)?;
            } else {
                tracing::warn!("Authorized keys file not found: {:?}", expanded);
            }
        }

        Ok(store)
    }

    /// Load keys from one file, returning how many were added
    pub fn load_from_file(&mut self, path: &Path) -> Result<usize, AuthError> {
        tracing::info!("Loading authorized keys from {:?}", path);

        let read_error = |source| AuthError::AuthorizedKeys {
            path: path.to_path_buf(),
            source,
        };
        let file = std::fs::File::open(path).map_err(read_error)?;

        let mut count = 0;
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(read_error)?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_line(line) {
                Some((key, comment)) => {
                    tracing::debug!(
                        "Loaded key: {} ({})",
                        key.fingerprint(),
                        comment.as_deref().unwrap_or("no comment")
                    );
                    self.add_key(&key, comment);
                    count += 1;
                }
                None => {
                    tracing::warn!(
                        "Skipping unparseable key on line {} of {:?}",
                        line_num + 1,
                        path
                    );
                }
            }
        }

        tracing::info!("Loaded {} authorized keys from {:?}", count, path);
        Ok(count)
    }

    /// Check if a key fingerprint is authorized
    pub fn is_authorized(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    /// Add a public key to the authorized set
    pub fn add_key(&mut self, key: &PublicKey, comment: Option<String>) {
        let fingerprint = key.fingerprint();
        if self.fingerprints.insert(fingerprint.clone()) {
            self.keys.push(AuthorizedKey {
                fingerprint,
                comment,
            });
        }
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    /// Whether no key is authorized
    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// List all authorized keys
    pub fn list(&self) -> &[AuthorizedKey] {
        &self.keys
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Parse `[options] type base64 [comment]`, or a bare base64 blob
fn parse_line(line: &str) -> Option<(PublicKey, Option<String>)> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    fields.iter().enumerate().find_map(|(i, field)| {
        let key = russh_keys::parse_public_key_base64(field).ok()?;
        let comment = fields
            .get(i + 1..)
            .filter(|rest| !rest.is_empty())
            .map(|rest| rest.join(" "));
        Some((key, comment))
    })
}

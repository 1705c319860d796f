//! Configuration management for rsh

mod client;
mod server;

pub use client::ClientConfig;
pub use server::{ServerConfig, ShellConfig};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rsh")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Load an explicitly requested file, or the default one if it exists
///
/// An explicit path must exist. A missing default file yields `T::default()`.
pub fn load_or_default<T>(explicit: Option<&Path>, default_name: &str) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if let Some(path) = explicit {
        return load_config(path);
    }

    let default_path = default_config_dir().join(default_name);
    if default_path.exists() {
        load_config(&default_path)
    } else {
        tracing::debug!("No config at {:?}, using defaults", default_path);
        Ok(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_missing_file() {
        let result: Result<ServerConfig, _> = load_config(Path::new("/nonexistent/rsh.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_partial_server_config() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "bind_address = \"127.0.0.1:2022\"").unwrap();
        writeln!(file, "[shell]").unwrap();
        writeln!(file, "prompt = \"# \"").unwrap();

        let config: ServerConfig = load_config(file.path()).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:2022");
        assert_eq!(config.shell.prompt, "# ");
        // Untouched fields keep their defaults
        assert_eq!(config.shell.read_buffer_size, 1024);
        assert_eq!(config.password.as_deref(), Some("password123"));
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "bind_address = [").unwrap();

        let result: Result<ServerConfig, _> = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let result: Result<ClientConfig, _> =
            load_or_default(Some(Path::new("/nonexistent/client.toml")), "client.toml");
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}

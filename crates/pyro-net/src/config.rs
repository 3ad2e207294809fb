//! Server configuration

use pyro_core::{Language, PyroError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "PYRO_CONFIG";

/// What happens to a connection's stack after each reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackPolicy {
    /// Values stay on the stack; later replies include earlier results
    #[default]
    Accumulate,
    /// The stack is cleared once the reply is sent
    ConsumeOnReply,
}

/// Target of the `connect` shorthand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub connect_host: String,
    pub connect_port: u16,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            connect_host: "127.0.0.1".into(),
            connect_port: 9999,
        }
    }
}

/// Configuration for a Pyro server and its peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default: 0.0.0.0)
    pub host: String,
    /// Port to listen on (default: 9999, 0 picks a free port)
    pub port: u16,
    /// Listen backlog
    pub backlog: u32,
    /// Syntax of incoming scripts
    pub language: Language,
    pub stack_policy: StackPolicy,
    /// Messages kept per direction in each client's history
    pub history_limit: usize,
    /// Outbound connect timeout in seconds
    pub connect_timeout_secs: u64,
    pub bootstrap: BootstrapConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 9999,
            backlog: 50,
            language: Language::Pi,
            stack_policy: StackPolicy::Accumulate,
            history_limit: 64,
            connect_timeout_secs: 30,
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            PyroError::ConfigError(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Config named by `PYRO_CONFIG`, or the defaults when it is unset
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Loopback config on an ephemeral port
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"port": 4000, "language": "rho", "stack_policy": "consume_on_reply",
                "bootstrap": {"connect_port": 4001}}"#,
        )
        .unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.language, Language::Rho);
        assert_eq!(config.stack_policy, StackPolicy::ConsumeOnReply);
        assert_eq!(config.backlog, 50);
        assert_eq!(config.bootstrap.connect_host, "127.0.0.1");
        assert_eq!(config.bootstrap.connect_port, 4001);
    }

    #[test]
    fn test_load_reports_bad_files() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("pyro-config-{}.json", std::process::id()));
        std::fs::write(&path, "{\"port\": \"nope\"}").unwrap();
        assert!(matches!(
            ServerConfig::load(&path),
            Err(PyroError::SerializationError(_))
        ));
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            ServerConfig::load(dir.join("pyro-missing-config.json")),
            Err(PyroError::ConfigError(_))
        ));
    }
}

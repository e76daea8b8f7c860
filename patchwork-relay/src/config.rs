//! Configuration loading for patchwork.
//!
//! Configuration is loaded from a TOML file (default: `patchwork.toml`).
//! Every section and field is optional; missing values use the defaults below.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for patchwork.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Channel wait configuration.
    pub channels: ChannelsConfig,
    /// External identity provider configuration.
    pub provider: ProviderConfig,
    /// TCP tunnel configuration.
    pub tunnel: TunnelConfig,
    /// Rate limiting configuration.
    pub limits: LimitsConfig,
    /// Cleanup task configuration.
    pub cleanup: CleanupConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP server (default: 0.0.0.0:8080).
    pub bind_address: String,
    /// Maximum publish body size in bytes (default: 1MB).
    pub max_message_bytes: usize,
}

/// Channel configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Subscribe wait when the client does not ask for one (default: 30s).
    pub default_wait_secs: u64,
    /// Upper bound on any subscribe wait (default: 300s).
    /// Never lower than `default_wait_secs`.
    pub max_wait_secs: u64,
}

/// Identity provider (GitHub) configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API base URL (default: https://api.github.com).
    pub api_base: String,
    /// Optional API token. Overridden by `GITHUB_TOKEN`.
    pub token: Option<String>,
    /// Per-request timeout in seconds (default: 5).
    pub request_timeout_secs: u64,
    /// Seconds a resolved key set stays fresh (default: 300).
    pub cache_ttl_secs: u64,
    /// Maximum cached references (default: 10000).
    pub max_cache_entries: usize,
}

/// TCP tunnel configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Enable `/huproxy` (default: true).
    pub enabled: bool,
    /// TCP connect timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Publishes per client IP per minute (default: 600).
    pub publishes_per_minute: u32,
    /// Tunnel opens per client IP per minute (default: 30).
    pub tunnels_per_minute: u32,
    /// Requests per second across all clients (default: 1000).
    pub global_requests_per_second: u32,
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Enable cleanup task (default: true).
    pub enabled: bool,
    /// Sweep interval in seconds (default: 30).
    pub interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_message_bytes: 1024 * 1024, // 1MB
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            default_wait_secs: 30,
            max_wait_secs: 300,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".to_string(),
            token: None,
            request_timeout_secs: 5,
            cache_ttl_secs: 300, // 5 minutes
            max_cache_entries: 10_000,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_base", &self.api_base)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("cache_ttl_secs", &self.cache_ttl_secs)
            .field("max_cache_entries", &self.max_cache_entries)
            .finish()
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            publishes_per_minute: 600,
            tunnels_per_minute: 30,
            global_requests_per_second: 1000,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

impl ChannelsConfig {
    /// Wait applied when the subscriber does not specify one.
    pub fn default_wait(&self) -> Duration {
        Duration::from_secs(self.default_wait_secs)
    }

    /// Cap applied to any requested wait.
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs.max(self.default_wait_secs))
    }

    /// Turn an optional client-requested wait into the effective wait.
    pub fn effective_wait(&self, requested_secs: Option<u64>) -> Duration {
        requested_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.default_wait())
            .min(self.max_wait())
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load from `path` if it exists, defaults otherwise.
    ///
    /// `GITHUB_TOKEN`, when set and non-empty, replaces the configured token.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            tracing::info!("Config file {} not found, using defaults", path.display());
            Self::default()
        };

        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.is_empty() {
                config.provider.token = Some(token);
            }
        }
        if config.provider.token.as_deref() == Some("") {
            config.provider.token = None;
        }

        Ok(config)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.server.max_message_bytes, 1024 * 1024);
        assert_eq!(config.channels.default_wait_secs, 30);
        assert_eq!(config.provider.api_base, "https://api.github.com");
        assert!(config.tunnel.enabled);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"

[channels]
default_wait_secs = 10
max_wait_secs = 60

[provider]
api_base = "http://localhost:9999"
cache_ttl_secs = 30

[tunnel]
enabled = false

[limits]
tunnels_per_minute = 5

[cleanup]
interval_secs = 5
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.channels.default_wait_secs, 10);
        assert_eq!(config.channels.max_wait_secs, 60);
        assert_eq!(config.provider.api_base, "http://localhost:9999");
        assert_eq!(config.provider.cache_ttl_secs, 30);
        assert!(!config.tunnel.enabled);
        assert_eq!(config.limits.tunnels_per_minute, 5);
        assert_eq!(config.cleanup.interval_secs, 5);
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.channels.max_wait_secs, 300);
        assert_eq!(config.provider.request_timeout_secs, 5);
        assert_eq!(config.limits.publishes_per_minute, 600);
    }

    #[test]
    fn effective_wait_is_capped() {
        let channels = ChannelsConfig {
            default_wait_secs: 30,
            max_wait_secs: 120,
        };
        assert_eq!(channels.effective_wait(None), Duration::from_secs(30));
        assert_eq!(channels.effective_wait(Some(5)), Duration::from_secs(5));
        assert_eq!(channels.effective_wait(Some(9999)), Duration::from_secs(120));
    }

    #[test]
    fn max_wait_never_below_default() {
        let channels = ChannelsConfig {
            default_wait_secs: 90,
            max_wait_secs: 10,
        };
        assert_eq!(channels.max_wait(), Duration::from_secs(90));
        assert_eq!(channels.effective_wait(None), Duration::from_secs(90));
    }

    #[test]
    fn provider_token_is_redacted_in_debug() {
        let provider = ProviderConfig {
            token: Some("ghp_secret".to_string()),
            ..ProviderConfig::default()
        };
        let debug = format!("{provider:?}");
        assert!(!debug.contains("ghp_secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn load_reads_existing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_address = \"127.0.0.1:1234\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:1234");
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nbind_address = ").unwrap();

        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}

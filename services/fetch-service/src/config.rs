//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Client ids come from CLIENT_IDS, then CLIENT_ID, then client_ids_file,
//! then the inline client_ids list. Everything is validated once here.

use api_client::API_BASE_URL;
use client_pool::Strategy;
use common::Credential;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
}

/// Upstream API settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: API_BASE_URL.to_string(),
            timeout_secs: 30,
            requests_per_minute: 60,
        }
    }
}

/// Client id pool settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Comma-separated client ids
    pub client_ids: Option<String>,
    /// File with client ids, comma or newline separated
    pub client_ids_file: Option<PathBuf>,
    pub strategy: Strategy,
    pub cooldown_secs: u64,
    /// Final list after env and file resolution
    #[serde(skip)]
    pub resolved: Vec<Credential>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            client_ids: None,
            client_ids_file: None,
            strategy: Strategy::default(),
            cooldown_secs: 300,
            resolved: Vec::new(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Media download settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    pub directory: PathBuf,
    pub max_file_size_mb: u64,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub max_playlist_size: usize,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./downloads"),
            max_file_size_mb: 50,
            timeout_secs: 300,
            max_concurrent: 5,
            max_playlist_size: 50,
        }
    }
}

impl DownloadsConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn default_max_connections() -> usize {
    100
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;
        config.credentials.resolved = config.credentials.resolve()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(common::Error::InvalidValue {
                field: "api.base_url",
                reason: format!(
                    "must start with http:// or https://, got: {}",
                    self.api.base_url
                ),
            });
        }

        let positive: [(&'static str, u64); 7] = [
            ("api.timeout_secs", self.api.timeout_secs),
            ("api.requests_per_minute", self.api.requests_per_minute.into()),
            ("server.max_connections", self.server.max_connections as u64),
            ("downloads.max_file_size_mb", self.downloads.max_file_size_mb),
            ("downloads.timeout_secs", self.downloads.timeout_secs),
            ("downloads.max_concurrent", self.downloads.max_concurrent as u64),
            ("downloads.max_playlist_size", self.downloads.max_playlist_size as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(common::Error::InvalidValue {
                    field,
                    reason: "must be greater than 0".into(),
                });
            }
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("track-fetch-service.toml")
    }
}

impl CredentialsConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    fn resolve(&self) -> common::Result<Vec<Credential>> {
        let ids = if let Some(raw) = non_empty_env("CLIENT_IDS") {
            Credential::parse_list(&raw)
        } else if let Some(single) = non_empty_env("CLIENT_ID") {
            vec![Credential::new(single)]
        } else if let Some(ref file) = self.client_ids_file {
            let contents = std::fs::read_to_string(file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_ids_file {}: {e}",
                    file.display()
                ))
            })?;
            Credential::parse_list(&contents.replace('\n', ","))
        } else {
            self.client_ids
                .as_deref()
                .map(Credential::parse_list)
                .unwrap_or_default()
        };

        if ids.is_empty() {
            return Err(common::Error::Config(
                "no client ids configured; set CLIENT_IDS, CLIENT_ID, \
                 credentials.client_ids_file or credentials.client_ids"
                    .into(),
            ));
        }
        Ok(ids)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

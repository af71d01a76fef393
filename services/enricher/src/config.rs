//! Configuration for the enricher.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tagscout_cache::CacheConfig;

use crate::github::GitHubConfig;
use crate::jobs::CacheTtls;
use crate::registry::{Credentials, DockerHubConfig, RegistriesConfig};

/// Enricher configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the SQLite cache database.
    pub cache_path: PathBuf,

    /// Interval between background sweeps of expired cache entries, in seconds.
    pub cache_sweep_interval_secs: u64,

    /// Timeout of a single HTTP request, in seconds.
    pub http_timeout_secs: u64,

    /// Deadline of one pipeline run, in seconds.
    pub run_timeout_secs: u64,

    /// Optional GitHub token for release-note lookups.
    pub github_token: Option<String>,

    /// Optional Docker Hub account for the registry token exchange.
    pub dockerhub_credentials: Option<Credentials>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from `lookup`, which returns a variable's value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cache_path = lookup("TAGSCOUT_CACHE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/var/lib/tagscout/cache.db"));

        let cache_sweep_interval_secs = seconds(&lookup, "TAGSCOUT_CACHE_SWEEP_INTERVAL", 1800)?;
        let http_timeout_secs = seconds(&lookup, "TAGSCOUT_HTTP_TIMEOUT", 30)?;
        let run_timeout_secs = seconds(&lookup, "TAGSCOUT_RUN_TIMEOUT", 120)?;

        let github_token = lookup("TAGSCOUT_GITHUB_TOKEN").filter(|token| !token.is_empty());

        let dockerhub_credentials = match (
            lookup("TAGSCOUT_DOCKERHUB_USERNAME").filter(|v| !v.is_empty()),
            lookup("TAGSCOUT_DOCKERHUB_PASSWORD").filter(|v| !v.is_empty()),
        ) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (None, None) => None,
            _ => bail!("TAGSCOUT_DOCKERHUB_USERNAME and TAGSCOUT_DOCKERHUB_PASSWORD must be set together"),
        };

        let log_level = lookup("TAGSCOUT_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            cache_path,
            cache_sweep_interval_secs,
            http_timeout_secs,
            run_timeout_secs,
            github_token,
            dockerhub_credentials,
            log_level,
        })
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            sweep_interval: Duration::from_secs(self.cache_sweep_interval_secs),
            ..Default::default()
        }
    }

    pub fn registries_config(&self) -> RegistriesConfig {
        RegistriesConfig {
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            docker_hub: DockerHubConfig {
                credentials: self.dockerhub_credentials.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn github_config(&self) -> GitHubConfig {
        GitHubConfig {
            token: self.github_token.clone(),
            ..Default::default()
        }
    }

    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls::default()
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Positive number of seconds from `name`, or `default` when unset.
fn seconds(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u64) -> Result<u64> {
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    let value: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{name} must be a number of seconds, got '{raw}'"))?;
    if value == 0 {
        bail!("{name} must be greater than zero");
    }
    Ok(value)
}

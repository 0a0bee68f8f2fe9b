//! Configuration file support for etherscope.
//!
//! Loads optional TOML config from `~/.config/etherscope/config.toml`.
//! `ETHERSCAN_API_KEY` and `ETHERSCOPE_CACHE_ENABLED` override the file.

use std::time::Duration;

use serde::Deserialize;

use crate::analysis::{AnalysisConfig, DEFAULT_DEFI_THRESHOLD};
use crate::error::Result;
use crate::indexer::{DEFAULT_BASE_URL, MAX_PAGE_SIZE};
use crate::service::ServiceConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_RATE_LIMIT_RPM: u32 = 60;
/// Etherscan's free tier allows 5 calls per second
pub const DEFAULT_UPSTREAM_RATE_LIMIT_RPM: u32 = 300;
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 300;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_CACHE_CLEANUP_INTERVAL_SECONDS: u64 = 60;

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Etherscan API key
    pub etherscan_api_key: Option<String>,
    /// Etherscan-compatible API endpoint
    pub etherscan_base_url: Option<String>,
    /// Server bind address (e.g., "127.0.0.1:8080")
    pub bind: Option<String>,
    /// Rate limit in requests per minute per IP
    pub rate_limit_rpm: Option<u32>,
    /// Outbound provider calls per minute (0 = unthrottled)
    pub upstream_rate_limit_rpm: Option<u32>,
    /// Whether analysis results are cached (default: true)
    pub cache_enabled: Option<bool>,
    /// Cache TTL in seconds (default: 300)
    pub cache_ttl_seconds: Option<u64>,
    /// Maximum cache entries (default: 1000)
    pub cache_max_entries: Option<usize>,
    /// Seconds between background sweeps of expired entries (default: 60)
    pub cache_cleanup_interval_seconds: Option<u64>,
    /// Contract-call ratio at which a wallet counts as a DeFi user (default: 0.20)
    pub defi_threshold: Option<f64>,
    /// Most recent transactions fetched per wallet (default: 10000)
    pub max_transactions: Option<usize>,
    /// Allowed CORS origins (None/empty = allow any)
    pub allowed_origins: Option<Vec<String>>,
}

impl Config {
    /// Load config from the default path, falling back to defaults on any error.
    pub fn load() -> Self {
        let path = dirs::config_dir()
            .unwrap_or_default()
            .join("etherscope")
            .join("config.toml");
        let config = match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                Self::default()
            }
        };
        config.with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply environment overrides using the given lookup.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(key) = lookup("ETHERSCAN_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.etherscan_api_key = Some(key.trim().to_string());
        }
        if let Some(raw) = lookup("ETHERSCOPE_CACHE_ENABLED") {
            match parse_bool(&raw) {
                Some(enabled) => self.cache_enabled = Some(enabled),
                None => tracing::warn!(value = %raw, "ignoring invalid ETHERSCOPE_CACHE_ENABLED"),
            }
        }
        self
    }

    pub fn api_key(&self) -> &str {
        self.etherscan_api_key.as_deref().unwrap_or("")
    }

    pub fn base_url(&self) -> &str {
        self.etherscan_base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn upstream_rate_limit_rpm(&self) -> u32 {
        self.upstream_rate_limit_rpm
            .unwrap_or(DEFAULT_UPSTREAM_RATE_LIMIT_RPM)
    }

    pub fn max_transactions(&self) -> usize {
        self.max_transactions.unwrap_or(MAX_PAGE_SIZE)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(
            self.cache_cleanup_interval_seconds
                .unwrap_or(DEFAULT_CACHE_CLEANUP_INTERVAL_SECONDS)
                .max(1),
        )
    }

    /// Cache and analysis settings for the wallet service.
    ///
    /// Rejects a zero TTL, a zero capacity and an out-of-range threshold
    /// rather than silently clamping them.
    pub fn service_config(&self) -> Result<ServiceConfig> {
        let analysis = AnalysisConfig::new(self.defi_threshold.unwrap_or(DEFAULT_DEFI_THRESHOLD))?;
        Ok(ServiceConfig {
            cache_enabled: self.cache_enabled.unwrap_or(true),
            cache_ttl: Duration::from_secs(
                self.cache_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECONDS),
            ),
            cache_max_entries: self.cache_max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            analysis,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

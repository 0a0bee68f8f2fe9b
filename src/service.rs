//! Wallet analysis orchestration.
//!
//! `WalletService` composes a blockchain data provider, the analysis engine
//! and the result cache: validate address → cache lookup → fetch on miss →
//! analyze → store → return. The cache and the engine know nothing about
//! each other; this is the only place they meet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use crate::analysis::{analyze, AnalysisConfig};
use crate::cache::{CacheStats, WalletCache};
use crate::error::Result;
use crate::report::WalletReport;
use crate::wallet::{normalize_address, WalletSnapshot};

/// Source of already-fetched on-chain data for a wallet.
///
/// Rate limiting, network failures and upstream validation are the
/// provider's concern; they surface as `Upstream` / `RateLimited` errors.
#[async_trait]
pub trait WalletDataProvider: Send + Sync {
    /// Fetch balance, holdings and history for a validated, lowercased address.
    async fn fetch_snapshot(&self, address: &str) -> Result<WalletSnapshot>;
}

/// Settings for building a [`WalletService`].
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub analysis: AnalysisConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1000,
            analysis: AnalysisConfig::default(),
        }
    }
}

/// Cached wallet analysis. Clones share the provider and the cache.
#[derive(Clone)]
pub struct WalletService {
    provider: Arc<dyn WalletDataProvider>,
    cache: Option<WalletCache>,
    analysis: AnalysisConfig,
}

impl WalletService {
    pub fn new(provider: Arc<dyn WalletDataProvider>, config: &ServiceConfig) -> Result<Self> {
        let cache = if config.cache_enabled {
            Some(WalletCache::new(config.cache_max_entries, config.cache_ttl)?)
        } else {
            tracing::info!("result cache disabled");
            None
        };
        Self::with_cache(provider, cache, config.analysis)
    }

    /// Build around an existing cache (`None` disables caching).
    pub fn with_cache(
        provider: Arc<dyn WalletDataProvider>,
        cache: Option<WalletCache>,
        analysis: AnalysisConfig,
    ) -> Result<Self> {
        analysis.validate()?;
        Ok(Self {
            provider,
            cache,
            analysis,
        })
    }

    pub fn cache(&self) -> Option<&WalletCache> {
        self.cache.as_ref()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(WalletCache::stats)
    }

    pub fn analysis_config(&self) -> &AnalysisConfig {
        &self.analysis
    }

    /// Analyze a wallet by address, serving from cache when possible.
    pub async fn analyze_wallet(&self, address: &str) -> Result<Arc<WalletReport>> {
        let address = normalize_address(address)?;
        let key = WalletCache::key(&address);

        if let Some(report) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            tracing::info!(%address, "returning cached result");
            return Ok(report);
        }

        let snapshot = self.provider.fetch_snapshot(&address).await?;
        let report = Arc::new(self.analyze_snapshot(&snapshot)?);

        if let Some(cache) = &self.cache {
            cache.set(key, Arc::clone(&report))?;
        }
        Ok(report)
    }

    /// Analyze an already-fetched snapshot. Bypasses the cache.
    pub fn analyze_snapshot(&self, snapshot: &WalletSnapshot) -> Result<WalletReport> {
        let start = Instant::now();
        let behavior = analyze(snapshot, &self.analysis)?;
        let report = WalletReport::build(snapshot, behavior, Utc::now())?;

        let duration_ms = start.elapsed().as_millis() as u64;
        crate::metrics::record_analysis(
            report.behavior.activity_level.as_str(),
            report.behavior.score,
            duration_ms,
        );
        tracing::info!(
            address = %report.wallet_address,
            tx_count = report.behavior.total_transactions,
            activity_level = %report.behavior.activity_level,
            score = report.behavior.score,
            duration_ms,
            "analysis complete"
        );
        Ok(report)
    }

    /// Sweep expired cache entries on a fixed interval.
    ///
    /// Returns `None` when caching is disabled. Must be called from within a
    /// tokio runtime.
    pub fn spawn_cleanup_task(&self, every: Duration) -> Option<tokio::task::JoinHandle<()>> {
        let cache = self.cache.clone()?;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    tracing::debug!(removed, "background cache sweep");
                }
            }
        }))
    }
}

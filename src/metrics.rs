//! Prometheus metrics for etherscope.
//!
//! Provides counters and histograms for monitoring analyses, upstream
//! provider calls, rate limiting, and cache performance.

use metrics::{counter, histogram};

/// Record a completed wallet analysis.
pub fn record_analysis(activity_level: &str, score: u8, duration_ms: u64) {
    counter!("analyses_total", "activity_level" => activity_level.to_string()).increment(1);
    histogram!("analysis_duration_ms").record(duration_ms as f64);
    histogram!("wallet_score").record(f64::from(score));
}

/// Record a call to the blockchain data provider.
pub fn record_upstream_call(action: &str, success: bool, duration_ms: u64) {
    counter!("upstream_calls_total", "action" => action.to_string(), "success" => success.to_string())
        .increment(1);
    histogram!("upstream_call_duration_ms").record(duration_ms as f64);
}

/// Record a rate limit hit.
pub fn record_rate_limit_hit() {
    counter!("rate_limit_hits_total").increment(1);
}

/// Record a cache hit.
pub fn record_cache_hit() {
    counter!("cache_hits_total").increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!("cache_misses_total").increment(1);
}

/// Record an entry evicted under capacity pressure.
pub fn record_cache_eviction() {
    counter!("cache_evictions_total").increment(1);
}

/// Record entries removed because their TTL elapsed.
pub fn record_cache_expirations(count: u64) {
    counter!("cache_expirations_total").increment(count);
}

/// Install the Prometheus metrics exporter and return the recorder handle.
pub fn install_prometheus_recorder() -> eyre::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .install_recorder()
        .map_err(|e| eyre::eyre!("failed to install Prometheus recorder: {e}"))
}

//! HTTP server for the etherscope wallet analyzer.
//!
//! Provides REST API endpoints for scoring wallets by address (cached) or
//! from a caller-supplied snapshot (uncached), plus cache statistics.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use eyre::Result;
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::CacheStats;
use crate::error::AnalyzerError;
use crate::report::WalletReport;
use crate::service::WalletService;
use crate::wallet::WalletSnapshot;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
    /// Rate limit in requests per minute per IP (0 = no limit)
    pub rate_limit_rpm: u32,
    /// Allowed CORS origins (None/empty = allow any)
    pub allowed_origins: Option<Vec<String>>,
    /// Interval between background sweeps of expired cache entries
    pub cache_cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            rate_limit_rpm: 60,
            allowed_origins: None,
            cache_cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Request to scan a wallet by address
#[derive(Debug, Deserialize)]
pub struct ScanWalletRequest {
    /// Wallet address to scan
    pub wallet_address: String,
}

/// Response from an analysis endpoint
#[derive(Debug, Serialize)]
pub struct AnalysisResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<WalletReport>,
    pub processing_time_ms: u64,
}

impl AnalysisResponse {
    fn ok(report: WalletReport, start: Instant) -> Self {
        Self {
            success: true,
            error: None,
            report: Some(report),
            processing_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn failed(error: impl Into<String>, start: Instant) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            report: None,
            processing_time_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub cache_enabled: bool,
    pub cache_size: usize,
}

/// Cache statistics response
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CacheStats>,
}

/// Type alias for per-IP rate limiters
type IpRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Server state
pub struct ServerState {
    pub config: ServerConfig,
    pub service: WalletService,
    pub start_time: Instant,
    pub rate_limiters: Mutex<HashMap<std::net::IpAddr, Arc<IpRateLimiter>>>,
}

impl ServerState {
    pub fn new(config: ServerConfig, service: WalletService) -> Self {
        Self {
            config,
            service,
            start_time: Instant::now(),
            rate_limiters: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_rate_limiter(&self, ip: std::net::IpAddr) -> Option<Arc<IpRateLimiter>> {
        let rpm = NonZeroU32::new(self.config.rate_limit_rpm)?;

        let mut limiters = self.rate_limiters.lock().await;

        if let Some(limiter) = limiters.get(&ip) {
            return Some(Arc::clone(limiter));
        }

        let limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));
        limiters.insert(ip, Arc::clone(&limiter));

        if limiters.len() > 10000 {
            tracing::warn!("rate limiter map exceeded 10000 entries, clearing");
            limiters.clear();
            limiters.insert(ip, Arc::clone(&limiter));
        }

        Some(limiter)
    }

    /// Check the caller's quota, returning a ready-made 429 when exhausted.
    async fn check_rate_limit(
        &self,
        client_ip: std::net::IpAddr,
        start: Instant,
    ) -> Option<(StatusCode, axum::Json<AnalysisResponse>)> {
        let limiter = self.get_rate_limiter(client_ip).await?;
        if limiter.check().is_ok() {
            return None;
        }
        tracing::warn!(%client_ip, "rate limit exceeded");
        crate::metrics::record_rate_limit_hit();
        Some((
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(AnalysisResponse::failed(
                format!(
                    "Rate limit exceeded. Maximum {} requests per minute.",
                    self.config.rate_limit_rpm
                ),
                start,
            )),
        ))
    }
}

/// HTTP status for an analyzer error.
pub fn status_for(err: &AnalyzerError) -> StatusCode {
    match err {
        AnalyzerError::Validation(_) => StatusCode::BAD_REQUEST,
        AnalyzerError::InvalidConfiguration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        AnalyzerError::RateLimited(_) => StatusCode::SERVICE_UNAVAILABLE,
        AnalyzerError::Upstream(_) => StatusCode::BAD_GATEWAY,
    }
}

/// Build the application router over shared state.
pub fn router(state: Arc<ServerState>) -> axum::Router {
    use axum::routing::{get, post};

    let cors = match &state.config.allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let allowed: Vec<axum::http::HeaderValue> = origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([axum::http::header::CONTENT_TYPE])
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers(Any),
    };

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/analyze", post(analyze_handler))
        .route("/api/v1/scan", post(scan_handler))
        .route("/api/v1/cache/stats", get(cache_stats_handler))
        .with_state(state)
        .layer(cors)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig, service: WalletService) -> Result<()> {
    use axum::routing::get;

    let prometheus_handle = crate::metrics::install_prometheus_recorder()?;
    let bind_addr = config.bind_addr;
    let rate_limit_rpm = config.rate_limit_rpm;

    let cleanup = service.spawn_cleanup_task(config.cache_cleanup_interval);
    let state = Arc::new(ServerState::new(config, service));

    let app = router(state).route(
        "/metrics",
        get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("etherscope server listening on {}", bind_addr);
    tracing::info!("Endpoints: GET /health, GET /metrics, POST /api/v1/analyze, POST /api/v1/scan, GET /api/v1/cache/stats");
    if rate_limit_rpm > 0 {
        tracing::info!(rate_limit_rpm, "rate limiting enabled");
    }

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;
    if let Some(handle) = cleanup {
        handle.abort();
    }
    served?;
    Ok(())
}

/// Health check handler
async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    let cache = state.service.cache();
    axum::Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        cache_enabled: cache.is_some(),
        cache_size: cache.map_or(0, |c| c.len()),
    })
}

/// Score a caller-supplied snapshot. Never touches the cache.
async fn analyze_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    axum::Json(snapshot): axum::Json<WalletSnapshot>,
) -> (StatusCode, axum::Json<AnalysisResponse>) {
    let start = Instant::now();
    if let Some(rejected) = state.check_rate_limit(addr.ip(), start).await {
        return rejected;
    }

    match state.service.analyze_snapshot(&snapshot) {
        Ok(report) => (StatusCode::OK, axum::Json(AnalysisResponse::ok(report, start))),
        Err(e) => {
            tracing::warn!(error = %e, "snapshot analysis rejected");
            (status_for(&e), axum::Json(AnalysisResponse::failed(e.to_string(), start)))
        }
    }
}

/// Fetch and score a wallet by address, served from cache when fresh.
async fn scan_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
    axum::extract::ConnectInfo(addr): axum::extract::ConnectInfo<SocketAddr>,
    axum::Json(request): axum::Json<ScanWalletRequest>,
) -> (StatusCode, axum::Json<AnalysisResponse>) {
    let start = Instant::now();
    if let Some(rejected) = state.check_rate_limit(addr.ip(), start).await {
        return rejected;
    }

    match state.service.analyze_wallet(&request.wallet_address).await {
        Ok(report) => (
            StatusCode::OK,
            axum::Json(AnalysisResponse::ok(WalletReport::clone(&report), start)),
        ),
        Err(e) => {
            tracing::warn!(wallet = %request.wallet_address, error = %e, "wallet scan failed");
            (status_for(&e), axum::Json(AnalysisResponse::failed(e.to_string(), start)))
        }
    }
}

async fn cache_stats_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> axum::Json<CacheStatsResponse> {
    let stats = state.service.cache_stats();
    axum::Json(CacheStatsResponse {
        enabled: stats.is_some(),
        stats,
    })
}

//! etherscope: Ethereum wallet analyzer
//!
//! Fetches a wallet's balance, token holdings and transaction history,
//! classifies its behaviour and computes a deterministic 0-100 score.
//! Results are cached in a bounded TTL cache keyed by lowercased address.
//!
//! # Activity Levels
//!
//! - **DORMANT**: no transactions
//! - **LOW**: 1-19 transactions
//! - **MODERATE**: 20-99 transactions
//! - **ACTIVE**: 100-999 transactions
//! - **HIGHLY_ACTIVE**: 1000 or more
//!
//! # Score
//!
//! Weighted sum of frequency (40%), contract interaction (30%), counterparty
//! diversity (15%) and advanced-usage flags (15%), rounded and clamped to
//! 0-100.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod error;
pub mod indexer;
pub mod metrics;
pub mod report;
pub mod server;
pub mod service;
pub mod transaction;
pub mod wallet;

pub use analysis::{analyze, ActivityLevel, AnalysisConfig, WalletAnalysisResult};
pub use cache::{CacheStats, TtlCache, WalletCache};
pub use error::{AnalyzerError, Result};
pub use report::WalletReport;
pub use service::{WalletDataProvider, WalletService};
pub use wallet::WalletSnapshot;

//! Deterministic wallet behaviour analysis.
//!
//! Turns a [`WalletSnapshot`] into an activity level, three behavioural flags
//! and a 0–100 composite score. Every output is explainable from counts and
//! ratios of the supplied transactions; nothing here reads the clock or does
//! I/O, so the same snapshot always yields the same result.
//!
//! # Composite score
//!
//! | component            | weight | sub-score (0–100)                     |
//! |----------------------|--------|---------------------------------------|
//! | transaction frequency| 0.40   | by activity level: 0/25/50/75/100     |
//! | contract interaction | 0.30   | `min(contract_call_ratio * 200, 100)` |
//! | counterparty diversity| 0.15  | `min(unique_counterparties, 50) * 2`  |
//! | advanced activity    | 0.15   | `flags_set / 3 * 100`                 |

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{AnalyzerError, Result};
use crate::transaction::TransactionRecord;
use crate::wallet::WalletSnapshot;

/// Default contract-call ratio at which a wallet counts as a DeFi user.
pub const DEFAULT_DEFI_THRESHOLD: f64 = 0.20;

const FREQUENCY_WEIGHT: f64 = 0.40;
const CONTRACT_WEIGHT: f64 = 0.30;
const DIVERSITY_WEIGHT: f64 = 0.15;
const ADVANCED_WEIGHT: f64 = 0.15;

/// Contract-call ratio that earns the full contract sub-score.
const CONTRACT_RATIO_SATURATION: f64 = 0.5;
/// Unique counterparties that earn the full diversity sub-score.
const DIVERSITY_CAP: usize = 50;
const ADVANCED_FLAG_COUNT: f64 = 3.0;

const SECONDS_PER_DAY: u64 = 86_400;

/// Most fractional digits of a threshold compared exactly; finer values
/// fall back to a float comparison.
const MAX_THRESHOLD_SCALE: usize = 30;

// ---------------------------------------------------------------------------
// Activity level
// ---------------------------------------------------------------------------

/// Activity bucket derived from total transaction count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityLevel {
    /// No transactions
    Dormant,
    /// 1–19 transactions
    Low,
    /// 20–99 transactions
    Moderate,
    /// 100–999 transactions
    Active,
    /// 1000 or more transactions
    HighlyActive,
}

impl ActivityLevel {
    pub fn from_transaction_count(count: usize) -> Self {
        match count {
            0 => Self::Dormant,
            1..=19 => Self::Low,
            20..=99 => Self::Moderate,
            100..=999 => Self::Active,
            _ => Self::HighlyActive,
        }
    }

    /// Transaction-frequency sub-score for this level.
    pub fn frequency_score(&self) -> f64 {
        match self {
            Self::Dormant => 0.0,
            Self::Low => 25.0,
            Self::Moderate => 50.0,
            Self::Active => 75.0,
            Self::HighlyActive => 100.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dormant => "DORMANT",
            Self::Low => "LOW",
            Self::Moderate => "MODERATE",
            Self::Active => "ACTIVE",
            Self::HighlyActive => "HIGHLY_ACTIVE",
        }
    }
}

impl std::fmt::Display for ActivityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunables fixed for the lifetime of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Contract-call ratio in (0, 1] at or above which a wallet is a DeFi user.
    pub defi_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            defi_threshold: DEFAULT_DEFI_THRESHOLD,
        }
    }
}

impl AnalysisConfig {
    pub fn new(defi_threshold: f64) -> Result<Self> {
        let config = Self { defi_threshold };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.defi_threshold.is_finite()
            || self.defi_threshold <= 0.0
            || self.defi_threshold > 1.0
        {
            return Err(AnalyzerError::InvalidConfiguration(format!(
                "defi_threshold must be in (0, 1], got {}",
                self.defi_threshold
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// The four normalized sub-scores, each in [0, 100], before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub frequency: f64,
    pub contract_interaction: f64,
    pub diversity: f64,
    pub advanced: f64,
}

impl ScoreBreakdown {
    /// Weighted sum, unrounded.
    pub fn weighted_total(&self) -> f64 {
        FREQUENCY_WEIGHT * self.frequency
            + CONTRACT_WEIGHT * self.contract_interaction
            + DIVERSITY_WEIGHT * self.diversity
            + ADVANCED_WEIGHT * self.advanced
    }

    /// Rounded to the nearest integer and clamped to [0, 100].
    pub fn final_score(&self) -> u8 {
        self.weighted_total().round().clamp(0.0, 100.0) as u8
    }
}

/// Behavioural analysis of one wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAnalysisResult {
    pub activity_level: ActivityLevel,
    pub is_defi_user: bool,
    pub is_nft_trader: bool,
    pub is_contract_deployer: bool,
    /// Composite score, 0–100.
    pub score: u8,
    /// Whole days between the earliest and latest transaction.
    pub days_active: u64,
    pub total_transactions: usize,
    pub contract_calls: usize,
    pub contract_call_ratio: f64,
    pub unique_counterparties: usize,
    pub failed_transactions: usize,
    pub breakdown: ScoreBreakdown,
}

impl WalletAnalysisResult {
    /// Number of advanced-activity flags set.
    pub fn advanced_flag_count(&self) -> u8 {
        [
            self.is_defi_user,
            self.is_nft_trader,
            self.is_contract_deployer,
        ]
        .iter()
        .filter(|&&flag| flag)
        .count() as u8
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Analyze a wallet snapshot.
///
/// Fails only on a structurally invalid snapshot; an empty history is a
/// valid DORMANT wallet scoring 0.
pub fn analyze(snapshot: &WalletSnapshot, config: &AnalysisConfig) -> Result<WalletAnalysisResult> {
    snapshot.validate()?;
    let txs = &snapshot.transactions;

    let total_transactions = txs.len();
    let activity_level = ActivityLevel::from_transaction_count(total_transactions);

    let contract_calls = txs.iter().filter(|tx| tx.is_contract_call).count();
    let contract_call_ratio = ratio(contract_calls, total_transactions);
    let is_defi_user = total_transactions > 0
        && meets_threshold(contract_calls, total_transactions, config.defi_threshold);
    let is_nft_trader = txs.iter().any(TransactionRecord::is_nft_transfer);
    let is_contract_deployer = txs.iter().any(TransactionRecord::is_successful_deployment);

    let unique = unique_counterparties(txs, &snapshot.address);
    let failed_transactions = txs.iter().filter(|tx| !tx.success).count();

    let flags_set = [is_defi_user, is_nft_trader, is_contract_deployer]
        .iter()
        .filter(|&&flag| flag)
        .count();

    let breakdown = ScoreBreakdown {
        frequency: activity_level.frequency_score(),
        contract_interaction: contract_interaction_score(contract_call_ratio),
        diversity: diversity_score(unique),
        advanced: flags_set as f64 / ADVANCED_FLAG_COUNT * 100.0,
    };
    let score = breakdown.final_score();

    let result = WalletAnalysisResult {
        activity_level,
        is_defi_user,
        is_nft_trader,
        is_contract_deployer,
        score,
        days_active: days_active(txs),
        total_transactions,
        contract_calls,
        contract_call_ratio,
        unique_counterparties: unique,
        failed_transactions,
        breakdown,
    };

    tracing::debug!(
        address = %snapshot.address,
        activity_level = %result.activity_level,
        contract_call_ratio,
        unique_counterparties = unique,
        is_defi_user,
        is_nft_trader,
        is_contract_deployer,
        score,
        "wallet analyzed"
    );

    Ok(result)
}

/// Count of distinct counterparty addresses other than the wallet itself,
/// case-insensitive.
pub fn unique_counterparties(txs: &[TransactionRecord], wallet: &str) -> usize {
    let wallet = wallet.trim().to_lowercase();
    txs.iter()
        .filter_map(|tx| tx.counterparty.as_deref())
        .map(str::to_lowercase)
        .filter(|addr| *addr != wallet)
        .collect::<HashSet<_>>()
        .len()
}

/// `part / total >= threshold`, evaluated over integers.
///
/// The threshold is taken at its shortest decimal form (`0.7` is `7/10`), so
/// a ratio exactly on the threshold always qualifies.
fn meets_threshold(part: usize, total: usize, threshold: f64) -> bool {
    match threshold_fraction(threshold) {
        Some((num, den)) => {
            let lhs = (part as u128).checked_mul(den);
            let rhs = (total as u128).checked_mul(num);
            match (lhs, rhs) {
                (Some(lhs), Some(rhs)) => lhs >= rhs,
                _ => ratio(part, total) >= threshold,
            }
        }
        None => ratio(part, total) >= threshold,
    }
}

/// Exact `numerator / 10^scale` form of a non-negative threshold.
fn threshold_fraction(threshold: f64) -> Option<(u128, u128)> {
    let repr = threshold.to_string();
    let (int_part, frac_part) = repr.split_once('.').unwrap_or((repr.as_str(), ""));
    if frac_part.len() > MAX_THRESHOLD_SCALE {
        return None;
    }
    let den = 10u128.checked_pow(frac_part.len() as u32)?;
    let int: u128 = int_part.parse().ok()?;
    let frac: u128 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().ok()?
    };
    Some((int.checked_mul(den)?.checked_add(frac)?, den))
}

/// `floor((latest - earliest) / 1 day)`, 0 with fewer than two transactions.
pub fn days_active(txs: &[TransactionRecord]) -> u64 {
    if txs.len() < 2 {
        return 0;
    }
    let earliest = txs.iter().map(|tx| tx.timestamp).min().unwrap_or(0);
    let latest = txs.iter().map(|tx| tx.timestamp).max().unwrap_or(0);
    (latest - earliest) / SECONDS_PER_DAY
}

fn contract_interaction_score(contract_call_ratio: f64) -> f64 {
    (contract_call_ratio * (100.0 / CONTRACT_RATIO_SATURATION)).min(100.0)
}

fn diversity_score(unique_counterparties: usize) -> f64 {
    (unique_counterparties.min(DIVERSITY_CAP) * 2) as f64
}

fn ratio(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TokenStandard, TxDirection};

    const WALLET: &str = "0x1111111111111111111111111111111111111111";

    fn counterparty(i: usize) -> String {
        format!("0x{:040x}", i + 1)
    }

    fn tx(i: usize, contract_call: bool) -> TransactionRecord {
        TransactionRecord {
            hash: format!("0x{i:064x}"),
            direction: if contract_call {
                TxDirection::ContractInteraction
            } else {
                TxDirection::Send
            },
            counterparty: Some(counterparty(i)),
            success: true,
            timestamp: 1_700_000_000 + i as u64 * 60,
            is_contract_call: contract_call,
            token_standard: None,
        }
    }

    fn snapshot(transactions: Vec<TransactionRecord>) -> WalletSnapshot {
        WalletSnapshot {
            transactions,
            ..WalletSnapshot::empty(WALLET)
        }
    }

    #[test]
    fn test_activity_level_boundaries() {
        use ActivityLevel::*;
        let cases = [
            (0, Dormant),
            (1, Low),
            (4, Low),
            (5, Low),
            (19, Low),
            (20, Moderate),
            (99, Moderate),
            (100, Active),
            (999, Active),
            (1000, HighlyActive),
            (50_000, HighlyActive),
        ];
        for (count, expected) in cases {
            assert_eq!(
                ActivityLevel::from_transaction_count(count),
                expected,
                "count {count}"
            );
        }
    }

    #[test]
    fn test_empty_wallet_baseline() {
        let result = analyze(&snapshot(vec![]), &AnalysisConfig::default()).unwrap();
        assert_eq!(result.activity_level, ActivityLevel::Dormant);
        assert!(!result.is_defi_user);
        assert!(!result.is_nft_trader);
        assert!(!result.is_contract_deployer);
        assert_eq!(result.score, 0);
        assert_eq!(result.days_active, 0);
        assert_eq!(result.contract_call_ratio, 0.0);
    }

    #[test]
    fn test_defi_threshold_is_inclusive() {
        // 1 of 5 = 0.20
        let txs: Vec<_> = (0..5).map(|i| tx(i, i == 0)).collect();
        let result = analyze(&snapshot(txs), &AnalysisConfig::default()).unwrap();
        assert_eq!(result.contract_call_ratio, 0.2);
        assert!(result.is_defi_user);

        // 1 of 6 < 0.20
        let txs: Vec<_> = (0..6).map(|i| tx(i, i == 0)).collect();
        let result = analyze(&snapshot(txs), &AnalysisConfig::default()).unwrap();
        assert!(!result.is_defi_user);
    }

    #[test]
    fn test_custom_defi_threshold() {
        let txs: Vec<_> = (0..10).map(|i| tx(i, i < 3)).collect();
        let strict = AnalysisConfig::new(0.5).unwrap();
        assert!(!analyze(&snapshot(txs.clone()), &strict).unwrap().is_defi_user);
        let loose = AnalysisConfig::new(0.3).unwrap();
        assert!(analyze(&snapshot(txs), &loose).unwrap().is_defi_user);
    }

    #[test]
    fn test_threshold_compared_exactly() {
        // 0.7 * 10 is 7.000000000000001 in floating point
        assert!(meets_threshold(7, 10, 0.7));
        assert!(!meets_threshold(69, 100, 0.7));
        assert!(meets_threshold(30, 150, 0.2));
        assert!(!meets_threshold(29, 150, 0.2));
        assert!(meets_threshold(1, 3, 0.3333));
        assert!(!meets_threshold(1, 3, 1.0 / 3.0 + 1e-12));
        assert!(meets_threshold(10, 10, 1.0));
        assert_eq!(threshold_fraction(0.25), Some((25, 100)));
        assert_eq!(threshold_fraction(1.0), Some((1, 1)));
    }

    #[test]
    fn test_wallet_is_not_its_own_counterparty() {
        let mut self_send = tx(0, false);
        self_send.counterparty = Some(WALLET.to_uppercase().replacen("0X", "0x", 1));
        let txs = vec![self_send, tx(1, false), tx(2, true)];
        assert_eq!(unique_counterparties(&txs, WALLET), 2);

        let result = analyze(&snapshot(txs), &AnalysisConfig::default()).unwrap();
        assert_eq!(result.unique_counterparties, 2);
    }

    #[test]
    fn test_invalid_defi_threshold() {
        assert!(AnalysisConfig::new(0.0).is_err());
        assert!(AnalysisConfig::new(1.5).is_err());
        assert!(AnalysisConfig::new(f64::NAN).is_err());
        assert!(AnalysisConfig::new(1.0).is_ok());
    }

    #[test]
    fn test_nft_trader_detection() {
        let mut txs: Vec<_> = (0..3).map(|i| tx(i, false)).collect();
        txs[1].direction = TxDirection::TokenTransfer;
        txs[1].token_standard = Some(TokenStandard::Erc20);
        assert!(!analyze(&snapshot(txs.clone()), &AnalysisConfig::default())
            .unwrap()
            .is_nft_trader);

        txs[1].token_standard = Some(TokenStandard::Erc721);
        assert!(analyze(&snapshot(txs), &AnalysisConfig::default())
            .unwrap()
            .is_nft_trader);
    }

    #[test]
    fn test_contract_deployer_requires_success() {
        let mut txs: Vec<_> = (0..2).map(|i| tx(i, false)).collect();
        txs[0].direction = TxDirection::ContractDeployment;
        txs[0].counterparty = None;
        txs[0].success = false;
        let result = analyze(&snapshot(txs.clone()), &AnalysisConfig::default()).unwrap();
        assert!(!result.is_contract_deployer);
        assert_eq!(result.failed_transactions, 1);

        txs[0].success = true;
        assert!(analyze(&snapshot(txs), &AnalysisConfig::default())
            .unwrap()
            .is_contract_deployer);
    }

    #[test]
    fn test_days_active() {
        assert_eq!(days_active(&[]), 0);
        assert_eq!(days_active(&[tx(0, false)]), 0);

        let mut a = tx(0, false);
        let mut b = tx(1, false);
        a.timestamp = 1_000;
        b.timestamp = 1_000 + 3 * SECONDS_PER_DAY - 1;
        assert_eq!(days_active(&[a.clone(), b.clone()]), 2);
        b.timestamp = 1_000 + 3 * SECONDS_PER_DAY;
        assert_eq!(days_active(&[a, b]), 3);
    }

    #[test]
    fn test_unique_counterparties_ignores_case() {
        let mut a = tx(0, false);
        let mut b = tx(1, false);
        a.counterparty = Some("0xABCDEF0000000000000000000000000000000001".into());
        b.counterparty = Some("0xabcdef0000000000000000000000000000000001".into());
        let c = TransactionRecord {
            counterparty: None,
            ..tx(2, false)
        };
        assert_eq!(unique_counterparties(&[a, b, c], WALLET), 1);
    }

    #[test]
    fn test_sub_score_caps() {
        assert!((contract_interaction_score(0.3) - 60.0).abs() < 1e-9);
        assert_eq!(contract_interaction_score(0.5), 100.0);
        assert_eq!(contract_interaction_score(0.9), 100.0);
        assert_eq!(diversity_score(10), 20.0);
        assert_eq!(diversity_score(50), 100.0);
        assert_eq!(diversity_score(500), 100.0);
    }

    #[test]
    fn test_score_rounds_and_clamps() {
        let breakdown = ScoreBreakdown {
            frequency: 100.0,
            contract_interaction: 100.0,
            diversity: 100.0,
            advanced: 100.0,
        };
        assert_eq!(breakdown.final_score(), 100);

        let breakdown = ScoreBreakdown {
            frequency: 25.0,
            contract_interaction: 0.0,
            diversity: 2.0,
            advanced: 0.0,
        };
        // 10.0 + 0.3 = 10.3
        assert_eq!(breakdown.final_score(), 10);
    }

    #[test]
    fn test_invalid_snapshot_is_rejected() {
        let mut bad = snapshot(vec![]);
        bad.address = "0x123".into();
        assert!(matches!(
            analyze(&bad, &AnalysisConfig::default()),
            Err(AnalyzerError::Validation(_))
        ));
    }

    #[test]
    fn test_activity_level_serialization() {
        let json = serde_json::to_string(&ActivityLevel::HighlyActive).unwrap();
        assert_eq!(json, "\"HIGHLY_ACTIVE\"");
        assert_eq!(ActivityLevel::Moderate.to_string(), "MODERATE");
    }
}

//! Wallet report: the cached, user-facing result of a wallet analysis.
//!
//! A report bundles the balance and holdings view of a snapshot with the
//! behavioural analysis. It is what the orchestration layer stores in the
//! cache and what the CLI and HTTP server hand back to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::WalletAnalysisResult;
use crate::error::Result;
use crate::transaction::TransactionRecord;
use crate::wallet::{compare_decimal, WalletSnapshot};

/// Number of holdings listed in `TokenSummary::top_tokens`.
pub const TOP_TOKENS_LIMIT: usize = 10;

/// Number of transactions kept in `TransactionSummary::last_transactions`.
pub const RECENT_TRANSACTIONS_LIMIT: usize = 10;

/// A complete wallet report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletReport {
    /// Lowercased wallet address
    pub wallet_address: String,

    /// ETH balance in wei
    pub eth_balance: String,

    /// ETH balance in ETH
    pub eth_balance_display: String,

    /// Token holdings
    pub token_summary: TokenSummary,

    /// Transaction activity
    pub transaction_summary: TransactionSummary,

    /// Behavioural analysis
    pub behavior: WalletAnalysisResult,

    /// Time of the earliest transaction in the snapshot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_transaction_at: Option<DateTime<Utc>>,

    /// When the analysis ran
    pub analyzed_at: DateTime<Utc>,
}

/// A token holding with its display balance resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub contract_address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u32,
    /// Raw balance in base units
    pub balance: String,
    /// `balance / 10^decimals`
    pub balance_display: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSummary {
    /// Largest holdings by display balance
    pub top_tokens: Vec<TokenBalance>,
    /// Number of tokens with a non-zero balance
    pub total_tokens_held: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub total_transactions: usize,
    pub unique_interacted_addresses: usize,
    pub contract_interactions: usize,
    pub failed_transactions: usize,
    /// Most recent transactions, newest first
    pub last_transactions: Vec<TransactionRecord>,
}

impl WalletReport {
    /// Assemble a report from a snapshot and its analysis.
    pub fn build(
        snapshot: &WalletSnapshot,
        behavior: WalletAnalysisResult,
        analyzed_at: DateTime<Utc>,
    ) -> Result<Self> {
        let mut held = Vec::with_capacity(snapshot.tokens.len());
        for token in &snapshot.tokens {
            let balance_display = token.display_balance()?;
            if compare_decimal(&balance_display, "0").is_eq() {
                continue;
            }
            held.push(TokenBalance {
                contract_address: token.contract_address.to_lowercase(),
                symbol: token.symbol.clone(),
                name: token.name.clone(),
                decimals: token.decimals,
                balance: token.balance.clone(),
                balance_display,
            });
        }
        let total_tokens_held = held.len();
        held.sort_by(|a, b| compare_decimal(&b.balance_display, &a.balance_display));
        held.truncate(TOP_TOKENS_LIMIT);

        let last_transactions = snapshot
            .transactions
            .iter()
            .rev()
            .take(RECENT_TRANSACTIONS_LIMIT)
            .cloned()
            .collect();

        let first_transaction_at = snapshot
            .transactions
            .iter()
            .map(|tx| tx.timestamp)
            .min()
            .and_then(|ts| DateTime::from_timestamp(ts as i64, 0));

        Ok(Self {
            wallet_address: snapshot.address.to_lowercase(),
            eth_balance: snapshot.eth_balance.trim().to_string(),
            eth_balance_display: snapshot.eth_balance_display()?,
            token_summary: TokenSummary {
                top_tokens: held,
                total_tokens_held,
            },
            transaction_summary: TransactionSummary {
                total_transactions: behavior.total_transactions,
                unique_interacted_addresses: behavior.unique_counterparties,
                contract_interactions: behavior.contract_calls,
                failed_transactions: behavior.failed_transactions,
                last_transactions,
            },
            behavior,
            first_transaction_at,
            analyzed_at,
        })
    }
}

//! Etherscan-compatible wallet data provider.
//!
//! Fetches the ETH balance, normal transactions and ERC-20/721/1155 transfer
//! events for a wallet through the `module=account` API, and classifies them
//! into a [`WalletSnapshot`] for the analysis engine.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;

use crate::error::{AnalyzerError, Result};
use crate::service::WalletDataProvider;
use crate::transaction::{TokenStandard, TransactionRecord, TxDirection};
use crate::wallet::{is_valid_address, TokenHolding, WalletSnapshot};

/// Default Etherscan API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.etherscan.io/api";

/// Largest page Etherscan serves for list actions
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Decimals assumed when a transfer omits `tokenDecimal`
const DEFAULT_TOKEN_DECIMALS: u32 = 18;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    message: String,
    result: serde_json::Value,
}

/// A row of `action=txlist`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTransaction {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub time_stamp: String,
    #[serde(default)]
    pub is_error: String,
    #[serde(default)]
    pub input: String,
}

/// A row of `action=tokentx`, `tokennfttx` or `token1155tx`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTokenTransfer {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    pub time_stamp: String,
    pub contract_address: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub token_name: String,
    #[serde(default)]
    pub token_symbol: String,
    #[serde(default)]
    pub token_decimal: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Etherscan client for fetching wallet history.
pub struct EtherscanClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    max_transactions: usize,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl EtherscanClient {
    /// Create a new client against the given API endpoint.
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            client: reqwest::Client::new(),
            max_transactions: MAX_PAGE_SIZE,
            limiter: None,
        }
    }

    /// Cap the number of most recent transactions fetched per list action.
    pub fn with_max_transactions(mut self, max: usize) -> Self {
        self.max_transactions = max.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Throttle outbound requests to `rpm` per minute (0 = unthrottled).
    pub fn with_rate_limit(mut self, rpm: u32) -> Self {
        self.limiter = NonZeroU32::new(rpm)
            .map(|rpm| Arc::new(RateLimiter::direct(Quota::per_minute(rpm))));
        self
    }

    /// ETH balance in wei.
    pub async fn get_eth_balance(&self, address: &str) -> Result<String> {
        let result = self
            .account_call("balance", address, &[("tag", "latest".to_string())])
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AnalyzerError::Upstream("balance result is not a string".into()))
    }

    /// Most recent normal transactions.
    pub async fn get_transactions(&self, address: &str) -> Result<Vec<RawTransaction>> {
        let result = self
            .account_call("txlist", address, &self.page_params())
            .await?;
        parse_rows(result, "txlist")
    }

    /// Most recent token transfer events of one standard.
    pub async fn get_token_transfers(
        &self,
        address: &str,
        standard: TokenStandard,
    ) -> Result<Vec<RawTokenTransfer>> {
        let action = transfer_action(standard);
        let result = self
            .account_call(action, address, &self.page_params())
            .await?;
        parse_rows(result, action)
    }

    fn page_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("startblock", "0".to_string()),
            ("endblock", "99999999".to_string()),
            ("page", "1".to_string()),
            ("offset", self.max_transactions.to_string()),
            ("sort", "desc".to_string()),
        ]
    }

    /// Make a `module=account` call and unwrap the `result` field.
    async fn account_call(
        &self,
        action: &str,
        address: &str,
        extra: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let mut query: Vec<(&str, &str)> = vec![
            ("module", "account"),
            ("action", action),
            ("address", address),
            ("apikey", self.api_key.as_str()),
        ];
        query.extend(extra.iter().map(|(k, v)| (*k, v.as_str())));

        let start = Instant::now();
        let outcome = self.send(&query).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        crate::metrics::record_upstream_call(action, outcome.is_ok(), duration_ms);

        match &outcome {
            Ok(_) => tracing::debug!(action, %address, duration_ms, "provider call ok"),
            Err(e) => tracing::warn!(action, %address, error = %e, "provider call failed"),
        }
        outcome
    }

    async fn send(&self, query: &[(&str, &str)]) -> Result<serde_json::Value> {
        let resp = self.client.get(&self.base_url).query(query).send().await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AnalyzerError::RateLimited("HTTP 429 from provider".into()));
        }
        if !resp.status().is_success() {
            return Err(AnalyzerError::Upstream(format!(
                "provider returned HTTP {}",
                resp.status()
            )));
        }

        let body: ApiResponse = resp.json().await?;
        unwrap_response(body)
    }
}

#[async_trait]
impl WalletDataProvider for EtherscanClient {
    async fn fetch_snapshot(&self, address: &str) -> Result<WalletSnapshot> {
        let eth_balance = self.get_eth_balance(address).await?;
        let normal = self.get_transactions(address).await?;
        let erc20 = self
            .get_token_transfers(address, TokenStandard::Erc20)
            .await?;
        let erc721 = self
            .get_token_transfers(address, TokenStandard::Erc721)
            .await?;
        let erc1155 = self
            .get_token_transfers(address, TokenStandard::Erc1155)
            .await?;

        let tokens = token_holdings(&erc20, address);
        let transactions = merge_history(
            address,
            &normal,
            &[
                (TokenStandard::Erc20, erc20.as_slice()),
                (TokenStandard::Erc721, erc721.as_slice()),
                (TokenStandard::Erc1155, erc1155.as_slice()),
            ],
            self.max_transactions,
        );

        tracing::info!(
            %address,
            tx_count = transactions.len(),
            token_count = tokens.len(),
            "fetched wallet snapshot"
        );

        Ok(WalletSnapshot {
            address: address.to_string(),
            eth_balance,
            tokens,
            transactions,
        })
    }
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

fn transfer_action(standard: TokenStandard) -> &'static str {
    match standard {
        TokenStandard::Erc20 => "tokentx",
        TokenStandard::Erc721 => "tokennfttx",
        TokenStandard::Erc1155 => "token1155tx",
    }
}

/// Map Etherscan's `status`/`message`/`result` envelope to a result or error.
fn unwrap_response(body: ApiResponse) -> Result<serde_json::Value> {
    if body.status == "1" {
        return Ok(body.result);
    }

    let detail = body
        .result
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.message.clone());

    if body.message.starts_with("No transactions found")
        || body.message.starts_with("No token transfers found")
    {
        return Ok(serde_json::Value::Array(Vec::new()));
    }
    if detail.to_lowercase().contains("rate limit") {
        return Err(AnalyzerError::RateLimited(detail));
    }
    Err(AnalyzerError::Upstream(format!("{}: {}", body.message, detail)))
}

fn parse_rows<T: serde::de::DeserializeOwned>(result: serde_json::Value, action: &str) -> Result<Vec<T>> {
    serde_json::from_value(result)
        .map_err(|e| AnalyzerError::Upstream(format!("unexpected {action} response: {e}")))
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify a normal transaction from the wallet's point of view.
///
/// Empty `to` is a contract creation and `to == wallet` a receive from
/// `from`. Otherwise calldata other than `0x` is a contract call, and
/// anything left is a plain send or receive. `is_contract_call` follows the
/// calldata in every case.
pub fn classify_transaction(raw: &RawTransaction, wallet: &str) -> Option<TransactionRecord> {
    let timestamp = raw.time_stamp.parse::<u64>().ok()?;
    let wallet = wallet.to_lowercase();
    let from = raw.from.to_lowercase();
    let to = raw.to.to_lowercase();
    let is_contract_call = !raw.input.is_empty() && raw.input != "0x";

    let (direction, counterparty) = if to.is_empty() {
        (TxDirection::ContractDeployment, None)
    } else if to == wallet {
        (TxDirection::Receive, Some(from))
    } else if is_contract_call {
        (TxDirection::ContractInteraction, Some(to))
    } else if from == wallet {
        (TxDirection::Send, Some(to))
    } else {
        (TxDirection::Receive, Some(from))
    };

    Some(TransactionRecord {
        hash: raw.hash.clone(),
        direction,
        counterparty: counterparty.filter(|a| is_valid_address(a)),
        success: raw.is_error != "1",
        timestamp,
        is_contract_call,
        token_standard: None,
    })
}

/// Classify a token transfer event from the wallet's point of view.
pub fn classify_token_transfer(
    raw: &RawTokenTransfer,
    wallet: &str,
    standard: TokenStandard,
) -> Option<TransactionRecord> {
    let timestamp = raw.time_stamp.parse::<u64>().ok()?;
    let wallet = wallet.to_lowercase();
    let from = raw.from.to_lowercase();
    let counterparty = if from == wallet {
        raw.to.to_lowercase()
    } else {
        from
    };

    Some(TransactionRecord {
        hash: raw.hash.clone(),
        direction: TxDirection::TokenTransfer,
        counterparty: Some(counterparty).filter(|a| is_valid_address(a)),
        success: true,
        timestamp,
        is_contract_call: false,
        token_standard: Some(standard),
    })
}

/// Merge normal transactions and transfer events into one chronological list.
///
/// A transfer sharing its hash with a normal transaction upgrades that record
/// to a token transfer instead of adding a second one; a non-fungible
/// standard is never downgraded to ERC-20. Only the newest `limit` records
/// are kept.
pub fn merge_history(
    wallet: &str,
    normal: &[RawTransaction],
    transfers: &[(TokenStandard, &[RawTokenTransfer])],
    limit: usize,
) -> Vec<TransactionRecord> {
    let mut records: Vec<TransactionRecord> = normal
        .iter()
        .filter_map(|raw| classify_transaction(raw, wallet))
        .collect();
    let mut by_hash: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .map(|(i, tx)| (tx.hash.clone(), i))
        .collect();

    for (standard, rows) in transfers {
        for raw in rows.iter() {
            if let Some(&idx) = by_hash.get(&raw.hash) {
                let existing = &mut records[idx];
                let keep_existing = existing
                    .token_standard
                    .is_some_and(|s| s.is_non_fungible());
                if !keep_existing {
                    existing.direction = TxDirection::TokenTransfer;
                    existing.token_standard = Some(*standard);
                }
                continue;
            }
            if let Some(record) = classify_token_transfer(raw, wallet, *standard) {
                by_hash.insert(record.hash.clone(), records.len());
                records.push(record);
            }
        }
    }

    records.sort_by_key(|tx| tx.timestamp);
    if records.len() > limit {
        records.drain(..records.len() - limit);
    }
    records
}

/// Net ERC-20 balances reconstructed from transfer events, in first-seen
/// order. Amounts beyond `u128` saturate.
pub fn token_holdings(transfers: &[RawTokenTransfer], wallet: &str) -> Vec<TokenHolding> {
    let wallet = wallet.to_lowercase();
    let mut order: Vec<String> = Vec::new();
    let mut balances: HashMap<String, (u128, TokenHolding)> = HashMap::new();

    for raw in transfers {
        let Ok(amount) = raw.value.parse::<u128>() else {
            continue;
        };
        let contract = raw.contract_address.to_lowercase();
        if !is_valid_address(&contract) {
            continue;
        }

        let (net, _) = balances.entry(contract.clone()).or_insert_with(|| {
            order.push(contract.clone());
            (
                0,
                TokenHolding {
                    contract_address: contract.clone(),
                    symbol: raw.token_symbol.clone(),
                    name: raw.token_name.clone(),
                    balance: "0".to_string(),
                    decimals: raw
                        .token_decimal
                        .parse::<u8>()
                        .map(u32::from)
                        .unwrap_or(DEFAULT_TOKEN_DECIMALS),
                },
            )
        });

        if raw.to.to_lowercase() == wallet {
            *net = net.saturating_add(amount);
        }
        if raw.from.to_lowercase() == wallet {
            *net = net.saturating_sub(amount);
        }
    }

    order
        .into_iter()
        .filter_map(|contract| balances.remove(&contract))
        .filter(|(net, _)| *net > 0)
        .map(|(net, mut holding)| {
            holding.balance = net.to_string();
            holding
        })
        .collect()
}

//! Wallet snapshot: the raw, already-fetched input to the analysis engine.
//!
//! Amounts stay in the chain's smallest unit as decimal strings. Display
//! conversion shifts the decimal point on the digit string itself, so no
//! amount loses precision regardless of magnitude.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{AnalyzerError, Result};
use crate::transaction::TransactionRecord;

/// Decimals of native ETH (wei → ETH).
pub const ETH_DECIMALS: u32 = 18;

/// ERC-20 `decimals()` is a `uint8`.
pub const MAX_TOKEN_DECIMALS: u32 = 255;

/// A token balance held by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHolding {
    pub contract_address: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    /// Raw balance in base units.
    pub balance: String,
    pub decimals: u32,
}

impl TokenHolding {
    /// `balance / 10^decimals` as a decimal string.
    pub fn display_balance(&self) -> Result<String> {
        format_units(&self.balance, self.decimals)
    }
}

/// Everything the analysis engine needs to know about one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub address: String,
    /// ETH balance in wei.
    pub eth_balance: String,
    #[serde(default)]
    pub tokens: Vec<TokenHolding>,
    /// Chronological, oldest first.
    #[serde(default)]
    pub transactions: Vec<TransactionRecord>,
}

impl WalletSnapshot {
    /// A wallet with no balance, tokens or history.
    pub fn empty(address: &str) -> Self {
        Self {
            address: address.to_string(),
            eth_balance: "0".to_string(),
            tokens: Vec::new(),
            transactions: Vec::new(),
        }
    }

    /// ETH balance converted from wei.
    pub fn eth_balance_display(&self) -> Result<String> {
        format_units(&self.eth_balance, ETH_DECIMALS)
    }

    /// Structural checks. An empty history is valid.
    pub fn validate(&self) -> Result<()> {
        validate_address(&self.address)?;
        parse_digits(&self.eth_balance)
            .map_err(|e| AnalyzerError::Validation(format!("eth_balance: {e}")))?;

        for token in &self.tokens {
            validate_address(&token.contract_address)?;
            validate_decimals(token.decimals)?;
            parse_digits(&token.balance).map_err(|e| {
                AnalyzerError::Validation(format!("token {} balance: {e}", token.symbol))
            })?;
        }

        let mut previous: Option<u64> = None;
        for (i, tx) in self.transactions.iter().enumerate() {
            if let Some(cp) = &tx.counterparty {
                validate_address(cp)?;
            }
            if previous.is_some_and(|prev| tx.timestamp < prev) {
                return Err(AnalyzerError::Validation(format!(
                    "transaction {i} timestamp {} precedes its predecessor",
                    tx.timestamp
                )));
            }
            previous = Some(tx.timestamp);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Address helpers
// ---------------------------------------------------------------------------

/// `0x` followed by exactly 40 hex characters, any case.
pub fn is_valid_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

pub fn validate_address(address: &str) -> Result<()> {
    if is_valid_address(address) {
        Ok(())
    } else {
        Err(AnalyzerError::Validation(format!(
            "invalid Ethereum address: {address:?}"
        )))
    }
}

/// Validate and lowercase an address.
pub fn normalize_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    validate_address(trimmed)?;
    Ok(trimmed.to_lowercase())
}

// ---------------------------------------------------------------------------
// Unit conversion
// ---------------------------------------------------------------------------

/// Validate a base-unit amount and return it without leading zeros.
fn parse_digits(raw: &str) -> std::result::Result<&str, String> {
    let raw = raw.trim();
    if raw.starts_with('-') {
        return Err(format!("negative amount {raw:?}"));
    }
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("malformed amount {raw:?}"));
    }
    let stripped = raw.trim_start_matches('0');
    Ok(if stripped.is_empty() { "0" } else { stripped })
}

/// Convert a base-unit amount to a display amount: `raw / 10^decimals`.
///
/// Trailing fractional zeros are trimmed, keeping at least one digit after
/// the point (`"1500000000000000000", 18` → `"1.5"`, `"0", 18` → `"0.0"`).
pub fn format_units(raw: &str, decimals: u32) -> Result<String> {
    validate_decimals(decimals)?;
    let digits = parse_digits(raw).map_err(AnalyzerError::Validation)?;
    let decimals = decimals as usize;

    let (int_part, frac_part) = if digits.len() > decimals {
        let split = digits.len() - decimals;
        (digits[..split].to_string(), digits[split..].to_string())
    } else {
        let padded = "0".repeat(decimals - digits.len()) + digits;
        ("0".to_string(), padded)
    };

    let frac = frac_part.trim_end_matches('0');
    let frac = if frac.is_empty() { "0" } else { frac };
    Ok(format!("{int_part}.{frac}"))
}

fn validate_decimals(decimals: u32) -> Result<()> {
    if decimals > MAX_TOKEN_DECIMALS {
        return Err(AnalyzerError::Validation(format!(
            "token decimals {decimals} exceeds {MAX_TOKEN_DECIMALS}"
        )));
    }
    Ok(())
}

/// Numeric comparison of two non-negative decimal strings such as those
/// produced by [`format_units`].
pub fn compare_decimal(a: &str, b: &str) -> Ordering {
    let (a_int, a_frac) = a.split_once('.').unwrap_or((a, ""));
    let (b_int, b_frac) = b.split_once('.').unwrap_or((b, ""));
    let a_int = a_int.trim_start_matches('0');
    let b_int = b_int.trim_start_matches('0');

    a_int
        .len()
        .cmp(&b_int.len())
        .then_with(|| a_int.cmp(b_int))
        .then_with(|| {
            let a_frac = a_frac.trim_end_matches('0');
            let b_frac = b_frac.trim_end_matches('0');
            a_frac.cmp(b_frac)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TxDirection;

    const ADDR: &str = "0x1234567890abcdef1234567890ABCDEF12345678";

    #[test]
    fn test_address_validation() {
        assert!(is_valid_address(ADDR));
        assert!(!is_valid_address("0x1234"));
        assert!(!is_valid_address("1234567890abcdef1234567890abcdef1234567890"));
        assert!(!is_valid_address("0xg234567890abcdef1234567890abcdef12345678"));
        assert_eq!(
            normalize_address(&format!(" {ADDR} ")).unwrap(),
            ADDR.to_lowercase()
        );
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units("1000000000000000000", 18).unwrap(), "1.0");
        assert_eq!(format_units("1500000000000000000", 18).unwrap(), "1.5");
        assert_eq!(format_units("0", 18).unwrap(), "0.0");
        assert_eq!(format_units("1", 18).unwrap(), "0.000000000000000001");
        assert_eq!(format_units("1000000000", 6).unwrap(), "1000.0");
        assert_eq!(format_units("42", 0).unwrap(), "42.0");
        assert_eq!(format_units("000123", 2).unwrap(), "1.23");
    }

    #[test]
    fn test_format_units_keeps_precision_for_large_amounts() {
        // 10^9 ETH plus one wei
        let wei = format!("1{}1", "0".repeat(26));
        assert_eq!(
            format_units(&wei, 18).unwrap(),
            "1000000000.000000000000000001"
        );
    }

    #[test]
    fn test_format_units_rejects_bad_input() {
        assert!(matches!(
            format_units("-5", 18),
            Err(AnalyzerError::Validation(_))
        ));
        assert!(format_units("1.5", 18).is_err());
        assert!(format_units("", 18).is_err());
    }

    #[test]
    fn test_oversized_decimals_rejected() {
        assert!(matches!(
            format_units("1", 300_000_000),
            Err(AnalyzerError::Validation(_))
        ));
        assert_eq!(
            format_units("1", MAX_TOKEN_DECIMALS).unwrap(),
            format!("0.{}1", "0".repeat(254))
        );

        let mut snapshot = WalletSnapshot::empty(ADDR);
        snapshot.tokens.push(TokenHolding {
            contract_address: ADDR.to_string(),
            symbol: "HUGE".into(),
            name: String::new(),
            balance: "1".into(),
            decimals: 300_000_000,
        });
        assert!(matches!(
            snapshot.validate(),
            Err(AnalyzerError::Validation(_))
        ));
    }

    #[test]
    fn test_compare_decimal() {
        assert_eq!(compare_decimal("10.0", "9.99"), Ordering::Greater);
        assert_eq!(compare_decimal("1.5", "1.50"), Ordering::Equal);
        assert_eq!(compare_decimal("0.001", "0.01"), Ordering::Less);
    }

    #[test]
    fn test_validate_snapshot() {
        let mut snapshot = WalletSnapshot::empty(ADDR);
        assert!(snapshot.validate().is_ok());

        snapshot.eth_balance = "-1".into();
        assert!(snapshot.validate().is_err());
        snapshot.eth_balance = "1".into();

        snapshot.transactions = vec![
            TransactionRecord {
                hash: "0x1".into(),
                direction: TxDirection::Send,
                counterparty: Some(ADDR.to_string()),
                success: true,
                timestamp: 200,
                is_contract_call: false,
                token_standard: None,
            },
            TransactionRecord {
                hash: "0x2".into(),
                direction: TxDirection::Receive,
                counterparty: Some(ADDR.to_string()),
                success: true,
                timestamp: 100,
                is_contract_call: false,
                token_standard: None,
            },
        ];
        let err = snapshot.validate().unwrap_err();
        assert!(err.to_string().contains("precedes"));
    }

    #[test]
    fn test_validate_rejects_bad_counterparty() {
        let mut snapshot = WalletSnapshot::empty(ADDR);
        snapshot.transactions.push(TransactionRecord {
            hash: String::new(),
            direction: TxDirection::Send,
            counterparty: Some("0xnope".into()),
            success: true,
            timestamp: 1,
            is_contract_call: false,
            token_standard: None,
        });
        assert!(snapshot.validate().is_err());
    }
}

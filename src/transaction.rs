//! Transaction records supplied by the blockchain data provider.
//!
//! The provider classifies each transaction before it reaches the analysis
//! engine; the engine trusts `direction`, `is_contract_call` and
//! `token_standard` as given and never inspects calldata or bytecode.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// What a transaction did, from the analyzed wallet's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxDirection {
    Send,
    Receive,
    ContractInteraction,
    ContractDeployment,
    TokenTransfer,
}

impl TxDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
            Self::ContractInteraction => "contract_interaction",
            Self::ContractDeployment => "contract_deployment",
            Self::TokenTransfer => "token_transfer",
        }
    }
}

/// Token standard of a `TokenTransfer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStandard {
    Erc20,
    Erc721,
    Erc1155,
}

impl TokenStandard {
    /// ERC-721 and ERC-1155 transfers move non-fungible items.
    pub fn is_non_fungible(&self) -> bool {
        matches!(self, Self::Erc721 | Self::Erc1155)
    }
}

// ---------------------------------------------------------------------------
// Transaction data
// ---------------------------------------------------------------------------

/// A single wallet transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    #[serde(default)]
    pub hash: String,
    pub direction: TxDirection,
    /// The other side of the transaction. `None` for contract deployments.
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    /// Unix seconds.
    pub timestamp: u64,
    #[serde(default)]
    pub is_contract_call: bool,
    #[serde(default)]
    pub token_standard: Option<TokenStandard>,
}

fn default_success() -> bool {
    true
}

impl TransactionRecord {
    /// An NFT movement as flagged by the provider.
    pub fn is_nft_transfer(&self) -> bool {
        self.direction == TxDirection::TokenTransfer
            && self.token_standard.is_some_and(|s| s.is_non_fungible())
    }

    /// A contract creation that actually landed on chain.
    pub fn is_successful_deployment(&self) -> bool {
        self.direction == TxDirection::ContractDeployment && self.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(direction: TxDirection, standard: Option<TokenStandard>) -> TransactionRecord {
        TransactionRecord {
            hash: "0x01".into(),
            direction,
            counterparty: None,
            success: true,
            timestamp: 0,
            is_contract_call: false,
            token_standard: standard,
        }
    }

    #[test]
    fn test_nft_transfer_requires_token_transfer_direction() {
        assert!(record(TxDirection::TokenTransfer, Some(TokenStandard::Erc721)).is_nft_transfer());
        assert!(record(TxDirection::TokenTransfer, Some(TokenStandard::Erc1155)).is_nft_transfer());
        assert!(!record(TxDirection::TokenTransfer, Some(TokenStandard::Erc20)).is_nft_transfer());
        assert!(!record(TxDirection::TokenTransfer, None).is_nft_transfer());
        assert!(!record(TxDirection::Receive, Some(TokenStandard::Erc721)).is_nft_transfer());
    }

    #[test]
    fn test_failed_deployment_is_not_counted() {
        let mut tx = record(TxDirection::ContractDeployment, None);
        assert!(tx.is_successful_deployment());
        tx.success = false;
        assert!(!tx.is_successful_deployment());
    }

    #[test]
    fn test_deserialize_defaults() {
        let tx: TransactionRecord = serde_json::from_str(
            r#"{"direction":"contract_deployment","timestamp":1700000000}"#,
        )
        .unwrap();
        assert!(tx.success);
        assert!(!tx.is_contract_call);
        assert_eq!(tx.counterparty, None);
        assert_eq!(tx.direction.as_str(), "contract_deployment");
    }

    #[test]
    fn test_token_standard_wire_names() {
        let json = serde_json::to_string(&TokenStandard::Erc1155).unwrap();
        assert_eq!(json, "\"erc1155\"");
    }
}

use std::collections::BTreeMap;
use std::str::FromStr;

use alloy::primitives::{address, Address, B256, U256};
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timeframe::Timeframe;

/// Placeholder address used for a chain's native asset.
pub const NATIVE_TOKEN: Address = address!("0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE");

/// A raw token-unit amount carried in both integer and decimal form, so that neither
/// representation is lost if only one survives serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAmount {
    #[serde(with = "u256_decimal")]
    pub raw: U256,
    pub decimal: f64,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self {
            raw,
            decimal: raw_to_decimal(raw, decimals),
        }
    }
}

/// Convert a raw integer amount to a float using the token's decimals.
pub fn raw_to_decimal(raw: U256, decimals: u8) -> f64 {
    BigDecimal::from_str(&format!("{}E-{}", raw, decimals))
        .ok()
        .and_then(|v| v.to_f64())
        .unwrap_or(0.0)
}

/// Serialize `U256` as a base-10 string instead of alloy's default hex.
mod u256_decimal {
    use alloy::primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10).map_err(D::Error::custom)
    }
}

/// Static metadata for a token on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMeta {
    pub symbol: String,
    pub decimals: u8,
}

/// One token's balance on one chain at one sample timestamp.
///
/// Produced by exactly one balance tier per (chain, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainBalanceSnapshot {
    pub chain: String,
    pub token_address: Address,
    pub symbol: String,
    pub decimals: u8,
    pub balance: TokenAmount,
}

impl ChainBalanceSnapshot {
    pub fn new(chain: &str, token_address: Address, meta: &TokenMeta, raw: U256) -> Self {
        Self {
            chain: chain.to_string(),
            token_address,
            symbol: meta.symbol.clone(),
            decimals: meta.decimals,
            balance: TokenAmount::new(raw, meta.decimals),
        }
    }
}

/// Per-timestamp balances for one chain, keyed by unix seconds.
pub type BalanceSeries = BTreeMap<u64, Vec<ChainBalanceSnapshot>>;

/// A decoded ERC-20 Transfer touching the reconstructed wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub chain: String,
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

impl TransferEvent {
    /// Events are totally ordered by position in the chain.
    pub fn ordering_key(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

/// Identifies a priceable asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PriceKey {
    pub chain: String,
    pub token: Address,
}

impl PriceKey {
    pub fn new(chain: &str, token: Address) -> Self {
        Self {
            chain: chain.to_string(),
            token,
        }
    }
}

impl std::fmt::Display for PriceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{:#x}", self.chain, self.token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalDataPoint {
    pub timestamp: u64,
    pub total_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: u64,
    pub usd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPriceHistory {
    pub chain: String,
    pub token_address: Address,
    pub symbol: String,
    pub prices: Vec<PricePoint>,
}

/// Reconstructed portfolio history for one wallet and timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResult {
    pub wallet: String,
    pub timeframe: Timeframe,
    pub data_points: Vec<HistoricalDataPoint>,
    pub start_value: f64,
    pub end_value: f64,
    pub change: f64,
    pub change_percent: f64,
    pub chains_with_data: Vec<String>,
    /// Keyed by `chain:0xtoken`.
    pub price_history: BTreeMap<String, TokenPriceHistory>,
    pub fetched_at: DateTime<Utc>,
    pub cache_hit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_to_decimal() {
        assert_eq!(raw_to_decimal(U256::from(1_500_000u64), 6), 1.5);
        assert_eq!(raw_to_decimal(U256::ZERO, 18), 0.0);
        let one_eth = U256::from(10u64).pow(U256::from(18u64));
        assert_eq!(raw_to_decimal(one_eth, 18), 1.0);
    }

    #[test]
    fn test_token_amount_serializes_raw_as_decimal_string() {
        let amount = TokenAmount::new(U256::from(123_450_000u64), 6);
        let json = serde_json::to_value(&amount).unwrap();
        assert_eq!(json["raw"], "123450000");
        assert_eq!(json["decimal"], 123.45);

        let back: TokenAmount = serde_json::from_value(json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_price_key_display_is_lowercase() {
        let key = PriceKey::new("base", NATIVE_TOKEN);
        assert_eq!(
            key.to_string(),
            "base:0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"
        );
    }
}

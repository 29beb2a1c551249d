//! External collaborators consumed by the history pipeline, and their production adapters.

pub mod decoder;
pub mod price_api;
pub mod rpc;
pub mod snapshot_api;

use std::collections::HashMap;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use crate::error::HistoryError;
use crate::types::{PriceKey, TokenMeta, TransferEvent};

/// Number and timestamp of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockStamp {
    pub number: u64,
    pub timestamp: u64,
}

/// One token balance as reported by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBalance {
    pub token_address: Address,
    pub meta: TokenMeta,
    pub raw: U256,
}

/// One point of a provider's balance time series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesEntry {
    pub timestamp: u64,
    pub balances: Vec<TokenBalance>,
}

#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn latest_block(&self, chain: &str) -> Result<BlockStamp, HistoryError>;

    async fn block_timestamp(&self, chain: &str, number: u64) -> Result<u64, HistoryError>;
}

/// All non-zero ERC-20 transfers touching an address within an inclusive block range.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn transfer_events(
        &self,
        chain: &str,
        wallet: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, HistoryError>;
}

/// Point-in-time portfolio balances from a third-party index.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn current_balances(&self, chain: &str, wallet: Address) -> Result<Vec<TokenBalance>, HistoryError>;

    async fn balance_series(
        &self,
        chain: &str,
        wallet: Address,
        days_back: u32,
    ) -> Result<Vec<SeriesEntry>, HistoryError>;
}

/// Direct contract reads at a historical block.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Balances of `tokens` held by `wallet` at `block`. [`crate::types::NATIVE_TOKEN`] selects
    /// the native asset. Tokens whose individual call fails are omitted.
    async fn balances_at(
        &self,
        chain: &str,
        wallet: Address,
        block: u64,
        tokens: &[(Address, TokenMeta)],
    ) -> Result<Vec<TokenBalance>, HistoryError>;

    async fn token_metadata(&self, chain: &str, token: Address) -> Result<TokenMeta, HistoryError>;
}

/// USD prices for a batch of assets. Assets without a quote are simply absent.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn historical_prices(
        &self,
        keys: &[PriceKey],
        timestamp: u64,
    ) -> Result<HashMap<PriceKey, f64>, HistoryError>;

    async fn current_prices(&self, keys: &[PriceKey]) -> Result<HashMap<PriceKey, f64>, HistoryError>;
}

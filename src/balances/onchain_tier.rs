use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use futures::future::join_all;

use super::BalanceTier;
use crate::block_estimator::BlockEstimator;
use crate::config::ChainConfig;
use crate::error::HistoryError;
use crate::sources::ChainSource;
use crate::tokens::registry::build_allow_list;
use crate::types::{BalanceSeries, ChainBalanceSnapshot, TokenMeta};

/// Last resort: direct balance reads for a small per-chain allow-list at a resolved block.
pub struct OnchainTier {
    source: Arc<dyn ChainSource>,
    estimator: Arc<BlockEstimator>,
    allow_lists: HashMap<String, Vec<(Address, TokenMeta)>>,
}

impl OnchainTier {
    pub fn new(source: Arc<dyn ChainSource>, estimator: Arc<BlockEstimator>, chains: &[ChainConfig]) -> Self {
        Self {
            source,
            estimator,
            allow_lists: chains
                .iter()
                .map(|c| (c.name.clone(), build_allow_list(c)))
                .collect(),
        }
    }

    async fn balances_at(
        &self,
        wallet: Address,
        chain: &str,
        tokens: &[(Address, TokenMeta)],
        timestamp: u64,
    ) -> Result<Vec<ChainBalanceSnapshot>, HistoryError> {
        let block = self.estimator.resolve(chain, timestamp).await?;
        let balances = self.source.balances_at(chain, wallet, block, tokens).await?;
        Ok(balances
            .into_iter()
            .filter(|b| !b.raw.is_zero())
            .map(|b| ChainBalanceSnapshot::new(chain, b.token_address, &b.meta, b.raw))
            .collect())
    }
}

#[async_trait]
impl BalanceTier for OnchainTier {
    fn name(&self) -> &'static str {
        "onchain"
    }

    fn supports(&self, chain: &str) -> bool {
        self.allow_lists.contains_key(chain)
    }

    async fn fetch(&self, wallet: Address, chain: &str, timestamps: &[u64]) -> Result<BalanceSeries, HistoryError> {
        let tokens = self
            .allow_lists
            .get(chain)
            .ok_or_else(|| HistoryError::Configuration(format!("unsupported chain '{}'", chain)))?;

        let reads: Vec<_> = timestamps
            .iter()
            .map(|ts| self.balances_at(wallet, chain, tokens, *ts))
            .collect();
        let results = join_all(reads).await;

        let mut series = BalanceSeries::new();
        let mut last_error = None;
        for (ts, result) in timestamps.iter().zip(results) {
            match result {
                Ok(snapshots) => {
                    series.insert(*ts, snapshots);
                }
                Err(e) => {
                    tracing::debug!(chain, timestamp = ts, error = %e, "On-chain balance read failed");
                    series.insert(*ts, Vec::new());
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            if series.values().all(|v| v.is_empty()) {
                return Err(e);
            }
            tracing::warn!(chain, error = %e, "Partial on-chain balance results");
        }
        Ok(series)
    }
}

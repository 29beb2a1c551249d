//! Balance Source Chain: ordered balance tiers behind one interface, first success wins.

pub mod event_tier;
pub mod onchain_tier;
pub mod replay;
pub mod snapshot_tier;

use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::error::HistoryError;
use crate::types::BalanceSeries;

pub use event_tier::EventReplayTier;
pub use onchain_tier::OnchainTier;
pub use snapshot_tier::SnapshotTier;

/// One strategy for producing historical balances.
///
/// Implementations return an entry for every requested timestamp (possibly empty) and the
/// same snapshot shape, so callers never need to know which tier answered.
#[async_trait]
pub trait BalanceTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this tier is configured for `chain` at all.
    fn supports(&self, chain: &str) -> bool;

    async fn fetch(&self, wallet: Address, chain: &str, timestamps: &[u64]) -> Result<BalanceSeries, HistoryError>;
}

/// Ordered fallback over balance tiers.
#[derive(Clone)]
pub struct BalanceSourceChain {
    tiers: Vec<Arc<dyn BalanceTier>>,
}

impl BalanceSourceChain {
    pub fn new(tiers: Vec<Arc<dyn BalanceTier>>) -> Self {
        Self { tiers }
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Balances for `wallet` on `chain` at each timestamp.
    ///
    /// Tiers are tried in order; a failing tier falls through to the next. When every tier
    /// fails the chain degrades to an empty series. Only configuration errors propagate.
    pub async fn get_balances(
        &self,
        wallet: Address,
        chain: &str,
        timestamps: &[u64],
    ) -> Result<BalanceSeries, HistoryError> {
        for tier in self.tiers.iter().filter(|t| t.supports(chain)) {
            match tier.fetch(wallet, chain, timestamps).await {
                Ok(series) => {
                    tracing::debug!(
                        chain,
                        tier = tier.name(),
                        points = series.len(),
                        "Balance tier succeeded"
                    );
                    return Ok(series);
                }
                Err(e) if e.is_hard_failure() => return Err(e),
                Err(e) => {
                    tracing::warn!(chain, tier = tier.name(), error = %e, "Balance tier failed, falling back");
                }
            }
        }

        tracing::warn!(chain, wallet = %wallet, "All balance tiers failed, chain degrades to empty");
        Ok(empty_series(timestamps))
    }
}

pub(crate) fn empty_series(timestamps: &[u64]) -> BalanceSeries {
    timestamps.iter().map(|ts| (*ts, Vec::new())).collect()
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use moka::future::Cache;

use super::replay::{ledger_from_anchor, positive_balances, replay_backward};
use super::BalanceTier;
use crate::block_estimator::BlockEstimator;
use crate::config::ChainConfig;
use crate::error::HistoryError;
use crate::sources::{ChainSource, EventSource, SnapshotSource};
use crate::types::{BalanceSeries, ChainBalanceSnapshot, TokenMeta};

/// Reconstructs past balances by undoing transfers from a current anchor.
///
/// Needs the snapshot source for the anchor and the event source for every transfer since
/// the oldest requested block. Any failure falls through to the next tier.
pub struct EventReplayTier {
    events: Arc<dyn EventSource>,
    anchors: Arc<dyn SnapshotSource>,
    chain_source: Arc<dyn ChainSource>,
    estimator: Arc<BlockEstimator>,
    /// Chains with replay enabled, and their block safety margin.
    safety_blocks: HashMap<String, u64>,
    metadata: Cache<(String, Address), TokenMeta>,
}

impl EventReplayTier {
    pub fn new(
        events: Arc<dyn EventSource>,
        anchors: Arc<dyn SnapshotSource>,
        chain_source: Arc<dyn ChainSource>,
        estimator: Arc<BlockEstimator>,
        chains: &[ChainConfig],
        metadata_ttl: Duration,
    ) -> Self {
        Self {
            events,
            anchors,
            chain_source,
            estimator,
            safety_blocks: chains
                .iter()
                .filter(|c| c.event_replay)
                .map(|c| (c.name.clone(), c.replay_safety_blocks))
                .collect(),
            metadata: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(metadata_ttl)
                .build(),
        }
    }

    /// Metadata for a token first seen in the event stream.
    async fn token_meta(&self, chain: &str, token: Address) -> TokenMeta {
        let lookup = self.chain_source.token_metadata(chain, token);
        match self.metadata.try_get_with((chain.to_string(), token), lookup).await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(chain, token = %token, error = %e, "Token metadata unavailable, assuming 18 decimals");
                TokenMeta {
                    symbol: "UNKNOWN".to_string(),
                    decimals: 18,
                }
            }
        }
    }
}

#[async_trait]
impl BalanceTier for EventReplayTier {
    fn name(&self) -> &'static str {
        "events"
    }

    fn supports(&self, chain: &str) -> bool {
        self.safety_blocks.contains_key(chain)
    }

    async fn fetch(&self, wallet: Address, chain: &str, timestamps: &[u64]) -> Result<BalanceSeries, HistoryError> {
        let safety = self
            .safety_blocks
            .get(chain)
            .copied()
            .ok_or_else(|| HistoryError::Configuration(format!("event replay not enabled for '{}'", chain)))?;
        if timestamps.is_empty() {
            return Ok(BalanceSeries::new());
        }

        let anchor = self.anchors.current_balances(chain, wallet).await?;
        let head = self.estimator.head(chain).await?;

        // Samples at or past the head see the anchor as-is.
        let mut targets = Vec::with_capacity(timestamps.len());
        for &ts in timestamps {
            let block = if ts >= head.timestamp {
                head.number + 1
            } else {
                self.estimator.estimate(chain, ts).await?
            };
            targets.push((ts, block));
        }
        targets.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));

        let lowest = targets.last().map(|(_, block)| *block).unwrap_or(head.number);
        let from_block = lowest.saturating_sub(safety);

        let mut events = self
            .events
            .transfer_events(chain, wallet, from_block, head.number)
            .await?;
        events.sort_by(|a, b| b.ordering_key().cmp(&a.ordering_key()));

        tracing::debug!(
            chain,
            from_block,
            to_block = head.number,
            events = events.len(),
            anchor_tokens = anchor.len(),
            "Replaying transfers backwards"
        );

        let mut known: HashMap<Address, TokenMeta> = anchor
            .iter()
            .map(|b| (b.token_address, b.meta.clone()))
            .collect();
        let ledger = ledger_from_anchor(anchor.iter().map(|b| (b.token_address, b.raw)));
        let snapshots = replay_backward(wallet, &ledger, &events, &targets);

        let mut series = BalanceSeries::new();
        for (ts, ledger) in snapshots {
            let mut balances = Vec::new();
            for (token, raw) in positive_balances(&ledger) {
                if !known.contains_key(&token) {
                    let meta = self.token_meta(chain, token).await;
                    known.insert(token, meta);
                }
                if let Some(meta) = known.get(&token) {
                    balances.push(ChainBalanceSnapshot::new(chain, token, meta, raw));
                }
            }
            series.insert(ts, balances);
        }

        Ok(series)
    }
}

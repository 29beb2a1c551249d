use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::config::ChainConfig;
use crate::error::HistoryError;
use crate::sources::{BlockSource, BlockStamp};

const MAX_REFINEMENTS: usize = 5;
const REFINE_TOLERANCE_SECS: i64 = 3600;
const HEAD_TTL: Duration = Duration::from_secs(15);

/// Closed-form estimate of the block produced at `target`, clamped to `[0, head.number]`.
pub fn estimate_from(head: BlockStamp, avg_block_time_secs: f64, target: u64) -> u64 {
    if target >= head.timestamp || avg_block_time_secs <= 0.0 {
        return head.number;
    }
    let blocks_back = ((head.timestamp - target) as f64 / avg_block_time_secs).round() as u64;
    head.number.saturating_sub(blocks_back)
}

/// Maps timestamps to approximate block numbers per chain.
///
/// Chain heads are cached briefly; refined estimates are cached per (chain, hour).
pub struct BlockEstimator {
    source: Arc<dyn BlockSource>,
    avg_block_times: HashMap<String, f64>,
    heads: Cache<String, BlockStamp>,
    refined: Cache<(String, u64), u64>,
}

impl BlockEstimator {
    pub fn new(source: Arc<dyn BlockSource>, chains: &[ChainConfig], ttl: Duration) -> Self {
        Self {
            source,
            avg_block_times: chains
                .iter()
                .map(|c| (c.name.clone(), c.avg_block_time_secs))
                .collect(),
            heads: Cache::builder().time_to_live(HEAD_TTL).build(),
            refined: Cache::builder().max_capacity(100_000).time_to_live(ttl).build(),
        }
    }

    fn avg_block_time(&self, chain: &str) -> Result<f64, HistoryError> {
        self.avg_block_times
            .get(chain)
            .copied()
            .ok_or_else(|| HistoryError::Configuration(format!("unsupported chain '{}'", chain)))
    }

    /// Latest block of `chain`. Concurrent callers share one lookup.
    pub async fn head(&self, chain: &str) -> Result<BlockStamp, HistoryError> {
        self.heads
            .try_get_with(chain.to_string(), self.source.latest_block(chain))
            .await
            .map_err(|e| (*e).clone())
    }

    /// Closed-form estimate against the current head. No per-target lookups.
    pub async fn estimate(&self, chain: &str, target: u64) -> Result<u64, HistoryError> {
        let avg = self.avg_block_time(chain)?;
        let head = self.head(chain).await?;
        Ok(estimate_from(head, avg, target))
    }

    /// Estimate refined against real block timestamps until within an hour of `target`.
    ///
    /// Only the head lookup can fail. A failed refinement step stops refining and returns the
    /// estimate reached so far, which is then not cached.
    pub async fn resolve(&self, chain: &str, target: u64) -> Result<u64, HistoryError> {
        let key = (chain.to_string(), target / 3600);
        if let Some(block) = self.refined.get(&key).await {
            return Ok(block);
        }

        let avg = self.avg_block_time(chain)?;
        let head = self.head(chain).await?;
        let mut block = estimate_from(head, avg, target);
        let mut aborted = false;

        for _ in 0..MAX_REFINEMENTS {
            let timestamp = match self.source.block_timestamp(chain, block).await {
                Ok(ts) => ts,
                Err(e) => {
                    tracing::debug!(chain, block, error = %e, "Block refinement aborted");
                    aborted = true;
                    break;
                }
            };

            let drift = target as i64 - timestamp as i64;
            if drift.abs() <= REFINE_TOLERANCE_SECS {
                break;
            }

            let step = (drift as f64 / avg).round() as i64;
            if step == 0 {
                break;
            }
            block = (block as i64 + step).clamp(0, head.number as i64) as u64;
        }

        if !aborted {
            self.refined.insert(key, block).await;
        }
        Ok(block)
    }
}

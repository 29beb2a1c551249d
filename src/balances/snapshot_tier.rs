use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use moka::future::Cache;

use super::{empty_series, BalanceTier};
use crate::config::ChainConfig;
use crate::error::HistoryError;
use crate::sources::{SeriesEntry, SnapshotSource};
use crate::timeframe::Clock;
use crate::types::{BalanceSeries, ChainBalanceSnapshot};

type WindowKey = (Address, String, u32);

/// Balances from a third-party portfolio index, nearest entry per requested timestamp.
pub struct SnapshotTier {
    source: Arc<dyn SnapshotSource>,
    chains: HashSet<String>,
    /// One fetched window per (wallet, chain, days back). Concurrent misses share one fetch.
    windows: Cache<WindowKey, Arc<Vec<SeriesEntry>>>,
    clock: Clock,
}

impl SnapshotTier {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        chains: &[ChainConfig],
        ttl: Duration,
        max_entries: u64,
        clock: Clock,
    ) -> Self {
        Self {
            source,
            chains: chains.iter().map(|c| c.name.clone()).collect(),
            windows: Cache::builder().max_capacity(max_entries).time_to_live(ttl).build(),
            clock,
        }
    }
}

/// Whole days needed to reach back to `oldest`, plus one so the window covers it.
pub(crate) fn days_back(now: u64, oldest: u64) -> u32 {
    let span = now.saturating_sub(oldest);
    (span.div_ceil(86_400) + 1).min(u32::MAX as u64) as u32
}

/// The entry closest in time to `timestamp`. Earlier entries win ties.
fn closest(series: &[SeriesEntry], timestamp: u64) -> Option<&SeriesEntry> {
    series.iter().min_by_key(|e| e.timestamp.abs_diff(timestamp))
}

#[async_trait]
impl BalanceTier for SnapshotTier {
    fn name(&self) -> &'static str {
        "snapshots"
    }

    fn supports(&self, chain: &str) -> bool {
        self.chains.contains(chain)
    }

    async fn fetch(&self, wallet: Address, chain: &str, timestamps: &[u64]) -> Result<BalanceSeries, HistoryError> {
        let Some(oldest) = timestamps.iter().min().copied() else {
            return Ok(BalanceSeries::new());
        };
        let days = days_back((self.clock)(), oldest);

        let source = &self.source;
        let series = self
            .windows
            .try_get_with((wallet, chain.to_string(), days), async move {
                source.balance_series(chain, wallet, days).await.map(Arc::new)
            })
            .await
            .map_err(|e| (*e).clone())?;

        if series.is_empty() {
            tracing::debug!(chain, days, "Snapshot source returned no history");
            return Ok(empty_series(timestamps));
        }

        Ok(timestamps
            .iter()
            .map(|ts| {
                let snapshots = closest(&series, *ts)
                    .map(|entry| {
                        entry
                            .balances
                            .iter()
                            .filter(|b| !b.raw.is_zero())
                            .map(|b| ChainBalanceSnapshot::new(chain, b.token_address, &b.meta, b.raw))
                            .collect()
                    })
                    .unwrap_or_default();
                (*ts, snapshots)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balances::tests::WALLET;
    use crate::sources::fakes::FakeSources;
    use crate::sources::{BlockStamp, TokenBalance};
    use crate::timeframe::fixed_clock;
    use crate::types::{TokenMeta, NATIVE_TOKEN};
    use alloy::primitives::U256;
    use std::sync::atomic::Ordering;

    const NOW: u64 = 1_760_000_000;

    fn eth(units: u64) -> TokenBalance {
        TokenBalance {
            token_address: NATIVE_TOKEN,
            meta: TokenMeta {
                symbol: "ETH".to_string(),
                decimals: 18,
            },
            raw: U256::from(units) * U256::from(10u64).pow(U256::from(18u64)),
        }
    }

    fn fake_with_series() -> Arc<FakeSources> {
        let mut fake = FakeSources::new(BlockStamp {
            number: 1_000_000,
            timestamp: NOW,
        });
        fake.series.insert(
            "ethereum".to_string(),
            vec![
                SeriesEntry {
                    timestamp: NOW - 2 * 86_400,
                    balances: vec![eth(1)],
                },
                SeriesEntry {
                    timestamp: NOW - 86_400,
                    balances: vec![eth(2)],
                },
                SeriesEntry {
                    timestamp: NOW,
                    balances: vec![eth(3), eth(0)],
                },
            ],
        );
        Arc::new(fake)
    }

    fn tier(fake: Arc<FakeSources>) -> SnapshotTier {
        SnapshotTier::new(
            fake,
            &[crate::config::tests::test_chain("ethereum")],
            Duration::from_secs(60),
            100,
            fixed_clock(NOW),
        )
    }

    #[test]
    fn test_days_back_covers_oldest() {
        assert_eq!(days_back(NOW, NOW), 1);
        assert_eq!(days_back(NOW, NOW - 1), 2);
        assert_eq!(days_back(NOW, NOW - 7 * 86_400), 8);
    }

    #[tokio::test]
    async fn test_selects_closest_entry() {
        let tier = tier(fake_with_series());
        let targets = [NOW - 2 * 86_400 + 3_600, NOW - 86_400 - 7_200, NOW - 600];
        let series = tier.fetch(WALLET, "ethereum", &targets).await.unwrap();

        let units: Vec<f64> = targets.iter().map(|t| series[t][0].balance.decimal).collect();
        assert_eq!(units, vec![1.0, 2.0, 3.0]);
        // Zero balances are not reported.
        assert_eq!(series[&targets[2]].len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let fake = fake_with_series();
        let tier = tier(fake.clone());
        let targets = [NOW - 86_400, NOW];

        let (a, b) = tokio::join!(
            tier.fetch(WALLET, "ethereum", &targets),
            tier.fetch(WALLET, "ethereum", &targets)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        tier.fetch(WALLET, "ethereum", &targets).await.unwrap();
        assert_eq!(fake.series_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let mut fake = FakeSources::new(BlockStamp {
            number: 1,
            timestamp: NOW,
        });
        fake.fail_snapshots = true;
        let fake = Arc::new(fake);
        let tier = tier(fake.clone());

        assert!(tier.fetch(WALLET, "ethereum", &[NOW]).await.is_err());
        assert!(tier.fetch(WALLET, "ethereum", &[NOW]).await.is_err());
        assert_eq!(fake.series_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_history_yields_empty_points() {
        let tier = tier(Arc::new(FakeSources::new(BlockStamp {
            number: 1,
            timestamp: NOW,
        })));
        let series = tier.fetch(WALLET, "ethereum", &[NOW - 10, NOW]).await.unwrap();
        assert_eq!(series.len(), 2);
        assert!(series.values().all(|v| v.is_empty()));
        assert!(!tier.supports("solana"));
    }
}

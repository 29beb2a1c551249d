use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::balances::{BalanceSourceChain, BalanceTier, EventReplayTier, OnchainTier, SnapshotTier};
use crate::block_estimator::BlockEstimator;
use crate::cache::{self, KvStore};
use crate::coalesce::InflightRequests;
use crate::config::{Config, CorrectionConfig};
use crate::error::HistoryError;
use crate::prices::PriceAggregator;
use crate::progress::{self, ProgressRecord, ProgressReporter, ProgressStage};
use crate::sources::price_api::PriceApiClient;
use crate::sources::rpc::RpcClient;
use crate::sources::snapshot_api::SnapshotApiClient;
use crate::timeframe::{Clock, Timeframe};
use crate::types::{
    ChainBalanceSnapshot, HistoricalDataPoint, HistoryResult, PriceKey, PricePoint, TokenPriceHistory,
};
use crate::valuation::{correct_series, value_snapshots};

/// Caller options for [`HistoryService::get_historical_portfolio`].
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    /// Chain subset. `None` or empty selects the default chain set.
    pub chains: Option<Vec<String>>,
    pub skip_cache: bool,
    /// Caller-chosen id for progress polling.
    pub request_id: Option<String>,
    /// Live portfolio value used as ground truth for the final point.
    pub current_value: Option<f64>,
}

/// What gets memoized: the uncorrected series, so a hit can be re-corrected against a
/// fresh live value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedHistory {
    pub timestamps: Vec<u64>,
    pub raw_values: Vec<f64>,
    pub chains_with_data: Vec<String>,
    pub price_history: BTreeMap<String, TokenPriceHistory>,
    pub fetched_at: DateTime<Utc>,
}

type Outcome = Result<Arc<CachedHistory>, HistoryError>;

/// Portfolio history orchestrator. Cheap to clone; clones share caches and in-flight work.
#[derive(Clone)]
pub struct HistoryService {
    inner: Arc<Inner>,
}

struct Inner {
    balances: BalanceSourceChain,
    prices: PriceAggregator,
    store: Arc<dyn KvStore>,
    progress: ProgressReporter,
    inflight: InflightRequests<String, Outcome>,
    chains: Vec<String>,
    default_chains: Vec<String>,
    correction: CorrectionConfig,
    valuation_concurrency: usize,
    clock: Clock,
}

pub fn cache_key(wallet: Address, timeframe: Timeframe, chains: Option<&[String]>) -> String {
    let chains = match chains {
        Some(list) if !list.is_empty() => {
            let sorted: BTreeSet<&str> = list.iter().map(|c| c.as_str()).collect();
            sorted.into_iter().collect::<Vec<_>>().join(",")
        }
        _ => "all".to_string(),
    };
    format!("history:{:#x}:{}:{}", wallet, timeframe, chains)
}

impl HistoryService {
    pub fn new(
        config: &Config,
        balances: BalanceSourceChain,
        prices: PriceAggregator,
        store: Arc<dyn KvStore>,
        progress: ProgressReporter,
        clock: Clock,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                balances,
                prices,
                store,
                progress,
                inflight: InflightRequests::new(),
                chains: config.chains.iter().map(|c| c.name.clone()).collect(),
                default_chains: config.history.default_chains.clone(),
                correction: config.history.correction.clone(),
                valuation_concurrency: config.history.valuation_concurrency.max(1),
                clock,
            }),
        }
    }

    /// Normalize a requested chain subset. Unknown chains are a configuration error.
    pub fn resolve_chains(&self, requested: Option<&[String]>) -> Result<Vec<String>, HistoryError> {
        let requested: Vec<String> = requested
            .unwrap_or_default()
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if requested.is_empty() {
            return Ok(self.inner.default_chains.clone());
        }

        let mut chains = BTreeSet::new();
        for chain in requested {
            if !self.inner.chains.contains(&chain) {
                return Err(HistoryError::Configuration(format!("unsupported chain '{}'", chain)));
            }
            chains.insert(chain);
        }
        Ok(chains.into_iter().collect())
    }

    pub async fn get_historical_portfolio(
        &self,
        wallet: Address,
        timeframe: Timeframe,
        options: HistoryOptions,
    ) -> Result<HistoryResult, HistoryError> {
        let inner = &self.inner;
        let request_id = options.request_id.as_deref();

        let explicit = options.chains.as_deref().filter(|c| !c.is_empty());
        let chains = match self.resolve_chains(explicit) {
            Ok(chains) => chains,
            Err(e) => {
                inner.progress.report(request_id, ProgressRecord::failed(ProgressStage::Planning));
                return Err(e);
            }
        };
        let key = cache_key(wallet, timeframe, explicit.map(|_| chains.as_slice()));

        if !options.skip_cache {
            match cache::get_json::<CachedHistory>(inner.store.as_ref(), &key).await {
                Ok(Some(cached)) => {
                    tracing::info!(wallet = %wallet, timeframe = %timeframe, "History cache hit");
                    inner
                        .progress
                        .report(request_id, ProgressRecord::completed(cached.timestamps.len()));
                    return Ok(inner.finalize(wallet, timeframe, &cached, options.current_value, true));
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "History cache read failed, recomputing"),
            }
        }

        let work = {
            let inner = self.inner.clone();
            let key = key.clone();
            let request_id = options.request_id.clone();
            async move {
                inner
                    .compute(wallet, timeframe, chains, key, request_id)
                    .await
                    .map(Arc::new)
            }
        };

        // Callers joining an in-flight computation are still pollable.
        inner.progress.report(
            request_id,
            ProgressRecord::running(ProgressStage::Planning, 0, timeframe.sample_count()),
        );
        match inner.inflight.run(key, work).await {
            Ok(computed) => {
                inner
                    .progress
                    .report(request_id, ProgressRecord::completed(computed.timestamps.len()));
                Ok(inner.finalize(wallet, timeframe, &computed, options.current_value, false))
            }
            Err(e) => {
                inner.progress.report(request_id, ProgressRecord::failed(ProgressStage::FetchingBalances));
                Err(e)
            }
        }
    }

    /// Latest progress record for `request_id`, if one is still live.
    pub async fn get_progress(&self, request_id: &str) -> Option<ProgressRecord> {
        match progress::read_progress(self.inner.store.as_ref(), request_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(request_id, error = %e, "Failed to read progress");
                None
            }
        }
    }
}

impl Inner {
    async fn compute(
        &self,
        wallet: Address,
        timeframe: Timeframe,
        chains: Vec<String>,
        key: String,
        request_id: Option<String>,
    ) -> Result<CachedHistory, HistoryError> {
        let request_id = request_id.as_deref();
        let timestamps = timeframe.plan_timestamps((self.clock)());
        let total = timestamps.len();

        tracing::info!(
            wallet = %wallet,
            timeframe = %timeframe,
            chains = chains.len(),
            samples = total,
            "Reconstructing portfolio history"
        );

        // Chains are independent failure domains: every outcome is collected.
        self.progress
            .report(request_id, ProgressRecord::running(ProgressStage::FetchingBalances, 0, chains.len()));
        let fetches: Vec<_> = chains
            .iter()
            .map(|chain| self.balances.get_balances(wallet, chain, &timestamps))
            .collect();
        let outcomes = join_all(fetches).await;

        let mut merged: Vec<Vec<ChainBalanceSnapshot>> = vec![Vec::new(); total];
        let mut chains_with_data = Vec::new();
        for (chain, outcome) in chains.iter().zip(outcomes) {
            let series = outcome?;
            if series.values().any(|s| !s.is_empty()) {
                chains_with_data.push(chain.clone());
            }
            for (i, ts) in timestamps.iter().enumerate() {
                if let Some(snapshots) = series.get(ts) {
                    merged[i].extend(snapshots.iter().cloned());
                }
            }
        }

        let mut raw_values = vec![0.0; total];
        let mut observed: Vec<HashMap<PriceKey, f64>> = vec![HashMap::new(); total];
        let indices: Vec<usize> = (0..total).collect();
        for window in indices.chunks(self.valuation_concurrency) {
            let valuations: Vec<_> = window
                .iter()
                .map(|&i| {
                    let snapshots = &merged[i];
                    let timestamp = timestamps[i];
                    async move {
                        let keys: Vec<PriceKey> = snapshots
                            .iter()
                            .map(|s| PriceKey::new(&s.chain, s.token_address))
                            .collect();
                        let prices = self.prices.get_prices(&keys, timestamp).await;
                        (i, value_snapshots(snapshots, &prices), prices)
                    }
                })
                .collect();
            let valued = join_all(valuations).await;

            for (i, value, prices) in valued {
                raw_values[i] = value;
                observed[i] = prices;
            }
            let processed = window.last().map(|i| i + 1).unwrap_or(0);
            self.progress
                .report(request_id, ProgressRecord::running(ProgressStage::Valuing, processed, total));
        }

        let price_history = build_price_history(&timestamps, &merged, &observed);
        let computed = CachedHistory {
            timestamps,
            raw_values,
            chains_with_data,
            price_history,
            fetched_at: Utc::now(),
        };

        self.progress
            .report(request_id, ProgressRecord::running(ProgressStage::Caching, total, total));
        if let Err(e) = cache::set_json(self.store.as_ref(), &key, &computed, timeframe.cache_ttl()).await {
            tracing::warn!(key = %key, error = %e, "Failed to cache history");
        }

        tracing::info!(
            wallet = %wallet,
            timeframe = %timeframe,
            chains_with_data = ?computed.chains_with_data,
            "Portfolio history reconstructed"
        );
        Ok(computed)
    }

    fn finalize(
        &self,
        wallet: Address,
        timeframe: Timeframe,
        cached: &CachedHistory,
        current_value: Option<f64>,
        cache_hit: bool,
    ) -> HistoryResult {
        let corrected = correct_series(&cached.raw_values, current_value, &self.correction);
        let data_points: Vec<HistoricalDataPoint> = cached
            .timestamps
            .iter()
            .zip(corrected.values.iter())
            .map(|(timestamp, total_usd)| HistoricalDataPoint {
                timestamp: *timestamp,
                total_usd: *total_usd,
            })
            .collect();

        let start_value = data_points.first().map(|p| p.total_usd).unwrap_or(0.0);
        let end_value = data_points.last().map(|p| p.total_usd).unwrap_or(0.0);
        let change = end_value - start_value;
        let change_percent = if start_value > 0.0 {
            change / start_value * 100.0
        } else {
            0.0
        };

        HistoryResult {
            wallet: format!("{:#x}", wallet),
            timeframe,
            data_points,
            start_value,
            end_value,
            change,
            change_percent,
            chains_with_data: cached.chains_with_data.clone(),
            price_history: cached.price_history.clone(),
            fetched_at: cached.fetched_at,
            cache_hit,
        }
    }
}

/// Observed prices per held token, oldest first.
fn build_price_history(
    timestamps: &[u64],
    holdings: &[Vec<ChainBalanceSnapshot>],
    observed: &[HashMap<PriceKey, f64>],
) -> BTreeMap<String, TokenPriceHistory> {
    let mut history: BTreeMap<String, TokenPriceHistory> = BTreeMap::new();
    for (i, timestamp) in timestamps.iter().enumerate() {
        let mut seen = BTreeSet::new();
        for snapshot in &holdings[i] {
            let key = PriceKey::new(&snapshot.chain, snapshot.token_address);
            let Some(usd) = observed[i].get(&key).copied() else {
                continue;
            };
            if !seen.insert(key.clone()) {
                continue;
            }
            history
                .entry(key.to_string())
                .or_insert_with(|| TokenPriceHistory {
                    chain: snapshot.chain.clone(),
                    token_address: snapshot.token_address,
                    symbol: snapshot.symbol.clone(),
                    prices: Vec::new(),
                })
                .prices
                .push(PricePoint {
                    timestamp: *timestamp,
                    usd,
                });
        }
    }
    history
}

/// Wire the production sources into a service.
pub fn build_service(config: &Config, store: Arc<dyn KvStore>, clock: Clock, shutdown: CancellationToken) -> eyre::Result<HistoryService> {
    let rpc = Arc::new(RpcClient::new(&config.chains, &config.retry)?);
    let snapshots = Arc::new(SnapshotApiClient::new(
        &config.providers.snapshots,
        &config.chains,
        &config.retry,
    )?);
    let prices = Arc::new(PriceApiClient::new(&config.providers.prices, &config.chains, &config.retry)?);

    let estimator = Arc::new(BlockEstimator::new(
        rpc.clone(),
        &config.chains,
        Duration::from_secs(config.cache.block_ttl_secs),
    ));

    let tiers: Vec<Arc<dyn BalanceTier>> = vec![
        Arc::new(EventReplayTier::new(
            rpc.clone(),
            snapshots.clone(),
            rpc.clone(),
            estimator.clone(),
            &config.chains,
            Duration::from_secs(config.cache.token_meta_ttl_secs),
        )),
        Arc::new(SnapshotTier::new(
            snapshots,
            &config.chains,
            Duration::from_secs(config.cache.snapshot_ttl_secs),
            config.cache.max_entries,
            clock.clone(),
        )),
        Arc::new(OnchainTier::new(rpc, estimator, &config.chains)),
    ];
    let balances = BalanceSourceChain::new(tiers);
    tracing::info!(tiers = ?balances.tier_names(), "Balance tiers configured");

    let progress = ProgressReporter::spawn(
        store.clone(),
        Duration::from_secs(config.history.progress_ttl_secs),
        shutdown,
    );

    Ok(HistoryService::new(
        config,
        balances,
        PriceAggregator::new(prices, config.providers.prices.batch_size, clock.clone()),
        store,
        progress,
        clock,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balances::tests::WALLET;
    use crate::cache::MemoryStore;
    use crate::config::tests::{test_chain, test_config};
    use crate::config::DEFAULT_CHAINS;
    use crate::progress::tests::wait_for_progress;
    use crate::progress::ProgressStatus;
    use crate::sources::fakes::FakeSources;
    use crate::sources::{BlockStamp, TokenBalance};
    use crate::timeframe::fixed_clock;
    use crate::types::{TokenMeta, NATIVE_TOKEN};
    use alloy::primitives::U256;
    use std::sync::atomic::Ordering;

    const HEAD: BlockStamp = BlockStamp {
        number: 20_000_000,
        timestamp: 1_760_000_000,
    };

    /// One ETH on ethereum only, priced at $2000.
    fn fake() -> FakeSources {
        let mut fake = FakeSources::new(HEAD);
        fake.current.insert(
            "ethereum".to_string(),
            vec![TokenBalance {
                token_address: NATIVE_TOKEN,
                meta: TokenMeta {
                    symbol: "ETH".to_string(),
                    decimals: 18,
                },
                raw: U256::from(10u64).pow(U256::from(18u64)),
            }],
        );
        fake.prices.insert(PriceKey::new("ethereum", NATIVE_TOKEN), 2_000.0);
        fake
    }

    fn service(fake: Arc<FakeSources>) -> (HistoryService, Arc<dyn KvStore>) {
        let chains: Vec<_> = DEFAULT_CHAINS.iter().map(|c| test_chain(c)).collect();
        let mut config = test_config(chains);
        config.history.default_chains = DEFAULT_CHAINS.iter().map(|c| c.to_string()).collect();

        let clock = fixed_clock(HEAD.timestamp);
        let ttl = Duration::from_secs(60);
        let estimator = Arc::new(BlockEstimator::new(fake.clone(), &config.chains, ttl));
        let balances = BalanceSourceChain::new(vec![
            Arc::new(EventReplayTier::new(
                fake.clone(),
                fake.clone(),
                fake.clone(),
                estimator.clone(),
                &config.chains,
                ttl,
            )) as Arc<dyn BalanceTier>,
            Arc::new(SnapshotTier::new(fake.clone(), &config.chains, ttl, 100, clock.clone())),
            Arc::new(OnchainTier::new(fake.clone(), estimator, &config.chains)),
        ]);

        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new(1_000));
        let progress = ProgressReporter::spawn(store.clone(), ttl, CancellationToken::new());
        let service = HistoryService::new(
            &config,
            balances,
            PriceAggregator::new(fake, 100, clock.clone()),
            store.clone(),
            progress,
            clock,
        );
        (service, store)
    }

    #[test]
    fn test_cache_key_format() {
        let chains = vec!["polygon".to_string(), "base".to_string()];
        assert_eq!(
            cache_key(WALLET, Timeframe::Week, Some(chains.as_slice())),
            "history:0x1111111111111111111111111111111111111111:7d:base,polygon"
        );
        assert_eq!(
            cache_key(WALLET, Timeframe::Year, None),
            "history:0x1111111111111111111111111111111111111111:1y:all"
        );
    }

    #[tokio::test]
    async fn test_week_example_reports_only_chains_with_data() {
        let (service, _) = service(Arc::new(fake()));
        let result = service
            .get_historical_portfolio(WALLET, Timeframe::Week, HistoryOptions::default())
            .await
            .unwrap();

        assert_eq!(result.data_points.len(), 14);
        assert!(result
            .data_points
            .windows(2)
            .all(|w| w[1].timestamp - w[0].timestamp == 12 * 3600));
        assert_eq!(result.chains_with_data, vec!["ethereum".to_string()]);
        assert!(result.data_points.iter().all(|p| p.total_usd == 2_000.0));
        assert_eq!(result.change, 0.0);
        assert!(!result.cache_hit);

        let eth = &result.price_history["ethereum:0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee"];
        assert_eq!(eth.symbol, "ETH");
        assert_eq!(eth.prices.len(), 14);
    }

    #[tokio::test]
    async fn test_sample_count_for_every_timeframe() {
        let (service, _) = service(Arc::new(fake()));
        for timeframe in Timeframe::ALL {
            let result = service
                .get_historical_portfolio(WALLET, timeframe, HistoryOptions::default())
                .await
                .unwrap();
            assert_eq!(result.data_points.len(), timeframe.sample_count(), "{}", timeframe);
            assert!(result.data_points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
    }

    #[tokio::test]
    async fn test_cache_hit_reapplies_live_value() {
        let fake = Arc::new(fake());
        let (service, _) = service(fake.clone());

        let first = service
            .get_historical_portfolio(WALLET, Timeframe::Week, HistoryOptions::default())
            .await
            .unwrap();
        let calls = fake.event_calls.load(Ordering::SeqCst);

        let second = service
            .get_historical_portfolio(WALLET, Timeframe::Week, HistoryOptions::default())
            .await
            .unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.data_points, first.data_points);
        assert_eq!(fake.event_calls.load(Ordering::SeqCst), calls);

        let pinned = service
            .get_historical_portfolio(
                WALLET,
                Timeframe::Week,
                HistoryOptions {
                    current_value: Some(2_100.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(pinned.cache_hit);
        assert_eq!(pinned.end_value, 2_100.0);
        assert_eq!(pinned.data_points[0], first.data_points[0]);

        service
            .get_historical_portfolio(
                WALLET,
                Timeframe::Week,
                HistoryOptions {
                    skip_cache: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(fake.event_calls.load(Ordering::SeqCst) > calls);
    }

    #[tokio::test]
    async fn test_unsupported_chain_is_hard_failure() {
        let (service, _) = service(Arc::new(fake()));
        let result = service
            .get_historical_portfolio(
                WALLET,
                Timeframe::Week,
                HistoryOptions {
                    chains: Some(vec!["ethereum".to_string(), "solana".to_string()]),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(HistoryError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_chain_subset_and_normalization() {
        let (service, _) = service(Arc::new(fake()));
        let requested = vec![" Base ".to_string(), "ethereum".to_string(), "base".to_string()];
        let chains = service.resolve_chains(Some(requested.as_slice())).unwrap();
        assert_eq!(chains, vec!["base".to_string(), "ethereum".to_string()]);
        assert_eq!(service.resolve_chains(None).unwrap().len(), 5);
        let empty: Vec<String> = Vec::new();
        assert_eq!(service.resolve_chains(Some(empty.as_slice())).unwrap().len(), 5);

        let result = service
            .get_historical_portfolio(
                WALLET,
                Timeframe::Week,
                HistoryOptions {
                    chains: Some(vec!["base".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(result.chains_with_data.is_empty());
        assert!(result.data_points.iter().all(|p| p.total_usd == 0.0));
    }

    #[tokio::test]
    async fn test_provider_outage_degrades_to_empty_result() {
        let mut fake = fake();
        fake.fail_events = true;
        fake.fail_snapshots = true;
        fake.fail_prices = true;
        let (service, _) = service(Arc::new(fake));

        let result = service
            .get_historical_portfolio(WALLET, Timeframe::Month, HistoryOptions::default())
            .await
            .unwrap();
        assert_eq!(result.data_points.len(), 30);
        assert!(result.chains_with_data.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_identical_requests_compute_once() {
        let fake = Arc::new(fake());
        let (service, _) = service(fake.clone());

        let (a, b) = tokio::join!(
            service.get_historical_portfolio(WALLET, Timeframe::Week, HistoryOptions::default()),
            service.get_historical_portfolio(WALLET, Timeframe::Week, HistoryOptions::default()),
        );
        assert_eq!(a.unwrap().data_points, b.unwrap().data_points);
        assert_eq!(fake.event_calls.load(Ordering::SeqCst), DEFAULT_CHAINS.len());
    }

    #[tokio::test]
    async fn test_progress_is_pollable() {
        let (service, store) = service(Arc::new(fake()));
        service
            .get_historical_portfolio(
                WALLET,
                Timeframe::Week,
                HistoryOptions {
                    request_id: Some("req-42".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let record = wait_for_progress(store.as_ref(), "req-42", ProgressStatus::Completed)
            .await
            .expect("completed progress");
        assert_eq!(record.total, 14);
        assert_eq!(service.get_progress("req-42").await, Some(record));
        assert_eq!(service.get_progress("unknown").await, None);
    }

    #[tokio::test]
    async fn test_onchain_tier_answers_when_other_sources_fail() {
        let mut fake = fake();
        fake.fail_events = true;
        fake.fail_snapshots = true;
        let eth = fake.current["ethereum"].clone();
        fake.onchain.insert("ethereum".to_string(), eth);
        let (service, _) = service(Arc::new(fake));

        let result = service
            .get_historical_portfolio(WALLET, Timeframe::Week, HistoryOptions::default())
            .await
            .unwrap();
        assert_eq!(result.chains_with_data, vec!["ethereum".to_string()]);
        assert_eq!(result.data_points.len(), 14);
        assert!(result.data_points.iter().all(|p| p.total_usd == 2_000.0));
    }

    #[tokio::test]
    async fn test_joined_request_is_pollable_while_waiting() {
        let mut fake = fake();
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        fake.event_gate = Some(gate.clone());
        let fake = Arc::new(fake);
        let (service, store) = service(fake.clone());

        let request = |id: &str| {
            let service = service.clone();
            let options = HistoryOptions {
                request_id: Some(id.to_string()),
                ..Default::default()
            };
            tokio::spawn(async move {
                service
                    .get_historical_portfolio(WALLET, Timeframe::Week, options)
                    .await
            })
        };
        let first = request("first");
        let second = request("second");

        let waiting = wait_for_progress(store.as_ref(), "second", ProgressStatus::Running)
            .await
            .expect("running progress");
        assert_eq!(waiting.total, 14);

        gate.add_permits(DEFAULT_CHAINS.len());
        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(a.data_points, b.data_points);
        assert_eq!(fake.event_calls.load(Ordering::SeqCst), DEFAULT_CHAINS.len());
        assert!(wait_for_progress(store.as_ref(), "second", ProgressStatus::Completed)
            .await
            .is_some());
    }
}

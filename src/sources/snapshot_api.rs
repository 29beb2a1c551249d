use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{SeriesEntry, SnapshotSource, TokenBalance};
use crate::config::{ChainConfig, HttpProviderConfig, RetryConfig};
use crate::error::HistoryError;
use crate::rate_limit::ProviderLimiter;
use crate::types::{TokenMeta, NATIVE_TOKEN};

const PROVIDER: &str = "snapshots";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Position {
    attributes: PositionAttributes,
}

#[derive(Debug, Deserialize)]
struct PositionAttributes {
    quantity: Quantity,
    fungible_info: FungibleInfo,
}

#[derive(Debug, Deserialize)]
struct Quantity {
    int: String,
    decimals: u8,
}

#[derive(Debug, Deserialize)]
struct FungibleInfo {
    symbol: String,
    #[serde(default)]
    implementations: Vec<Implementation>,
}

#[derive(Debug, Deserialize)]
struct Implementation {
    chain_id: String,
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryPoint {
    timestamp: u64,
    #[serde(default)]
    positions: Vec<Position>,
}

/// Portfolio snapshots from a Zerion-style wallet index.
pub struct SnapshotApiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    limiter: Arc<ProviderLimiter>,
    /// Chain name to the provider's chain id.
    slugs: Vec<(String, String)>,
}

impl SnapshotApiClient {
    pub fn new(config: &HttpProviderConfig, chains: &[ChainConfig], retry: &RetryConfig) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            limiter: ProviderLimiter::new(
                PROVIDER,
                config.requests_per_second,
                config.burst,
                config.timeout_ms,
                retry.clone(),
            ),
            slugs: chains
                .iter()
                .map(|c| (c.name.clone(), c.slug().to_string()))
                .collect(),
        })
    }

    fn slug(&self, chain: &str) -> Result<&str, HistoryError> {
        self.slugs
            .iter()
            .find(|(name, _)| name == chain)
            .map(|(_, slug)| slug.as_str())
            .ok_or_else(|| HistoryError::Configuration(format!("no snapshot slug for chain '{}'", chain)))
    }

    async fn get_json<T: DeserializeOwned + Send>(&self, method: &str, url: String) -> Result<T, HistoryError> {
        let url = &url;
        self.limiter
            .call(method, || async move {
                let mut request = self.client.get(url).header("accept", "application/json");
                if let Some(key) = &self.api_key {
                    request = request.basic_auth(key, Some(""));
                }

                let response = request.send().await.map_err(transport_error)?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(HistoryError::from_status(PROVIDER, status.as_u16(), body));
                }
                response
                    .json::<T>()
                    .await
                    .map_err(|e| HistoryError::decode(PROVIDER, e.to_string()))
            })
            .await
    }
}

fn transport_error(e: reqwest::Error) -> HistoryError {
    HistoryError::Transport {
        provider: PROVIDER.to_string(),
        message: e.to_string(),
    }
}

/// Reduce provider positions to balances on one chain. Positions without an
/// implementation on `slug` or with an unparseable quantity are dropped.
fn positions_to_balances(positions: Vec<Position>, slug: &str) -> Vec<TokenBalance> {
    positions
        .into_iter()
        .filter_map(|p| {
            let attrs = p.attributes;
            let implementation = attrs
                .fungible_info
                .implementations
                .iter()
                .find(|i| i.chain_id == slug)?;
            let token_address = match implementation.address.as_deref() {
                None | Some("") => NATIVE_TOKEN,
                Some(raw) => Address::from_str(raw).ok()?,
            };
            let raw = U256::from_str_radix(&attrs.quantity.int, 10).ok()?;
            Some(TokenBalance {
                token_address,
                meta: TokenMeta {
                    symbol: attrs.fungible_info.symbol,
                    decimals: attrs.quantity.decimals,
                },
                raw,
            })
        })
        .collect()
}

#[async_trait]
impl SnapshotSource for SnapshotApiClient {
    async fn current_balances(&self, chain: &str, wallet: Address) -> Result<Vec<TokenBalance>, HistoryError> {
        let slug = self.slug(chain)?;
        let url = format!(
            "{}/wallets/{:#x}/positions/?filter[chain_ids]={}&filter[positions]=only_simple",
            self.base_url, wallet, slug
        );
        let envelope: Envelope<Position> = self.get_json("positions", url).await?;
        Ok(positions_to_balances(envelope.data, slug))
    }

    async fn balance_series(
        &self,
        chain: &str,
        wallet: Address,
        days_back: u32,
    ) -> Result<Vec<SeriesEntry>, HistoryError> {
        let slug = self.slug(chain)?;
        let url = format!(
            "{}/wallets/{:#x}/balance-history/?filter[chain_ids]={}&days={}",
            self.base_url, wallet, slug, days_back
        );
        let envelope: Envelope<HistoryPoint> = self.get_json("balance-history", url).await?;

        let mut series: Vec<SeriesEntry> = envelope
            .data
            .into_iter()
            .map(|point| SeriesEntry {
                timestamp: point.timestamp,
                balances: positions_to_balances(point.positions, slug),
            })
            .collect();
        series.sort_by_key(|e| e.timestamp);

        tracing::debug!(chain, days_back, points = series.len(), "Fetched balance series");
        Ok(series)
    }
}

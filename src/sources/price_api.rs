use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::PriceSource;
use crate::config::{ChainConfig, HttpProviderConfig, RetryConfig};
use crate::error::HistoryError;
use crate::rate_limit::ProviderLimiter;
use crate::types::{PriceKey, NATIVE_TOKEN};

const PROVIDER: &str = "prices";

#[derive(Debug, Deserialize)]
struct CoinsResponse {
    #[serde(default)]
    coins: HashMap<String, CoinPrice>,
}

#[derive(Debug, Deserialize)]
struct CoinPrice {
    price: f64,
}

struct ChainIds {
    slug: String,
    native_price_id: Option<String>,
}

/// USD prices from a DefiLlama-style coins API.
pub struct PriceApiClient {
    client: Client,
    base_url: String,
    limiter: Arc<ProviderLimiter>,
    chains: HashMap<String, ChainIds>,
}

impl PriceApiClient {
    pub fn new(config: &HttpProviderConfig, chains: &[ChainConfig], retry: &RetryConfig) -> eyre::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            limiter: ProviderLimiter::new(
                PROVIDER,
                config.requests_per_second,
                config.burst,
                config.timeout_ms,
                retry.clone(),
            ),
            chains: chains
                .iter()
                .map(|c| {
                    (
                        c.name.clone(),
                        ChainIds {
                            slug: c.slug().to_string(),
                            native_price_id: c.native_price_id.clone(),
                        },
                    )
                })
                .collect(),
        })
    }

    /// Provider coin id for a key, or `None` when the asset cannot be priced (unknown chain,
    /// or a native asset without a configured id).
    fn coin_id(&self, key: &PriceKey) -> Option<String> {
        let ids = self.chains.get(&key.chain)?;
        if key.token == NATIVE_TOKEN {
            ids.native_price_id.as_ref().map(|id| id.to_lowercase())
        } else {
            Some(format!("{}:{:#x}", ids.slug, key.token))
        }
    }

    async fn fetch(&self, path: &str, keys: &[PriceKey]) -> Result<HashMap<PriceKey, f64>, HistoryError> {
        let mut by_id: HashMap<String, Vec<&PriceKey>> = HashMap::new();
        for key in keys {
            match self.coin_id(key) {
                Some(id) => by_id.entry(id).or_default().push(key),
                None => tracing::debug!(key = %key, "No price id for asset"),
            }
        }
        if by_id.is_empty() {
            return Ok(HashMap::new());
        }

        let mut ids: Vec<&str> = by_id.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        let url = format!("{}/{}/{}", self.base_url, path, ids.join(","));
        let url = &url;

        let response: CoinsResponse = self
            .limiter
            .call(path, || async move {
                let response = self.client.get(url).send().await.map_err(|e| HistoryError::Transport {
                    provider: PROVIDER.to_string(),
                    message: e.to_string(),
                })?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(HistoryError::from_status(PROVIDER, status.as_u16(), body));
                }
                response
                    .json::<CoinsResponse>()
                    .await
                    .map_err(|e| HistoryError::decode(PROVIDER, e.to_string()))
            })
            .await?;

        Ok(map_prices(response, &by_id))
    }
}

fn map_prices(response: CoinsResponse, by_id: &HashMap<String, Vec<&PriceKey>>) -> HashMap<PriceKey, f64> {
    let mut prices = HashMap::new();
    for (id, coin) in response.coins {
        if !coin.price.is_finite() || coin.price < 0.0 {
            continue;
        }
        if let Some(keys) = by_id.get(&id.to_lowercase()) {
            for key in keys {
                prices.insert((*key).clone(), coin.price);
            }
        }
    }
    prices
}

#[async_trait]
impl PriceSource for PriceApiClient {
    async fn historical_prices(
        &self,
        keys: &[PriceKey],
        timestamp: u64,
    ) -> Result<HashMap<PriceKey, f64>, HistoryError> {
        self.fetch(&format!("prices/historical/{}", timestamp), keys).await
    }

    async fn current_prices(&self, keys: &[PriceKey]) -> Result<HashMap<PriceKey, f64>, HistoryError> {
        self.fetch("prices/current", keys).await
    }
}

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;

use crate::sources::PriceSource;
use crate::timeframe::Clock;
use crate::types::PriceKey;

/// Samples this close to "now" are priced with current quotes.
const CURRENT_PRICE_WINDOW_SECS: u64 = 300;

/// Batched USD price lookups over a rate-limited price source.
pub struct PriceAggregator {
    source: Arc<dyn PriceSource>,
    batch_size: usize,
    clock: Clock,
}

impl PriceAggregator {
    pub fn new(source: Arc<dyn PriceSource>, batch_size: usize, clock: Clock) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            clock,
        }
    }

    /// Prices for `keys` at `timestamp`.
    ///
    /// Keys are deduplicated and split into batches. A failed batch is logged and skipped;
    /// assets without a quote are simply absent from the result.
    pub async fn get_prices(&self, keys: &[PriceKey], timestamp: u64) -> HashMap<PriceKey, f64> {
        let unique: Vec<PriceKey> = keys.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        if unique.is_empty() {
            return HashMap::new();
        }

        let current = (self.clock)().saturating_sub(timestamp) <= CURRENT_PRICE_WINDOW_SECS;
        let requests: Vec<_> = unique
            .chunks(self.batch_size)
            .map(|batch| async move {
                if current {
                    self.source.current_prices(batch).await
                } else {
                    self.source.historical_prices(batch, timestamp).await
                }
            })
            .collect();
        let batches = join_all(requests).await;

        let mut prices = HashMap::with_capacity(unique.len());
        for result in batches {
            match result {
                Ok(batch) => prices.extend(batch),
                Err(e) => tracing::warn!(timestamp, error = %e, "Price batch failed, valuing affected tokens at 0"),
            }
        }

        tracing::trace!(
            timestamp,
            requested = unique.len(),
            priced = prices.len(),
            current,
            "Fetched prices"
        );
        prices
    }
}

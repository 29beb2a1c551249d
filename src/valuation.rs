use std::collections::HashMap;

use crate::config::CorrectionConfig;
use crate::types::{ChainBalanceSnapshot, PriceKey};

/// USD value of one timestamp's balances. Tokens without a price contribute nothing.
pub fn value_snapshots(snapshots: &[ChainBalanceSnapshot], prices: &HashMap<PriceKey, f64>) -> f64 {
    snapshots
        .iter()
        .map(|s| {
            let price = prices
                .get(&PriceKey::new(&s.chain, s.token_address))
                .copied()
                .unwrap_or(0.0);
            let value = s.balance.decimal * price;
            if value.is_finite() && value > 0.0 {
                value
            } else {
                0.0
            }
        })
        .sum()
}

/// Median of the strictly positive, finite values.
pub fn positive_median(values: &[f64]) -> Option<f64> {
    let mut positive: Vec<f64> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite() && *v > 0.0)
        .collect();
    if positive.is_empty() {
        return None;
    }
    positive.sort_by(|a, b| a.total_cmp(b));
    let mid = positive.len() / 2;
    Some(if positive.len() % 2 == 0 {
        (positive[mid - 1] + positive[mid]) / 2.0
    } else {
        positive[mid]
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedSeries {
    pub values: Vec<f64>,
    pub reference_value: f64,
    pub anomaly_threshold: f64,
    pub corruption_detected: bool,
}

/// Repair provider artifacts in a raw valuation series.
///
/// Points below `reference × anomaly_ratio` are presumed artifacts. They take the last good
/// value carried forward; anomalies before the first good point are back-filled from it.
/// A supplied live value pins the final point, and when it dwarfs the historical median the
/// median is treated as corrupted and the live value becomes the reference instead.
pub fn correct_series(raw: &[f64], live: Option<f64>, params: &CorrectionConfig) -> CorrectedSeries {
    let raw: Vec<f64> = raw
        .iter()
        .map(|v| if v.is_finite() && *v > 0.0 { *v } else { 0.0 })
        .collect();
    let live = live.filter(|v| v.is_finite() && *v >= 0.0);
    let median = positive_median(&raw);

    let corruption_detected = match (live, median) {
        (Some(l), Some(m)) => l > m * params.corruption_multiplier,
        (Some(l), None) => l > 0.0 && !raw.is_empty(),
        _ => false,
    };
    let reference_value = match live {
        Some(l) if corruption_detected => l,
        _ => median.unwrap_or(0.0),
    };
    let anomaly_threshold = reference_value * params.anomaly_ratio;

    let mut corrected = CorrectedSeries {
        values: raw.clone(),
        reference_value,
        anomaly_threshold,
        corruption_detected,
    };
    if raw.is_empty() {
        return corrected;
    }

    let last = raw.len() - 1;
    let pinned = live.map(|_| last);
    if let Some(l) = live {
        corrected.values[last] = l;
    }

    if let Some(l) = live {
        if raw.iter().all(|v| *v < anomaly_threshold) {
            tracing::debug!(live = l, points = raw.len(), "Every point anomalous, filling with live value");
            corrected.values.iter_mut().for_each(|v| *v = l);
            return corrected;
        }
    }

    let anomalous: Vec<bool> = (0..raw.len())
        .map(|i| Some(i) != pinned && raw[i] < anomaly_threshold)
        .collect();

    let mut last_good = if corruption_detected { live } else { None };
    for i in 0..raw.len() {
        if anomalous[i] {
            if let Some(good) = last_good {
                corrected.values[i] = good;
            }
        } else {
            last_good = Some(corrected.values[i]);
        }
    }

    if let Some(first_good) = anomalous.iter().position(|a| !a) {
        let fill = (corrected.values[first_good] * params.backfill_ratio).max(anomaly_threshold);
        for i in 0..first_good {
            if corrected.values[i] < anomaly_threshold {
                corrected.values[i] = fill;
            }
        }
    }

    let repaired = anomalous.iter().filter(|a| **a).count();
    if repaired > 0 {
        tracing::debug!(
            repaired,
            reference = reference_value,
            threshold = anomaly_threshold,
            corruption = corruption_detected,
            "Corrected anomalous points"
        );
    }
    corrected
}

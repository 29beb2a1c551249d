use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Source of "now" in unix seconds. Injected so sample planning is deterministic in tests.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| chrono::Utc::now().timestamp().max(0) as u64)
}

pub fn fixed_clock(now: u64) -> Clock {
    Arc::new(move || now)
}

/// Lookback window of a portfolio history chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "1y")]
    Year,
}

/// Sampling parameters for a timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeframeParams {
    pub total_days: u32,
    pub sample_count: usize,
    pub sample_interval_hours: u32,
    pub cache_ttl_secs: u64,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Self::Week, Self::Month, Self::Quarter, Self::Year];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Week => "7d",
            Self::Month => "30d",
            Self::Quarter => "90d",
            Self::Year => "1y",
        }
    }

    pub fn params(&self) -> TimeframeParams {
        match self {
            Self::Week => TimeframeParams {
                total_days: 7,
                sample_count: 14,
                sample_interval_hours: 12,
                cache_ttl_secs: 600,
            },
            Self::Month => TimeframeParams {
                total_days: 30,
                sample_count: 30,
                sample_interval_hours: 24,
                cache_ttl_secs: 1_800,
            },
            Self::Quarter => TimeframeParams {
                total_days: 90,
                sample_count: 45,
                sample_interval_hours: 48,
                cache_ttl_secs: 3_600,
            },
            Self::Year => TimeframeParams {
                total_days: 365,
                sample_count: 52,
                sample_interval_hours: 168,
                cache_ttl_secs: 6 * 3_600,
            },
        }
    }

    pub fn sample_count(&self) -> usize {
        self.params().sample_count
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.params().cache_ttl_secs)
    }

    /// Evenly spaced sample timestamps, oldest first, with the last pinned to `now`.
    pub fn plan_timestamps(&self, now: u64) -> Vec<u64> {
        let params = self.params();
        let interval = params.sample_interval_hours as u64 * 3600;
        let count = params.sample_count as u64;
        (0..count)
            .map(|i| now.saturating_sub((count - 1 - i) * interval))
            .collect()
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7d" => Ok(Self::Week),
            "30d" => Ok(Self::Month),
            "90d" => Ok(Self::Quarter),
            "1y" => Ok(Self::Year),
            other => Err(format!("unknown timeframe '{}', expected 7d, 30d, 90d or 1y", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_760_000_000;

    #[test]
    fn test_sample_counts_and_ordering() {
        for timeframe in Timeframe::ALL {
            let timestamps = timeframe.plan_timestamps(NOW);
            assert_eq!(timestamps.len(), timeframe.sample_count());
            assert!(timestamps.windows(2).all(|w| w[0] < w[1]), "{}", timeframe);
            assert_eq!(*timestamps.last().unwrap(), NOW);
        }
    }

    #[test]
    fn test_week_is_fourteen_samples_twelve_hours_apart() {
        let timestamps = Timeframe::Week.plan_timestamps(NOW);
        assert_eq!(timestamps.len(), 14);
        assert_eq!(timestamps[1] - timestamps[0], 12 * 3600);
        assert_eq!(timestamps[0], NOW - 13 * 12 * 3600);
    }

    #[test]
    fn test_shorter_timeframes_expire_sooner() {
        let ttls: Vec<u64> = Timeframe::ALL.iter().map(|t| t.params().cache_ttl_secs).collect();
        assert!(ttls.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_parse_and_serde_names_agree() {
        for timeframe in Timeframe::ALL {
            let parsed: Timeframe = timeframe.as_str().parse().unwrap();
            assert_eq!(parsed, timeframe);
            let json = serde_json::to_string(&timeframe).unwrap();
            assert_eq!(json, format!("\"{}\"", timeframe.as_str()));
        }
        assert!("2w".parse::<Timeframe>().is_err());
    }
}

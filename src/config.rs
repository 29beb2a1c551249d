use serde::Deserialize;

pub const DEFAULT_CHAINS: [&str; 5] = ["ethereum", "arbitrum", "optimism", "base", "polygon"];

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// When present, the result/progress cache lives in Postgres instead of process memory.
    pub database: Option<DatabaseConfig>,
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub rpc_http: String,
    /// Average seconds per block, used by the block-height estimator.
    pub avg_block_time_secs: f64,
    #[serde(default = "default_rpc_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Enables the event-replay tier for this chain.
    #[serde(default = "default_true")]
    pub event_replay: bool,
    #[serde(default = "default_log_block_range")]
    pub log_block_range: u64,
    #[serde(default = "default_max_log_requests")]
    pub max_log_requests: u64,
    #[serde(default = "default_replay_safety_blocks")]
    pub replay_safety_blocks: u64,
    #[serde(default = "default_multicall_address")]
    pub multicall_address: String,
    #[serde(default = "default_native_symbol")]
    pub native_symbol: String,
    #[serde(default = "default_native_decimals")]
    pub native_decimals: u8,
    /// Identifier of the native asset at the price source, e.g. `coingecko:ethereum`.
    pub native_price_id: Option<String>,
    /// Chain slug used by the price and snapshot sources when it differs from `name`.
    pub provider_slug: Option<String>,
    /// Allow-list queried by the on-chain balance tier.
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

impl ChainConfig {
    pub fn slug(&self) -> &str {
        self.provider_slug.as_deref().unwrap_or(&self.name)
    }
}

fn default_rpc_rps() -> u32 {
    10
}

fn default_burst() -> u32 {
    5
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_log_block_range() -> u64 {
    10_000
}

fn default_max_log_requests() -> u64 {
    40
}

fn default_replay_safety_blocks() -> u64 {
    500
}

fn default_multicall_address() -> String {
    "0xcA11bde05977b3631167028862bE2a173976CA11".to_string()
}

fn default_native_symbol() -> String {
    "ETH".to_string()
}

fn default_native_decimals() -> u8 {
    18
}

#[derive(Debug, Deserialize, Clone)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
}

// ============================================================
// Cache
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    #[serde(default = "default_snapshot_ttl")]
    pub snapshot_ttl_secs: u64,
    #[serde(default = "default_block_ttl")]
    pub block_ttl_secs: u64,
    #[serde(default = "default_token_meta_ttl")]
    pub token_meta_ttl_secs: u64,
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            snapshot_ttl_secs: default_snapshot_ttl(),
            block_ttl_secs: default_block_ttl(),
            token_meta_ttl_secs: default_token_meta_ttl(),
            prune_interval_secs: default_prune_interval(),
        }
    }
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_snapshot_ttl() -> u64 {
    300
}

fn default_block_ttl() -> u64 {
    6 * 3600
}

fn default_token_meta_ttl() -> u64 {
    24 * 3600
}

fn default_prune_interval() -> u64 {
    600
}

// ============================================================
// Retry
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

fn default_jitter_ms() -> u64 {
    250
}

// ============================================================
// History pipeline
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_chain_set")]
    pub default_chains: Vec<String>,
    #[serde(default = "default_valuation_concurrency")]
    pub valuation_concurrency: usize,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default = "default_progress_ttl")]
    pub progress_ttl_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_chains: default_chain_set(),
            valuation_concurrency: default_valuation_concurrency(),
            correction: CorrectionConfig::default(),
            progress_ttl_secs: default_progress_ttl(),
        }
    }
}

fn default_chain_set() -> Vec<String> {
    DEFAULT_CHAINS.iter().map(|c| c.to_string()).collect()
}

fn default_valuation_concurrency() -> usize {
    5
}

fn default_progress_ttl() -> u64 {
    600
}

/// Empirically tuned thresholds for the series correction heuristic.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CorrectionConfig {
    #[serde(default = "default_corruption_multiplier")]
    pub corruption_multiplier: f64,
    #[serde(default = "default_anomaly_ratio")]
    pub anomaly_ratio: f64,
    #[serde(default = "default_backfill_ratio")]
    pub backfill_ratio: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            corruption_multiplier: default_corruption_multiplier(),
            anomaly_ratio: default_anomaly_ratio(),
            backfill_ratio: default_backfill_ratio(),
        }
    }
}

fn default_corruption_multiplier() -> f64 {
    10.0
}

fn default_anomaly_ratio() -> f64 {
    0.3
}

fn default_backfill_ratio() -> f64 {
    0.98
}

// ============================================================
// HTTP providers
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "default_snapshot_provider")]
    pub snapshots: HttpProviderConfig,
    #[serde(default = "default_price_provider")]
    pub prices: HttpProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            snapshots: default_snapshot_provider(),
            prices: default_price_provider(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_http_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_http_rps() -> u32 {
    5
}

fn default_batch_size() -> usize {
    100
}

fn default_snapshot_provider() -> HttpProviderConfig {
    HttpProviderConfig {
        base_url: "https://api.zerion.io/v1".to_string(),
        api_key: None,
        requests_per_second: default_http_rps(),
        burst: default_burst(),
        timeout_ms: default_timeout_ms(),
        batch_size: default_batch_size(),
    }
}

fn default_price_provider() -> HttpProviderConfig {
    HttpProviderConfig {
        base_url: "https://coins.llama.fi".to_string(),
        api_key: None,
        requests_per_second: default_http_rps(),
        burst: default_burst(),
        timeout_ms: default_timeout_ms(),
        batch_size: default_batch_size(),
    }
}

// ============================================================
// API Config
// ============================================================

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_api_host")]
    pub host: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

fn default_api_port() -> u16 {
    3000
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn chain(&self, name: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.name == name)
    }

    fn validate(&self) -> eyre::Result<()> {
        if self.chains.is_empty() {
            return Err(eyre::eyre!("At least one chain must be configured"));
        }
        for chain in &self.chains {
            if chain.avg_block_time_secs <= 0.0 {
                return Err(eyre::eyre!(
                    "Chain '{}' must have a positive avg_block_time_secs",
                    chain.name
                ));
            }
            if !is_hex_address(&chain.multicall_address) {
                return Err(eyre::eyre!(
                    "Invalid multicall address '{}' on chain '{}'",
                    chain.multicall_address,
                    chain.name
                ));
            }
            for token in &chain.tokens {
                if !is_hex_address(&token.address) {
                    return Err(eyre::eyre!(
                        "Invalid token address '{}' for {} on chain '{}'",
                        token.address,
                        token.symbol,
                        chain.name
                    ));
                }
            }
        }
        for name in &self.history.default_chains {
            if self.chain(name).is_none() {
                return Err(eyre::eyre!(
                    "Default chain '{}' is not configured under [[chains]]",
                    name
                ));
            }
        }
        if self.history.valuation_concurrency == 0 {
            return Err(eyre::eyre!("history.valuation_concurrency must be at least 1"));
        }
        let correction = &self.history.correction;
        if correction.corruption_multiplier <= 0.0
            || correction.anomaly_ratio <= 0.0
            || correction.backfill_ratio <= 0.0
        {
            return Err(eyre::eyre!("history.correction ratios must be positive"));
        }
        Ok(())
    }
}

fn is_hex_address(address: &str) -> bool {
    address.starts_with("0x")
        && address.len() == 42
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

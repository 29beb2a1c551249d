pub mod api;
pub mod balances;
pub mod block_estimator;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod prices;
pub mod progress;
pub mod rate_limit;
pub mod sources;
pub mod timeframe;
pub mod tokens;
pub mod types;
pub mod valuation;

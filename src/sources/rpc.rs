use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;

use super::decoder;
use super::{BlockSource, BlockStamp, ChainSource, EventSource, TokenBalance};
use crate::config::{ChainConfig, RetryConfig};
use crate::error::HistoryError;
use crate::rate_limit::ProviderLimiter;
use crate::types::{TokenMeta, TransferEvent, NATIVE_TOKEN};

sol! {
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
    }

    interface IMulticall3 {
        struct Call3 {
            address target;
            bool allowFailure;
            bytes callData;
        }

        struct Call3Result {
            bool success;
            bytes returnData;
        }

        function aggregate3(Call3[] calldata calls) external payable returns (Call3Result[] memory returnData);
    }
}

/// Substrings of node errors that mean "slow down".
const RATE_LIMIT_ERRORS: &[&str] = &[
    "rate limit",
    "too many requests",
    "429",
    "-32005",
    "exceeded the rps",
];

/// Substrings of node errors that retrying cannot fix.
const FATAL_ERRORS: &[&str] = &[
    "block range",
    "query returned more than",
    "execution reverted",
    "invalid params",
];

/// Map a JSON-RPC failure onto the error taxonomy.
fn rpc_error(provider: &str, e: impl std::fmt::Display) -> HistoryError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if RATE_LIMIT_ERRORS.iter().any(|p| lower.contains(p)) {
        HistoryError::RateLimited {
            provider: provider.to_string(),
        }
    } else if FATAL_ERRORS.iter().any(|p| lower.contains(p)) {
        HistoryError::unavailable(provider, message)
    } else {
        HistoryError::Transport {
            provider: provider.to_string(),
            message,
        }
    }
}

struct ChainRpc {
    config: ChainConfig,
    provider: DynProvider,
    limiter: Arc<ProviderLimiter>,
    multicall: Address,
}

/// JSON-RPC access to every configured chain, one rate limiter per chain endpoint.
pub struct RpcClient {
    chains: HashMap<String, ChainRpc>,
}

impl RpcClient {
    pub fn new(chains: &[ChainConfig], retry: &RetryConfig) -> eyre::Result<Self> {
        let mut map = HashMap::new();
        for config in chains {
            let url = config
                .rpc_http
                .parse()
                .map_err(|e| eyre::eyre!("Invalid RPC URL for chain '{}': {}", config.name, e))?;
            let provider = ProviderBuilder::new().connect_http(url).erased();
            let multicall = Address::from_str(&config.multicall_address).map_err(|e| {
                eyre::eyre!("Invalid multicall address for chain '{}': {}", config.name, e)
            })?;
            let limiter = ProviderLimiter::new(
                format!("rpc:{}", config.name),
                config.requests_per_second,
                config.burst,
                config.timeout_ms,
                retry.clone(),
            );

            map.insert(
                config.name.clone(),
                ChainRpc {
                    config: config.clone(),
                    provider,
                    limiter,
                    multicall,
                },
            );
        }
        Ok(Self { chains: map })
    }

    fn chain(&self, chain: &str) -> Result<&ChainRpc, HistoryError> {
        self.chains
            .get(chain)
            .ok_or_else(|| HistoryError::Configuration(format!("no RPC endpoint for chain '{}'", chain)))
    }

    async fn eth_call(&self, rpc: &ChainRpc, to: Address, data: Bytes, block: Option<u64>) -> Result<Bytes, HistoryError> {
        let provider = &rpc.provider;
        let name = rpc.limiter.provider();
        let block_id = block.map(BlockId::number).unwrap_or_else(BlockId::latest);
        let tx = TransactionRequest::default().with_to(to).with_input(data);

        rpc.limiter
            .call("eth_call", || {
                let tx = tx.clone();
                async move {
                    provider
                        .call(tx)
                        .block(block_id)
                        .await
                        .map_err(|e| rpc_error(name, e))
                }
            })
            .await
    }

    async fn logs_for_topic(
        &self,
        rpc: &ChainRpc,
        filter: Filter,
    ) -> Result<Vec<alloy::rpc::types::Log>, HistoryError> {
        let provider = &rpc.provider;
        let name = rpc.limiter.provider();
        let filter = &filter;
        rpc.limiter
            .call("eth_getLogs", || async move {
                provider.get_logs(filter).await.map_err(|e| rpc_error(name, e))
            })
            .await
    }
}

#[async_trait]
impl BlockSource for RpcClient {
    async fn latest_block(&self, chain: &str) -> Result<BlockStamp, HistoryError> {
        let rpc = self.chain(chain)?;
        let provider = &rpc.provider;
        let name = rpc.limiter.provider();

        let block = rpc
            .limiter
            .call("eth_getBlockByNumber", || async move {
                provider
                    .get_block_by_number(BlockNumberOrTag::Latest)
                    .await
                    .map_err(|e| rpc_error(name, e))
            })
            .await?
            .ok_or_else(|| HistoryError::decode(name, "latest block missing"))?;

        Ok(BlockStamp {
            number: block.header.number,
            timestamp: block.header.timestamp,
        })
    }

    async fn block_timestamp(&self, chain: &str, number: u64) -> Result<u64, HistoryError> {
        let rpc = self.chain(chain)?;
        let provider = &rpc.provider;
        let name = rpc.limiter.provider();

        let block = rpc
            .limiter
            .call("eth_getBlockByNumber", || async move {
                provider
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .await
                    .map_err(|e| rpc_error(name, e))
            })
            .await?
            .ok_or_else(|| HistoryError::decode(name, format!("block {} not found", number)))?;

        Ok(block.header.timestamp)
    }
}

#[async_trait]
impl EventSource for RpcClient {
    async fn transfer_events(
        &self,
        chain: &str,
        wallet: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, HistoryError> {
        let rpc = self.chain(chain)?;
        if from_block > to_block {
            return Ok(Vec::new());
        }

        let range = rpc.config.log_block_range.max(1);
        let chunks = (to_block - from_block) / range + 1;
        // Each chunk needs one query for the sending side and one for the receiving side.
        if chunks * 2 > rpc.config.max_log_requests {
            return Err(HistoryError::unavailable(
                rpc.limiter.provider(),
                format!(
                    "log scan of {} blocks needs {} requests (limit {})",
                    to_block - from_block + 1,
                    chunks * 2,
                    rpc.config.max_log_requests
                ),
            ));
        }

        let wallet_topic = wallet.into_word();
        let mut events = Vec::new();
        let mut current = from_block;

        while current <= to_block {
            let end = std::cmp::min(current + range - 1, to_block);

            let sent = Filter::new()
                .event("Transfer(address,address,uint256)")
                .topic1(wallet_topic)
                .from_block(current)
                .to_block(end);
            let received = Filter::new()
                .event("Transfer(address,address,uint256)")
                .topic2(wallet_topic)
                .from_block(current)
                .to_block(end);

            let (sent_logs, received_logs) =
                futures::try_join!(self.logs_for_topic(rpc, sent), self.logs_for_topic(rpc, received))?;

            tracing::trace!(
                chain,
                from = current,
                to = end,
                sent = sent_logs.len(),
                received = received_logs.len(),
                "Fetched transfer logs"
            );

            events.extend(
                sent_logs
                    .iter()
                    .chain(received_logs.iter())
                    .filter_map(|log| decoder::decode_transfer_log(log, chain)),
            );

            current = end + 1;
        }

        // Self-transfers match both filters.
        events.sort_by_key(|e| (e.block_number, e.log_index));
        events.dedup_by(|a, b| a.tx_hash == b.tx_hash && a.log_index == b.log_index);

        tracing::debug!(chain, from_block, to_block, events = events.len(), "Collected transfer events");
        Ok(events)
    }
}

#[async_trait]
impl ChainSource for RpcClient {
    async fn balances_at(
        &self,
        chain: &str,
        wallet: Address,
        block: u64,
        tokens: &[(Address, TokenMeta)],
    ) -> Result<Vec<TokenBalance>, HistoryError> {
        let rpc = self.chain(chain)?;
        let mut balances = Vec::new();

        let erc20: Vec<&(Address, TokenMeta)> = tokens.iter().filter(|(a, _)| *a != NATIVE_TOKEN).collect();
        if !erc20.is_empty() {
            let calls: Vec<IMulticall3::Call3> = erc20
                .iter()
                .map(|(token, _)| IMulticall3::Call3 {
                    target: *token,
                    allowFailure: true,
                    callData: IERC20::balanceOfCall { owner: wallet }.abi_encode().into(),
                })
                .collect();
            let data: Bytes = IMulticall3::aggregate3Call { calls }.abi_encode().into();

            let raw = self.eth_call(rpc, rpc.multicall, data, Some(block)).await?;
            let results = IMulticall3::aggregate3Call::abi_decode_returns(&raw)
                .map_err(|e| HistoryError::decode(rpc.limiter.provider(), e.to_string()))?;

            for ((token, meta), result) in erc20.iter().zip(results) {
                if !result.success {
                    tracing::debug!(chain, token = %token, block, "balanceOf reverted, skipping");
                    continue;
                }
                match IERC20::balanceOfCall::abi_decode_returns(&result.returnData) {
                    Ok(raw) => balances.push(TokenBalance {
                        token_address: *token,
                        meta: meta.clone(),
                        raw,
                    }),
                    Err(e) => {
                        tracing::debug!(chain, token = %token, error = %e, "Undecodable balanceOf result")
                    }
                }
            }
        }

        if let Some((_, meta)) = tokens.iter().find(|(a, _)| *a == NATIVE_TOKEN) {
            let provider = &rpc.provider;
            let name = rpc.limiter.provider();
            let native = rpc
                .limiter
                .call("eth_getBalance", || async move {
                    provider
                        .get_balance(wallet)
                        .block_id(BlockId::number(block))
                        .await
                        .map_err(|e| rpc_error(name, e))
                })
                .await;

            match native {
                Ok(raw) => balances.push(TokenBalance {
                    token_address: NATIVE_TOKEN,
                    meta: meta.clone(),
                    raw,
                }),
                Err(e) => tracing::warn!(chain, block, error = %e, "Native balance lookup failed"),
            }
        }

        Ok(balances)
    }

    async fn token_metadata(&self, chain: &str, token: Address) -> Result<TokenMeta, HistoryError> {
        let rpc = self.chain(chain)?;
        if token == NATIVE_TOKEN {
            return Ok(TokenMeta {
                symbol: rpc.config.native_symbol.clone(),
                decimals: rpc.config.native_decimals,
            });
        }

        let name = rpc.limiter.provider();
        let symbol_raw = self
            .eth_call(rpc, token, IERC20::symbolCall {}.abi_encode().into(), None)
            .await?;
        let decimals_raw = self
            .eth_call(rpc, token, IERC20::decimalsCall {}.abi_encode().into(), None)
            .await?;

        let decimals = IERC20::decimalsCall::abi_decode_returns(&decimals_raw)
            .map_err(|e| HistoryError::decode(name, format!("decimals() of {}: {}", token, e)))?;
        // Some legacy tokens return bytes32 symbols; keep them priceable even if unnamed.
        let symbol = IERC20::symbolCall::abi_decode_returns(&symbol_raw).unwrap_or_else(|_| "UNKNOWN".to_string());

        Ok(TokenMeta { symbol, decimals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_classification() {
        assert!(matches!(
            rpc_error("rpc:ethereum", "HTTP error 429 with body: Too Many Requests"),
            HistoryError::RateLimited { .. }
        ));
        assert!(matches!(
            rpc_error("rpc:ethereum", "query returned more than 10000 results"),
            HistoryError::ProviderUnavailable { .. }
        ));
        assert!(matches!(
            rpc_error("rpc:ethereum", "connection reset by peer"),
            HistoryError::Transport { .. }
        ));
    }

    #[test]
    fn test_log_scan_budget_is_enforced() {
        let mut chain = crate::config::tests::test_chain("ethereum");
        chain.log_block_range = 1_000;
        chain.max_log_requests = 4;
        let client = RpcClient::new(&[chain], &RetryConfig::default()).unwrap();

        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let result = rt.block_on(client.transfer_events("ethereum", Address::ZERO, 0, 10_000));
        assert!(matches!(result, Err(HistoryError::ProviderUnavailable { .. })));
    }

    #[test]
    fn test_unknown_chain_is_configuration_error() {
        let client = RpcClient::new(&[crate::config::tests::test_chain("ethereum")], &RetryConfig::default()).unwrap();
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let result = rt.block_on(client.latest_block("solana"));
        assert!(matches!(result, Err(HistoryError::Configuration(_))));
    }
}

use alloy::primitives::Address;
use std::str::FromStr;

use crate::config::ChainConfig;
use crate::types::{TokenMeta, NATIVE_TOKEN};

/// Build the fixed allow-list queried by the on-chain balance tier for a chain.
/// The native asset always comes first, followed by the configured tokens.
pub fn build_allow_list(config: &ChainConfig) -> Vec<(Address, TokenMeta)> {
    let mut tokens = vec![(
        NATIVE_TOKEN,
        TokenMeta {
            symbol: config.native_symbol.clone(),
            decimals: config.native_decimals,
        },
    )];

    for token in &config.tokens {
        match Address::from_str(&token.address) {
            Ok(address) => {
                if tokens.iter().any(|(a, _)| *a == address) {
                    continue;
                }
                tokens.push((
                    address,
                    TokenMeta {
                        symbol: token.symbol.clone(),
                        decimals: token.decimals,
                    },
                ));
            }
            Err(e) => {
                tracing::error!(
                    chain = %config.name,
                    symbol = %token.symbol,
                    address = %token.address,
                    error = %e,
                    "Invalid token address in config, skipping"
                );
            }
        }
    }
    tokens
}

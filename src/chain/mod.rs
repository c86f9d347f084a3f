//! Chain module - multi-chain RPC access
//!
//! This module provides:
//! - Per-chain RPC endpoint pools with round-robin load balancing
//! - Automatic failover across endpoints within a single call
//! - Gas estimation, fee data, nonce, and submission primitives

pub mod provider;

pub use provider::{ChainRpc, FeeData};

use crate::config::Settings;
use crate::error::{RebalancerError, RebalancerResult};

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// RPC pools for all configured chains, keyed by chain ID.
///
/// Built once at startup from configuration and read-only afterwards.
/// A chain ID absent from the pool is a caller error
/// (`ChainNotConfigured`), not a transport failure.
pub struct ChainRpcPool {
    chains: DashMap<u64, Arc<ChainRpc>>,
}

impl ChainRpcPool {
    /// Build pools for every configured chain.
    pub fn new(settings: &Settings) -> RebalancerResult<Self> {
        let chains = DashMap::new();
        let call_timeout = Duration::from_millis(settings.service.rpc_timeout_ms);

        for (name, chain_config) in &settings.chains {
            let rpc = ChainRpc::new(chain_config.clone(), call_timeout)?;
            info!(
                "Initialized chain {} (ID: {}) with {} usable endpoints",
                name,
                chain_config.chain_id,
                rpc.endpoint_count()
            );
            chains.insert(chain_config.chain_id, Arc::new(rpc));
        }

        Ok(Self { chains })
    }

    /// Get RPC access for a specific chain.
    pub fn get(&self, chain_id: u64) -> RebalancerResult<Arc<ChainRpc>> {
        self.chains
            .get(&chain_id)
            .map(|c| c.clone())
            .ok_or(RebalancerError::ChainNotConfigured { chain_id })
    }

    /// Health check across all chains.
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let checks = self.chains.iter().map(|entry| {
            let chain_id = *entry.key();
            let rpc = entry.value().clone();
            async move {
                let healthy = rpc.health_check().await;
                crate::metrics::record_chain_health(chain_id, healthy);
                (chain_id, healthy)
            }
        });

        futures::future::join_all(checks).await
    }

    /// All configured chain IDs.
    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainConfig, FeeModel};
    use std::collections::HashMap;

    fn settings_with_one_chain() -> Settings {
        let toml_str = r#"
            [service]
            rpc_timeout_ms = 5000

            [api]
            host = "127.0.0.1"
            port = 8080

            [metrics]
            enabled = false
            port = 9090

            [store]
            url = "redis://127.0.0.1:6379"
            quote_ttl_secs = 300

            [pricing]
            coingecko_api_key = "k"

            [pricing.coingecko_ids]
            USDC = "usd-coin"

            [wallet]
            private_key_env = "REBALANCER_PRIVATE_KEY"

            [chains.base]
            chain_id = 8453
            name = "Base"
            rpc_urls = ["https://base.example.com", "https://base2.example.com"]
            fee_model = "eip1559"
            block_time_secs = 2
        "#;
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn unknown_chain_is_not_configured() {
        let pool = ChainRpcPool::new(&settings_with_one_chain()).unwrap();

        assert!(pool.get(8453).is_ok());
        assert!(matches!(
            pool.get(999),
            Err(RebalancerError::ChainNotConfigured { chain_id: 999 })
        ));
    }

    #[test]
    fn pool_holds_all_configured_chains() {
        let mut settings = settings_with_one_chain();
        settings.chains.insert(
            "optimism".to_string(),
            ChainConfig {
                chain_id: 10,
                name: "Optimism".to_string(),
                rpc_urls: vec!["https://opt.example.com".to_string()],
                fee_model: FeeModel::Legacy,
                block_time_secs: 2,
                tokens: HashMap::new(),
            },
        );

        let pool = ChainRpcPool::new(&settings).unwrap();
        let mut ids = pool.chain_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![10, 8453]);
    }
}

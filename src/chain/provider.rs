//! Per-chain RPC access with multi-endpoint load balancing and failover

use crate::config::ChainConfig;
use crate::error::{RebalancerError, RebalancerResult, RpcStage};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Default priority tip when the network does not suggest one.
const DEFAULT_PRIORITY_FEE_WEI: u64 = 2_000_000_000; // 2 gwei

/// Fee parameters fetched from a chain in a single round-trip.
///
/// Chains on the legacy fee scheme reuse `max_fee_per_gas` as their flat
/// gas price downstream, so one fetch serves both models.
#[derive(Debug, Clone, Copy)]
pub struct FeeData {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// RPC access to a single chain across multiple HTTP endpoints.
///
/// Reads rotate through the endpoint list via an atomic cursor shared by
/// all concurrent callers; an endpoint failure moves the call to the next
/// endpoint and the operation only fails once every endpoint has been
/// tried. Submission does not rotate: a failed submit may already have
/// reached the mempool, and re-sending through another endpoint would risk
/// a double spend of the nonce.
pub struct ChainRpc {
    config: ChainConfig,
    http_providers: Vec<Provider<Http>>,
    cursor: AtomicUsize,
    call_timeout: Duration,
}

impl ChainRpc {
    pub fn new(config: ChainConfig, call_timeout: Duration) -> RebalancerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider);
                    debug!("Added RPC endpoint for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Skipping malformed RPC URL {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RebalancerError::Config(format!(
                "chain {} has no usable RPC endpoints",
                config.chain_id
            )));
        }

        Ok(Self {
            config,
            http_providers,
            cursor: AtomicUsize::new(0),
            call_timeout,
        })
    }

    /// Next endpoint slot in round-robin order.
    fn next_index(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % self.http_providers.len()
    }

    fn next_http(&self) -> &Provider<Http> {
        &self.http_providers[self.next_index()]
    }

    fn rpc_error(&self, stage: RpcStage, message: impl Into<String>) -> RebalancerError {
        RebalancerError::Rpc {
            chain_id: self.config.chain_id,
            stage,
            message: message.into(),
        }
    }

    /// Estimate gas for a transaction, rotating endpoints on failure.
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> RebalancerResult<U256> {
        let mut last_err = String::new();

        for _ in 0..self.http_providers.len() {
            let provider = self.next_http();
            match timeout(self.call_timeout, provider.estimate_gas(tx, None)).await {
                Ok(Ok(gas)) => return Ok(gas),
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    warn!(
                        "Gas estimate failed on chain {}: {}",
                        self.config.chain_id, last_err
                    );
                }
                Err(_) => {
                    last_err = "request timed out".to_string();
                    warn!("Gas estimate timed out on chain {}", self.config.chain_id);
                }
            }
            crate::metrics::record_endpoint_failover(self.config.chain_id);
        }

        Err(self.rpc_error(RpcStage::EstimateGas, last_err))
    }

    /// Fetch current fee parameters, rotating endpoints on failure.
    pub async fn fee_data(&self) -> RebalancerResult<FeeData> {
        let mut last_err = String::new();

        for _ in 0..self.http_providers.len() {
            let provider = self.next_http();
            match timeout(self.call_timeout, self.fetch_fee_data(provider)).await {
                Ok(Ok(fee_data)) => return Ok(fee_data),
                Ok(Err(e)) => {
                    last_err = e;
                    warn!(
                        "Fee data fetch failed on chain {}: {}",
                        self.config.chain_id, last_err
                    );
                }
                Err(_) => {
                    last_err = "request timed out".to_string();
                    warn!("Fee data fetch timed out on chain {}", self.config.chain_id);
                }
            }
            crate::metrics::record_endpoint_failover(self.config.chain_id);
        }

        Err(self.rpc_error(RpcStage::FeeData, last_err))
    }

    async fn fetch_fee_data(&self, provider: &Provider<Http>) -> Result<FeeData, String> {
        let block = provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "no latest block".to_string())?;

        match block.base_fee_per_gas {
            Some(base_fee) => {
                let priority = U256::from(DEFAULT_PRIORITY_FEE_WEI);
                // Double the base fee to absorb per-block variability.
                Ok(FeeData {
                    max_fee_per_gas: base_fee * 2 + priority,
                    max_priority_fee_per_gas: priority,
                })
            }
            None => {
                // Pre-1559 chain: the flat gas price stands in for both fields.
                let price = provider.get_gas_price().await.map_err(|e| e.to_string())?;
                Ok(FeeData {
                    max_fee_per_gas: price,
                    max_priority_fee_per_gas: price,
                })
            }
        }
    }

    /// Pending-state transaction count for an address, rotating endpoints
    /// on failure.
    pub async fn transaction_count(&self, address: Address) -> RebalancerResult<u64> {
        let mut last_err = String::new();

        for _ in 0..self.http_providers.len() {
            let provider = self.next_http();
            match timeout(
                self.call_timeout,
                provider.get_transaction_count(address, Some(BlockNumber::Pending.into())),
            )
            .await
            {
                Ok(Ok(count)) => return Ok(count.as_u64()),
                Ok(Err(e)) => {
                    last_err = e.to_string();
                    warn!(
                        "Nonce fetch failed on chain {}: {}",
                        self.config.chain_id, last_err
                    );
                }
                Err(_) => {
                    last_err = "request timed out".to_string();
                    warn!("Nonce fetch timed out on chain {}", self.config.chain_id);
                }
            }
            crate::metrics::record_endpoint_failover(self.config.chain_id);
        }

        Err(self.rpc_error(RpcStage::Nonce, last_err))
    }

    /// Submit a signed transaction through the current endpoint.
    pub async fn submit(&self, signed: Bytes) -> RebalancerResult<H256> {
        let provider = self.next_http();

        match timeout(self.call_timeout, provider.send_raw_transaction(signed)).await {
            Ok(Ok(pending)) => Ok(pending.tx_hash()),
            Ok(Err(e)) => Err(self.rpc_error(RpcStage::Submit, e.to_string())),
            Err(_) => Err(self.rpc_error(RpcStage::Submit, "request timed out")),
        }
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        let provider = self.next_http();
        match timeout(self.call_timeout, provider.get_block_number()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                error!(
                    "Health check failed for chain {}: {}",
                    self.config.chain_id, e
                );
                false
            }
            Err(_) => {
                error!("Health check timed out for chain {}", self.config.chain_id);
                false
            }
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.http_providers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeeModel;
    use std::collections::HashMap;

    fn chain_config(urls: Vec<&str>) -> ChainConfig {
        ChainConfig {
            chain_id: 10,
            name: "Optimism".to_string(),
            rpc_urls: urls.into_iter().map(String::from).collect(),
            fee_model: FeeModel::Eip1559,
            block_time_secs: 2,
            tokens: HashMap::new(),
        }
    }

    #[test]
    fn cursor_rotates_round_robin() {
        let rpc = ChainRpc::new(
            chain_config(vec![
                "http://one.example.com",
                "http://two.example.com",
                "http://three.example.com",
            ]),
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(rpc.endpoint_count(), 3);

        // Successive picks cover all three endpoint slots, then wrap.
        let picks: Vec<usize> = (0..4).map(|_| rpc.next_index()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0]);
    }

    #[test]
    fn malformed_urls_are_skipped() {
        let rpc = ChainRpc::new(
            chain_config(vec!["not a url", "http://ok.example.com"]),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(rpc.endpoint_count(), 1);
    }

    #[test]
    fn no_usable_endpoints_is_a_config_error() {
        let result = ChainRpc::new(chain_config(vec![]), Duration::from_secs(1));
        assert!(matches!(result, Err(RebalancerError::Config(_))));
    }
}

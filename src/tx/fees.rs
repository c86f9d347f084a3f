//! Fee model resolution and transaction shaping

use super::builder::TransferTemplate;
use crate::chain::FeeData;
use crate::config::{FeeModel, Settings};
use crate::error::{RebalancerError, RebalancerResult};

use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use std::collections::HashMap;

/// Static chain-id -> fee-model lookup.
///
/// The model is configuration, not chain state: resolving the same chain
/// always yields the same model for the life of the process.
pub struct FeeModelResolver {
    models: HashMap<u64, FeeModel>,
}

impl FeeModelResolver {
    pub fn new(settings: &Settings) -> Self {
        let models = settings
            .chains
            .values()
            .map(|c| (c.chain_id, c.fee_model))
            .collect();
        Self { models }
    }

    pub fn resolve(&self, chain_id: u64) -> RebalancerResult<FeeModel> {
        self.models
            .get(&chain_id)
            .copied()
            .ok_or(RebalancerError::ChainNotConfigured { chain_id })
    }
}

/// Shape a transfer template plus fetched chain state into a signable
/// transaction for the chain's fee model.
///
/// Legacy chains take `fee_data.max_fee_per_gas` as their flat gas price,
/// so the one fee-data fetch serves both models.
pub fn shape_transaction(
    template: &TransferTemplate,
    from: Address,
    chain_id: u64,
    nonce: u64,
    gas_limit: U256,
    fee_data: &FeeData,
    model: FeeModel,
) -> TypedTransaction {
    match model {
        FeeModel::Eip1559 => {
            let tx = Eip1559TransactionRequest::new()
                .from(from)
                .to(template.to)
                .value(template.value)
                .data(template.data.clone())
                .nonce(nonce)
                .gas(gas_limit)
                .max_fee_per_gas(fee_data.max_fee_per_gas)
                .max_priority_fee_per_gas(fee_data.max_priority_fee_per_gas)
                .chain_id(chain_id);
            TypedTransaction::Eip1559(tx)
        }
        FeeModel::Legacy => {
            let tx = TransactionRequest::new()
                .from(from)
                .to(template.to)
                .value(template.value)
                .data(template.data.clone())
                .nonce(nonce)
                .gas(gas_limit)
                .gas_price(fee_data.max_fee_per_gas)
                .chain_id(chain_id);
            TypedTransaction::Legacy(tx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;
    use std::str::FromStr;

    fn template() -> TransferTemplate {
        TransferTemplate {
            to: Address::from_str("0x1111111111111111111111111111111111111111").unwrap(),
            value: U256::from(5u64),
            data: Bytes::default(),
        }
    }

    fn fee_data() -> FeeData {
        FeeData {
            max_fee_per_gas: U256::from(40_000_000_000u64),
            max_priority_fee_per_gas: U256::from(2_000_000_000u64),
        }
    }

    fn sender() -> Address {
        Address::from_str("0x2222222222222222222222222222222222222222").unwrap()
    }

    #[test]
    fn eip1559_shape_copies_fee_fields_verbatim() {
        let tx = shape_transaction(
            &template(),
            sender(),
            10,
            7,
            U256::from(21_000u64),
            &fee_data(),
            FeeModel::Eip1559,
        );

        match tx {
            TypedTransaction::Eip1559(inner) => {
                assert_eq!(inner.max_fee_per_gas, Some(U256::from(40_000_000_000u64)));
                assert_eq!(
                    inner.max_priority_fee_per_gas,
                    Some(U256::from(2_000_000_000u64))
                );
                assert_eq!(inner.nonce, Some(U256::from(7u64)));
                assert_eq!(inner.gas, Some(U256::from(21_000u64)));
            }
            other => panic!("expected EIP-1559 transaction, got {:?}", other),
        }
    }

    #[test]
    fn legacy_shape_reuses_max_fee_as_gas_price() {
        let tx = shape_transaction(
            &template(),
            sender(),
            1,
            7,
            U256::from(21_000u64),
            &fee_data(),
            FeeModel::Legacy,
        );

        match tx {
            TypedTransaction::Legacy(inner) => {
                assert_eq!(inner.gas_price, Some(U256::from(40_000_000_000u64)));
                assert_eq!(inner.nonce, Some(U256::from(7u64)));
            }
            other => panic!("expected legacy transaction, got {:?}", other),
        }
    }

    #[test]
    fn resolver_is_a_pure_lookup() {
        let settings: Settings = toml::from_str(
            r#"
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

            [chains.mainnet]
            chain_id = 1
            name = "Ethereum"
            rpc_urls = ["https://eth.example.com"]
            fee_model = "legacy"
            block_time_secs = 12

            [chains.optimism]
            chain_id = 10
            name = "Optimism"
            rpc_urls = ["https://opt.example.com"]
            fee_model = "eip1559"
            block_time_secs = 2
        "#,
        )
        .unwrap();

        let resolver = FeeModelResolver::new(&settings);
        for _ in 0..3 {
            assert_eq!(resolver.resolve(1).unwrap(), FeeModel::Legacy);
            assert_eq!(resolver.resolve(10).unwrap(), FeeModel::Eip1559);
        }
        assert!(matches!(
            resolver.resolve(999),
            Err(RebalancerError::ChainNotConfigured { chain_id: 999 })
        ));
    }
}

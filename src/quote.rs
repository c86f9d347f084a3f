//! Quote engine
//!
//! Converts a transfer request into a fee, a destination output amount,
//! and a transfer time estimate, using live USD prices and destination
//! chain gas cost.

use crate::chain::ChainRpcPool;
use crate::error::{RebalancerError, RebalancerResult};
use crate::price::{PriceOracle, UsdPrice};
use crate::tx::{TransactionBuilder, TransferTemplate, NATIVE_ASSET};

use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A transfer as requested by the caller. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub recipient_address: Address,
    pub origin_chain_id: u64,
    pub destination_chain_id: u64,
    pub origin_asset: String,
    pub destination_asset: String,
    /// Amount in the smallest unit of the origin asset.
    pub amount: U256,
}

/// The answer to a quote request. Immutable once returned; settlement
/// reproduces the recorded output amount exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResult {
    /// Fee in whole units of the origin asset.
    pub fee: f64,
    /// Destination-asset amount, smallest units.
    pub destination_output_amount: U256,
    pub time_estimate_secs: u64,
}

/// Orchestrates price lookups, transaction construction, and gas queries
/// into a quote.
pub struct QuoteEngine {
    oracle: Arc<dyn PriceOracle>,
    pool: Arc<ChainRpcPool>,
    builder: Arc<TransactionBuilder>,
    /// Account the representative transaction is estimated as.
    sender: Address,
    markup: f64,
    net_fee_from_output: bool,
    block_times: HashMap<u64, u64>,
}

impl QuoteEngine {
    pub fn new(
        oracle: Arc<dyn PriceOracle>,
        pool: Arc<ChainRpcPool>,
        builder: Arc<TransactionBuilder>,
        sender: Address,
        settings: &crate::config::Settings,
    ) -> Self {
        let block_times = settings
            .chains
            .values()
            .map(|c| (c.chain_id, c.block_time_secs))
            .collect();

        Self {
            oracle,
            pool,
            builder,
            sender,
            markup: settings.markup(),
            net_fee_from_output: settings.service.net_fee_from_output,
            block_times,
        }
    }

    /// Produce a quote for a requested transfer.
    pub async fn quote(&self, request: &TransferRequest) -> RebalancerResult<QuoteResult> {
        let rpc = self.pool.get(request.destination_chain_id)?;
        let block_time = self
            .block_times
            .get(&request.destination_chain_id)
            .copied()
            .ok_or(RebalancerError::ChainNotConfigured {
                chain_id: request.destination_chain_id,
            })?;

        // Three independent lookups; any one failing aborts the quote.
        let (origin_price, destination_price, native_price) = tokio::try_join!(
            self.oracle.usd_price(&request.origin_asset),
            self.oracle.usd_price(&request.destination_asset),
            self.oracle.usd_price(NATIVE_ASSET),
        )?;

        let origin_decimals = self
            .builder
            .decimals(request.origin_chain_id, &request.origin_asset)?;

        let gross_output = destination_output_amount(
            request.amount,
            origin_price,
            destination_price,
            origin_decimals,
        )
        .ok_or_else(|| {
            RebalancerError::InvalidRequest("transfer value overflows conversion".to_string())
        })?;

        // Representative transaction for gas estimation.
        let template = self.builder.build(
            request.destination_chain_id,
            &request.destination_asset,
            request.recipient_address,
            gross_output,
        )?;
        let estimate_tx = estimate_request(&template, self.sender);

        let (gas_limit, fee_data) =
            tokio::try_join!(rpc.estimate_gas(&estimate_tx), rpc.fee_data())?;

        let fee = transfer_fee(
            gas_limit,
            fee_data.max_fee_per_gas,
            origin_price,
            native_price,
            self.markup,
        );

        debug!(
            gas_limit = %gas_limit,
            max_fee_per_gas = %fee_data.max_fee_per_gas,
            fee,
            "Computed transfer fee"
        );

        let destination_output_amount = if self.net_fee_from_output {
            net_output(
                gross_output,
                fee,
                origin_price,
                destination_price,
                self.builder
                    .decimals(request.destination_chain_id, &request.destination_asset)?,
            )
        } else {
            gross_output
        };

        let result = QuoteResult {
            fee,
            destination_output_amount,
            time_estimate_secs: estimate_transfer_time(block_time),
        };

        info!(
            destination_chain = request.destination_chain_id,
            output = %result.destination_output_amount,
            fee = result.fee,
            "Quote produced"
        );

        Ok(result)
    }
}

/// Transfer time policy: two block confirmations on the destination chain.
pub fn estimate_transfer_time(block_time_secs: u64) -> u64 {
    block_time_secs * 2
}

/// Destination-asset units matching the value of `amount` origin units,
/// rounded up. The ceiling keeps conversion dust on the rebalancer's
/// side of the ledger.
///
/// Returns `None` on a zero destination price or if the intermediate
/// product overflows.
pub fn destination_output_amount(
    amount: U256,
    origin_price: UsdPrice,
    destination_price: UsdPrice,
    origin_decimals: u32,
) -> Option<U256> {
    if destination_price == 0 {
        return None;
    }

    let numerator = amount.checked_mul(U256::from(origin_price))?;
    let scale = U256::from(10u8).checked_pow(U256::from(origin_decimals))?;
    let denominator = U256::from(destination_price).checked_mul(scale)?;

    let (quotient, remainder) = numerator.div_mod(denominator);
    if remainder.is_zero() {
        Some(quotient)
    } else {
        quotient.checked_add(U256::one())
    }
}

/// Fee in whole origin-asset units: destination gas cost converted through
/// the origin/native USD price ratio, plus the configured markup.
pub fn transfer_fee(
    gas_limit: U256,
    gas_price: U256,
    origin_price: UsdPrice,
    native_price: UsdPrice,
    markup: f64,
) -> f64 {
    if native_price == 0 {
        return 0.0;
    }

    let fee_native = u256_to_f64(gas_limit) * u256_to_f64(gas_price) / 1e18;
    let rate = origin_price as f64 / native_price as f64;
    fee_native * rate * (1.0 + markup.max(0.0))
}

/// Net the fee out of the output amount, clamping at zero. The fee is in
/// origin-asset units and is converted into destination smallest units at
/// the quoted prices before subtraction.
pub fn net_output(
    gross_output: U256,
    fee: f64,
    origin_price: UsdPrice,
    destination_price: UsdPrice,
    destination_decimals: u32,
) -> U256 {
    if destination_price == 0 || fee <= 0.0 {
        return gross_output;
    }

    let rate = origin_price as f64 / destination_price as f64;
    let fee_destination_units = (fee * rate * 10f64.powi(destination_decimals as i32)).ceil();

    if fee_destination_units >= u128::MAX as f64 {
        return U256::zero();
    }

    gross_output.saturating_sub(U256::from(fee_destination_units as u128))
}

fn estimate_request(template: &TransferTemplate, from: Address) -> TypedTransaction {
    TransactionRequest::new()
        .from(from)
        .to(template.to)
        .value(template.value)
        .data(template.data.clone())
        .into()
}

fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse().unwrap_or(f64::INFINITY)
}

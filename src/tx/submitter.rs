//! Settlement submission
//!
//! Builds the final transfer from a stored quote record, attaches fresh
//! chain state, signs with the rebalancer key, and submits.

use super::builder::{TransactionBuilder, TransferTemplate};
use super::fees::{shape_transaction, FeeModelResolver};
use crate::chain::ChainRpcPool;
use crate::config::Settings;
use crate::error::{RebalancerError, RebalancerResult};
use crate::store::QuoteRecord;

use dashmap::DashMap;
use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Submits settlement transactions for previously quoted transfers.
pub struct SettlementSubmitter {
    pool: Arc<ChainRpcPool>,
    builder: Arc<TransactionBuilder>,
    fee_models: FeeModelResolver,
    wallet: LocalWallet,
    /// Serializes the fetch-nonce -> submit window per destination chain.
    /// Without it, two concurrent settlements for the same signer would
    /// race to the same nonce.
    submit_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl SettlementSubmitter {
    pub fn new(
        pool: Arc<ChainRpcPool>,
        builder: Arc<TransactionBuilder>,
        fee_models: FeeModelResolver,
        wallet: LocalWallet,
    ) -> Self {
        info!(
            "Settlement submitter initialized with signer {:?}",
            wallet.address()
        );

        Self {
            pool,
            builder,
            fee_models,
            wallet,
            submit_locks: DashMap::new(),
        }
    }

    /// Load the signing key from the environment variable named in
    /// configuration.
    pub fn load_wallet(settings: &Settings) -> RebalancerResult<LocalWallet> {
        let var = &settings.wallet.private_key_env;
        let key = std::env::var(var)
            .map_err(|_| RebalancerError::Wallet(format!("{} is not set", var)))?;

        key.parse::<LocalWallet>()
            .map_err(|e| RebalancerError::Wallet(format!("Invalid private key: {}", e)))
    }

    pub fn signer_address(&self) -> Address {
        self.wallet.address()
    }

    /// Submit the settlement for a stored quote and return its hash.
    ///
    /// The transferred amount is read from the record, never recomputed:
    /// the quote is the contract with the counterparty. Failures carry
    /// the stage they occurred at, so the caller can tell a safe retry
    /// (nothing submitted) from a risky one (submit may have landed).
    pub async fn settle(&self, record: &QuoteRecord) -> RebalancerResult<H256> {
        let chain_id = record.request.destination_chain_id;
        let rpc = self.pool.get(chain_id)?;
        let model = self.fee_models.resolve(chain_id)?;
        let template = self.settlement_template(record)?;

        let from = self.wallet.address();
        let estimate_tx: TypedTransaction = TransactionRequest::new()
            .from(from)
            .to(template.to)
            .value(template.value)
            .data(template.data.clone())
            .into();

        let lock = self.submit_lock(chain_id);
        let _guard = lock.lock().await;

        let (nonce, gas_limit, fee_data) = tokio::try_join!(
            rpc.transaction_count(from),
            rpc.estimate_gas(&estimate_tx),
            rpc.fee_data(),
        )?;

        let tx = shape_transaction(&template, from, chain_id, nonce, gas_limit, &fee_data, model);

        let wallet = self.wallet.clone().with_chain_id(chain_id);
        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| RebalancerError::Wallet(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);

        let tx_hash = rpc.submit(raw).await?;

        crate::metrics::record_settlement_submitted(chain_id);
        info!(
            "Settlement submitted on chain {} with nonce {}: {:?}",
            chain_id, nonce, tx_hash
        );

        Ok(tx_hash)
    }

    /// The transfer exactly as quoted.
    fn settlement_template(&self, record: &QuoteRecord) -> RebalancerResult<TransferTemplate> {
        self.builder.build(
            record.request.destination_chain_id,
            &record.request.destination_asset,
            record.request.recipient_address,
            record.quote.destination_output_amount,
        )
    }

    fn submit_lock(&self, chain_id: u64) -> Arc<Mutex<()>> {
        self.submit_locks
            .entry(chain_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

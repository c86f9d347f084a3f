//! Error types for the rebalancer

use axum::http::StatusCode;
use thiserror::Error;

/// Stage of a settlement at which an RPC call failed.
///
/// Settlement failures carry their stage so the caller can judge whether a
/// retry is nonce-safe: a failure before `Submit` never left the process,
/// while a failed submit may still have reached the mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcStage {
    EstimateGas,
    FeeData,
    Nonce,
    Submit,
}

impl std::fmt::Display for RpcStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RpcStage::EstimateGas => "gas-estimate",
            RpcStage::FeeData => "fee-data",
            RpcStage::Nonce => "nonce",
            RpcStage::Submit => "submit",
        };
        f.write_str(s)
    }
}

/// Main error type for the rebalancer
#[derive(Error, Debug)]
pub enum RebalancerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Chain {chain_id} has no RPC endpoints configured")]
    ChainNotConfigured { chain_id: u64 },

    #[error("No token mapping for {asset} on chain {chain_id}")]
    UnknownToken { chain_id: u64, asset: String },

    #[error("Price unavailable for {asset}: {message}")]
    PriceUnavailable { asset: String, message: String },

    #[error("RPC error on chain {chain_id} at {stage} stage: {message}")]
    Rpc {
        chain_id: u64,
        stage: RpcStage,
        message: String,
    },

    #[error("Store error: {0}")]
    Store(String),

    #[error("No quote found for request {request_id}")]
    StaleQuote { request_id: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RebalancerError {
    /// HTTP status the API layer surfaces this error as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RebalancerError::InvalidRequest(_)
            | RebalancerError::ChainNotConfigured { .. }
            | RebalancerError::UnknownToken { .. } => StatusCode::BAD_REQUEST,
            RebalancerError::StaleQuote { .. } => StatusCode::NOT_FOUND,
            RebalancerError::PriceUnavailable { .. }
            | RebalancerError::Rpc { .. } => StatusCode::BAD_GATEWAY,
            RebalancerError::Config(_)
            | RebalancerError::Wallet(_)
            | RebalancerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code for structured API responses.
    pub fn code(&self) -> &'static str {
        match self {
            RebalancerError::Config(_) => "configuration_error",
            RebalancerError::Wallet(_) => "wallet_error",
            RebalancerError::ChainNotConfigured { .. } => "chain_not_configured",
            RebalancerError::UnknownToken { .. } => "unknown_token_mapping",
            RebalancerError::PriceUnavailable { .. } => "price_unavailable",
            RebalancerError::Rpc { .. } => "rpc_error",
            RebalancerError::Store(_) => "store_error",
            RebalancerError::StaleQuote { .. } => "stale_quote",
            RebalancerError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Result type for rebalancer operations
pub type RebalancerResult<T> = Result<T, RebalancerError>;

//! HTTP API for quoting and settling transfers
//!
//! Request-shape validation (hex patterns, required fields) happens here,
//! before the core components run.

use crate::chain::ChainRpcPool;
use crate::config::ApiConfig;
use crate::error::{RebalancerError, RebalancerResult};
use crate::quote::{QuoteEngine, TransferRequest};
use crate::store::{QuoteRecord, QuoteStore};
use crate::tx::SettlementSubmitter;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use ethers::types::{Address, U256};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

lazy_static! {
    static ref ADDRESS_RE: Regex = Regex::new(r"^0x[0-9a-fA-F]{40}$").unwrap();
    static ref SYMBOL_RE: Regex = Regex::new(r"^[A-Za-z0-9]{1,16}$").unwrap();
    static ref REQUEST_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QuoteEngine>,
    pub submitter: Arc<SettlementSubmitter>,
    pub store: Arc<dyn QuoteStore>,
    pub pool: Arc<ChainRpcPool>,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> RebalancerResult<()> {
    let app = Router::new()
        .route("/quote", post(quote))
        .route("/settle", post(settle))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RebalancerError::Config(format!("cannot bind API server: {}", e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RebalancerError::Config(format!("API server failed: {}", e)))?;

    Ok(())
}

impl IntoResponse for RebalancerError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Quote a transfer and persist the record for settlement.
async fn quote(
    State(state): State<AppState>,
    Json(payload): Json<QuoteApiRequest>,
) -> Result<Json<QuoteResponse>, RebalancerError> {
    let timer = crate::metrics::quote_timer();
    let request = validate_quote_request(&payload)?;

    let result = match state.engine.quote(&request).await {
        Ok(result) => result,
        Err(e) => {
            crate::metrics::record_quote(false);
            return Err(e);
        }
    };

    let record = QuoteRecord {
        request,
        quote: result.clone(),
        quoted_at: Utc::now(),
    };
    state.store.put(&payload.request_id, &record).await?;

    crate::metrics::record_quote(true);
    timer.observe_duration();

    Ok(Json(QuoteResponse {
        fee: result.fee,
        destination_output_amount: result.destination_output_amount.to_string(),
        time_estimate: result.time_estimate_secs,
    }))
}

/// Settle a previously quoted transfer.
async fn settle(
    State(state): State<AppState>,
    Json(payload): Json<SettleApiRequest>,
) -> Result<Json<SettleResponse>, RebalancerError> {
    let timer = crate::metrics::settlement_timer();

    if !REQUEST_ID_RE.is_match(&payload.request_id) {
        return Err(RebalancerError::InvalidRequest(
            "requestId must be 1-64 characters of [A-Za-z0-9_-]".to_string(),
        ));
    }

    let record = state.store.get(&payload.request_id).await?;

    let tx_hash = match state.submitter.settle(&record).await {
        Ok(hash) => hash,
        Err(e) => {
            crate::metrics::record_settlement(false);
            return Err(e);
        }
    };

    crate::metrics::record_settlement(true);
    timer.observe_duration();

    Ok(Json(SettleResponse {
        transaction_hash: format!("{:?}", tx_hash),
    }))
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify chain connectivity
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chain_health = state.pool.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);

    let status = if chains_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: chains_ok,
            chains: chain_health
                .into_iter()
                .map(|(id, h)| ChainHealth {
                    chain_id: id,
                    healthy: h,
                })
                .collect(),
        }),
    )
}

/// Get configured chains
async fn get_chains(State(state): State<AppState>) -> impl IntoResponse {
    Json(ChainsResponse {
        chains: state.pool.chain_ids(),
    })
}

/// Validate the wire request and lower it into a typed transfer request.
fn validate_quote_request(payload: &QuoteApiRequest) -> RebalancerResult<TransferRequest> {
    if !REQUEST_ID_RE.is_match(&payload.request_id) {
        return Err(RebalancerError::InvalidRequest(
            "requestId must be 1-64 characters of [A-Za-z0-9_-]".to_string(),
        ));
    }

    if !ADDRESS_RE.is_match(&payload.recipient_address) {
        return Err(RebalancerError::InvalidRequest(
            "recipientAddress must be a 0x-prefixed 20-byte hex address".to_string(),
        ));
    }

    for (field, value) in [
        ("originCurrency", &payload.origin_currency),
        ("destinationCurrency", &payload.destination_currency),
    ] {
        if !ADDRESS_RE.is_match(value) && !SYMBOL_RE.is_match(value) {
            return Err(RebalancerError::InvalidRequest(format!(
                "{} must be a hex address or token symbol",
                field
            )));
        }
    }

    let recipient_address = Address::from_str(&payload.recipient_address)
        .map_err(|e| RebalancerError::InvalidRequest(format!("recipientAddress: {}", e)))?;

    let amount = U256::from_dec_str(&payload.amount)
        .map_err(|e| RebalancerError::InvalidRequest(format!("amount: {}", e)))?;

    Ok(TransferRequest {
        recipient_address,
        origin_chain_id: payload.origin_chain_id,
        destination_chain_id: payload.destination_chain_id,
        origin_asset: payload.origin_currency.clone(),
        destination_asset: payload.destination_currency.clone(),
        amount,
    })
}

// Request and response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteApiRequest {
    request_id: String,
    recipient_address: String,
    origin_chain_id: u64,
    destination_chain_id: u64,
    origin_currency: String,
    destination_currency: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleApiRequest {
    request_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    fee: f64,
    destination_output_amount: String,
    time_estimate: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponse {
    transaction_hash: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    chains: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct ChainsResponse {
    chains: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> QuoteApiRequest {
        QuoteApiRequest {
            request_id: "req-1".to_string(),
            recipient_address: "0x1111111111111111111111111111111111111111".to_string(),
            origin_chain_id: 1,
            destination_chain_id: 10,
            origin_currency: "0x0000000000000000000000000000000000000000".to_string(),
            destination_currency: "USDC".to_string(),
            amount: "1000000000000000000".to_string(),
        }
    }

    #[test]
    fn well_formed_request_is_lowered() {
        let request = validate_quote_request(&payload()).unwrap();
        assert_eq!(request.amount, U256::exp10(18));
        assert_eq!(request.destination_asset, "USDC");
        assert_eq!(request.destination_chain_id, 10);
    }

    #[test]
    fn malformed_recipient_is_rejected() {
        let mut p = payload();
        p.recipient_address = "0x123".to_string();
        assert!(matches!(
            validate_quote_request(&p),
            Err(RebalancerError::InvalidRequest(_))
        ));

        p.recipient_address = "1111111111111111111111111111111111111111".to_string();
        assert!(validate_quote_request(&p).is_err());
    }

    #[test]
    fn malformed_currency_is_rejected() {
        let mut p = payload();
        p.destination_currency = "not a symbol!".to_string();
        assert!(validate_quote_request(&p).is_err());
    }

    #[test]
    fn non_integer_amount_is_rejected() {
        let mut p = payload();
        p.amount = "1.5".to_string();
        assert!(validate_quote_request(&p).is_err());

        p.amount = "-3".to_string();
        assert!(validate_quote_request(&p).is_err());
    }

    #[test]
    fn empty_request_id_is_rejected() {
        let mut p = payload();
        p.request_id = String::new();
        assert!(validate_quote_request(&p).is_err());
    }
}

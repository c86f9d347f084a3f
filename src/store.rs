//! Quote record persistence
//!
//! Settlement must transfer exactly what was quoted, so the quote and the
//! request it answered are persisted together between the two calls. The
//! store is an injected client with an explicit connect/close lifecycle;
//! records expire after the configured TTL, after which settlement sees a
//! stale-quote failure.

use crate::config::StoreConfig;
use crate::error::{RebalancerError, RebalancerResult};
use crate::quote::{QuoteResult, TransferRequest};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const KEY_NAMESPACE: &str = "rebalancer:quote";

/// Everything settlement needs to honor a quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRecord {
    pub request: TransferRequest,
    pub quote: QuoteResult,
    pub quoted_at: DateTime<Utc>,
}

/// Keyed blob store for quote records. The key is the caller-supplied
/// request id; eviction policy belongs to the backing store.
#[async_trait]
pub trait QuoteStore: Send + Sync {
    async fn put(&self, request_id: &str, record: &QuoteRecord) -> RebalancerResult<()>;

    /// Fails with `StaleQuote` when the id is unknown, expired, or
    /// already consumed.
    async fn get(&self, request_id: &str) -> RebalancerResult<QuoteRecord>;
}

fn record_key(request_id: &str) -> String {
    format!("{}:{}", KEY_NAMESPACE, request_id)
}

/// Redis-backed quote store.
pub struct RedisStore {
    conn: ConnectionManager,
    quote_ttl_secs: u64,
}

impl RedisStore {
    /// Open the connection. Called once at startup; a failure here is a
    /// fatal configuration problem.
    pub async fn connect(config: &StoreConfig) -> RebalancerResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| RebalancerError::Store(format!("invalid store URL: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| RebalancerError::Store(format!("connection failed: {}", e)))?;

        info!("Connected to quote store");

        Ok(Self {
            conn,
            quote_ttl_secs: config.quote_ttl_secs,
        })
    }

    /// Release the connection. The manager closes its socket on drop;
    /// this exists so shutdown is explicit rather than incidental.
    pub async fn close(self) {
        drop(self.conn);
        info!("Quote store connection closed");
    }
}

#[async_trait]
impl QuoteStore for RedisStore {
    async fn put(&self, request_id: &str, record: &QuoteRecord) -> RebalancerResult<()> {
        let payload = serde_json::to_string(record)
            .map_err(|e| RebalancerError::Store(format!("serialization failed: {}", e)))?;

        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(record_key(request_id), payload, self.quote_ttl_secs as usize)
            .await
            .map_err(|e| RebalancerError::Store(e.to_string()))?;

        debug!("Stored quote record for request {}", request_id);
        Ok(())
    }

    async fn get(&self, request_id: &str) -> RebalancerResult<QuoteRecord> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn
            .get(record_key(request_id))
            .await
            .map_err(|e| RebalancerError::Store(e.to_string()))?;

        let payload = payload.ok_or_else(|| RebalancerError::StaleQuote {
            request_id: request_id.to_string(),
        })?;

        serde_json::from_str(&payload)
            .map_err(|e| RebalancerError::Store(format!("deserialization failed: {}", e)))
    }
}

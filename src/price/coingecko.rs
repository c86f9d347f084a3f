//! CoinGecko price feed

use super::{to_micro_usd, PriceOracle, UsdPrice};
use crate::config::PricingConfig;
use crate::error::{RebalancerError, RebalancerResult};

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::debug;

const SIMPLE_PRICE_URL: &str = "https://api.coingecko.com/api/v3/simple/price";

/// CoinGecko simple-price client.
///
/// Asset identifiers are mapped to CoinGecko ids through configuration;
/// address keys are matched case-insensitively.
pub struct CoinGecko {
    client: reqwest::Client,
    api_key: String,
    ids: HashMap<String, String>,
}

impl CoinGecko {
    pub fn new(config: &PricingConfig) -> Self {
        let ids = config
            .coingecko_ids
            .iter()
            .map(|(asset, id)| (normalize_asset(asset), id.clone()))
            .collect();

        Self {
            client: reqwest::Client::new(),
            api_key: config.coingecko_api_key.clone(),
            ids,
        }
    }

    fn resolve_id(&self, asset: &str) -> RebalancerResult<&str> {
        self.ids
            .get(&normalize_asset(asset))
            .map(String::as_str)
            .ok_or_else(|| RebalancerError::PriceUnavailable {
                asset: asset.to_string(),
                message: "no price feed mapping".to_string(),
            })
    }
}

/// Addresses compare case-insensitively; symbols are conventionally upper
/// case already.
fn normalize_asset(asset: &str) -> String {
    if asset.starts_with("0x") || asset.starts_with("0X") {
        asset.to_lowercase()
    } else {
        asset.to_string()
    }
}

#[async_trait]
impl PriceOracle for CoinGecko {
    async fn usd_price(&self, asset: &str) -> RebalancerResult<UsdPrice> {
        let id = self.resolve_id(asset)?;

        let unavailable = |message: String| RebalancerError::PriceUnavailable {
            asset: asset.to_string(),
            message,
        };

        let response = self
            .client
            .get(SIMPLE_PRICE_URL)
            .query(&[("ids", id), ("vs_currencies", "usd")])
            .header("x-cg-demo-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| unavailable(e.to_string()))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let usd = body
            .get(id)
            .and_then(|entry| entry.get("usd"))
            .and_then(|price| price.as_f64())
            .ok_or_else(|| unavailable(format!("no usd price in response for {}", id)))?;

        let price = to_micro_usd(usd)
            .ok_or_else(|| unavailable(format!("non-positive price {}", usd)))?;

        debug!("Price for {} ({}): {} micro-USD", asset, id, price);
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing_config() -> PricingConfig {
        let mut ids = HashMap::new();
        ids.insert(
            "0x0000000000000000000000000000000000000000".to_string(),
            "ethereum".to_string(),
        );
        ids.insert("USDC".to_string(), "usd-coin".to_string());
        PricingConfig {
            coingecko_api_key: "test-key".to_string(),
            coingecko_ids: ids,
        }
    }

    #[test]
    fn resolves_symbol_and_address_ids() {
        let feed = CoinGecko::new(&pricing_config());
        assert_eq!(feed.resolve_id("USDC").unwrap(), "usd-coin");
        // Address lookup ignores case.
        assert_eq!(
            feed.resolve_id("0x0000000000000000000000000000000000000000")
                .unwrap(),
            "ethereum"
        );
    }

    #[test]
    fn unmapped_asset_is_price_unavailable() {
        let feed = CoinGecko::new(&pricing_config());
        let err = feed.resolve_id("WBTC").unwrap_err();
        assert!(matches!(err, RebalancerError::PriceUnavailable { .. }));
    }
}

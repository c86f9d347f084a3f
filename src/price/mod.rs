//! USD price feeds
//!
//! The quote math only needs one capability: the current USD price of an
//! asset. Prices are fetched fresh for every quote; there is no cache.

pub mod coingecko;

pub use coingecko::CoinGecko;

use crate::error::RebalancerResult;
use async_trait::async_trait;

/// Fixed-point decimals used for USD prices.
pub const USD_DECIMALS: u32 = 6;

/// USD price in micro-USD (10^-6 USD).
pub type UsdPrice = u128;

/// Source of USD prices for assets, keyed by the asset identifier the
/// caller supplied (contract address or symbol).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current USD price of an asset in micro-USD. Always positive;
    /// an unknown or unpriceable asset fails with `PriceUnavailable`.
    async fn usd_price(&self, asset: &str) -> RebalancerResult<UsdPrice>;
}

/// Convert a decimal USD price into micro-USD fixed point.
pub fn to_micro_usd(price: f64) -> Option<UsdPrice> {
    if !price.is_finite() || price <= 0.0 {
        return None;
    }
    Some((price * 10f64.powi(USD_DECIMALS as i32)).round() as UsdPrice)
}

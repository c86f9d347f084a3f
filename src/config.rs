//! Configuration management for the rebalancer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub service: ServiceConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub store: StoreConfig,
    pub pricing: PricingConfig,
    pub wallet: WalletConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Fractional surcharge applied on top of the raw transaction fee.
    /// Missing or negative values are treated as zero, never an error.
    #[serde(default)]
    pub markup: f64,
    /// When set, the quoted fee is netted out of the destination output
    /// amount instead of being returned alongside it.
    #[serde(default)]
    pub net_fee_from_output: bool,
    /// Upper bound for any single RPC call.
    pub rpc_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL for persisted quote records.
    pub url: String,
    /// Seconds a quote record stays retrievable for settlement.
    pub quote_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    /// CoinGecko demo API key; substituted from the environment.
    pub coingecko_api_key: String,
    /// Asset identifier (address or symbol) to CoinGecko id.
    pub coingecko_ids: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the rebalancer signing key.
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    /// Ordered RPC endpoints; reads rotate across all of them.
    pub rpc_urls: Vec<String>,
    pub fee_model: FeeModel,
    /// Average seconds between blocks, used for transfer time estimates.
    pub block_time_secs: u64,
    /// Symbol-keyed token contract table.
    #[serde(default)]
    pub tokens: HashMap<String, TokenConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub address: String,
    pub decimals: u32,
}

/// Fee scheme a chain's transactions use. Static per chain; no request
/// ever changes it.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeeModel {
    Eip1559,
    Legacy,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("REBALANCER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration. Failures here are fatal: the process must
    /// not accept requests with a partial chain or pricing setup.
    pub fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            anyhow::bail!("At least one chain must be configured");
        }

        for (name, chain) in &self.chains {
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if chain.block_time_secs == 0 {
                anyhow::bail!("Chain {} has a zero block time", name);
            }
        }

        if self.store.url.is_empty() {
            anyhow::bail!("Quote store URL is not configured");
        }

        if self.wallet.private_key_env.is_empty() {
            anyhow::bail!("Wallet private key environment variable is not configured");
        }

        if self.pricing.coingecko_ids.is_empty() {
            anyhow::bail!("No price feed asset mappings configured");
        }

        if self.service.markup < 0.0 {
            tracing::warn!(
                markup = self.service.markup,
                "Negative fee markup configured, treating as zero"
            );
        }

        Ok(())
    }

    /// Effective markup: configured value, or zero when unset or invalid.
    pub fn markup(&self) -> f64 {
        if self.service.markup.is_finite() && self.service.markup > 0.0 {
            self.service.markup
        } else {
            0.0
        }
    }

}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_settings() -> Settings {
        let toml_str = r#"
            [service]
            markup = 0.02
            rpc_timeout_ms = 10000

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
            coingecko_api_key = "test-key"

            [pricing.coingecko_ids]
            "0x0000000000000000000000000000000000000000" = "ethereum"
            USDC = "usd-coin"

            [wallet]
            private_key_env = "REBALANCER_PRIVATE_KEY"

            [chains.optimism]
            chain_id = 10
            name = "Optimism"
            rpc_urls = ["https://opt.example.com"]
            fee_model = "eip1559"
            block_time_secs = 2

            [chains.optimism.tokens]
            USDC = { address = "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85", decimals = 6 }
        "#;
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn valid_settings_pass_validation() {
        let settings = sample_settings();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.chains["optimism"].chain_id, 10);
    }

    #[test]
    fn empty_rpc_urls_fail_validation() {
        let mut settings = sample_settings();
        settings.chains.get_mut("optimism").unwrap().rpc_urls.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_block_time_fails_validation() {
        let mut settings = sample_settings();
        settings.chains.get_mut("optimism").unwrap().block_time_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn markup_defaults_to_zero_when_invalid() {
        let mut settings = sample_settings();
        settings.service.markup = -0.5;
        assert_eq!(settings.markup(), 0.0);
        settings.service.markup = f64::NAN;
        assert_eq!(settings.markup(), 0.0);
        settings.service.markup = 0.02;
        assert!((settings.markup() - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn fee_model_parses_lowercase() {
        let settings = sample_settings();
        assert_eq!(
            settings.chains["optimism"].fee_model,
            FeeModel::Eip1559
        );
    }
}

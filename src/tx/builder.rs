//! Transfer transaction construction
//!
//! Builds the unsigned payload for a transfer: a plain value transfer for
//! the native asset, or an ERC-20 `transfer(address,uint256)` call for
//! token assets.

use crate::config::Settings;
use crate::error::{RebalancerError, RebalancerResult};

use ethers::types::{Address, Bytes, U256};
use lazy_static::lazy_static;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

lazy_static! {
    /// First four bytes of keccak256("transfer(address,uint256)").
    static ref TRANSFER_SELECTOR: [u8; 4] = {
        let digest = Keccak256::digest(b"transfer(address,uint256)");
        [digest[0], digest[1], digest[2], digest[3]]
    };
}

/// Sentinel identifier for a chain's native asset.
pub const NATIVE_ASSET: &str = "0x0000000000000000000000000000000000000000";

/// Decimals assumed for the native asset and for address-keyed tokens
/// without a configured table entry.
const DEFAULT_DECIMALS: u32 = 18;

/// A transfer target resolved from a caller-supplied asset identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Asset {
    Native,
    Token(Address),
}

/// Unsigned shape of a transfer before chain state is attached.
///
/// `data` is non-empty exactly when the transfer targets a token contract;
/// `value` is non-zero exactly when the transfer is of the native asset.
#[derive(Debug, Clone)]
pub struct TransferTemplate {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    address: Address,
    decimals: u32,
}

/// Builds transfer templates from per-chain token configuration.
pub struct TransactionBuilder {
    /// chain id -> symbol -> token entry
    tokens: HashMap<u64, HashMap<String, TokenEntry>>,
}

impl TransactionBuilder {
    pub fn new(settings: &Settings) -> RebalancerResult<Self> {
        let mut tokens: HashMap<u64, HashMap<String, TokenEntry>> = HashMap::new();

        for chain in settings.chains.values() {
            let mut table = HashMap::new();
            for (symbol, token) in &chain.tokens {
                let address = Address::from_str(&token.address).map_err(|e| {
                    RebalancerError::Config(format!(
                        "invalid token address for {} on chain {}: {}",
                        symbol, chain.chain_id, e
                    ))
                })?;
                table.insert(
                    symbol.clone(),
                    TokenEntry {
                        address,
                        decimals: token.decimals,
                    },
                );
            }
            tokens.insert(chain.chain_id, table);
        }

        Ok(Self { tokens })
    }

    /// Resolve a caller-supplied asset identifier on a chain.
    ///
    /// Hex identifiers are used directly (the zero address is the native
    /// sentinel); anything else is treated as a symbol and looked up in
    /// the chain's token table.
    pub fn resolve_asset(&self, chain_id: u64, asset: &str) -> RebalancerResult<Asset> {
        if let Ok(address) = Address::from_str(asset) {
            if address.is_zero() {
                return Ok(Asset::Native);
            }
            return Ok(Asset::Token(address));
        }

        self.tokens
            .get(&chain_id)
            .and_then(|table| table.get(asset))
            .map(|entry| Asset::Token(entry.address))
            .ok_or_else(|| RebalancerError::UnknownToken {
                chain_id,
                asset: asset.to_string(),
            })
    }

    /// Decimals of an asset in its smallest-unit representation.
    pub fn decimals(&self, chain_id: u64, asset: &str) -> RebalancerResult<u32> {
        match self.resolve_asset(chain_id, asset)? {
            Asset::Native => Ok(DEFAULT_DECIMALS),
            Asset::Token(address) => Ok(self
                .tokens
                .get(&chain_id)
                .and_then(|table| table.values().find(|t| t.address == address))
                .map(|t| t.decimals)
                .unwrap_or(DEFAULT_DECIMALS)),
        }
    }

    /// Build the unsigned transfer of `amount` to `recipient`.
    pub fn build(
        &self,
        chain_id: u64,
        asset: &str,
        recipient: Address,
        amount: U256,
    ) -> RebalancerResult<TransferTemplate> {
        match self.resolve_asset(chain_id, asset)? {
            Asset::Native => Ok(TransferTemplate {
                to: recipient,
                value: amount,
                data: Bytes::default(),
            }),
            Asset::Token(contract) => {
                let data = encode_transfer(recipient, amount);
                debug!(
                    "Encoded transfer call for {:?}: 0x{}",
                    contract,
                    hex::encode(&data)
                );
                Ok(TransferTemplate {
                    to: contract,
                    value: U256::zero(),
                    data,
                })
            }
        }
    }
}

/// ABI-encode an ERC-20 `transfer(address,uint256)` call.
fn encode_transfer(recipient: Address, amount: U256) -> Bytes {
    let mut data = Vec::with_capacity(4 + 32 + 32);
    data.extend_from_slice(&*TRANSFER_SELECTOR);

    let mut word = [0u8; 32];
    word[12..].copy_from_slice(recipient.as_bytes());
    data.extend_from_slice(&word);

    let mut word = [0u8; 32];
    amount.to_big_endian(&mut word);
    data.extend_from_slice(&word);

    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChainConfig, FeeModel, TokenConfig};

    const USDC_OPTIMISM: &str = "0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85";

    fn builder() -> TransactionBuilder {
        let mut settings: Settings = toml::from_str(
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

            [chains.optimism]
            chain_id = 10
            name = "Optimism"
            rpc_urls = ["https://opt.example.com"]
            fee_model = "eip1559"
            block_time_secs = 2
        "#,
        )
        .unwrap();

        settings.chains.get_mut("optimism").unwrap().tokens.insert(
            "USDC".to_string(),
            TokenConfig {
                address: USDC_OPTIMISM.to_string(),
                decimals: 6,
            },
        );
        settings.chains.insert(
            "arbitrum".to_string(),
            ChainConfig {
                chain_id: 42161,
                name: "Arbitrum".to_string(),
                rpc_urls: vec!["https://arb.example.com".to_string()],
                fee_model: FeeModel::Eip1559,
                block_time_secs: 2,
                tokens: HashMap::new(),
            },
        );

        TransactionBuilder::new(&settings).unwrap()
    }

    fn recipient() -> Address {
        Address::from_str("0x1111111111111111111111111111111111111111").unwrap()
    }

    #[test]
    fn native_transfer_carries_value_and_no_data() {
        let template = builder()
            .build(10, NATIVE_ASSET, recipient(), U256::from(2000u64))
            .unwrap();

        assert_eq!(template.to, recipient());
        assert_eq!(template.value, U256::from(2000u64));
        assert!(template.data.is_empty());
    }

    #[test]
    fn token_transfer_encodes_call_and_zero_value() {
        let template = builder()
            .build(10, "USDC", recipient(), U256::from(2000u64))
            .unwrap();

        assert_eq!(template.to, Address::from_str(USDC_OPTIMISM).unwrap());
        assert_eq!(template.value, U256::zero());
        // selector + two 32-byte words
        assert_eq!(template.data.len(), 68);
        assert_eq!(template.data[..4], [0xa9, 0x05, 0x9c, 0xbb]);
        // recipient right-aligned in the first word
        assert_eq!(&template.data[16..36], recipient().as_bytes());
        // amount right-aligned in the second word
        assert_eq!(U256::from_big_endian(&template.data[36..68]), U256::from(2000u64));
    }

    #[test]
    fn address_keyed_asset_skips_the_table() {
        let other = "0x2222222222222222222222222222222222222222";
        let template = builder()
            .build(42161, other, recipient(), U256::one())
            .unwrap();
        assert_eq!(template.to, Address::from_str(other).unwrap());
        assert!(!template.data.is_empty());
    }

    #[test]
    fn unknown_symbol_fails_with_token_mapping_error() {
        let err = builder()
            .build(42161, "USDC", recipient(), U256::one())
            .unwrap_err();
        assert!(matches!(
            err,
            RebalancerError::UnknownToken {
                chain_id: 42161,
                ..
            }
        ));
    }

    #[test]
    fn decimals_resolution() {
        let b = builder();
        assert_eq!(b.decimals(10, NATIVE_ASSET).unwrap(), 18);
        assert_eq!(b.decimals(10, "USDC").unwrap(), 6);
        // Table entry found by address as well as by symbol.
        assert_eq!(b.decimals(10, USDC_OPTIMISM).unwrap(), 6);
        // Unlisted address falls back to 18.
        assert_eq!(
            b.decimals(10, "0x3333333333333333333333333333333333333333")
                .unwrap(),
            18
        );
    }
}

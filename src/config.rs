// Application configuration: timing bounds, test mode and the chain/pool/relayer table
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::primitives::{parse_address, Address, ChainId, Result, WithdrawError, U256};

pub const MAINNET_CHAIN_ID: ChainId = 1;
pub const SEPOLIA_CHAIN_ID: ChainId = 11_155_111;

const NATIVE_ASSET: &str = "0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bypass every network and chain call and fake successful transactions
    pub test_mode: bool,
    pub testnet: bool,
    pub quote_throttle_secs: u64,
    pub receipt_timeout_secs: u64,
    pub mock_delay_ms: u64,
    pub asp_endpoint: String,
    pub chains: Vec<ChainConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub explorer_url: String,
    pub relayers: Vec<RelayerConfig>,
    pub pools: Vec<PoolInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayerConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub chain_id: ChainId,
    pub address: Address,
    pub asset_address: Address,
    /// Decimal scope identifier
    pub scope: String,
    pub deployment_block: u64,
    pub entry_point_address: Address,
    pub max_deposit: U256,
    pub asset: String,
    pub asset_decimals: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            testnet: true,
            quote_throttle_secs: 20,
            receipt_timeout_secs: 300,
            mock_delay_ms: 2000,
            asp_endpoint: "https://dw.0xbow.io".to_string(),
            chains: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Defaults plus the built-in chain table for the selected network
    pub fn with_builtin_chains(testnet: bool) -> Result<Self> {
        let chains = if testnet {
            vec![sepolia_chain()?]
        } else {
            vec![mainnet_chain()?]
        };
        Ok(Self {
            testnet,
            chains,
            ..Self::default()
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WithdrawError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config: AppConfig = serde_json::from_str(&raw)
            .map_err(|e| WithdrawError::Config(format!("invalid config {}: {}", path.display(), e)))?;

        if config.chains.is_empty() {
            config.chains = Self::with_builtin_chains(config.testnet)?.chains;
        }
        config.validate()?;

        info!("⚙️  Loaded configuration from {} ({} chains, test_mode={})",
            path.display(), config.chains.len(), config.test_mode);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.quote_throttle_secs == 0 {
            return Err(WithdrawError::Config("quote_throttle_secs must be positive".into()));
        }
        if self.receipt_timeout_secs == 0 {
            return Err(WithdrawError::Config("receipt_timeout_secs must be positive".into()));
        }
        for chain in &self.chains {
            if let Some(pool) = chain.pools.iter().find(|p| p.chain_id != chain.chain_id) {
                return Err(WithdrawError::Config(format!(
                    "pool {} listed under chain {} belongs to chain {}",
                    pool.address, chain.chain_id, pool.chain_id
                )));
            }
        }
        Ok(())
    }

    pub fn quote_throttle(&self) -> Duration {
        Duration::from_secs(self.quote_throttle_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn mock_delay(&self) -> Duration {
        Duration::from_millis(self.mock_delay_ms)
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }

    pub fn pool(&self, chain_id: ChainId, asset: &str) -> Option<&PoolInfo> {
        self.chain(chain_id)?
            .pools
            .iter()
            .find(|p| p.asset.eq_ignore_ascii_case(asset))
    }

    pub fn relayer(&self, chain_id: ChainId, url: &str) -> Option<&RelayerConfig> {
        self.chain(chain_id)?.relayers.iter().find(|r| r.url == url)
    }
}

fn addr(value: &str) -> Result<Address> {
    parse_address(value)
}

/// `whole` tokens expressed in base units
fn tokens(whole: u64, decimals: u8) -> U256 {
    U256::from(whole) * U256::from(10u64).pow(U256::from(decimals))
}

fn mainnet_chain() -> Result<ChainConfig> {
    Ok(ChainConfig {
        chain_id: MAINNET_CHAIN_ID,
        name: "Ethereum".to_string(),
        symbol: "ETH".to_string(),
        decimals: 18,
        explorer_url: "https://etherscan.io".to_string(),
        relayers: vec![RelayerConfig {
            name: "Freedom Relay".to_string(),
            url: "https://www.freedomrelay.io".to_string(),
        }],
        pools: vec![PoolInfo {
            chain_id: MAINNET_CHAIN_ID,
            address: addr("0xF241d57C6DebAe225c0F2e6eA1529373C9A9C9fB")?,
            asset_address: addr(NATIVE_ASSET)?,
            scope: "4916574638117198869413701114161172350986437430914933850166949084132905299523".to_string(),
            deployment_block: 22_153_707,
            entry_point_address: addr("0x6818809EefCe719E480a7526D76bD3e561526b46")?,
            max_deposit: tokens(10_000, 18),
            asset: "ETH".to_string(),
            asset_decimals: 18,
        }],
    })
}

fn sepolia_chain() -> Result<ChainConfig> {
    let entry_point = addr("0x34A2068192b1297f2a7f85D7D8CdE66F8F0921cB")?;
    Ok(ChainConfig {
        chain_id: SEPOLIA_CHAIN_ID,
        name: "Sepolia".to_string(),
        symbol: "ETH".to_string(),
        decimals: 18,
        explorer_url: "https://sepolia.etherscan.io".to_string(),
        relayers: vec![
            RelayerConfig {
                name: "Testnet Relay".to_string(),
                url: "https://testnet-relayer.privacypools.com".to_string(),
            },
            RelayerConfig {
                name: "Freedom Relay".to_string(),
                url: "https://www.freedomrelay.io".to_string(),
            },
        ],
        pools: vec![
            PoolInfo {
                chain_id: SEPOLIA_CHAIN_ID,
                address: addr("0x644d5A2554d36e27509254F32ccfeBe8cd58861f")?,
                asset_address: addr(NATIVE_ASSET)?,
                scope: "13541713702858359530363969798588891965037210808099002426745892519913535247342".to_string(),
                deployment_block: 8_587_019,
                entry_point_address: entry_point,
                max_deposit: tokens(1, 18),
                asset: "ETH".to_string(),
                asset_decimals: 18,
            },
            PoolInfo {
                chain_id: SEPOLIA_CHAIN_ID,
                address: addr("0x6709277E170DEe3E54101cDb73a450E392ADfF54")?,
                asset_address: addr("0xaA8E23Fb1079EA71e0a56F48a2aA51851D8433D0")?,
                scope: "9423591183392302543658559874370404687995075471172962430042059179876435583731".to_string(),
                deployment_block: 8_587_019,
                entry_point_address: entry_point,
                max_deposit: tokens(100, 6),
                asset: "USDT".to_string(),
                asset_decimals: 6,
            },
            PoolInfo {
                chain_id: SEPOLIA_CHAIN_ID,
                address: addr("0x34A2068192b1297f2a7f85D7D8CdE66F8F0921cB")?,
                asset_address: addr("0x1c7d4b196cb0c7b01d743fbc6116a902379c7238")?,
                scope: "18021368285297593722986850677939473668942851500120722179451099768921996600282".to_string(),
                deployment_block: 8_587_019,
                entry_point_address: entry_point,
                max_deposit: tokens(100, 6),
                asset: "USDC".to_string(),
                asset_decimals: 6,
            },
        ],
    })
}

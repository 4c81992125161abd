use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub rpc: RpcConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rounds: RoundConfig,
    pub contracts: Vec<ContractConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RpcConfig {
    pub url: String,
    /// Inclusive upper bound of the sync window.
    pub to_block: u64,
    #[serde(default = "default_max_blocks_per_request")]
    pub max_blocks_per_request: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Spans at or below this width are never bisected further on failure.
    #[serde(default = "default_min_range_width")]
    pub min_range_width: u64,
}

fn default_max_blocks_per_request() -> u64 {
    4000
}

fn default_max_concurrent_jobs() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_min_range_width() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Round derivation parameters. With `phase_blocks = 0` the round column is
/// left null for every event. `origin_block` doubles as the first block
/// scanned for pairs that have never been synced.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RoundConfig {
    #[serde(default)]
    pub origin_block: u64,
    #[serde(default)]
    pub phase_blocks: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContractConfig {
    /// Logical contract name used for sync bookkeeping. Several entries may
    /// share one on-chain address.
    pub name: String,
    pub address: String,
    pub abi_files: Vec<String>,
}

impl Config {
    pub fn load(path: &str) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("Failed to read config file '{}': {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| eyre::eyre!("Failed to parse config file '{}': {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.rpc.url.is_empty() {
            return Err(eyre::eyre!("RPC url must not be empty"));
        }
        if self.rpc.max_blocks_per_request == 0 {
            return Err(eyre::eyre!("max_blocks_per_request must be at least 1"));
        }
        if self.rpc.min_range_width == 0 {
            return Err(eyre::eyre!("min_range_width must be at least 1"));
        }
        if self.contracts.is_empty() {
            return Err(eyre::eyre!("At least one contract must be configured"));
        }
        for contract in &self.contracts {
            if !contract.address.starts_with("0x") || contract.address.len() != 42 {
                return Err(eyre::eyre!(
                    "Invalid address '{}' for contract '{}'",
                    contract.address,
                    contract.name
                ));
            }
            if contract.abi_files.is_empty() {
                return Err(eyre::eyre!(
                    "Contract '{}' must list at least one ABI file",
                    contract.name
                ));
            }
        }
        Ok(())
    }
}

//! Configuration for the ledger

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Chain rules (difficulty, rewards, genesis)
    pub chain: ChainConfig,

    /// Mining configuration
    pub mining: MiningConfig,

    /// User defaults
    pub users: UserConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "chain-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            chain: ChainConfig::default(),
            mining: MiningConfig::default(),
            users: UserConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 16,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Consensus rules checked by the miner and the chain verifier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Required leading hex-zero characters in a block hash
    pub difficulty: usize,

    /// Reward credited to the miner of every non-genesis block
    pub block_reward: Decimal,

    /// Account that mines the genesis block and backs deposits and gains
    pub genesis_account: String,

    /// Amount minted to the genesis account at height 0
    pub genesis_reward: Decimal,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            difficulty: 2,
            block_reward: Decimal::from(10),
            genesis_account: "admin".to_string(),
            genesis_reward: Decimal::from(1_000_000_000_000u64),
        }
    }
}

/// Mining configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Account credited by startup and periodic mining passes
    pub miner_account: String,

    /// Periodic mining interval in milliseconds (0 disables)
    pub auto_mine_interval_ms: u64,

    /// Actor mailbox capacity (backpressure bound)
    pub mailbox_capacity: usize,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            miner_account: "admin".to_string(),
            auto_mine_interval_ms: 0,
            mailbox_capacity: 1000,
        }
    }
}

/// Defaults applied to newly created users
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Bet amount assigned on first reference
    pub default_bet: Decimal,

    /// UTC time of day at which a new daily prize day begins
    pub day_start: NaiveTime,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            default_bet: Decimal::from(100),
            day_start: NaiveTime::default(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(difficulty) = std::env::var("LEDGER_DIFFICULTY") {
            config.chain.difficulty = difficulty
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_DIFFICULTY: {}", e)))?;
        }

        if let Ok(reward) = std::env::var("LEDGER_BLOCK_REWARD") {
            config.chain.block_reward = reward
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_BLOCK_REWARD: {}", e)))?;
        }

        if let Ok(account) = std::env::var("LEDGER_GENESIS_ACCOUNT") {
            config.chain.genesis_account = account;
        }

        if let Ok(account) = std::env::var("LEDGER_MINER_ACCOUNT") {
            config.mining.miner_account = account;
        }

        if let Ok(interval) = std::env::var("LEDGER_AUTO_MINE_MS") {
            config.mining.auto_mine_interval_ms = interval
                .parse()
                .map_err(|e| crate::Error::Config(format!("LEDGER_AUTO_MINE_MS: {}", e)))?;
        }

        if let Ok(day_start) = std::env::var("LEDGER_DAY_START") {
            config.users.day_start = NaiveTime::parse_from_str(&day_start, "%H:%M")
                .map_err(|e| crate::Error::Config(format!("LEDGER_DAY_START: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants the chain depends on
    pub fn validate(&self) -> crate::Result<()> {
        if self.chain.difficulty > 64 {
            return Err(crate::Error::Config(format!(
                "difficulty {} exceeds hash length",
                self.chain.difficulty
            )));
        }

        for (name, amount) in [
            ("block_reward", self.chain.block_reward),
            ("genesis_reward", self.chain.genesis_reward),
        ] {
            if amount <= Decimal::ZERO || amount != amount.trunc() {
                return Err(crate::Error::Config(format!(
                    "{} must be a positive whole number, got {}",
                    name, amount
                )));
            }
        }

        if self.chain.genesis_account.is_empty() || self.mining.miner_account.is_empty() {
            return Err(crate::Error::Config(
                "genesis and miner accounts must be non-empty".to_string(),
            ));
        }

        if self.mining.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;

use crate::attestor::Attestor;
use crate::types::ChainSide;

/// Main configuration for the relayer
#[derive(Clone)]
pub struct Config {
    pub chain_a: ChainConfig,
    pub chain_b: ChainConfig,
    /// Hex private key used for both submissions and attestations
    pub relayer_private_key: String,
    /// Optional expected relayer address, checked against the key
    pub relayer_address: Option<String>,
    pub checkpoint: CheckpointConfig,
    pub health: HealthConfig,
    /// Consecutive failures of one event before it is raised as an alert
    pub failure_alert_threshold: u32,
    pub status_bind_address: String,
    pub status_port: u16,
    pub log_format: LogFormat,
}

/// Custom Debug that redacts the relayer key to prevent accidental log leakage.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("chain_a", &self.chain_a)
            .field("chain_b", &self.chain_b)
            .field("relayer_private_key", &"<redacted>")
            .field("relayer_address", &self.relayer_address)
            .field("checkpoint", &self.checkpoint)
            .field("health", &self.health)
            .field("failure_alert_threshold", &self.failure_alert_threshold)
            .field("status_bind_address", &self.status_bind_address)
            .field("status_port", &self.status_port)
            .field("log_format", &self.log_format)
            .finish()
    }
}

/// One bridge deployment
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub bridge_address: String,
    /// Token bound into lock attestations when this chain is the source
    pub token_address: String,
    pub poll_interval_ms: u64,
    pub max_block_range: u64,
    /// First block to scan when no watermark has been checkpointed
    pub start_block: Option<u64>,
    /// Blocks behind head treated as final
    pub confirmations: u64,
    pub gas_limit: u64,
    /// Balance floor (wei) below which the health monitor warns
    pub min_balance_wei: u128,
}

impl ChainConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn bridge(&self) -> Result<Address> {
        Address::from_str(&self.bridge_address)
            .wrap_err_with(|| format!("{}: invalid bridge address", self.name))
    }

    pub fn token(&self) -> Result<Address> {
        Address::from_str(&self.token_address)
            .wrap_err_with(|| format!("{}: invalid token address", self.name))
    }
}

/// Snapshot persistence
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    pub path: PathBuf,
    pub interval_ms: u64,
    /// Processed ids older than this are pruned on flush; `None` keeps them forever
    pub retention_secs: Option<u64>,
}

impl CheckpointConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }
}

/// Health monitor thresholds
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval_ms: u64,
    pub max_lag_blocks: u64,
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" | "" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(eyre!("unknown LOG_FORMAT '{}'", other)),
        }
    }
}

/// Default functions
fn default_poll_interval() -> u64 {
    5000
}

fn default_max_block_range() -> u64 {
    1000
}

fn default_confirmations() -> u64 {
    0
}

fn default_gas_limit() -> u64 {
    300_000
}

fn default_min_balance_wei() -> u128 {
    10_000_000_000_000_000 // 0.01 native
}

fn default_checkpoint_path() -> String {
    "relayer-state.json".to_string()
}

fn default_checkpoint_interval() -> u64 {
    30_000
}

fn default_health_interval() -> u64 {
    60_000
}

fn default_max_lag_blocks() -> u64 {
    100
}

fn default_failure_alert_threshold() -> u32 {
    3
}

fn default_status_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_status_port() -> u16 {
    9098
}

/// Read a required variable
fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| eyre!("{} environment variable is required", key))
}

/// Read and parse a required variable
fn required_parsed<T>(key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = required(key)?;
    raw.trim()
        .parse()
        .map_err(|e| eyre!("{} must be valid: {}", key, e))
}

/// Read and parse an optional variable. Set-but-malformed is an error.
fn optional<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| eyre!("{} must be valid: {}", key, e)),
        _ => Ok(None),
    }
}

impl ChainConfig {
    fn load_from_env(side: ChainSide) -> Result<Self> {
        let prefix = match side {
            ChainSide::A => "CHAIN_A",
            ChainSide::B => "CHAIN_B",
        };
        let key = |suffix: &str| format!("{}_{}", prefix, suffix);

        Ok(ChainConfig {
            name: optional(&key("NAME"))?.unwrap_or_else(|| format!("chain-{}", side)),
            rpc_url: required(&key("RPC_URL"))?,
            chain_id: required_parsed(&key("CHAIN_ID"))?,
            bridge_address: required(&key("BRIDGE_ADDRESS"))?,
            token_address: required(&key("TOKEN_ADDRESS"))?,
            poll_interval_ms: optional(&key("POLL_INTERVAL_MS"))?
                .unwrap_or(default_poll_interval()),
            max_block_range: optional(&key("MAX_BLOCK_RANGE"))?
                .unwrap_or(default_max_block_range()),
            start_block: optional(&key("START_BLOCK"))?,
            confirmations: optional(&key("CONFIRMATIONS"))?.unwrap_or(default_confirmations()),
            gas_limit: optional(&key("GAS_LIMIT"))?.unwrap_or(default_gas_limit()),
            min_balance_wei: optional(&key("MIN_BALANCE_WEI"))?
                .unwrap_or(default_min_balance_wei()),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.rpc_url.trim().is_empty() {
            return Err(eyre!("{}: rpc_url cannot be empty", self.name));
        }
        self.bridge()?;
        self.token()?;
        if self.poll_interval_ms == 0 {
            return Err(eyre!("{}: poll_interval_ms must be greater than 0", self.name));
        }
        if self.max_block_range == 0 {
            return Err(eyre!("{}: max_block_range must be greater than 0", self.name));
        }
        if self.gas_limit == 0 {
            return Err(eyre!("{}: gas_limit must be greater than 0", self.name));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        let path = Path::new(".env");
        if path.exists() {
            dotenvy::from_path(path).wrap_err("Failed to load .env file")?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables only
    pub fn load_from_env() -> Result<Self> {
        let config = Config {
            chain_a: ChainConfig::load_from_env(ChainSide::A)?,
            chain_b: ChainConfig::load_from_env(ChainSide::B)?,
            relayer_private_key: required("RELAYER_PRIVATE_KEY")?,
            relayer_address: optional("RELAYER_ADDRESS")?,
            checkpoint: CheckpointConfig {
                path: PathBuf::from(
                    optional::<String>("CHECKPOINT_PATH")?.unwrap_or_else(default_checkpoint_path),
                ),
                interval_ms: optional("CHECKPOINT_INTERVAL_MS")?
                    .unwrap_or(default_checkpoint_interval()),
                retention_secs: optional("CHECKPOINT_RETENTION_SECS")?,
            },
            health: HealthConfig {
                interval_ms: optional("HEALTH_INTERVAL_MS")?.unwrap_or(default_health_interval()),
                max_lag_blocks: optional("MAX_LAG_BLOCKS")?.unwrap_or(default_max_lag_blocks()),
            },
            failure_alert_threshold: optional("FAILURE_ALERT_THRESHOLD")?
                .unwrap_or(default_failure_alert_threshold()),
            status_bind_address: optional("STATUS_BIND_ADDRESS")?
                .unwrap_or_else(default_status_bind_address),
            status_port: optional("STATUS_PORT")?.unwrap_or(default_status_port()),
            log_format: optional("LOG_FORMAT")?.unwrap_or(LogFormat::Pretty),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.chain_a.validate()?;
        self.chain_b.validate()?;

        if self.chain_a.chain_id == self.chain_b.chain_id {
            return Err(eyre!(
                "chain A and chain B must have different chain ids (both are {})",
                self.chain_a.chain_id
            ));
        }

        if self.checkpoint.interval_ms == 0 {
            return Err(eyre!("checkpoint.interval_ms must be greater than 0"));
        }
        if self.health.interval_ms == 0 {
            return Err(eyre!("health.interval_ms must be greater than 0"));
        }
        if self.failure_alert_threshold == 0 {
            return Err(eyre!("failure_alert_threshold must be greater than 0"));
        }
        if self.checkpoint.retention_secs == Some(0) {
            return Err(eyre!("checkpoint.retention_secs must be greater than 0 when set"));
        }

        // The key itself is checked when the attestor is built; only the
        // optional address cross-check needs it here.
        if let Some(expected) = &self.relayer_address {
            let expected = Address::from_str(expected)
                .wrap_err("RELAYER_ADDRESS must be a valid address")?;
            let attestor = Attestor::from_private_key(&self.relayer_private_key)
                .wrap_err("RELAYER_PRIVATE_KEY is invalid")?;
            if attestor.address() != expected {
                return Err(eyre!(
                    "RELAYER_ADDRESS {} does not match the key's address {}",
                    expected,
                    attestor.address()
                ));
            }
        }

        Ok(())
    }

    pub fn chain(&self, side: ChainSide) -> &ChainConfig {
        match side {
            ChainSide::A => &self.chain_a,
            ChainSide::B => &self.chain_b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const TEST_ADDRESS: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn chain(name: &str, chain_id: u64) -> ChainConfig {
        ChainConfig {
            name: name.to_string(),
            rpc_url: "http://localhost:8545".to_string(),
            chain_id,
            bridge_address: "0x0000000000000000000000000000000000000001".to_string(),
            token_address: "0x0000000000000000000000000000000000000002".to_string(),
            poll_interval_ms: 5000,
            max_block_range: 1000,
            start_block: None,
            confirmations: 0,
            gas_limit: 300_000,
            min_balance_wei: default_min_balance_wei(),
        }
    }

    fn test_config() -> Config {
        Config {
            chain_a: chain("chain-a", 1337),
            chain_b: chain("chain-b", 11155111),
            relayer_private_key: TEST_KEY.to_string(),
            relayer_address: None,
            checkpoint: CheckpointConfig {
                path: PathBuf::from("relayer-state.json"),
                interval_ms: 30_000,
                retention_secs: None,
            },
            health: HealthConfig {
                interval_ms: 60_000,
                max_lag_blocks: 100,
            },
            failure_alert_threshold: 3,
            status_bind_address: "0.0.0.0".to_string(),
            status_port: 9098,
            log_format: LogFormat::Pretty,
        }
    }

    const ENV_KEYS: &[&str] = &[
        "CHAIN_A_NAME",
        "CHAIN_A_RPC_URL",
        "CHAIN_A_CHAIN_ID",
        "CHAIN_A_BRIDGE_ADDRESS",
        "CHAIN_A_TOKEN_ADDRESS",
        "CHAIN_A_START_BLOCK",
        "CHAIN_B_NAME",
        "CHAIN_B_RPC_URL",
        "CHAIN_B_CHAIN_ID",
        "CHAIN_B_BRIDGE_ADDRESS",
        "CHAIN_B_TOKEN_ADDRESS",
        "CHAIN_B_POLL_INTERVAL_MS",
        "RELAYER_PRIVATE_KEY",
        "RELAYER_ADDRESS",
        "CHECKPOINT_RETENTION_SECS",
        "LOG_FORMAT",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    fn set_required_env() {
        env::set_var("CHAIN_A_RPC_URL", "http://localhost:8545");
        env::set_var("CHAIN_A_CHAIN_ID", "1337");
        env::set_var(
            "CHAIN_A_BRIDGE_ADDRESS",
            "0x0000000000000000000000000000000000000001",
        );
        env::set_var(
            "CHAIN_A_TOKEN_ADDRESS",
            "0x0000000000000000000000000000000000000002",
        );
        env::set_var("CHAIN_B_RPC_URL", "http://localhost:8546");
        env::set_var("CHAIN_B_CHAIN_ID", "11155111");
        env::set_var(
            "CHAIN_B_BRIDGE_ADDRESS",
            "0x0000000000000000000000000000000000000003",
        );
        env::set_var(
            "CHAIN_B_TOKEN_ADDRESS",
            "0x0000000000000000000000000000000000000004",
        );
        env::set_var("RELAYER_PRIVATE_KEY", TEST_KEY);
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_poll_interval(), 5000);
        assert_eq!(default_max_block_range(), 1000);
        assert_eq!(default_gas_limit(), 300_000);
        assert_eq!(default_status_port(), 9098);
        assert_eq!(default_failure_alert_threshold(), 3);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_equal_chain_ids_rejected() {
        let mut config = test_config();
        config.chain_b.chain_id = config.chain_a.chain_id;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        let mut config = test_config();
        config.chain_a.bridge_address = "invalid".to_string();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.chain_b.token_address = "0x1234".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let mut config = test_config();
        config.chain_a.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.chain_b.max_block_range = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.checkpoint.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relayer_address_cross_check() {
        let mut config = test_config();
        config.relayer_address = Some(TEST_ADDRESS.to_string());
        assert!(config.validate().is_ok());

        config.relayer_address = Some("0x0000000000000000000000000000000000000009".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let debug = format!("{:?}", test_config());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("ac0974bec39a17e3"));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    #[serial]
    fn test_load_from_env() {
        clear_env();
        set_required_env();
        env::set_var("CHAIN_A_START_BLOCK", "42");
        env::set_var("CHAIN_B_POLL_INTERVAL_MS", "2500");
        env::set_var("CHECKPOINT_RETENTION_SECS", "86400");

        let config = Config::load_from_env().unwrap();
        assert_eq!(config.chain_a.name, "chain-a");
        assert_eq!(config.chain_a.chain_id, 1337);
        assert_eq!(config.chain_a.start_block, Some(42));
        assert_eq!(config.chain_a.poll_interval_ms, 5000);
        assert_eq!(config.chain_b.poll_interval_ms, 2500);
        assert_eq!(config.chain_b.start_block, None);
        assert_eq!(config.checkpoint.retention(), Some(Duration::from_secs(86400)));
        assert_eq!(config.chain(ChainSide::B).chain_id, 11155111);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_from_env_missing_key() {
        clear_env();
        set_required_env();
        env::remove_var("RELAYER_PRIVATE_KEY");

        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("RELAYER_PRIVATE_KEY"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_from_env_malformed_optional() {
        clear_env();
        set_required_env();
        env::set_var("CHAIN_A_START_BLOCK", "not-a-number");

        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("CHAIN_A_START_BLOCK"));

        clear_env();
    }
}

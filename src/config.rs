use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::sentinel::bsc::USDT_BEP20_CONTRACT;
use crate::sentinel::delivery::DEFAULT_SOURCE;
use crate::sentinel::tron::USDT_TRC20_CONTRACT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Identity authority serving the watched address set
    pub directory: EndpointConfig,
    /// Downstream ledger receiving deposit batches
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub bitcoin: BitcoinConfig,
    #[serde(default)]
    pub tron: TronConfig,
    #[serde(default)]
    pub bsc: BscConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_directory_refresh_secs")]
    pub directory_refresh_secs: u64,
    /// Pause between addresses within one chain's poll cycle
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Size above which each dedup record logs a warning. Nothing is evicted.
    #[serde(default)]
    pub dedup_capacity: Option<usize>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            directory_refresh_secs: default_directory_refresh_secs(),
            request_delay_ms: default_request_delay_ms(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            dedup_capacity: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EndpointConfig {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeliveryConfig {
    pub url: String,
    pub token: String,
    #[serde(default = "default_source")]
    pub source: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BitcoinConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_blockcypher_url")]
    pub api_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_btc_min_confirmations")]
    pub min_confirmations: u64,
    #[serde(default = "default_history_limit")]
    pub limit: u32,
    #[serde(default = "default_true")]
    pub push_enabled: bool,
    #[serde(default = "default_btc_push_url")]
    pub push_url: String,
    #[serde(default = "default_price_url")]
    pub price_url: String,
    #[serde(default = "default_price_timeout_ms")]
    pub price_timeout_ms: u64,
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_blockcypher_url(),
            token: None,
            min_confirmations: default_btc_min_confirmations(),
            limit: default_history_limit(),
            push_enabled: true,
            push_url: default_btc_push_url(),
            price_url: default_price_url(),
            price_timeout_ms: default_price_timeout_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TronConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_trongrid_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_trc20_contract")]
    pub contract: String,
    /// Depth reported for solidified transfers
    #[serde(default = "default_solid_confirmations")]
    pub solid_confirmations: u64,
    #[serde(default = "default_history_limit")]
    pub limit: u32,
}

impl Default for TronConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_trongrid_url(),
            api_key: None,
            contract: default_trc20_contract(),
            solid_confirmations: default_solid_confirmations(),
            limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BscConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bscscan_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_bep20_contract")]
    pub contract: String,
    #[serde(default = "default_bsc_min_confirmations")]
    pub min_confirmations: u64,
    #[serde(default = "default_history_limit")]
    pub limit: u32,
    /// WebSocket JSON-RPC endpoint; log subscriptions are off when unset
    #[serde(default)]
    pub push_url: Option<String>,
}

impl Default for BscConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_bscscan_url(),
            api_key: None,
            contract: default_bep20_contract(),
            min_confirmations: default_bsc_min_confirmations(),
            limit: default_history_limit(),
            push_url: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> String {
    "./logs".to_string()
}
fn default_log_file() -> String {
    "deposit_sentinel.log".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_true() -> bool {
    true
}
fn default_poll_interval_secs() -> u64 {
    30
}
fn default_directory_refresh_secs() -> u64 {
    300
}
fn default_request_delay_ms() -> u64 {
    200
}
fn default_reconnect_delay_secs() -> u64 {
    5
}
fn default_http_timeout_secs() -> u64 {
    15
}
fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}
fn default_history_limit() -> u32 {
    50
}
fn default_blockcypher_url() -> String {
    "https://api.blockcypher.com/v1/btc/main".to_string()
}
fn default_btc_min_confirmations() -> u64 {
    1
}
fn default_btc_push_url() -> String {
    "wss://ws.blockchain.info/inv".to_string()
}
fn default_price_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}
fn default_price_timeout_ms() -> u64 {
    3000
}
fn default_trongrid_url() -> String {
    "https://api.trongrid.io".to_string()
}
fn default_trc20_contract() -> String {
    USDT_TRC20_CONTRACT.to_string()
}
fn default_solid_confirmations() -> u64 {
    19
}
fn default_bscscan_url() -> String {
    "https://api.bscscan.com/api".to_string()
}
fn default_bep20_contract() -> String {
    USDT_BEP20_CONTRACT.to_string()
}
fn default_bsc_min_confirmations() -> u64 {
    15
}

impl AppConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}

//! BEP20 Watcher
//!
//! Polls BscScan's `tokentx` list for the tracked token contract and,
//! when a WebSocket RPC endpoint is configured, subscribes to the token's
//! `Transfer` logs addressed to watched wallets.
//!
//! BEP20 USDT carries 18 decimals; the scale is fixed rather than read from
//! the provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::WatcherError;
use super::push::PushChannel;
use super::watcher::{ChainWatcher, DedupRecord, Detection, HistorySource};
use crate::deposit::{Chain, Deposit, DepositKind, UNKNOWN_SENDER};
use crate::directory::AddressDirectory;
use crate::units::{BEP20_USDT_DECIMALS, hex_to_decimal_string, scale_down};

/// USDT on BNB Smart Chain mainnet
pub const USDT_BEP20_CONTRACT: &str = "0x55d398326f99059fF775485246999027B3197955";

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Token transfer as returned by BscScan `module=account&action=tokentx`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bep20Transfer {
    pub hash: String,
    #[serde(default)]
    pub from: String,
    pub to: String,
    pub value: String,
    pub contract_address: String,
    #[serde(default)]
    pub time_stamp: String,
    #[serde(default)]
    pub confirmations: String,
}

impl Bep20Transfer {
    fn confirmations(&self) -> u64 {
        self.confirmations.parse().unwrap_or(0)
    }

    fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.time_stamp
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

// --- Push wire types (eth_subscription notifications) ---

#[derive(Deserialize)]
struct SubscriptionFrame {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<SubscriptionParams>,
}

#[derive(Deserialize)]
struct SubscriptionParams {
    result: TransferLog,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
    transaction_hash: String,
    #[serde(default)]
    removed: bool,
}

/// Last 20 bytes of a 32-byte indexed address topic
fn topic_address(topic: &str) -> Option<String> {
    let body = topic.trim_start_matches("0x");
    if body.len() != 64 || !body.is_ascii() {
        return None;
    }
    Some(format!("0x{}", &body[24..]).to_lowercase())
}

/// Left-pad an address to a 32-byte topic
fn address_topic(address: &str) -> String {
    format!(
        "0x{:0>64}",
        address.trim_start_matches("0x").to_lowercase()
    )
}

impl TransferLog {
    fn into_transfer(self) -> Result<Bep20Transfer, WatcherError> {
        if self.topics.len() < 3 || !self.topics[0].eq_ignore_ascii_case(TRANSFER_TOPIC) {
            return Err(WatcherError::Parse(format!(
                "not a Transfer log: {}",
                self.transaction_hash
            )));
        }
        let from = topic_address(&self.topics[1])
            .ok_or_else(|| WatcherError::Parse(format!("bad from topic: {}", self.topics[1])))?;
        let to = topic_address(&self.topics[2])
            .ok_or_else(|| WatcherError::Parse(format!("bad to topic: {}", self.topics[2])))?;
        let value = hex_to_decimal_string(&self.data)?;

        Ok(Bep20Transfer {
            hash: self.transaction_hash,
            from,
            to,
            value,
            contract_address: self.address,
            time_stamp: String::new(),
            confirmations: "0".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BscSettings {
    pub contract: String,
    pub min_confirmations: u64,
    pub request_delay: Duration,
    pub dedup_warn_above: Option<usize>,
}

impl Default for BscSettings {
    fn default() -> Self {
        Self {
            contract: USDT_BEP20_CONTRACT.to_string(),
            min_confirmations: 15,
            request_delay: Duration::from_millis(200),
            dedup_warn_above: None,
        }
    }
}

pub struct BscWatcher {
    directory: Arc<AddressDirectory>,
    source: Arc<dyn HistorySource<Bep20Transfer>>,
    dedup: DedupRecord,
    settings: BscSettings,
    push: Option<PushChannel>,
}

impl BscWatcher {
    pub fn new(
        directory: Arc<AddressDirectory>,
        source: Arc<dyn HistorySource<Bep20Transfer>>,
        settings: BscSettings,
    ) -> Self {
        Self {
            directory,
            source,
            dedup: DedupRecord::new(settings.dedup_warn_above),
            settings,
            push: None,
        }
    }

    pub fn with_push(mut self, channel: PushChannel) -> Self {
        self.push = Some(channel);
        self
    }

    fn process(
        &self,
        transfer: &Bep20Transfer,
        address: &str,
        detection: Detection,
    ) -> Option<Deposit> {
        if !Chain::Bsc.same_address(&transfer.to, address) {
            return None;
        }
        if !transfer
            .contract_address
            .eq_ignore_ascii_case(&self.settings.contract)
        {
            return None;
        }
        if detection == Detection::Poll && transfer.confirmations() < self.settings.min_confirmations
        {
            debug!(
                tx_hash = %transfer.hash,
                confirmations = %transfer.confirmations,
                "BEP20 transfer below minimum confirmations"
            );
            return None;
        }
        if self.dedup.contains(&transfer.hash) {
            return None;
        }
        let Some(user_id) = self.directory.resolve_owner(address, Chain::Bsc) else {
            debug!(address, tx_hash = %transfer.hash, "No owner for BEP20 address, skipping");
            return None;
        };

        let amount = match scale_down(&transfer.value, BEP20_USDT_DECIMALS) {
            Ok(amount) => amount,
            Err(e) => {
                warn!(tx_hash = %transfer.hash, error = %e, "Bad BEP20 transfer value");
                return None;
            }
        };
        let (confirmations, timestamp) = match detection {
            Detection::Poll => (
                transfer.confirmations(),
                transfer.timestamp().unwrap_or_else(Utc::now),
            ),
            Detection::Push => (0, Utc::now()),
        };

        if !self.dedup.claim(&transfer.hash) {
            debug!(tx_hash = %transfer.hash, "BEP20 transfer already claimed by a concurrent detection");
            return None;
        }

        info!(
            tx_hash = %transfer.hash,
            user_id = %user_id,
            amount = %amount,
            via = ?detection,
            "Detected BEP20 deposit"
        );

        let from_address = if transfer.from.is_empty() {
            UNKNOWN_SENDER.to_string()
        } else {
            transfer.from.clone()
        };

        Some(Deposit {
            user_id,
            kind: DepositKind::Deposit,
            asset: Chain::Bsc.asset().to_string(),
            network: Chain::Bsc,
            amount,
            amount_usd: None,
            transaction_hash: transfer.hash.clone(),
            from_address,
            to_address: address.to_string(),
            timestamp,
            confirmations,
        })
    }
}

#[async_trait]
impl ChainWatcher for BscWatcher {
    fn chain(&self) -> Chain {
        Chain::Bsc
    }

    fn directory(&self) -> &AddressDirectory {
        &self.directory
    }

    fn dedup(&self) -> &DedupRecord {
        &self.dedup
    }

    fn request_delay(&self) -> Duration {
        self.settings.request_delay
    }

    async fn check_address(&self, address: &str) -> Result<Vec<Deposit>, WatcherError> {
        let transfers = self.source.fetch_history(address).await?;
        Ok(transfers
            .iter()
            .filter_map(|t| self.process(t, address, Detection::Poll))
            .collect())
    }

    fn push_channel(&self) -> Option<&PushChannel> {
        self.push.as_ref()
    }

    fn subscribe_frames(&self, addresses: &[String]) -> Vec<String> {
        // an empty `to` filter would match every transfer of the token
        if addresses.is_empty() {
            return Vec::new();
        }
        let to_topics: Vec<String> = addresses.iter().map(|a| address_topic(a)).collect();
        vec![
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "eth_subscribe",
                "params": [
                    "logs",
                    {
                        "address": self.settings.contract,
                        "topics": [TRANSFER_TOPIC, Value::Null, to_topics]
                    }
                ]
            })
            .to_string(),
        ]
    }

    async fn handle_push_frame(&self, frame: &str) -> Vec<Deposit> {
        let parsed: SubscriptionFrame = match serde_json::from_str(frame) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "Unparseable BEP20 push frame");
                return Vec::new();
            }
        };
        if parsed.method.as_deref() != Some("eth_subscription") {
            // subscription acks and other RPC replies
            return Vec::new();
        }
        let Some(params) = parsed.params else {
            return Vec::new();
        };
        if params.result.removed {
            debug!(tx_hash = %params.result.transaction_hash, "Ignoring removed log");
            return Vec::new();
        }

        let transfer = match params.result.into_transfer() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Undecodable BEP20 log");
                return Vec::new();
            }
        };
        let Some(to) = self.directory.listed_spelling(&transfer.to, Chain::Bsc) else {
            return Vec::new();
        };
        self.process(&transfer, &to, Detection::Push)
            .into_iter()
            .collect()
    }
}

/// BscScan token-transfer history client
pub struct BscScanClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    contract: String,
    limit: u32,
}

#[derive(Deserialize)]
struct BscScanResponse {
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

impl BscScanResponse {
    fn into_transfers(self) -> Result<Vec<Bep20Transfer>, WatcherError> {
        if self.status != "1" {
            if self.message.starts_with("No transactions found") {
                return Ok(Vec::new());
            }
            let detail = match &self.result {
                Value::String(s) => s.clone(),
                _ => self.message.clone(),
            };
            return Err(WatcherError::Provider(detail));
        }
        serde_json::from_value(self.result).map_err(|e| WatcherError::Parse(e.to_string()))
    }
}

impl BscScanClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        contract: &str,
        limit: u32,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            contract: contract.to_string(),
            limit,
        })
    }
}

#[async_trait]
impl HistorySource<Bep20Transfer> for BscScanClient {
    async fn fetch_history(&self, address: &str) -> Result<Vec<Bep20Transfer>, WatcherError> {
        let mut query = vec![
            ("module", "account".to_string()),
            ("action", "tokentx".to_string()),
            ("contractaddress", self.contract.clone()),
            ("address", address.to_string()),
            ("page", "1".to_string()),
            ("offset", self.limit.to_string()),
            ("sort", "desc".to_string()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.clone()));
        }

        let body: BscScanResponse = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.into_transfers()
    }
}

//! TRC20 Watcher
//!
//! Polls TronGrid's per-account TRC20 transfer list for the tracked token
//! contract. Amounts use the decimals reported in the transfer's token
//! metadata, falling back to 6 (USDT on TRON) when absent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::WatcherError;
use super::watcher::{ChainWatcher, DedupRecord, HistorySource};
use crate::deposit::{Chain, Deposit, DepositKind, UNKNOWN_SENDER};
use crate::directory::AddressDirectory;
use crate::units::{DEFAULT_TRC20_DECIMALS, scale_down};

/// USDT on TRON mainnet
pub const USDT_TRC20_CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

#[derive(Debug, Clone, Deserialize)]
pub struct Trc20Transfer {
    pub transaction_id: String,
    pub token_info: TokenInfo,
    #[serde(default)]
    pub block_timestamp: i64,
    #[serde(default)]
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    #[serde(default)]
    pub symbol: String,
    pub address: String,
    #[serde(default)]
    pub decimals: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct TronSettings {
    pub contract: String,
    /// Depth reported on deposits; TronGrid returns only solidified transfers
    pub solid_confirmations: u64,
    pub request_delay: Duration,
    pub dedup_warn_above: Option<usize>,
}

impl Default for TronSettings {
    fn default() -> Self {
        Self {
            contract: USDT_TRC20_CONTRACT.to_string(),
            solid_confirmations: 19,
            request_delay: Duration::from_millis(200),
            dedup_warn_above: None,
        }
    }
}

pub struct TronWatcher {
    directory: Arc<AddressDirectory>,
    source: Arc<dyn HistorySource<Trc20Transfer>>,
    dedup: DedupRecord,
    settings: TronSettings,
}

impl TronWatcher {
    pub fn new(
        directory: Arc<AddressDirectory>,
        source: Arc<dyn HistorySource<Trc20Transfer>>,
        settings: TronSettings,
    ) -> Self {
        Self {
            directory,
            source,
            dedup: DedupRecord::new(settings.dedup_warn_above),
            settings,
        }
    }

    fn process(&self, transfer: &Trc20Transfer, address: &str) -> Option<Deposit> {
        if !transfer.kind.is_empty() && transfer.kind != "Transfer" {
            return None;
        }
        if !Chain::Tron.same_address(&transfer.to, address) {
            return None;
        }
        if !transfer
            .token_info
            .address
            .eq_ignore_ascii_case(&self.settings.contract)
        {
            return None;
        }
        if self.dedup.contains(&transfer.transaction_id) {
            return None;
        }
        let Some(user_id) = self.directory.resolve_owner(address, Chain::Tron) else {
            debug!(address, tx_hash = %transfer.transaction_id, "No owner for TRC20 address, skipping");
            return None;
        };

        let decimals = transfer.token_info.decimals.unwrap_or(DEFAULT_TRC20_DECIMALS);
        let amount = match scale_down(&transfer.value, decimals) {
            Ok(amount) => amount,
            Err(e) => {
                warn!(tx_hash = %transfer.transaction_id, error = %e, "Bad TRC20 transfer value");
                return None;
            }
        };
        let timestamp =
            DateTime::from_timestamp_millis(transfer.block_timestamp).unwrap_or_else(Utc::now);

        if !self.dedup.claim(&transfer.transaction_id) {
            return None;
        }

        info!(
            tx_hash = %transfer.transaction_id,
            user_id = %user_id,
            amount = %amount,
            "Detected TRC20 deposit"
        );

        let from_address = if transfer.from.is_empty() {
            UNKNOWN_SENDER.to_string()
        } else {
            transfer.from.clone()
        };

        Some(Deposit {
            user_id,
            kind: DepositKind::Deposit,
            asset: Chain::Tron.asset().to_string(),
            network: Chain::Tron,
            amount,
            amount_usd: None,
            transaction_hash: transfer.transaction_id.clone(),
            from_address,
            to_address: address.to_string(),
            timestamp,
            confirmations: self.settings.solid_confirmations,
        })
    }
}

#[async_trait]
impl ChainWatcher for TronWatcher {
    fn chain(&self) -> Chain {
        Chain::Tron
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
            .filter_map(|t| self.process(t, address))
            .collect())
    }
}

/// TronGrid v1 TRC20 history client
pub struct TronGridClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    contract: String,
    limit: u32,
}

#[derive(Deserialize)]
struct TronGridResponse {
    #[serde(default)]
    data: Vec<Trc20Transfer>,
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl TronGridClient {
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
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            contract: contract.to_string(),
            limit,
        })
    }
}

#[async_trait]
impl HistorySource<Trc20Transfer> for TronGridClient {
    async fn fetch_history(&self, address: &str) -> Result<Vec<Trc20Transfer>, WatcherError> {
        let mut request = self
            .client
            .get(format!(
                "{}/v1/accounts/{}/transactions/trc20",
                self.base_url, address
            ))
            .query(&[
                ("limit", self.limit.to_string()),
                ("only_confirmed", "true".to_string()),
                ("contract_address", self.contract.clone()),
            ]);
        if let Some(key) = &self.api_key {
            request = request.header("TRON-PRO-API-KEY", key);
        }

        let body: TronGridResponse = request.send().await?.error_for_status()?.json().await?;
        if !body.success {
            return Err(WatcherError::Provider(
                body.error.unwrap_or_else(|| "success=false".to_string()),
            ));
        }
        Ok(body.data)
    }
}

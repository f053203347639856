//! BTC Watcher
//!
//! Detects BTC deposits two ways:
//! - polling BlockCypher's per-address full history
//! - a blockchain.info-style WebSocket feed of unconfirmed transactions
//!
//! Amounts are the sum of all outputs paying the watched address, in BTC,
//! plus a best-effort USD value at detection time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::error::WatcherError;
use super::price::{PriceOracle, usd_value};
use super::push::PushChannel;
use super::watcher::{ChainWatcher, DedupRecord, Detection, HistorySource};
use crate::deposit::{Chain, Deposit, DepositKind, UNKNOWN_SENDER};
use crate::directory::AddressDirectory;
use crate::units::satoshi_to_btc;

/// BTC transaction as returned by BlockCypher's `addrs/{addr}/full`
#[derive(Debug, Clone, Deserialize)]
pub struct BtcTransaction {
    pub hash: String,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    pub confirmed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub received: Option<DateTime<Utc>>,
    #[serde(default)]
    pub inputs: Vec<BtcInput>,
    #[serde(default)]
    pub outputs: Vec<BtcOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BtcInput {
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BtcOutput {
    #[serde(default)]
    pub value: u64,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

impl BtcTransaction {
    /// Satoshis paid to `address` across all outputs
    pub fn received_by(&self, address: &str) -> u64 {
        self.outputs
            .iter()
            .filter(|o| {
                o.addresses
                    .iter()
                    .flatten()
                    .any(|a| Chain::Btc.same_address(a, address))
            })
            .map(|o| o.value)
            .sum()
    }

    pub fn first_sender(&self) -> Option<&str> {
        self.inputs
            .iter()
            .flat_map(|i| i.addresses.iter().flatten())
            .map(String::as_str)
            .next()
    }

    /// Output addresses in order, without repeats
    fn output_addresses(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for address in self.outputs.iter().flat_map(|o| o.addresses.iter().flatten()) {
            if !seen.contains(&address.as_str()) {
                seen.push(address);
            }
        }
        seen
    }
}

// --- Push wire types (blockchain.info `utx`) ---

#[derive(Deserialize)]
struct PushFrame {
    op: String,
    #[serde(default)]
    x: Option<UtxPayload>,
}

#[derive(Deserialize)]
struct UtxPayload {
    hash: String,
    #[serde(default)]
    inputs: Vec<UtxInput>,
    #[serde(default)]
    out: Vec<UtxOutput>,
}

#[derive(Deserialize)]
struct UtxInput {
    #[serde(default)]
    prev_out: Option<UtxOutput>,
}

#[derive(Deserialize)]
struct UtxOutput {
    #[serde(default)]
    addr: Option<String>,
    #[serde(default)]
    value: u64,
}

impl From<UtxPayload> for BtcTransaction {
    fn from(utx: UtxPayload) -> Self {
        BtcTransaction {
            hash: utx.hash,
            confirmations: 0,
            confirmed: None,
            received: None,
            inputs: utx
                .inputs
                .into_iter()
                .map(|i| BtcInput {
                    addresses: i.prev_out.and_then(|p| p.addr).map(|a| vec![a]),
                })
                .collect(),
            outputs: utx
                .out
                .into_iter()
                .map(|o| BtcOutput {
                    value: o.value,
                    addresses: o.addr.map(|a| vec![a]),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BtcSettings {
    pub min_confirmations: u64,
    pub request_delay: Duration,
    pub price_timeout: Duration,
    pub dedup_warn_above: Option<usize>,
}

impl Default for BtcSettings {
    fn default() -> Self {
        Self {
            min_confirmations: 1,
            request_delay: Duration::from_millis(200),
            price_timeout: Duration::from_secs(3),
            dedup_warn_above: None,
        }
    }
}

pub struct BtcWatcher {
    directory: Arc<AddressDirectory>,
    source: Arc<dyn HistorySource<BtcTransaction>>,
    price: Arc<dyn PriceOracle>,
    dedup: DedupRecord,
    settings: BtcSettings,
    push: Option<PushChannel>,
}

impl BtcWatcher {
    pub fn new(
        directory: Arc<AddressDirectory>,
        source: Arc<dyn HistorySource<BtcTransaction>>,
        price: Arc<dyn PriceOracle>,
        settings: BtcSettings,
    ) -> Self {
        Self {
            directory,
            source,
            price,
            dedup: DedupRecord::new(settings.dedup_warn_above),
            settings,
            push: None,
        }
    }

    pub fn with_push(mut self, channel: PushChannel) -> Self {
        self.push = Some(channel);
        self
    }

    /// Filter, normalize and claim one candidate transaction for `address`.
    async fn process(
        &self,
        tx: &BtcTransaction,
        address: &str,
        detection: Detection,
    ) -> Option<Deposit> {
        let sats = tx.received_by(address);
        if sats == 0 {
            return None;
        }
        if detection == Detection::Poll && tx.confirmations < self.settings.min_confirmations {
            debug!(
                tx_hash = %tx.hash,
                confirmations = tx.confirmations,
                "BTC tx below minimum confirmations"
            );
            return None;
        }
        if self.dedup.contains(&tx.hash) {
            return None;
        }
        let Some(user_id) = self.directory.resolve_owner(address, Chain::Btc) else {
            debug!(address, tx_hash = %tx.hash, "No owner for BTC address, skipping");
            return None;
        };

        let amount = satoshi_to_btc(sats);
        let amount_usd =
            usd_value(self.price.as_ref(), "BTC", amount, self.settings.price_timeout).await;
        let (confirmations, timestamp) = match detection {
            Detection::Poll => (
                tx.confirmations,
                tx.confirmed.or(tx.received).unwrap_or_else(Utc::now),
            ),
            Detection::Push => (0, Utc::now()),
        };

        if !self.dedup.claim(&tx.hash) {
            debug!(tx_hash = %tx.hash, "BTC tx already claimed by a concurrent detection");
            return None;
        }

        info!(
            tx_hash = %tx.hash,
            user_id = %user_id,
            amount = %amount,
            via = ?detection,
            "Detected BTC deposit"
        );

        Some(Deposit {
            user_id,
            kind: DepositKind::Deposit,
            asset: Chain::Btc.asset().to_string(),
            network: Chain::Btc,
            amount,
            amount_usd,
            transaction_hash: tx.hash.clone(),
            from_address: tx.first_sender().unwrap_or(UNKNOWN_SENDER).to_string(),
            to_address: address.to_string(),
            timestamp,
            confirmations,
        })
    }
}

#[async_trait]
impl ChainWatcher for BtcWatcher {
    fn chain(&self) -> Chain {
        Chain::Btc
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
        let txs = self.source.fetch_history(address).await?;
        let mut deposits = Vec::new();
        for tx in &txs {
            if let Some(deposit) = self.process(tx, address, Detection::Poll).await {
                deposits.push(deposit);
            }
        }
        Ok(deposits)
    }

    fn push_channel(&self) -> Option<&PushChannel> {
        self.push.as_ref()
    }

    fn subscribe_frames(&self, addresses: &[String]) -> Vec<String> {
        std::iter::once(serde_json::json!({ "op": "unconfirmed_sub" }).to_string())
            .chain(
                addresses
                    .iter()
                    .map(|a| serde_json::json!({ "op": "addr_sub", "addr": a }).to_string()),
            )
            .collect()
    }

    async fn handle_push_frame(&self, frame: &str) -> Vec<Deposit> {
        let parsed: PushFrame = match serde_json::from_str(frame) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "Unparseable BTC push frame");
                return Vec::new();
            }
        };
        if parsed.op != "utx" {
            return Vec::new();
        }
        let Some(payload) = parsed.x else {
            return Vec::new();
        };

        let tx = BtcTransaction::from(payload);
        let mut deposits = Vec::new();
        for address in tx.output_addresses() {
            if !self.directory.is_watched(address, Chain::Btc) {
                continue;
            }
            if let Some(deposit) = self.process(&tx, address, Detection::Push).await {
                deposits.push(deposit);
            }
        }
        deposits
    }
}

/// BlockCypher address-history client
pub struct BlockCypherClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    min_confirmations: u64,
    limit: u32,
}

#[derive(Deserialize)]
struct AddressFull {
    #[serde(default)]
    txs: Vec<BtcTransaction>,
}

impl BlockCypherClient {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        min_confirmations: u64,
        limit: u32,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            min_confirmations,
            limit,
        })
    }
}

#[async_trait]
impl HistorySource<BtcTransaction> for BlockCypherClient {
    async fn fetch_history(&self, address: &str) -> Result<Vec<BtcTransaction>, WatcherError> {
        let mut query = vec![
            ("limit", self.limit.to_string()),
            ("confirmations", self.min_confirmations.to_string()),
        ];
        if let Some(token) = &self.token {
            query.push(("token", token.clone()));
        }

        let body: AddressFull = self
            .client
            .get(format!("{}/addrs/{}/full", self.base_url, address))
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(body.txs)
    }
}

use async_trait::async_trait;
use dashmap::DashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::WatcherError;
use super::push::PushChannel;
use crate::deposit::{Chain, Deposit};
use crate::directory::AddressDirectory;

/// Unified interface for watching one chain
#[async_trait]
pub trait ChainWatcher: Send + Sync {
    /// Chain this watcher covers
    fn chain(&self) -> Chain;

    fn directory(&self) -> &AddressDirectory;

    fn dedup(&self) -> &DedupRecord;

    fn dedup_len(&self) -> usize {
        self.dedup().len()
    }

    /// Pause between consecutive address queries in a poll cycle
    fn request_delay(&self) -> Duration;

    /// Poll the provider's history for one address and emit unseen deposits
    async fn check_address(&self, address: &str) -> Result<Vec<Deposit>, WatcherError>;

    /// Poll every watched address for this chain.
    ///
    /// The address list is snapshotted once up front. A failing address
    /// contributes nothing and does not stop the cycle.
    async fn check_all_addresses(&self) -> Vec<Deposit> {
        let chain = self.chain();
        let addresses = self.directory().list_addresses(chain);
        let mut deposits = Vec::new();

        for (i, address) in addresses.iter().enumerate() {
            if i > 0 && !self.request_delay().is_zero() {
                tokio::time::sleep(self.request_delay()).await;
            }

            match self.check_address(address).await {
                Ok(found) => deposits.extend(found),
                Err(e) => warn!(chain = %chain, address = %address, error = %e, "Address check failed"),
            }
        }

        if deposits.is_empty() {
            debug!(chain = %chain, addresses = addresses.len(), "No new deposits");
        } else {
            info!(chain = %chain, count = deposits.len(), "Detected deposits");
        }
        deposits
    }

    /// Live subscription, if this watcher has one configured
    fn push_channel(&self) -> Option<&PushChannel> {
        None
    }

    /// Frames to send after the push channel opens
    fn subscribe_frames(&self, _addresses: &[String]) -> Vec<String> {
        Vec::new()
    }

    /// Extract deposits from one inbound push frame.
    /// Push deposits always carry zero confirmations.
    async fn handle_push_frame(&self, _frame: &str) -> Vec<Deposit> {
        Vec::new()
    }
}

/// Source of a transaction list for one address
#[async_trait]
pub trait HistorySource<T>: Send + Sync {
    async fn fetch_history(&self, address: &str) -> Result<Vec<T>, WatcherError>;
}

/// How a candidate transaction reached the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Poll,
    Push,
}

/// Transaction hashes already turned into deposits by one watcher.
///
/// `claim` is the only way in and is atomic per hash, so a poll cycle and a
/// push frame racing on the same transaction cannot both win.
/// Hashes are never evicted.
#[derive(Debug, Default)]
pub struct DedupRecord {
    seen: DashSet<String>,
    warn_above: Option<usize>,
}

impl DedupRecord {
    pub fn new(warn_above: Option<usize>) -> Self {
        Self {
            seen: DashSet::new(),
            warn_above,
        }
    }

    pub fn contains(&self, tx_hash: &str) -> bool {
        self.seen.contains(tx_hash)
    }

    /// Returns true if this call inserted the hash.
    pub fn claim(&self, tx_hash: &str) -> bool {
        let fresh = self.seen.insert(tx_hash.to_string());
        if fresh && let Some(limit) = self.warn_above {
            let limit = limit.max(1);
            let len = self.seen.len();
            if len > limit && (len == limit + 1 || len % limit == 0) {
                warn!(size = len, limit, "Dedup record above configured size");
            }
        }
        fresh
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

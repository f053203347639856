//! Address Directory
//!
//! Read-mostly cache of watched addresses and their owners, refreshed
//! wholesale from the identity authority.
//!
//! Key principles:
//! - Never partially merge: a refresh either replaces the whole snapshot or
//!   leaves the previous one in place
//! - Grouped lists and owner records live in one immutable snapshot, so they
//!   are always swapped together
//! - Readers get owned copies; an in-flight poll cycle is unaffected by a
//!   concurrent refresh

pub mod authority;
pub mod error;

pub use authority::{AddressBook, HttpIdentityAuthority, IdentityAuthority, UserAddress, UserRecord};
pub use error::DirectoryError;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::deposit::Chain;

/// One consistent view of the authority's address set
#[derive(Debug, Default)]
pub struct DirectorySnapshot {
    addresses: HashMap<Chain, Vec<String>>,
    /// Lowercased address -> spelling as listed, for push-path lookups
    watched: HashMap<Chain, HashMap<String, String>>,
    /// (chain, lowercased address) -> user id
    owners: HashMap<(Chain, String), String>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl DirectorySnapshot {
    pub fn from_book(book: AddressBook) -> Self {
        let mut owners = HashMap::new();
        for user in &book.users {
            for entry in &user.addresses {
                let Some(chain) = Chain::from_network(&entry.network) else {
                    debug!(
                        user_id = %user.user_id,
                        network = %entry.network,
                        "Skipping address on unsupported network"
                    );
                    continue;
                };
                let key = (chain, entry.address.to_lowercase());
                match owners.get(&key) {
                    Some(existing) if existing != &user.user_id => {
                        warn!(
                            chain = %chain,
                            address = %entry.address,
                            kept = %existing,
                            ignored = %user.user_id,
                            "Address claimed by more than one user"
                        );
                    }
                    Some(_) => {}
                    None => {
                        owners.insert(key, user.user_id.clone());
                    }
                }
            }
        }

        let watched = book
            .grouped
            .iter()
            .map(|(chain, list)| {
                let spellings = list.iter().map(|a| (a.to_lowercase(), a.clone())).collect();
                (*chain, spellings)
            })
            .collect();

        Self {
            addresses: book.grouped,
            watched,
            owners,
            refreshed_at: Some(Utc::now()),
        }
    }

    pub fn addresses(&self, chain: Chain) -> &[String] {
        self.addresses.get(&chain).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_watched(&self, address: &str, chain: Chain) -> bool {
        self.listed_spelling(address, chain).is_some()
    }

    /// The address as the authority lists it, matched case-insensitively
    pub fn listed_spelling(&self, address: &str, chain: Chain) -> Option<&str> {
        self.watched
            .get(&chain)
            .and_then(|spellings| spellings.get(&address.to_lowercase()))
            .map(String::as_str)
    }

    pub fn owner(&self, address: &str, chain: Chain) -> Option<&str> {
        self.owners
            .get(&(chain, address.to_lowercase()))
            .map(String::as_str)
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }
}

pub struct AddressDirectory {
    authority: Arc<dyn IdentityAuthority>,
    snapshot: RwLock<Arc<DirectorySnapshot>>,
}

impl AddressDirectory {
    /// Starts empty; call [`refresh`](Self::refresh) before use.
    pub fn new(authority: Arc<dyn IdentityAuthority>) -> Self {
        Self {
            authority,
            snapshot: RwLock::new(Arc::new(DirectorySnapshot::default())),
        }
    }

    /// Fetch the full address set and swap it in.
    ///
    /// Returns `false` and keeps the previous snapshot on any failure.
    pub async fn refresh(&self) -> bool {
        match self.try_refresh().await {
            Ok(count) => {
                info!(addresses = count, "Address directory refreshed");
                true
            }
            Err(e) => {
                warn!(error = %e, "Address directory refresh failed, keeping previous snapshot");
                false
            }
        }
    }

    pub async fn try_refresh(&self) -> Result<usize, DirectoryError> {
        let book = self.authority.fetch_addresses().await?;
        let snapshot = DirectorySnapshot::from_book(book);
        let count = Chain::ALL.iter().map(|c| snapshot.addresses(*c).len()).sum();

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        Ok(count)
    }

    /// Current snapshot; stays valid even if a refresh replaces it.
    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Owned copy of the watched addresses for one chain, in authority order.
    pub fn list_addresses(&self, chain: Chain) -> Vec<String> {
        self.snapshot().addresses(chain).to_vec()
    }

    /// Case-insensitive owner lookup. A miss is not an error.
    pub fn resolve_owner(&self, address: &str, chain: Chain) -> Option<String> {
        self.snapshot().owner(address, chain).map(str::to_string)
    }

    pub fn is_watched(&self, address: &str, chain: Chain) -> bool {
        self.snapshot().is_watched(address, chain)
    }

    pub fn listed_spelling(&self, address: &str, chain: Chain) -> Option<String> {
        self.snapshot()
            .listed_spelling(address, chain)
            .map(str::to_string)
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.snapshot().refreshed_at()
    }

    /// Watched addresses across all chains
    pub fn address_count(&self) -> usize {
        let snapshot = self.snapshot();
        Chain::ALL.iter().map(|c| snapshot.addresses(*c).len()).sum()
    }
}

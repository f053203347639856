//! Hand-written mocks shared by unit tests

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::deposit::{Chain, Deposit, DepositKind, UNKNOWN_SENDER};
use crate::directory::{
    AddressBook, AddressDirectory, DirectoryError, IdentityAuthority, UserAddress, UserRecord,
};
use crate::sentinel::delivery::{DeliveryBoundary, DeliveryReceipt};
use crate::sentinel::error::{DeliveryError, PriceError, WatcherError};
use crate::sentinel::price::PriceOracle;
use crate::sentinel::watcher::HistorySource;

/// Build an address book from (chain, address, user) triples
pub fn book(entries: &[(Chain, &str, &str)]) -> AddressBook {
    let mut book = AddressBook::default();
    for chain in Chain::ALL {
        book.grouped.insert(chain, Vec::new());
    }
    for (chain, address, user) in entries {
        book.grouped.entry(*chain).or_default().push(address.to_string());
        let entry = UserAddress {
            address: address.to_string(),
            network: chain.tag().to_string(),
        };
        match book.users.iter_mut().find(|u| u.user_id == *user) {
            Some(record) => record.addresses.push(entry),
            None => book.users.push(UserRecord {
                user_id: user.to_string(),
                addresses: vec![entry],
            }),
        }
    }
    book
}

/// Add a grouped address with no owner record
pub fn with_orphan(mut book: AddressBook, chain: Chain, address: &str) -> AddressBook {
    book.grouped.entry(chain).or_default().push(address.to_string());
    book
}

pub struct ScriptedAuthority {
    next: Mutex<Result<AddressBook, String>>,
}

impl ScriptedAuthority {
    pub fn new(book: AddressBook) -> Self {
        Self {
            next: Mutex::new(Ok(book)),
        }
    }

    pub fn set_book(&self, book: AddressBook) {
        *self.next.lock().unwrap() = Ok(book);
    }

    pub fn fail_with(&self, message: &str) {
        *self.next.lock().unwrap() = Err(message.to_string());
    }
}

#[async_trait]
impl IdentityAuthority for ScriptedAuthority {
    async fn fetch_addresses(&self) -> Result<AddressBook, DirectoryError> {
        self.next
            .lock()
            .unwrap()
            .clone()
            .map_err(DirectoryError::Rejected)
    }
}

pub async fn directory(entries: &[(Chain, &str, &str)]) -> Arc<AddressDirectory> {
    directory_from(book(entries)).await
}

pub async fn directory_from(book: AddressBook) -> Arc<AddressDirectory> {
    let directory = AddressDirectory::new(Arc::new(ScriptedAuthority::new(book)));
    assert!(directory.refresh().await);
    Arc::new(directory)
}

/// Per-address canned history responses
pub struct MockHistory<T> {
    responses: Mutex<HashMap<String, Result<Vec<T>, String>>>,
    calls: AtomicUsize,
}

impl<T> Default for MockHistory<T> {
    fn default() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone> MockHistory<T> {
    pub fn set(&self, address: &str, txs: Vec<T>) {
        self.responses
            .lock()
            .unwrap()
            .insert(address.to_string(), Ok(txs));
    }

    pub fn fail(&self, address: &str, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(address.to_string(), Err(message.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> HistorySource<T> for MockHistory<T> {
    async fn fetch_history(&self, address: &str) -> Result<Vec<T>, WatcherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().get(address) {
            Some(Ok(txs)) => Ok(txs.clone()),
            Some(Err(msg)) => Err(WatcherError::Provider(msg.clone())),
            None => Ok(Vec::new()),
        }
    }
}

pub struct FixedPrice(pub Decimal);

#[async_trait]
impl PriceOracle for FixedPrice {
    async fn usd_price(&self, _asset: &str) -> Result<Decimal, PriceError> {
        Ok(self.0)
    }
}

pub struct FailingPrice;

#[async_trait]
impl PriceOracle for FailingPrice {
    async fn usd_price(&self, _asset: &str) -> Result<Decimal, PriceError> {
        Err(PriceError::Lookup("feed down".to_string()))
    }
}

pub struct SlowPrice(pub Duration);

#[async_trait]
impl PriceOracle for SlowPrice {
    async fn usd_price(&self, _asset: &str) -> Result<Decimal, PriceError> {
        tokio::time::sleep(self.0).await;
        Ok(Decimal::ONE)
    }
}

#[derive(Default)]
pub struct RecordingBoundary {
    batches: Mutex<Vec<Vec<Deposit>>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingBoundary {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<Deposit>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryBoundary for RecordingBoundary {
    async fn deliver(&self, deposits: &[Deposit]) -> Result<DeliveryReceipt, DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DeliveryError::Rejected("ledger unavailable".to_string()));
        }
        self.batches.lock().unwrap().push(deposits.to_vec());
        Ok(DeliveryReceipt {
            success: true,
            processed: deposits.len() as u64,
            message: None,
        })
    }
}

pub fn sample_deposit(tx_hash: &str) -> Deposit {
    Deposit {
        user_id: "alice".to_string(),
        kind: DepositKind::Deposit,
        asset: "USDT".to_string(),
        network: Chain::Tron,
        amount: Decimal::ONE,
        amount_usd: None,
        transaction_hash: tx_hash.to_string(),
        from_address: UNKNOWN_SENDER.to_string(),
        to_address: "TAlice".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        confirmations: 19,
    }
}

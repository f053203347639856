//! End-to-end monitor scenarios through the public API.
//!
//! Providers, the authority and the ledger are in-memory; the push feed is a
//! local WebSocket server.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use deposit_sentinel::deposit::{Chain, Deposit};
use deposit_sentinel::directory::{
    AddressBook, AddressDirectory, DirectoryError, IdentityAuthority, UserAddress, UserRecord,
};
use deposit_sentinel::sentinel::btc::{BtcInput, BtcOutput, BtcTransaction};
use deposit_sentinel::sentinel::tron::{TokenInfo, Trc20Transfer, USDT_TRC20_CONTRACT};
use deposit_sentinel::sentinel::{
    BtcSettings, BtcWatcher, ConnectionState, DeliveryBoundary, DeliveryError, DeliveryReceipt,
    DepositMonitor, Forwarder, HistorySource, MonitorSettings, PriceError, PriceOracle,
    PushChannel, PushSettings, TronSettings, TronWatcher, WatcherError,
};
use rust_decimal::Decimal;

const ALICE_BTC: &str = "bc1qalice";
const ALICE_TRON: &str = "TAlice";
const BOB_TRON: &str = "TBob";

// --- in-memory collaborators ---

struct Authority(Mutex<Option<AddressBook>>);

impl Authority {
    fn serving(book: AddressBook) -> Arc<Self> {
        Arc::new(Self(Mutex::new(Some(book))))
    }

    fn go_down(&self) {
        *self.0.lock().unwrap() = None;
    }
}

#[async_trait]
impl IdentityAuthority for Authority {
    async fn fetch_addresses(&self) -> Result<AddressBook, DirectoryError> {
        self.0
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DirectoryError::Rejected("authority unavailable".to_string()))
    }
}

fn address_book() -> AddressBook {
    let entry = |address: &str, network: &str| UserAddress {
        address: address.to_string(),
        network: network.to_string(),
    };
    AddressBook {
        grouped: HashMap::from([
            (Chain::Btc, vec![ALICE_BTC.to_string()]),
            (Chain::Tron, vec![ALICE_TRON.to_string(), BOB_TRON.to_string()]),
            (Chain::Bsc, Vec::new()),
        ]),
        users: vec![
            UserRecord {
                user_id: "alice".to_string(),
                addresses: vec![entry(ALICE_BTC, "bitcoin"), entry(ALICE_TRON, "tron")],
            },
            UserRecord {
                user_id: "bob".to_string(),
                addresses: vec![entry(BOB_TRON, "TRC20")],
            },
        ],
    }
}

struct History<T>(Mutex<HashMap<String, Vec<T>>>);

impl<T> History<T> {
    fn empty() -> Arc<Self> {
        Arc::new(Self(Mutex::new(HashMap::new())))
    }

    fn push(&self, address: &str, item: T) {
        self.0
            .lock()
            .unwrap()
            .entry(address.to_string())
            .or_default()
            .push(item);
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> HistorySource<T> for History<T> {
    async fn fetch_history(&self, address: &str) -> Result<Vec<T>, WatcherError> {
        Ok(self.0.lock().unwrap().get(address).cloned().unwrap_or_default())
    }
}

struct NoPrice;

#[async_trait]
impl PriceOracle for NoPrice {
    async fn usd_price(&self, asset: &str) -> Result<Decimal, PriceError> {
        Err(PriceError::Unsupported(asset.to_string()))
    }
}

#[derive(Default)]
struct Ledger(Mutex<Vec<Vec<Deposit>>>);

impl Ledger {
    fn batches(&self) -> Vec<Vec<Deposit>> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryBoundary for Ledger {
    async fn deliver(&self, deposits: &[Deposit]) -> Result<DeliveryReceipt, DeliveryError> {
        self.0.lock().unwrap().push(deposits.to_vec());
        Ok(DeliveryReceipt {
            success: true,
            processed: deposits.len() as u64,
            message: None,
        })
    }
}

fn btc_tx(hash: &str, sats: u64) -> BtcTransaction {
    BtcTransaction {
        hash: hash.to_string(),
        confirmations: 6,
        confirmed: None,
        received: None,
        inputs: vec![BtcInput {
            addresses: Some(vec!["bc1qpayer".to_string()]),
        }],
        outputs: vec![BtcOutput {
            value: sats,
            addresses: Some(vec![ALICE_BTC.to_string()]),
        }],
    }
}

fn trc20(id: &str, to: &str, value: &str) -> Trc20Transfer {
    Trc20Transfer {
        transaction_id: id.to_string(),
        token_info: TokenInfo {
            symbol: "USDT".to_string(),
            address: USDT_TRC20_CONTRACT.to_string(),
            decimals: Some(6),
        },
        block_timestamp: 1_714_564_800_000,
        from: "TPayer".to_string(),
        to: to.to_string(),
        kind: "Transfer".to_string(),
        value: value.to_string(),
    }
}

struct Harness {
    monitor: Arc<DepositMonitor>,
    authority: Arc<Authority>,
    ledger: Arc<Ledger>,
    btc: Arc<History<BtcTransaction>>,
    tron: Arc<History<Trc20Transfer>>,
}

fn harness(settings: MonitorSettings, btc_push: Option<PushChannel>) -> Harness {
    let authority = Authority::serving(address_book());
    let directory = Arc::new(AddressDirectory::new(authority.clone()));
    let ledger = Arc::new(Ledger::default());
    let btc: Arc<History<BtcTransaction>> = History::empty();
    let tron: Arc<History<Trc20Transfer>> = History::empty();

    let mut btc_watcher = BtcWatcher::new(
        directory.clone(),
        btc.clone(),
        Arc::new(NoPrice),
        BtcSettings {
            request_delay: Duration::ZERO,
            ..BtcSettings::default()
        },
    );
    if let Some(channel) = btc_push {
        btc_watcher = btc_watcher.with_push(channel);
    }

    let mut monitor = DepositMonitor::new(
        directory.clone(),
        Arc::new(Forwarder::new(ledger.clone())),
        settings,
    );
    monitor.add_watcher(Arc::new(btc_watcher));
    monitor.add_watcher(Arc::new(TronWatcher::new(
        directory,
        tron.clone(),
        TronSettings {
            request_delay: Duration::ZERO,
            ..TronSettings::default()
        },
    )));

    Harness {
        monitor: Arc::new(monitor),
        authority,
        ledger,
        btc,
        tron,
    }
}

fn hours() -> MonitorSettings {
    MonitorSettings {
        poll_interval: Duration::from_secs(3600),
        directory_refresh_interval: Duration::from_secs(3600),
    }
}

async fn wait_for_batches(ledger: &Ledger, count: usize) -> Vec<Vec<Deposit>> {
    for _ in 0..500 {
        let batches = ledger.batches();
        if batches.len() >= count {
            return batches;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {} batches, got {:?}", count, ledger.batches());
}

#[tokio::test]
async fn first_cycle_delivers_each_deposit_once() {
    let h = harness(hours(), None);
    h.btc.push(ALICE_BTC, btc_tx("b1", 150_000_000));
    h.tron.push(ALICE_TRON, trc20("t1", ALICE_TRON, "1000000"));
    h.tron.push(BOB_TRON, trc20("t2", BOB_TRON, "2500000"));

    h.monitor.start().await;

    let batches = h.ledger.batches();
    assert_eq!(batches.len(), 1);
    let summary: Vec<(&str, &str, String)> = batches[0]
        .iter()
        .map(|d| (d.transaction_hash.as_str(), d.user_id.as_str(), d.amount.to_string()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("b1", "alice", "1.5".to_string()),
            ("t1", "alice", "1".to_string()),
            ("t2", "bob", "2.5".to_string()),
        ]
    );
    assert!(batches[0][0].amount_usd.is_none());

    // history is unchanged, so a second cycle has nothing new
    assert!(h.monitor.check_all_chains().await.is_empty());
    assert_eq!(h.ledger.batches().len(), 1);

    h.monitor.stop();
}

#[tokio::test]
async fn authority_outage_keeps_polling_known_addresses() {
    let h = harness(hours(), None);
    h.monitor.start().await;
    assert!(h.ledger.batches().is_empty());

    h.authority.go_down();
    assert!(!h.monitor.refresh_directory().await);

    h.tron.push(BOB_TRON, trc20("late", BOB_TRON, "5000000"));
    let found = h.monitor.check_all_chains().await;

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].user_id, "bob");
    assert_eq!(h.ledger.batches().len(), 1);

    let status = h.monitor.status();
    assert_eq!(status.chains[1].watched_addresses, 2);
    assert_eq!(status.chains[1].processed_hashes, 1);
    assert_eq!(status.deliveries.deposits_processed, 1);
    h.monitor.stop();
}

#[tokio::test]
async fn poll_timer_picks_up_new_history() {
    let h = harness(
        MonitorSettings {
            poll_interval: Duration::from_millis(25),
            directory_refresh_interval: Duration::from_secs(3600),
        },
        None,
    );
    h.monitor.start().await;

    h.btc.push(ALICE_BTC, btc_tx("b-late", 1_000));
    let batches = wait_for_batches(&h.ledger, 1).await;
    h.monitor.stop();

    assert_eq!(batches[0][0].transaction_hash, "b-late");
    assert_eq!(batches[0][0].amount, Decimal::new(1, 5));
}

fn utx(hash: &str, to: &str, sats: u64) -> String {
    serde_json::json!({
        "op": "utx",
        "x": {
            "hash": hash,
            "inputs": [{"prev_out": {"addr": "bc1qpayer", "value": sats + 500}}],
            "out": [{"addr": to, "value": sats}]
        }
    })
    .to_string()
}

#[tokio::test]
async fn push_feed_survives_reconnect_without_duplicates() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let subscriptions = Arc::new(Mutex::new(Vec::<String>::new()));

    let seen = subscriptions.clone();
    tokio::spawn(async move {
        for conn in 0..2 {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            // unconfirmed_sub + one addr_sub
            for _ in 0..2 {
                let frame = ws.next().await.unwrap().unwrap();
                seen.lock().unwrap().push(frame.into_text().unwrap());
            }
            ws.send(Message::Text(utx("p1", ALICE_BTC, 40_000))).await.unwrap();
            if conn == 0 {
                ws.close(None).await.unwrap();
            } else {
                ws.send(Message::Text(utx("p2", ALICE_BTC, 60_000))).await.unwrap();
                while ws.next().await.is_some() {}
            }
        }
    });

    let channel = PushChannel::new(
        "btc",
        &url,
        PushSettings {
            reconnect_delay: Duration::from_millis(50),
            connect_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(10),
        },
    );
    let h = harness(hours(), Some(channel));
    h.monitor.start().await;

    let batches = wait_for_batches(&h.ledger, 2).await;
    let hashes: Vec<&str> = batches
        .iter()
        .flatten()
        .map(|d| d.transaction_hash.as_str())
        .collect();
    assert_eq!(hashes, vec!["p1", "p2"]);
    assert!(batches.iter().flatten().all(|d| d.confirmations == 0));

    // a confirmed poll hit for p1 is already claimed
    h.btc.push(ALICE_BTC, btc_tx("p1", 40_000));
    assert!(h.monitor.check_all_chains().await.is_empty());

    let subs = subscriptions.lock().unwrap().clone();
    assert_eq!(subs.len(), 4);
    assert_eq!(subs[0], subs[2]);
    assert!(subs[3].contains(ALICE_BTC));
    assert_eq!(h.monitor.status().chains[0].push, Some(ConnectionState::Connected));

    h.monitor.stop();
    assert_eq!(h.monitor.status().chains[0].push, Some(ConnectionState::Stopped));
    assert!(!h.monitor.status().running);
}

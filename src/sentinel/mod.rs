//! Sentinel Service Module
//!
//! Watches user deposit addresses on several chains and forwards each new
//! incoming transfer to the ledger exactly once per process lifetime.
//!
//! ```text
//! ┌───────────┐   refresh   ┌───────────────┐
//! │ Authority │────────────▶│   Directory   │
//! └───────────┘             └───────┬───────┘
//!                                   │ addresses / owners
//!        ┌──────────────┬───────────┼──────────────┐
//!        ▼              ▼           ▼              │
//!   ┌─────────┐   ┌──────────┐ ┌─────────┐         │
//!   │   BTC   │   │  TRC20   │ │  BEP20  │  poll + push
//!   └────┬────┘   └────┬─────┘ └────┬────┘
//!        └─────────────┴────────────┘
//!                      ▼
//!               ┌─────────────┐      ┌────────┐
//!               │  Forwarder  │─────▶│ Ledger │
//!               └─────────────┘      └────────┘
//! ```
//!
//! - Poll: one cycle per interval, all chains, one combined delivery
//! - Push: WebSocket feeds deliver as frames arrive
//! - Dedup: per-watcher hash record; poll and push share it

pub mod bsc;
pub mod btc;
pub mod delivery;
pub mod error;
pub mod monitor;
pub mod price;
pub mod push;
pub mod tron;
pub mod watcher;

pub use bsc::{BscScanClient, BscSettings, BscWatcher};
pub use btc::{BlockCypherClient, BtcSettings, BtcWatcher};
pub use delivery::{DeliveryBoundary, DeliveryReceipt, DeliveryStats, Forwarder, HttpLedgerClient};
pub use error::{DeliveryError, PriceError, PushError, WatcherError};
pub use monitor::{ChainStatus, DepositMonitor, MonitorSettings, MonitorStatus};
pub use price::{CoinGeckoOracle, PriceOracle};
pub use push::{ConnectionState, PushChannel, PushSettings};
pub use tron::{TronGridClient, TronSettings, TronWatcher};
pub use watcher::{ChainWatcher, DedupRecord, HistorySource};

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::AppConfig;
use crate::directory::{AddressDirectory, HttpIdentityAuthority};

/// Wire the production clients from configuration.
///
/// Watchers are registered in the fixed order BTC, TRC20, BEP20.
pub fn build_monitor(config: &AppConfig) -> Result<Arc<DepositMonitor>, reqwest::Error> {
    let m = &config.monitor;
    let http_timeout = Duration::from_secs(m.http_timeout_secs);
    let request_delay = Duration::from_millis(m.request_delay_ms);
    let push_settings = PushSettings {
        reconnect_delay: Duration::from_secs(m.reconnect_delay_secs),
        ..PushSettings::default()
    };

    let authority = HttpIdentityAuthority::new(
        &config.directory.url,
        &config.directory.token,
        http_timeout,
    )?;
    let directory = Arc::new(AddressDirectory::new(Arc::new(authority)));

    let ledger = HttpLedgerClient::new(
        &config.delivery.url,
        &config.delivery.token,
        &config.delivery.source,
        http_timeout,
    )?;
    let forwarder = Arc::new(Forwarder::new(Arc::new(ledger)));

    let mut monitor = DepositMonitor::new(
        Arc::clone(&directory),
        forwarder,
        MonitorSettings {
            poll_interval: Duration::from_secs(m.poll_interval_secs),
            directory_refresh_interval: Duration::from_secs(m.directory_refresh_secs),
        },
    );

    let btc = &config.bitcoin;
    if btc.enabled {
        let price_timeout = Duration::from_millis(btc.price_timeout_ms);
        let source = BlockCypherClient::new(
            &btc.api_url,
            btc.token.clone(),
            btc.min_confirmations,
            btc.limit,
            http_timeout,
        )?;
        let oracle = CoinGeckoOracle::new(&btc.price_url, price_timeout)?;
        let mut watcher = BtcWatcher::new(
            Arc::clone(&directory),
            Arc::new(source),
            Arc::new(oracle),
            BtcSettings {
                min_confirmations: btc.min_confirmations,
                request_delay,
                price_timeout,
                dedup_warn_above: m.dedup_capacity,
            },
        );
        if btc.push_enabled {
            watcher = watcher.with_push(PushChannel::new("btc", &btc.push_url, push_settings.clone()));
        }
        monitor.add_watcher(Arc::new(watcher));
    }

    let tron = &config.tron;
    if tron.enabled {
        let source = TronGridClient::new(
            &tron.api_url,
            tron.api_key.clone(),
            &tron.contract,
            tron.limit,
            http_timeout,
        )?;
        monitor.add_watcher(Arc::new(TronWatcher::new(
            Arc::clone(&directory),
            Arc::new(source),
            TronSettings {
                contract: tron.contract.clone(),
                solid_confirmations: tron.solid_confirmations,
                request_delay,
                dedup_warn_above: m.dedup_capacity,
            },
        )));
    }

    let bsc = &config.bsc;
    if bsc.enabled {
        let source = BscScanClient::new(
            &bsc.api_url,
            bsc.api_key.clone(),
            &bsc.contract,
            bsc.limit,
            http_timeout,
        )?;
        let mut watcher = BscWatcher::new(
            Arc::clone(&directory),
            Arc::new(source),
            BscSettings {
                contract: bsc.contract.clone(),
                min_confirmations: bsc.min_confirmations,
                request_delay,
                dedup_warn_above: m.dedup_capacity,
            },
        );
        if let Some(url) = &bsc.push_url {
            watcher = watcher.with_push(PushChannel::new("bsc", url, push_settings.clone()));
        }
        monitor.add_watcher(Arc::new(watcher));
    }

    info!(watchers = monitor.watcher_count(), "Deposit monitor built");
    Ok(Arc::new(monitor))
}

//! Deposit Monitor - aggregation and scheduling
//!
//! Owns the registered chain watchers, the directory refresh timer and the
//! poll timer. Poll cycles run every watcher in registration order and hand
//! the combined batch to the forwarder once. Push channels forward their own
//! detections as they arrive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::delivery::{DeliveryStats, Forwarder};
use super::error::WatcherError;
use super::push::{ConnectionState, FrameHandler};
use super::watcher::ChainWatcher;
use crate::deposit::{Chain, Deposit};
use crate::directory::AddressDirectory;

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub directory_refresh_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            directory_refresh_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatus {
    pub chain: Chain,
    pub watched_addresses: usize,
    pub processed_hashes: usize,
    pub push: Option<ConnectionState>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub running: bool,
    pub last_directory_refresh: Option<DateTime<Utc>>,
    pub chains: Vec<ChainStatus>,
    pub deliveries: DeliveryStats,
}

pub struct DepositMonitor {
    directory: Arc<AddressDirectory>,
    watchers: Vec<Arc<dyn ChainWatcher>>,
    forwarder: Arc<Forwarder>,
    settings: MonitorSettings,
    timers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl DepositMonitor {
    pub fn new(
        directory: Arc<AddressDirectory>,
        forwarder: Arc<Forwarder>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            directory,
            watchers: Vec::new(),
            forwarder,
            settings,
            timers: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Register a watcher. Poll cycles visit watchers in registration order.
    pub fn add_watcher(&mut self, watcher: Arc<dyn ChainWatcher>) {
        info!(chain = %watcher.chain(), push = watcher.push_channel().is_some(), "Adding watcher");
        self.watchers.push(watcher);
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    pub fn directory(&self) -> &Arc<AddressDirectory> {
        &self.directory
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Refresh the directory, open push channels, run one cycle, then start
    /// both timers. The first cycle is skipped if the initial refresh failed.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Deposit monitor already running");
            return;
        }
        info!(
            watchers = self.watchers.len(),
            poll_interval = ?self.settings.poll_interval,
            refresh_interval = ?self.settings.directory_refresh_interval,
            "Deposit monitor starting"
        );

        let refreshed = self.directory.refresh().await;
        let snapshot = self.directory.snapshot();
        for watcher in &self.watchers {
            self.start_push(watcher, snapshot.addresses(watcher.chain()), false);
        }

        if refreshed {
            self.check_all_chains().await;
        } else {
            warn!("Initial directory refresh failed, first poll deferred to the next tick");
        }

        // stop() clears the flag under this lock, so it either sees these
        // timers or they are never spawned
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_running() {
            return;
        }
        timers.push(self.spawn_poll_timer());
        timers.push(self.spawn_refresh_timer());
    }

    /// Cancel both timers and close every push channel for good.
    pub fn stop(&self) {
        let timers: Vec<JoinHandle<()>> = {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            self.running.store(false, Ordering::SeqCst);
            timers.drain(..).collect()
        };
        for timer in timers {
            timer.abort();
        }
        for watcher in &self.watchers {
            if let Some(channel) = watcher.push_channel() {
                channel.stop();
            }
        }
        info!("Deposit monitor stopped");
    }

    /// One poll cycle across every chain. The combined batch is forwarded
    /// once, and only if non-empty.
    pub async fn check_all_chains(&self) -> Vec<Deposit> {
        let mut deposits = Vec::new();
        for watcher in &self.watchers {
            deposits.extend(watcher.check_all_addresses().await);
        }

        if deposits.is_empty() {
            debug!("Poll cycle found no new deposits");
        } else {
            info!(count = deposits.len(), "Poll cycle found new deposits");
            self.forwarder.forward(&deposits).await;
        }
        deposits
    }

    /// Check a single address on demand and forward anything new.
    pub async fn check_address(
        &self,
        chain: Chain,
        address: &str,
    ) -> Result<Vec<Deposit>, WatcherError> {
        let watcher = self
            .watchers
            .iter()
            .find(|w| w.chain() == chain)
            .ok_or(WatcherError::UnknownChain(chain))?;

        let deposits = watcher.check_address(address).await?;
        self.forwarder.forward(&deposits).await;
        Ok(deposits)
    }

    /// Refresh the directory and resubscribe every push channel whose
    /// address set changed. Returns false if the refresh failed.
    pub async fn refresh_directory(&self) -> bool {
        let before = self.directory.snapshot();
        if !self.directory.refresh().await {
            return false;
        }
        let after = self.directory.snapshot();

        for watcher in &self.watchers {
            let chain = watcher.chain();
            let (old, new) = (before.addresses(chain), after.addresses(chain));
            if same_address_set(old, new) {
                continue;
            }
            info!(chain = %chain, before = old.len(), after = new.len(), "Watched address set changed");
            if self.is_running() {
                self.start_push(watcher, new, true);
            }
        }
        true
    }

    pub fn status(&self) -> MonitorStatus {
        let snapshot = self.directory.snapshot();
        MonitorStatus {
            running: self.is_running(),
            last_directory_refresh: snapshot.refreshed_at(),
            chains: self
                .watchers
                .iter()
                .map(|w| ChainStatus {
                    chain: w.chain(),
                    watched_addresses: snapshot.addresses(w.chain()).len(),
                    processed_hashes: w.dedup_len(),
                    push: w.push_channel().map(|c| c.state()),
                })
                .collect(),
            deliveries: self.forwarder.stats(),
        }
    }

    fn start_push(&self, watcher: &Arc<dyn ChainWatcher>, addresses: &[String], restart: bool) {
        let Some(channel) = watcher.push_channel() else {
            return;
        };
        let frames = watcher.subscribe_frames(addresses);
        let relay = Arc::new(PushRelay {
            watcher: Arc::downgrade(watcher),
            forwarder: Arc::clone(&self.forwarder),
        });
        if restart {
            channel.restart(frames, relay);
        } else {
            channel.start(frames, relay);
        }
    }

    fn spawn_poll_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::downgrade(self);
        let period = self.settings.poll_interval;
        spawn_timer(period, monitor, |m| async move {
            m.check_all_chains().await;
        })
    }

    fn spawn_refresh_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::downgrade(self);
        let period = self.settings.directory_refresh_interval;
        spawn_timer(period, monitor, |m| async move {
            m.refresh_directory().await;
        })
    }
}

/// Run `job` every `period`, skipping the immediate first tick. The loop ends
/// once the monitor is dropped. A slow job delays the next run; runs never overlap.
fn spawn_timer<F, Fut>(period: Duration, monitor: Weak<DepositMonitor>, job: F) -> JoinHandle<()>
where
    F: Fn(Arc<DepositMonitor>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(monitor) = monitor.upgrade() else {
                return;
            };
            job(monitor).await;
        }
    })
}

fn same_address_set(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let b: HashSet<&str> = b.iter().map(String::as_str).collect();
    a == b
}

/// Feeds push frames to their watcher and forwards the result immediately.
struct PushRelay {
    watcher: Weak<dyn ChainWatcher>,
    forwarder: Arc<Forwarder>,
}

#[async_trait]
impl FrameHandler for PushRelay {
    async fn on_frame(&self, frame: &str) {
        let Some(watcher) = self.watcher.upgrade() else {
            return;
        };
        let deposits = watcher.handle_push_frame(frame).await;
        if !deposits.is_empty() {
            info!(chain = %watcher.chain(), count = deposits.len(), "Push detected deposits");
            self.forwarder.forward(&deposits).await;
        }
    }
}

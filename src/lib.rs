//! Deposit Sentinel - multi-chain deposit detection
//!
//! Watches user deposit addresses on BTC, TRON (TRC20 USDT) and BNB Smart
//! Chain (BEP20 USDT), turns each new incoming transfer into a normalized
//! [`Deposit`], and forwards it to the ledger.
//!
//! # Modules
//!
//! - [`units`] - Integer base units to exact decimals
//! - [`deposit`] - Chain tags and the normalized deposit record
//! - [`directory`] - Watched-address cache refreshed from the identity authority
//! - [`sentinel`] - Chain watchers, push channels, delivery and scheduling
//! - [`config`] - YAML configuration
//! - [`logging`] - Tracing subscriber setup

pub mod config;
pub mod deposit;
pub mod directory;
pub mod logging;
pub mod sentinel;
pub mod units;

#[cfg(test)]
mod testing;

// Convenient re-exports at crate root
pub use config::{AppConfig, ConfigError};
pub use deposit::{Chain, Deposit, DepositKind};
pub use directory::{AddressDirectory, IdentityAuthority};
pub use sentinel::{DepositMonitor, MonitorStatus, build_monitor};

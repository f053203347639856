//! Canonical deposit record and chain tags.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sender placeholder when the provider does not expose one
pub const UNKNOWN_SENDER: &str = "unknown";

/// Watched network. Serialized as the network tag carried on a deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "TRC20")]
    Tron,
    #[serde(rename = "BEP20")]
    Bsc,
}

impl Chain {
    /// Fixed dispatch order
    pub const ALL: [Chain; 3] = [Chain::Btc, Chain::Tron, Chain::Bsc];

    pub fn tag(&self) -> &'static str {
        match self {
            Chain::Btc => "BTC",
            Chain::Tron => "TRC20",
            Chain::Bsc => "BEP20",
        }
    }

    /// Asset symbol tracked on this chain
    pub fn asset(&self) -> &'static str {
        match self {
            Chain::Btc => "BTC",
            Chain::Tron | Chain::Bsc => "USDT",
        }
    }

    /// Key used by the identity authority's grouped address lists
    pub fn directory_key(&self) -> &'static str {
        match self {
            Chain::Btc => "bitcoin",
            Chain::Tron => "tron",
            Chain::Bsc => "bsc",
        }
    }

    /// Accepts network tags, directory keys and common aliases, case-insensitive.
    pub fn from_network(network: &str) -> Option<Chain> {
        match network.trim().to_ascii_lowercase().as_str() {
            "btc" | "bitcoin" => Some(Chain::Btc),
            "trc20" | "tron" | "trx" => Some(Chain::Tron),
            "bep20" | "bsc" | "bnb" => Some(Chain::Bsc),
            _ => None,
        }
    }

    /// Recipient comparison. EVM addresses are hex and compare case-insensitively,
    /// base58/bech32 addresses compare exactly.
    pub fn same_address(&self, a: &str, b: &str) -> bool {
        match self {
            Chain::Bsc => a.eq_ignore_ascii_case(b),
            Chain::Btc | Chain::Tron => a == b,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositKind {
    Deposit,
}

/// A detected incoming transfer, normalized to human units.
///
/// Built once by a watcher and handed to the delivery boundary; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: DepositKind,
    pub asset: String,
    pub network: Chain,
    pub amount: Decimal,
    /// Fiat value at detection time (BTC only, best effort)
    pub amount_usd: Option<Decimal>,
    pub transaction_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub timestamp: DateTime<Utc>,
    pub confirmations: u64,
}

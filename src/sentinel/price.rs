//! Fiat price lookup for BTC deposits
//!
//! Best effort only: a slow or failing feed yields `amountUsd = null`
//! and never delays or drops a deposit.

use async_trait::async_trait;
use cached::proc_macro::cached;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::PriceError;

/// Cache lifetime for a fetched price
pub const PRICE_TTL_SECONDS: u64 = 60;

#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn usd_price(&self, asset: &str) -> Result<Decimal, PriceError>;
}

/// CoinGecko `simple/price` client
pub struct CoinGeckoOracle {
    client: reqwest::Client,
    base_url: String,
}

impl CoinGeckoOracle {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

fn coin_id(asset: &str) -> Option<&'static str> {
    match asset.to_ascii_uppercase().as_str() {
        "BTC" => Some("bitcoin"),
        "USDT" => Some("tether"),
        _ => None,
    }
}

#[async_trait]
impl PriceOracle for CoinGeckoOracle {
    async fn usd_price(&self, asset: &str) -> Result<Decimal, PriceError> {
        let id = coin_id(asset).ok_or_else(|| PriceError::Unsupported(asset.to_string()))?;
        load_usd_price_cached(self.client.clone(), self.base_url.clone(), id.to_string())
            .await
            .map_err(PriceError::Lookup)
    }
}

/// Load a USD price with caching
///
/// Results are cached for PRICE_TTL_SECONDS per (endpoint, coin).
#[cached(
    time = 60,
    key = "String",
    convert = r#"{ format!("{}|{}", base_url, coin_id) }"#,
    result = true
)]
async fn load_usd_price_cached(
    client: reqwest::Client,
    base_url: String,
    coin_id: String,
) -> Result<Decimal, String> {
    debug!(coin = %coin_id, "[price] Fetching USD price");
    let quotes: HashMap<String, HashMap<String, f64>> = client
        .get(format!("{}/simple/price", base_url))
        .query(&[("ids", coin_id.as_str()), ("vs_currencies", "usd")])
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| e.to_string())?
        .json()
        .await
        .map_err(|e| e.to_string())?;

    quotes
        .get(&coin_id)
        .and_then(|q| q.get("usd"))
        .and_then(|p| Decimal::from_f64(*p))
        .ok_or_else(|| format!("no usd quote for {}", coin_id))
}

/// Fiat value of `amount`, or `None` if the price is unavailable within `timeout`.
pub async fn usd_value(
    oracle: &dyn PriceOracle,
    asset: &str,
    amount: Decimal,
    timeout: Duration,
) -> Option<Decimal> {
    match tokio::time::timeout(timeout, oracle.usd_price(asset)).await {
        Ok(Ok(price)) => Some((amount * price).round_dp(2)),
        Ok(Err(e)) => {
            warn!(asset, error = %e, "Price lookup failed, continuing without fiat amount");
            None
        }
        Err(_) => {
            warn!(asset, timeout = ?timeout, "Price lookup timed out, continuing without fiat amount");
            None
        }
    }
}

//! Delivery Boundary
//!
//! Hands deposit batches to the downstream ledger. The ledger is the system of
//! record; this side never retries a batch. A failed batch is logged and the
//! next cycle carries on with fresh detections.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{error, info};

use super::error::DeliveryError;
use crate::deposit::Deposit;

/// Default source tag sent with every batch
pub const DEFAULT_SOURCE: &str = "deposit-sentinel";

#[derive(Debug, Serialize)]
pub struct DeliveryRequest<'a> {
    pub deposits: &'a [Deposit],
    pub source: &'a str,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub success: bool,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait DeliveryBoundary: Send + Sync {
    async fn deliver(&self, deposits: &[Deposit]) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Bearer-authenticated ledger endpoint
pub struct HttpLedgerClient {
    client: reqwest::Client,
    url: String,
    token: String,
    source: String,
}

impl HttpLedgerClient {
    pub fn new(
        url: &str,
        token: &str,
        source: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            token: token.to_string(),
            source: source.to_string(),
        })
    }
}

#[async_trait]
impl DeliveryBoundary for HttpLedgerClient {
    async fn deliver(&self, deposits: &[Deposit]) -> Result<DeliveryReceipt, DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&DeliveryRequest {
                deposits,
                source: &self.source,
            })
            .send()
            .await?;

        let status = response.status();
        let receipt: Result<DeliveryReceipt, _> = response.json().await;

        match receipt {
            Ok(receipt) => check_receipt(receipt),
            Err(_) if !status.is_success() => Err(DeliveryError::Rejected(format!("HTTP {}", status))),
            Err(e) => Err(e.into()),
        }
    }
}

fn check_receipt(receipt: DeliveryReceipt) -> Result<DeliveryReceipt, DeliveryError> {
    if receipt.success {
        Ok(receipt)
    } else {
        Err(DeliveryError::Rejected(
            receipt
                .message
                .unwrap_or_else(|| "success=false".to_string()),
        ))
    }
}

/// Delivery counters for status reporting
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DeliveryStats {
    pub batches_delivered: u64,
    pub batches_failed: u64,
    pub deposits_processed: u64,
}

/// Shared forwarding call used by both the poll cycle and push handlers
pub struct Forwarder {
    boundary: Arc<dyn DeliveryBoundary>,
    delivered: AtomicU64,
    failed: AtomicU64,
    processed: AtomicU64,
}

impl Forwarder {
    pub fn new(boundary: Arc<dyn DeliveryBoundary>) -> Self {
        Self {
            boundary,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            processed: AtomicU64::new(0),
        }
    }

    /// Deliver one batch. Failures are logged, not retried, not propagated.
    pub async fn forward(&self, deposits: &[Deposit]) -> Option<DeliveryReceipt> {
        if deposits.is_empty() {
            return None;
        }

        match self.boundary.deliver(deposits).await {
            Ok(receipt) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                self.processed.fetch_add(receipt.processed, Ordering::Relaxed);
                info!(
                    sent = deposits.len(),
                    processed = receipt.processed,
                    "Deposits delivered to ledger"
                );
                Some(receipt)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let hashes: Vec<&str> = deposits
                    .iter()
                    .map(|d| d.transaction_hash.as_str())
                    .collect();
                error!(
                    error = %e,
                    count = deposits.len(),
                    tx_hashes = ?hashes,
                    "Deposit delivery failed, batch dropped"
                );
                None
            }
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            batches_delivered: self.delivered.load(Ordering::Relaxed),
            batches_failed: self.failed.load(Ordering::Relaxed),
            deposits_processed: self.processed.load(Ordering::Relaxed),
        }
    }
}

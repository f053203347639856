//! Unit Conversion Module
//!
//! Converts raw integer chain values (satoshi, wei, token base units) into
//! human-unit `Decimal`s. Every watcher goes through this module so that
//! no float ever touches an amount.
//!
//! ## Scales
//! - BTC: `10^8` (satoshi)
//! - BEP20 USDT: fixed `10^18`
//! - TRC20 tokens: `10^decimals` from token metadata, default 6
//!
//! ```rust
//! use deposit_sentinel::units::{scale_down, satoshi_to_btc};
//! use rust_decimal::Decimal;
//!
//! assert_eq!(satoshi_to_btc(150_000_000), Decimal::new(15, 1));
//! assert_eq!(scale_down("1000000", 6).unwrap(), Decimal::ONE);
//! ```

use num_bigint::BigUint;
use rust_decimal::Decimal;
use thiserror::Error;

pub const BTC_DECIMALS: u32 = 8;
pub const BEP20_USDT_DECIMALS: u32 = 18;
pub const DEFAULT_TRC20_DECIMALS: u32 = 6;

/// rust_decimal supports at most 28 fractional digits
const MAX_SCALE: u32 = 28;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("Invalid integer amount: {0:?}")]
    InvalidFormat(String),

    #[error("Amount too large for decimal representation: {0}")]
    Overflow(String),

    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },
}

/// Divide a raw base-unit integer (decimal digits) by `10^decimals`.
///
/// The result is exact and normalized (no trailing zeros).
pub fn scale_down(raw: &str, decimals: u32) -> Result<Decimal, UnitError> {
    if decimals > MAX_SCALE {
        return Err(UnitError::PrecisionOverflow {
            provided: decimals,
            max: MAX_SCALE,
        });
    }

    let digits = raw.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UnitError::InvalidFormat(raw.to_string()));
    }

    let raw_units: u128 = digits
        .parse()
        .map_err(|_| UnitError::Overflow(digits.to_string()))?;
    let raw_units =
        i128::try_from(raw_units).map_err(|_| UnitError::Overflow(digits.to_string()))?;
    let value = Decimal::try_from_i128_with_scale(raw_units, decimals)
        .map_err(|_| UnitError::Overflow(digits.to_string()))?;

    Ok(value.normalize())
}

/// Satoshi → BTC
pub fn satoshi_to_btc(sats: u64) -> Decimal {
    Decimal::from_i128_with_scale(sats as i128, BTC_DECIMALS).normalize()
}

/// Parse a `0x`-prefixed 256-bit hex word (ERC-20 log data) into decimal digits.
pub fn hex_to_decimal_string(hex: &str) -> Result<String, UnitError> {
    let body = hex.trim().trim_start_matches("0x");
    if body.is_empty() {
        return Ok("0".to_string());
    }
    BigUint::parse_bytes(body.as_bytes(), 16)
        .map(|n| n.to_string())
        .ok_or_else(|| UnitError::InvalidFormat(hex.to_string()))
}

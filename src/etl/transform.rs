/// Transform Module
///
/// Validates raw CSV rows and turns them into `Promotion` records.
/// Parsing is pure; callers decide how to log or count a rejection.
use crate::models::{Promotion, RawRow};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::str::FromStr;
use thiserror::Error;

/// Scale of the `price` column (`NUMERIC(12, 6)`)
pub const PRICE_SCALE: i64 = 6;

/// Prices must stay strictly below this after rounding to `PRICE_SCALE`
const PRICE_LIMIT: i64 = 1_000_000;

/// Date, time and numeric offset. The trailing zone name is checked separately.
const EXPIRATION_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Why a row was left out of a chunk's write set
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("expected 3 fields, found {0}")]
    InvalidShape(usize),

    #[error("invalid price {0:?}")]
    InvalidPrice(String),

    #[error("invalid expiration date {0:?}")]
    InvalidExpiration(String),
}

/// Parse one source row into a promotion
///
/// The identifier is taken verbatim. The price must be a non-negative decimal
/// that fits the price column, and the expiration must look like
/// `2030-01-02 15:04:05 +0000 UTC`.
pub fn parse_promotion(row: &RawRow) -> Result<Promotion, RejectReason> {
    let [id, price, expiration] = row.fields.as_slice() else {
        return Err(RejectReason::InvalidShape(row.fields.len()));
    };

    let price = parse_price(price).ok_or_else(|| RejectReason::InvalidPrice(price.clone()))?;
    let expiration_date =
        parse_expiration(expiration).ok_or_else(|| RejectReason::InvalidExpiration(expiration.clone()))?;

    Ok(Promotion { id: id.clone(), price, expiration_date })
}

/// Decimal digits before the point that still fit below `PRICE_LIMIT`
const PRICE_INTEGER_DIGITS: i64 = 6;

fn parse_price(value: &str) -> Option<BigDecimal> {
    let decimal = BigDecimal::from_str(value).ok()?;

    // Magnitude is checked before rounding: `1e3000000` parses cheaply but rescales slowly
    let (_, exponent) = decimal.as_bigint_and_exponent();
    let integer_digits = (decimal.digits() as i64).saturating_sub(exponent);
    if integer_digits > PRICE_INTEGER_DIGITS {
        return None;
    }
    if integer_digits < -PRICE_SCALE {
        return Some(BigDecimal::from(0));
    }

    let price = decimal.round(PRICE_SCALE);

    if price < BigDecimal::from(0) || price >= BigDecimal::from(PRICE_LIMIT) {
        return None;
    }

    Some(price)
}

fn parse_expiration(value: &str) -> Option<DateTime<Utc>> {
    let (timestamp, zone) = value.rsplit_once(' ')?;

    if !is_zone_name(zone) {
        return None;
    }

    DateTime::parse_from_str(timestamp, EXPIRATION_FORMAT).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Zone abbreviations such as `UTC`, `CET` or `GMT+3`
fn is_zone_name(zone: &str) -> bool {
    zone.len() >= 3
        && zone.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && zone.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-')
}

/// Data Models Module
///
/// This module defines the core data structures used throughout the application.
/// These models represent promotion records as they move from the source CSV file
/// into the database and back out through the lookup API.
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A validated promotion record
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub id: String,
    pub price: BigDecimal,
    pub expiration_date: DateTime<Utc>,
}

/// One unvalidated row from the source file, in file order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub fields: Vec<String>,
}

impl RawRow {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fields: fields.into_iter().map(Into::into).collect() }
    }

    /// The identifier column, if present (used for log context)
    pub fn id(&self) -> Option<&str> {
        self.fields.first().map(String::as_str)
    }
}

/// A bounded, ordered batch of raw rows loaded as one transaction
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position of this chunk within its cycle, starting at 0
    pub index: usize,
    /// 1-based row number of the first row in the source file
    pub first_row: usize,
    pub rows: Vec<RawRow>,
}

/// JSON body returned by `GET /promotions/:id`
#[derive(Debug, Clone, Serialize)]
pub struct PromotionResponse {
    pub id: String,
    pub price: f64,
    pub expiration_date: DateTime<Utc>,
}

impl From<Promotion> for PromotionResponse {
    fn from(promotion: Promotion) -> Self {
        Self {
            price: promotion.price.to_f64().unwrap_or_default(),
            id: promotion.id,
            expiration_date: promotion.expiration_date,
        }
    }
}

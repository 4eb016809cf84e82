/// Load Module
///
/// Handles storing one chunk of promotions in the PostgreSQL database.
use crate::db::PromotionStore;
use crate::etl::transform::{parse_promotion, RejectReason};
use crate::models::{Chunk, Promotion};
use std::collections::HashMap;

/// What happened to a single chunk
///
/// Loading never fails from the caller's point of view; store errors end up
/// in `error` so a chunk with no valid rows can be told apart from a chunk
/// whose write was lost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub index: usize,
    pub rows: usize,
    pub inserted: u64,
    pub rejected_shape: usize,
    pub rejected_price: usize,
    pub rejected_expiration: usize,
    /// Rows superseded by a later row with the same identifier in this chunk
    pub duplicates: usize,
    pub error: Option<String>,
}

impl ChunkOutcome {
    pub fn rejected(&self) -> usize {
        self.rejected_shape + self.rejected_price + self.rejected_expiration
    }

    /// Rows that passed validation, before duplicate collapsing
    pub fn valid(&self) -> usize {
        self.rows - self.rejected()
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    fn record_rejection(&mut self, reason: &RejectReason) {
        match reason {
            RejectReason::InvalidShape(_) => self.rejected_shape += 1,
            RejectReason::InvalidPrice(_) => self.rejected_price += 1,
            RejectReason::InvalidExpiration(_) => self.rejected_expiration += 1,
        }
    }
}

/// Parse a chunk and write its valid rows in a single transaction
///
/// Invalid rows are logged and skipped. A chunk without valid rows still
/// performs an (empty) write. Store failures are logged and reported in the
/// outcome; the chunk is not retried.
pub async fn load_chunk(store: &dyn PromotionStore, chunk: Chunk) -> ChunkOutcome {
    let mut outcome = ChunkOutcome { index: chunk.index, rows: chunk.rows.len(), ..Default::default() };

    let mut promotions: Vec<Promotion> = Vec::with_capacity(chunk.rows.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (offset, row) in chunk.rows.iter().enumerate() {
        let promotion = match parse_promotion(row) {
            Ok(promotion) => promotion,
            Err(reason) => {
                tracing::warn!(
                    chunk = chunk.index,
                    row = chunk.first_row + offset,
                    id = row.id().unwrap_or_default(),
                    "Skipping promotion: {}",
                    reason
                );
                outcome.record_rejection(&reason);
                continue;
            }
        };

        // Last occurrence wins, keeping the position of the first
        match positions.get(&promotion.id) {
            Some(&position) => {
                promotions[position] = promotion;
                outcome.duplicates += 1;
            }
            None => {
                positions.insert(promotion.id.clone(), promotions.len());
                promotions.push(promotion);
            }
        }
    }

    match store.insert_batch(&promotions).await {
        Ok(inserted) => {
            outcome.inserted = inserted;
            tracing::debug!(
                chunk = chunk.index,
                valid = outcome.valid(),
                inserted,
                rejected = outcome.rejected(),
                "Chunk committed"
            );
        }
        Err(e) => {
            tracing::error!(chunk = chunk.index, rows = promotions.len(), "Error inserting promotions: {:#}", e);
            outcome.error = Some(format!("{:#}", e));
        }
    }

    outcome
}

/// In-memory promotion store for tests, with switchable faults
use super::PromotionStore;
use crate::models::Promotion;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, Promotion>>,
    /// Number of upcoming `delete_all` calls that fail
    pub failing_deletes: AtomicUsize,
    /// Every `insert_batch` fails while set
    pub failing_inserts: AtomicBool,
    /// Every `find_by_id` fails while set
    pub failing_lookups: AtomicBool,
    pub delete_calls: AtomicUsize,
    pub insert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(promotions: impl IntoIterator<Item = Promotion>) -> Self {
        let store = Self::new();
        store.rows.lock().unwrap().extend(promotions.into_iter().map(|p| (p.id.clone(), p)));
        store
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rows.lock().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl PromotionStore for MemoryStore {
    async fn delete_all(&self) -> Result<u64> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        let pending = self.failing_deletes.load(Ordering::SeqCst);
        if pending > 0 {
            self.failing_deletes.store(pending - 1, Ordering::SeqCst);
            bail!("connection refused");
        }

        let mut rows = self.rows.lock().unwrap();
        let deleted = rows.len() as u64;
        rows.clear();
        Ok(deleted)
    }

    async fn insert_batch(&self, promotions: &[Promotion]) -> Result<u64> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_inserts.load(Ordering::SeqCst) {
            bail!("connection reset by peer");
        }

        let mut rows = self.rows.lock().unwrap();
        for promotion in promotions {
            rows.insert(promotion.id.clone(), promotion.clone());
        }
        Ok(promotions.len() as u64)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Promotion>> {
        if self.failing_lookups.load(Ordering::SeqCst) {
            bail!("connection reset by peer");
        }

        Ok(self.rows.lock().unwrap().get(id).cloned())
    }
}

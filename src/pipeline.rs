/// Pipeline Module
///
/// Orchestrates the refresh cycle: Clean → Extract → Transform/Load (per chunk) → Drain → Sleep
/// with bounded concurrency, retry logic for the cleaning step, and statistics tracking.
use crate::db::PromotionStore;
use crate::etl::{
    extract::SourceReader,
    load::{load_chunk, ChunkOutcome},
};
use crate::models::Chunk;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const DEFAULT_SOURCE_PATH: &str = "/app/promotions/promotions.csv";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Statistics for one refresh cycle
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub rows_deleted: u64,
    pub rows_read: usize,
    pub rows_inserted: u64,
    pub rows_rejected: usize,
    pub duplicates: usize,
    pub chunks_dispatched: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    pub elapsed_time: Duration,
    pub errors: Vec<ChunkError>,
}

/// A chunk whose write was lost
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkError {
    pub chunk: Option<usize>,
    pub message: String,
}

impl CycleStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk outcome into the cycle totals
    pub fn record(&mut self, outcome: ChunkOutcome) {
        self.rows_rejected += outcome.rejected();
        self.duplicates += outcome.duplicates;

        if outcome.succeeded() {
            self.chunks_succeeded += 1;
            self.rows_inserted += outcome.inserted;
            return;
        }

        self.chunks_failed += 1;
        self.errors.push(ChunkError {
            chunk: Some(outcome.index),
            message: outcome.error.unwrap_or_default(),
        });
    }

    pub fn chunks_completed(&self) -> usize {
        self.chunks_succeeded + self.chunks_failed
    }

    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.rows_inserted as f64 / secs
        }
    }
}

/// How a refresh cycle ended
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CycleStats),
    /// Cleaning kept failing; the file was not loaded this cycle
    Skipped { attempts: usize, error: String },
}

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_path: PathBuf,
    pub chunk_size: usize,
    pub refresh_interval: Duration,
    pub max_concurrent_chunks: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from(DEFAULT_SOURCE_PATH),
            chunk_size: DEFAULT_CHUNK_SIZE,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            max_concurrent_chunks: 8,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Periodic full-replace loader for the promotions table
pub struct Pipeline {
    store: Arc<dyn PromotionStore>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline instance
    pub fn new(store: Arc<dyn PromotionStore>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Refresh forever, one cycle at a time
    ///
    /// Only fatal errors (source file cannot be opened or read) end the loop.
    pub async fn run(&self) -> Result<()> {
        let mut cycle: u64 = 0;

        loop {
            cycle += 1;
            tracing::info!("Starting refresh cycle {} from {}", cycle, self.config.source_path.display());

            match self.run_cycle().await.with_context(|| format!("Refresh cycle {} failed", cycle))? {
                CycleOutcome::Completed(stats) => log_stats(cycle, &stats),
                CycleOutcome::Skipped { attempts, error } => {
                    tracing::error!("Skipping refresh cycle {} after {} cleaning attempts: {}", cycle, attempts, error);
                }
            }

            tracing::info!("Next refresh in {}s", self.config.refresh_interval.as_secs());
            tokio::time::sleep(self.config.refresh_interval).await;
        }
    }

    /// Run one complete cycle: clean, stream, dispatch and drain
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let start_time = Instant::now();
        let mut stats = CycleStats::new();

        stats.rows_deleted = match self.clean().await {
            Ok(deleted) => deleted,
            Err(e) => {
                return Ok(CycleOutcome::Skipped { attempts: self.config.max_retries, error: format!("{:#}", e) })
            }
        };

        let mut reader = SourceReader::open(&self.config.source_path).await?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_chunks));
        let mut workers: JoinSet<ChunkOutcome> = JoinSet::new();
        let mut first_row = 1;

        while let Some(rows) = reader.next_chunk(self.config.chunk_size).await? {
            // Waiting for a permit here also pauses reading
            let permit = Arc::clone(&semaphore).acquire_owned().await.context("Chunk semaphore closed")?;
            let store = Arc::clone(&self.store);
            let chunk = Chunk { index: stats.chunks_dispatched, first_row, rows };

            first_row += chunk.rows.len();
            stats.chunks_dispatched += 1;

            workers.spawn(async move {
                let outcome = load_chunk(store.as_ref(), chunk).await;
                drop(permit);
                outcome
            });
        }

        stats.rows_read = reader.rows_read();
        tracing::debug!("Dispatched {} chunks ({} rows), draining", stats.chunks_dispatched, stats.rows_read);

        drain(&mut workers, &mut stats).await;

        stats.elapsed_time = start_time.elapsed();
        Ok(CycleOutcome::Completed(stats))
    }

    /// Delete every promotion, retrying with a growing delay
    async fn clean(&self) -> Result<u64> {
        let mut retry_count = 0;

        loop {
            match self.store.delete_all().await {
                Ok(deleted) => {
                    tracing::info!("Deleted {} existing promotions", deleted);
                    return Ok(deleted);
                }
                Err(e) => {
                    retry_count += 1;

                    if retry_count >= self.config.max_retries {
                        return Err(e.context(format!("Failed to delete promotions after {} attempts", retry_count)));
                    }

                    tracing::warn!(
                        "Error deleting existing records, retrying ({}/{}): {:#}",
                        retry_count,
                        self.config.max_retries,
                        e
                    );

                    tokio::time::sleep(self.config.retry_delay * retry_count as u32).await;
                }
            }
        }
    }
}

/// Wait for every dispatched chunk and fold the results into `stats`
///
/// Returns immediately when nothing is in flight.
async fn drain(workers: &mut JoinSet<ChunkOutcome>, stats: &mut CycleStats) {
    while let Some(result) = workers.join_next().await {
        match result {
            Ok(outcome) => stats.record(outcome),
            Err(e) => {
                tracing::error!("Chunk loader task failed: {}", e);
                stats.chunks_failed += 1;
                stats.errors.push(ChunkError { chunk: None, message: e.to_string() });
            }
        }
    }
}

fn log_stats(cycle: u64, stats: &CycleStats) {
    tracing::info!(
        cycle,
        rows_read = stats.rows_read,
        rows_inserted = stats.rows_inserted,
        rows_rejected = stats.rows_rejected,
        chunks = stats.chunks_completed(),
        chunks_failed = stats.chunks_failed,
        elapsed_secs = stats.elapsed_time.as_secs_f64(),
        "Processing complete"
    );

    for error in &stats.errors {
        tracing::warn!("Chunk {:?} was not loaded: {}", error.chunk, error.message);
    }
}

/// Print cycle statistics for interactive runs
pub fn print_stats(stats: &CycleStats) {
    println!("\n📊 Refresh Statistics:");
    println!("   ⏱️  Total time: {:.2}s", stats.elapsed_time.as_secs_f64());
    println!("   🗑️  Rows deleted: {}", stats.rows_deleted);
    println!("   📄 Rows read: {}", stats.rows_read);
    println!("   💾 Rows inserted: {}", stats.rows_inserted);
    println!("   ⚠️  Rows rejected: {}", stats.rows_rejected);
    println!("   🔁 Duplicate ids: {}", stats.duplicates);
    println!(
        "   📦 Chunks: {} dispatched, {} succeeded, {} failed",
        stats.chunks_dispatched, stats.chunks_succeeded, stats.chunks_failed
    );
    println!("   ⚡ Throughput: {:.0} rows/sec", stats.rows_per_second());

    if !stats.errors.is_empty() {
        println!("\n❌ Lost chunks: {}", stats.errors.len());
        for (i, error) in stats.errors.iter().take(5).enumerate() {
            println!("   {}. Chunk {:?}: {}", i + 1, error.chunk, error.message);
        }
        if stats.errors.len() > 5 {
            println!("   ... and {} more errors", stats.errors.len() - 5);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::{Promotion, RawRow};
    use bigdecimal::BigDecimal;
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use std::str::FromStr;
    use std::sync::atomic::Ordering;
    use tempfile::NamedTempFile;

    const EXPIRES: &str = "2030-01-02 15:04:05 +0000 UTC";

    fn source_file(lines: &[String]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn config(path: &std::path::Path, chunk_size: usize) -> PipelineConfig {
        PipelineConfig {
            source_path: path.to_path_buf(),
            chunk_size,
            refresh_interval: Duration::from_millis(1),
            max_concurrent_chunks: 2,
            max_retries: 3,
            retry_delay: Duration::from_millis(1),
        }
    }

    fn completed(outcome: CycleOutcome) -> CycleStats {
        match outcome {
            CycleOutcome::Completed(stats) => stats,
            CycleOutcome::Skipped { error, .. } => panic!("cycle skipped: {}", error),
        }
    }

    fn stale(id: &str) -> Promotion {
        Promotion {
            id: id.to_string(),
            price: BigDecimal::from(1),
            expiration_date: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_end_to_end_cycle() {
        let file = source_file(&[
            format!("p1,9.99,{EXPIRES}"),
            format!("p2,abc,{EXPIRES}"),
            "p3,4.50,not-a-date".to_string(),
        ]);
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(store.clone(), config(file.path(), 1000));

        let stats = completed(pipeline.run_cycle().await.unwrap());
        assert_eq!(stats.rows_read, 3);
        assert_eq!(stats.rows_inserted, 1);
        assert_eq!(stats.rows_rejected, 2);
        assert_eq!(stats.chunks_dispatched, 1);

        let p1 = store.find_by_id("p1").await.unwrap().unwrap();
        assert_eq!(p1.price, BigDecimal::from_str("9.99").unwrap());
        assert_eq!(p1.expiration_date, Utc.with_ymd_and_hms(2030, 1, 2, 15, 4, 5).unwrap());
        assert!(store.find_by_id("p2").await.unwrap().is_none());
        assert!(store.find_by_id("p3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cycle_replaces_previous_contents() {
        let file = source_file(&[format!("new-1,1.00,{EXPIRES}"), format!("new-2,2.00,{EXPIRES}")]);
        let store = Arc::new(MemoryStore::with_rows([stale("old-1"), stale("new-1")]));
        let pipeline = Pipeline::new(store.clone(), config(file.path(), 1000));

        let stats = completed(pipeline.run_cycle().await.unwrap());

        assert_eq!(stats.rows_deleted, 2);
        assert_eq!(store.ids(), vec!["new-1", "new-2"]);
        let refreshed = store.find_by_id("new-1").await.unwrap().unwrap();
        assert_eq!(refreshed.price, BigDecimal::from_str("1.00").unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_all_chunks_are_drained() {
        let lines: Vec<String> = (0..1050)
            .map(|i| if i % 10 == 0 { format!("bad-{i},x,{EXPIRES}") } else { format!("id-{i},{i}.25,{EXPIRES}") })
            .collect();
        let file = source_file(&lines);
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(store.clone(), config(file.path(), 100));

        let stats = completed(pipeline.run_cycle().await.unwrap());

        assert_eq!(stats.chunks_dispatched, 11);
        assert_eq!(stats.chunks_completed(), 11);
        assert_eq!(stats.rows_read, 1050);
        assert_eq!(stats.rows_rejected, 105);
        assert_eq!(stats.rows_inserted, 945);
        assert_eq!(store.len(), 945);
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_draining_twice_is_a_no_op() {
        let store: Arc<dyn PromotionStore> = Arc::new(MemoryStore::new());
        let mut workers = JoinSet::new();
        let mut stats = CycleStats::new();

        for index in 0..3 {
            let store = Arc::clone(&store);
            let rows = vec![RawRow::new([format!("id-{index}"), "1".to_string(), EXPIRES.to_string()])];
            let chunk = Chunk { index, first_row: index + 1, rows };
            workers.spawn(async move { load_chunk(store.as_ref(), chunk).await });
        }

        drain(&mut workers, &mut stats).await;
        assert_eq!(stats.chunks_succeeded, 3);
        assert_eq!(stats.rows_inserted, 3);

        drain(&mut workers, &mut stats).await;
        assert_eq!(stats.chunks_succeeded, 3);
        assert_eq!(stats.rows_inserted, 3);
    }

    #[tokio::test]
    async fn test_duplicates_across_chunks_collapse() {
        let file = source_file(&[
            format!("a,1.00,{EXPIRES}"),
            format!("b,2.00,{EXPIRES}"),
            format!("a,3.00,{EXPIRES}"),
        ]);
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(store.clone(), config(file.path(), 2));

        completed(pipeline.run_cycle().await.unwrap());

        assert_eq!(store.ids(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failed_chunks_are_reported() {
        let file = source_file(&[format!("a,1.00,{EXPIRES}"), format!("b,2.00,{EXPIRES}")]);
        let store = Arc::new(MemoryStore::new());
        store.failing_inserts.store(true, Ordering::SeqCst);
        let pipeline = Pipeline::new(store.clone(), config(file.path(), 1));

        let stats = completed(pipeline.run_cycle().await.unwrap());

        assert_eq!(stats.chunks_failed, 2);
        assert_eq!(stats.chunks_succeeded, 0);
        assert_eq!(stats.rows_inserted, 0);
        assert_eq!(stats.errors.len(), 2);
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn test_cleaning_is_retried() {
        let file = source_file(&[format!("a,1.00,{EXPIRES}")]);
        let store = Arc::new(MemoryStore::new());
        store.failing_deletes.store(2, Ordering::SeqCst);
        let pipeline = Pipeline::new(store.clone(), config(file.path(), 10));

        let stats = completed(pipeline.run_cycle().await.unwrap());

        assert_eq!(store.delete_calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.rows_inserted, 1);
    }

    #[tokio::test]
    async fn test_cycle_skipped_when_cleaning_keeps_failing() {
        let file = source_file(&[format!("a,1.00,{EXPIRES}")]);
        let store = Arc::new(MemoryStore::with_rows([stale("old")]));
        store.failing_deletes.store(10, Ordering::SeqCst);
        let pipeline = Pipeline::new(store.clone(), config(file.path(), 10));

        let outcome = pipeline.run_cycle().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Skipped { attempts: 3, .. }));
        assert_eq!(store.delete_calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.ids(), vec!["old"]);
    }

    #[tokio::test]
    async fn test_missing_source_file_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(store.clone(), config(std::path::Path::new("/no/such/promotions.csv"), 10));

        assert!(pipeline.run_cycle().await.is_err());
        assert!(pipeline.run().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_file_clears_the_table() {
        let file = source_file(&[]);
        let store = Arc::new(MemoryStore::with_rows([stale("old")]));
        let pipeline = Pipeline::new(store.clone(), config(file.path(), 10));

        let stats = completed(pipeline.run_cycle().await.unwrap());

        assert_eq!(stats.chunks_dispatched, 0);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_rows_per_second() {
        let stats = CycleStats { rows_inserted: 500, elapsed_time: Duration::from_secs(2), ..Default::default() };
        assert_eq!(stats.rows_per_second(), 250.0);
        assert_eq!(CycleStats::new().rows_per_second(), 0.0);
    }
}

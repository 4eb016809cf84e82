/// Extract Module
///
/// Streams the promotions CSV file and cuts it into fixed-size chunks of raw rows.
use crate::models::RawRow;
use anyhow::{Context, Result};
use csv_async::{AsyncReaderBuilder, StringRecord};
use futures::stream::{BoxStream, StreamExt};
use std::path::{Path, PathBuf};
use tokio::fs::File;

/// Sequential reader over the source file
pub struct SourceReader {
    path: PathBuf,
    records: BoxStream<'static, csv_async::Result<StringRecord>>,
    rows_read: usize,
}

impl SourceReader {
    /// Open the source file. Every row is data; there is no header.
    ///
    /// The reader is flexible: rows with the wrong number of fields are handed
    /// out as they are and rejected later as `InvalidShape`, not read errors.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.with_context(|| format!("Failed to open source file {}", path.display()))?;

        let reader = AsyncReaderBuilder::new().has_headers(false).flexible(true).create_reader(file);

        Ok(Self { path, records: reader.into_records().boxed(), rows_read: 0 })
    }

    /// Read up to `chunk_size` rows in file order
    ///
    /// Returns `None` once the file is exhausted. A short, non-empty chunk is
    /// returned for the tail of the file. Any read error other than end of file
    /// is returned to the caller.
    pub async fn next_chunk(&mut self, chunk_size: usize) -> Result<Option<Vec<RawRow>>> {
        let mut chunk = Vec::with_capacity(chunk_size);

        while chunk.len() < chunk_size {
            let Some(record) = self.records.next().await else {
                break;
            };

            let record = record
                .with_context(|| format!("Failed to read row {} of {}", self.rows_read + 1, self.path.display()))?;

            chunk.push(RawRow::new(record.iter()));
            self.rows_read += 1;
        }

        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }

    /// Total rows handed out so far
    pub fn rows_read(&self) -> usize {
        self.rows_read
    }
}

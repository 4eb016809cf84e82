/// Database Module
///
/// This module handles all PostgreSQL database operations including:
/// - Connection pool management
/// - Schema migrations
/// - Bulk loading, clearing and point lookups of promotions
use crate::models::Promotion;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDateTime;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};

#[cfg(test)]
pub mod memory;

/// Everything the refresh pipeline and the lookup API need from storage
///
/// Implementations must be safe to share between concurrently running chunk
/// loaders; each call acquires its own connection.
#[async_trait]
pub trait PromotionStore: Send + Sync {
    /// Remove every promotion. Returns the number of rows deleted.
    async fn delete_all(&self) -> Result<u64>;

    /// Write a batch of promotions inside a single transaction
    ///
    /// Identifiers must be unique within the batch. Existing rows with the same
    /// identifier are overwritten. Nothing is written if any step fails.
    /// Returns the number of rows written.
    async fn insert_batch(&self, promotions: &[Promotion]) -> Result<u64>;

    /// Fetch one promotion by identifier
    async fn find_by_id(&self, id: &str) -> Result<Option<Promotion>>;
}

/// Connection settings, normally taken from `DATABASE_*` environment variables
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
    }
}

// Staging table lives for one chunk transaction only
const CREATE_STAGING: &str =
    "CREATE TEMP TABLE promotions_staging (LIKE promotions INCLUDING DEFAULTS) ON COMMIT DROP";

// An empty identifier is a value, never NULL
const COPY_STAGING: &str =
    "COPY promotions_staging (id, price, expiration_date) FROM STDIN WITH (FORMAT csv, FORCE_NOT_NULL (id))";

const UPSERT_FROM_STAGING: &str = r#"
    INSERT INTO promotions (id, price, expiration_date)
    SELECT id, price, expiration_date FROM promotions_staging
    ON CONFLICT (id)
    DO UPDATE SET
        price = EXCLUDED.price,
        expiration_date = EXCLUDED.expiration_date
"#;

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect_with(settings.connect_options())
            .await
            .context("Failed to connect to PostgreSQL database")?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool
    #[cfg(test)]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await.context("Failed to run database migrations")?;

        tracing::info!("Database migrations completed successfully");
        Ok(())
    }

    /// Test the database connection
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.context("Database connection test failed")?;

        Ok(())
    }
}

#[async_trait]
impl PromotionStore for Database {
    async fn delete_all(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM promotions").execute(&self.pool).await.context("Failed to delete promotions")?;

        Ok(result.rows_affected())
    }

    /// COPY the batch into a transaction-scoped staging table, then upsert it
    async fn insert_batch(&self, promotions: &[Promotion]) -> Result<u64> {
        let payload = encode_copy_payload(promotions)?;

        let mut tx = self.pool.begin().await.context("Failed to start a transaction")?;

        sqlx::query(CREATE_STAGING)
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("Failed to create staging table")?;

        let mut copy = tx.copy_in_raw(COPY_STAGING).await.context("Failed to prepare COPY")?;
        if !payload.is_empty() {
            copy.send(payload).await.context("Failed to stream promotions")?;
        }
        let copied = copy.finish().await.context("Failed to flush COPY")?;

        let result = sqlx::query(UPSERT_FROM_STAGING)
            .persistent(false)
            .execute(&mut *tx)
            .await
            .context("Failed to move promotions out of staging")?;

        tx.commit().await.context("Failed to commit the transaction")?;

        tracing::debug!("Copied {} promotions, upserted {}", copied, result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Promotion>> {
        let row = sqlx::query_as::<_, PromotionRow>(
            "SELECT id, price, expiration_date FROM promotions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up promotion")?;

        Ok(row.map(Into::into))
    }
}

/// Database representation of a promotion
#[derive(Debug, Clone, sqlx::FromRow)]
struct PromotionRow {
    id: String,
    price: BigDecimal,
    expiration_date: NaiveDateTime,
}

impl From<PromotionRow> for Promotion {
    fn from(row: PromotionRow) -> Self {
        Self { id: row.id, price: row.price, expiration_date: row.expiration_date.and_utc() }
    }
}

/// Render promotions as CSV for `COPY ... WITH (FORMAT csv)`
///
/// Every field is quoted, so an empty identifier reaches COPY as `""` rather
/// than the unquoted empty string COPY reads as NULL. Expirations are stored
/// as UTC wall-clock time in the `TIMESTAMP` column.
fn encode_copy_payload(promotions: &[Promotion]) -> Result<Vec<u8>> {
    let mut writer =
        csv::WriterBuilder::new().has_headers(false).quote_style(csv::QuoteStyle::Always).from_writer(Vec::new());

    for promotion in promotions {
        writer
            .write_record([
                promotion.id.clone(),
                promotion.price.to_string(),
                promotion.expiration_date.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            ])
            .context("Failed to encode promotion for COPY")?;
    }

    writer.into_inner().map_err(|e| anyhow::anyhow!("Failed to finish COPY payload: {}", e.error()))
}

/// CLI Module
///
/// Command-line interface configuration using clap. Every option can also be
/// supplied through the environment (or a `.env` file).
use crate::db::DatabaseSettings;
use crate::pipeline::{PipelineConfig, DEFAULT_CHUNK_SIZE, DEFAULT_SOURCE_PATH};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Promotions Loader
///
/// Periodically replaces the promotions table with the contents of a CSV file
/// and serves lookups by id over HTTP
#[derive(Parser, Debug)]
#[command(name = "promo-loader")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// PostgreSQL host
    #[arg(long, env = "DATABASE_HOST", default_value = "localhost")]
    pub database_host: String,

    /// PostgreSQL port
    #[arg(long, env = "DATABASE_PORT", default_value = "5432")]
    pub database_port: u16,

    /// PostgreSQL user
    #[arg(long, env = "DATABASE_USER")]
    pub database_user: String,

    /// PostgreSQL password
    #[arg(long, env = "DATABASE_PASSWORD", hide_env_values = true, default_value = "")]
    pub database_password: String,

    /// PostgreSQL database name
    #[arg(long, env = "DATABASE_NAME")]
    pub database_name: String,

    /// Size of the connection pool shared by loaders and lookups
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", value_name = "COUNT", default_value = "10")]
    pub max_connections: u32,

    /// Promotions CSV file
    #[arg(short = 'f', long, env = "PROMOTIONS_FILE", value_name = "PATH", default_value = DEFAULT_SOURCE_PATH)]
    pub source: PathBuf,

    /// Rows per chunk (one transaction per chunk)
    #[arg(short = 'b', long, value_name = "ROWS", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Chunks loaded at the same time
    #[arg(short = 'j', long, value_name = "COUNT", default_value = "8")]
    pub max_concurrent_chunks: usize,

    /// Seconds to sleep between refresh cycles
    #[arg(long, value_name = "SECONDS", default_value = "1800")]
    pub interval: u64,

    /// Maximum attempts at clearing the table before a cycle is skipped
    #[arg(long, value_name = "COUNT", default_value = "3")]
    pub max_retries: usize,

    /// Retry delay in seconds (multiplied by the attempt number)
    #[arg(long, value_name = "SECONDS", default_value = "2")]
    pub retry_delay: u64,

    /// Address the lookup API listens on
    #[arg(long, env = "BIND_ADDRESS", value_name = "ADDR", default_value = "0.0.0.0:1321")]
    pub bind: SocketAddr,

    /// Run a single refresh cycle and exit without serving lookups
    #[arg(long)]
    pub once: bool,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("Chunk size must be greater than 0");
        }

        if self.max_concurrent_chunks == 0 {
            anyhow::bail!("Max concurrent chunks must be greater than 0");
        }

        if self.max_connections == 0 {
            anyhow::bail!("Max connections must be greater than 0");
        }

        if self.max_retries == 0 {
            anyhow::bail!("Max retries must be greater than 0");
        }

        // Leave one connection free for lookups while loading
        if !self.once && self.max_concurrent_chunks >= self.max_connections as usize {
            anyhow::bail!(
                "Max concurrent chunks ({}) must be less than max connections ({})",
                self.max_concurrent_chunks,
                self.max_connections
            );
        }

        Ok(())
    }

    pub fn database_settings(&self) -> DatabaseSettings {
        DatabaseSettings {
            host: self.database_host.clone(),
            port: self.database_port,
            user: self.database_user.clone(),
            password: self.database_password.clone(),
            name: self.database_name.clone(),
            max_connections: self.max_connections,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            source_path: self.source.clone(),
            chunk_size: self.chunk_size,
            refresh_interval: Duration::from_secs(self.interval),
            max_concurrent_chunks: self.max_concurrent_chunks,
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay),
        }
    }
}

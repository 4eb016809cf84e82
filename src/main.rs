/// Promotions Loader
///
/// Periodically reloads promotions from a CSV file into PostgreSQL and serves them by id.
mod api;
mod cli;
mod db;
mod etl;
mod models;
mod pipeline;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use db::{Database, PromotionStore};
use pipeline::{print_stats, CycleOutcome, Pipeline};
use std::future::IntoFuture;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    cli.validate()?;

    println!("🚀 Starting Promotions Loader...");

    // Initialize database connection
    let settings = cli.database_settings();
    println!("\n💾 Connecting to PostgreSQL at {}:{}...", settings.host, settings.port);
    let database = Database::connect(&settings).await.context("Failed to connect to PostgreSQL database")?;

    // Test database connection
    database.test_connection().await.context("Database connection test failed")?;

    println!("✅ Database connected successfully!");

    // Run database migrations
    println!("📋 Running database migrations...");
    database.migrate().await.context("Failed to run database migrations")?;

    println!("✅ Database schema created successfully!");

    let store: Arc<dyn PromotionStore> = Arc::new(database);
    let pipeline = Pipeline::new(Arc::clone(&store), cli.pipeline_config());

    if cli.once {
        match pipeline.run_cycle().await.context("Refresh cycle failed")? {
            CycleOutcome::Completed(stats) => print_stats(&stats),
            CycleOutcome::Skipped { attempts, error } => {
                anyhow::bail!("Could not clear promotions after {} attempts: {}", attempts, error)
            }
        }
        return Ok(());
    }

    let listener =
        tokio::net::TcpListener::bind(cli.bind).await.with_context(|| format!("Failed to bind {}", cli.bind))?;
    println!("🌐 Serving promotions on http://{}/promotions/:id", cli.bind);
    tracing::info!("Promotions loader initialized successfully");

    let app = api::promotion_routes(store);

    // Either task ending means the process is done
    tokio::select! {
        result = pipeline.run() => result.context("Refresh loop stopped"),
        result = axum::serve(listener, app).into_future() => result.context("HTTP server stopped"),
    }
}

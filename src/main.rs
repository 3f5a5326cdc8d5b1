//! Contacts Importer - streaming CSV contact import service
//!
//! Accepts chunked CSV uploads over a websocket endpoint and bulk-imports
//! or bulk-deletes contacts in PostgreSQL.

mod cli;
mod config;
mod db;
mod server;
mod services;
mod types;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    // `generate` writes CSV to stdout; run it before stdout logging starts.
    if let Some(cli::Command::Generate { count, output }) = &args.command {
        return services::generator::write_contacts_csv(*count, output.as_deref());
    }

    // Logs directory - use LOGS_DIR env var or default to ./logs
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "contacts-importer.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,contacts_importer=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    info!("Starting contacts importer...");

    // Load configuration
    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    // Connect to database
    let pool = db::create_pool(&config.database_url).await?;
    info!("Connected to PostgreSQL");

    match args.command {
        Some(cli::Command::Migrate) => {
            db::run_migrations(&pool).await?;
        }
        _ => {
            db::run_migrations(&pool).await?;
            server::serve(&config.listen_addr, pool).await?;
        }
    }

    Ok(())
}

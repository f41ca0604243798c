//! insurance-daemon library target.
//!
//! Exposes the process bootstrap so `main.rs` stays thin and so the
//! bootstrap can be exercised from tests without spawning a real process.

use std::sync::Arc;

use anyhow::Context;
use insurance_config::WorkerConfig;
use insurance_db::HeaderKey;
use insurance_transport::ReqwestTransport;
use insurance_worker::Worker;

/// Load config + secrets, connect to Postgres, run migrations, and build a
/// `Worker` ready to run. Split out of `main` so both the binary and tests
/// exercise the same bootstrap path.
pub async fn bootstrap_worker(config_paths: &[&str]) -> anyhow::Result<Worker> {
    let secrets = insurance_config::resolve_secrets().context("resolving secrets from environment")?;

    let worker_config = if config_paths.is_empty() {
        WorkerConfig::default()
    } else {
        insurance_config::load_layered_yaml(config_paths)
            .context("loading worker configuration")?
            .worker_config()
            .context("parsing worker configuration")?
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&secrets.database_url)
        .await
        .context("connecting to Postgres")?;
    insurance_db::migrate(&pool).await.context("running migrations")?;

    let header_key = match secrets.header_encryption_key_hex {
        Some(hex_key) => Some(HeaderKey::from_hex(&hex_key)?),
        None => None,
    };

    let transport = Arc::new(
        ReqwestTransport::new(worker_config.keep_alive).context("building HTTP transport")?,
    );

    Ok(Worker::new(pool, transport, worker_config, header_key))
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

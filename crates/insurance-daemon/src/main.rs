//! insurance-daemon entry point.
//!
//! This file is intentionally thin: it loads environment/config, builds a
//! `Worker`, installs signal handlers, and runs the tick loop until a
//! graceful shutdown is observed. All bootstrap logic lives in `lib.rs`.

use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; silent if the file does not exist. Production
    // injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    insurance_daemon::init_tracing();

    let config_paths = config_paths_from_env();
    let paths: Vec<&str> = config_paths.iter().map(String::as_str).collect();

    let mut worker = insurance_daemon::bootstrap_worker(&paths).await?;
    worker.install_signal_handlers()?;

    info!(worker_id = %worker.worker_id(), "insurance-daemon starting");
    worker.run_forever().await
}

fn config_paths_from_env() -> Vec<String> {
    std::env::var("INSURANCE_CONFIG_PATHS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

//! The Worker Loop: one long-running process owning a pool, a transport,
//! and a config, ticking until a shutdown signal is observed between
//! cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use insurance_config::WorkerConfig;
use insurance_db::HeaderKey;
use insurance_transport::Transport;
use sqlx::PgPool;
use tokio::signal::unix::{signal, SignalKind};
use uuid::Uuid;

use crate::claimer;
use crate::error::EngineError;
use crate::processor::{self, ProcessorConfig};
use crate::sweeper::SweeperGate;

/// One worker instance. `worker_id` is an 8-character random identifier
/// chosen at construction and attached to every log line this worker emits.
pub struct Worker {
    pool: PgPool,
    transport: Arc<dyn Transport>,
    config: WorkerConfig,
    header_key: Option<HeaderKey>,
    worker_id: String,
    shutdown: Arc<AtomicBool>,
    sweeper: SweeperGate,
}

impl Worker {
    pub fn new(
        pool: PgPool,
        transport: Arc<dyn Transport>,
        config: WorkerConfig,
        header_key: Option<HeaderKey>,
    ) -> Self {
        let worker_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            pool,
            transport,
            config,
            header_key,
            worker_id,
            shutdown: Arc::new(AtomicBool::new(false)),
            sweeper: SweeperGate::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// A clone of the flag `SIGTERM`/`SIGQUIT` set. Exposed so callers can
    /// install their own signal handling if they already run one (e.g. the
    /// daemon binary), or check shutdown state in tests.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Install the default `SIGTERM`/`SIGQUIT` listeners. `SIGKILL` is out
    /// of contract and will leak pending locks; that is an operator concern.
    pub fn install_signal_handlers(&self) -> anyhow::Result<()> {
        let flag = self.shutdown.clone();
        let worker_id = self.worker_id.clone();
        let mut term = signal(SignalKind::terminate())?;
        let mut quit = signal(SignalKind::quit())?;
        tokio::spawn(async move {
            tokio::select! {
                _ = term.recv() => tracing::info!(worker_id = %worker_id, "received SIGTERM"),
                _ = quit.recv() => tracing::info!(worker_id = %worker_id, "received SIGQUIT"),
            }
            flag.store(true, Ordering::SeqCst);
        });
        Ok(())
    }

    /// Run ticks until a shutdown signal is observed between cycles. Never
    /// interrupts a cycle mid-flight.
    pub async fn run_forever(&mut self) -> anyhow::Result<()> {
        if !self.config.enabled {
            tracing::info!(worker_id = %self.worker_id, "worker disabled by config, not starting");
            return Ok(());
        }

        loop {
            let cycle_started = Instant::now();

            if let Err(e) = self.run_once().await {
                tracing::error!(worker_id = %self.worker_id, error = %e, "cycle failed, sleeping to avoid log flooding");
                tokio::time::sleep(Duration::from_secs(5)).await;
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }

            let elapsed = cycle_started.elapsed();
            let tick = Duration::from_micros(self.config.tick_microseconds);
            let remaining = tick.checked_sub(elapsed).unwrap_or(Duration::ZERO);
            tokio::time::sleep(remaining).await;

            if self.shutdown.load(Ordering::SeqCst) {
                tracing::info!(worker_id = %self.worker_id, "shutdown signal observed, exiting after tick");
                break;
            }
        }
        Ok(())
    }

    /// Run exactly one claim-and-process cycle plus the gated sweeper.
    /// Fully unit-testable without sleeping.
    pub async fn run_once(&mut self) -> Result<(), EngineError> {
        if self.config.use_db_reconnect {
            // `PgPool` already recycles dead connections transparently; this
            // proactively probes one so a stale connection surfaces here
            // (and gets replaced) rather than mid-claim.
            sqlx::query("select 1")
                .execute(&self.pool)
                .await
                .map_err(|e| EngineError::TransientStorage(anyhow::Error::new(e)))?;
        }

        let ids = claimer::claim_batch(&self.pool, self.config.batch_size).await?;

        if !ids.is_empty() {
            let rows = insurance_db::load(&self.pool, &ids, self.header_key.as_ref())
                .await
                .map_err(EngineError::TransientStorage)?;

            let proc_cfg = ProcessorConfig {
                timeout: Duration::from_secs(self.config.timeout_seconds),
                max_retries: self.config.maximum_number_of_retries,
                base_delay: Duration::from_millis(self.config.base_delay_ms),
                retry_ceiling: Duration::from_secs(self.config.retry_ceiling_seconds),
            };

            for row in &rows {
                if let Err(e) = processor::process_one(
                    &self.pool,
                    self.transport.as_ref(),
                    row,
                    &proc_cfg,
                    self.header_key.as_ref(),
                )
                .await
                {
                    tracing::error!(worker_id = %self.worker_id, request_id = row.id, error = %e, "row processing error");
                }
            }
        }

        if self.sweeper.try_enter() {
            let promoted = insurance_db::promote_waiting_to_ready(&self.pool)
                .await
                .map_err(EngineError::TransientStorage)?;
            if promoted > 0 {
                tracing::info!(worker_id = %self.worker_id, promoted, "sweeper promoted waiting rows to ready");
            }
        }

        Ok(())
    }
}

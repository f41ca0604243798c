//! Thin wrapper over `insurance_db::claim_ready_batch` that adds the claim
//! duration monitoring the spec calls for.

use std::time::{Duration, Instant};

use sqlx::PgPool;

use crate::error::EngineError;

const INFO_THRESHOLD: Duration = Duration::from_secs(30);
const WARN_THRESHOLD: Duration = Duration::from_secs(60);
const ERROR_THRESHOLD: Duration = Duration::from_secs(80);

pub async fn claim_batch(pool: &PgPool, batch_size: i64) -> Result<Vec<i64>, EngineError> {
    let started = Instant::now();
    let ids = insurance_db::claim_ready_batch(pool, batch_size)
        .await
        .map_err(EngineError::TransientStorage)?;
    let elapsed = started.elapsed();

    // `tracing` has no "critical" level distinct from error; the spec's
    // CRITICAL threshold maps onto `tracing::error!`.
    if elapsed >= ERROR_THRESHOLD {
        tracing::error!(claimed = ids.len(), elapsed_ms = elapsed.as_millis() as u64, "claim took far longer than expected, check for contention or a missing index");
    } else if elapsed >= WARN_THRESHOLD {
        tracing::warn!(claimed = ids.len(), elapsed_ms = elapsed.as_millis() as u64, "claim is slow");
    } else if elapsed >= INFO_THRESHOLD {
        tracing::info!(claimed = ids.len(), elapsed_ms = elapsed.as_millis() as u64, "claim took longer than usual");
    }

    Ok(ids)
}

//! The Request Processor: one claimed row in, one terminal-or-waiting state
//! transition out, always unlocked.

use std::time::Duration;

use chrono::Utc;
use insurance_db::{HeaderKey, RequestRow};
use insurance_transport::{Outcome, OutcomeKind, Transport, TransportRequest};
use sqlx::PgPool;

use crate::backoff::next_retry_at;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy)]
pub struct ProcessorConfig {
    pub timeout: Duration,
    pub max_retries: i32,
    pub base_delay: Duration,
    pub retry_ceiling: Duration,
}

/// A short, fixed pause used when the processor itself misbehaves —
/// distinct from the exponential backoff applied to ordinary retryable
/// outcomes, since this isn't counted as a delivery attempt.
const PROCESSOR_BUG_PAUSE: Duration = Duration::from_secs(30);

pub async fn process_one(
    pool: &PgPool,
    transport: &dyn Transport,
    row: &RequestRow,
    cfg: &ProcessorConfig,
    header_key: Option<&HeaderKey>,
) -> Result<(), EngineError> {
    match try_process_one(pool, transport, row, cfg, header_key).await {
        Ok(()) => Ok(()),
        Err(source) => {
            tracing::error!(request_id = row.id, error = %source, "processor bug, pausing request");
            let retry_at = Utc::now() + chrono::Duration::from_std(PROCESSOR_BUG_PAUSE).unwrap();
            if let Err(defer_err) =
                insurance_db::defer(pool, row.id, retry_at, row.retry_count).await
            {
                return Err(EngineError::TransientStorage(defer_err));
            }
            Err(EngineError::ProcessorBug { request_id: row.id, source })
        }
    }
}

async fn try_process_one(
    pool: &PgPool,
    transport: &dyn Transport,
    row: &RequestRow,
    cfg: &ProcessorConfig,
    header_key: Option<&HeaderKey>,
) -> anyhow::Result<()> {
    let _ = header_key; // headers on `row` are already decrypted by `load`.

    let request = TransportRequest {
        method: row.method.clone(),
        url: row.url.clone(),
        headers_json: row.headers_json.clone(),
        payload: row.payload.clone(),
    };

    let outcome = transport.send(&request, cfg.timeout).await;

    let (log_body, log_headers) = match outcome.kind {
        OutcomeKind::Inconsistent => (None, None),
        _ => (outcome.body.as_deref(), outcome.headers.as_ref()),
    };
    insurance_db::append_log(pool, row.id, outcome.code, log_body, log_headers).await?;

    apply_outcome(pool, row, cfg, &outcome).await
}

async fn apply_outcome(
    pool: &PgPool,
    row: &RequestRow,
    cfg: &ProcessorConfig,
    outcome: &Outcome,
) -> anyhow::Result<()> {
    if outcome.kind == OutcomeKind::Successful {
        insurance_db::complete(pool, row.id, outcome.cpu_ms, outcome.wall_ms).await?;
        return Ok(());
    }

    let retryable = outcome.kind.is_retryable(row.retry_inconsistent);
    if !retryable {
        // This attempt is itself "a completed delivery attempt that did not
        // result in completed" (spec.md's definition of retry_count), so it
        // counts even though the row ends here rather than going to waiting.
        insurance_db::fail(pool, row.id, row.retry_count + 1).await?;
        return Ok(());
    }

    if row.retry_count >= cfg.max_retries {
        // Exhausted: this final failing attempt does not add another count
        // beyond what the prior waiting transitions already accumulated.
        insurance_db::fail(pool, row.id, row.retry_count).await?;
        return Ok(());
    }

    let new_retry_count = row.retry_count + 1;
    let retry_at = next_retry_at(
        Utc::now(),
        new_retry_count,
        row.retry_factor,
        cfg.base_delay,
        cfg.retry_ceiling,
    );
    insurance_db::defer(pool, row.id, retry_at, new_retry_count).await?;
    Ok(())
}

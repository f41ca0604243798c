//! Postgres-backed request store: the durable queue behind the worker
//! engine. Every state transition here is a single atomic `UPDATE ... WHERE`
//! issued from the application; nothing read-modify-writes the `state` or
//! `locked_at` columns.

pub mod crypto;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

pub use crypto::HeaderKey;

pub const ENV_DATABASE_URL: &str = "INSURANCE_DATABASE_URL";

/// One of the six absorbing/non-absorbing states a request can be in.
/// `ready` and `waiting` are both re-claimable; `pending` is locked;
/// `completed`, `failed`, and `abandoned` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Ready,
    Pending,
    Waiting,
    Completed,
    Failed,
    Abandoned,
}

impl RequestState {
    fn as_str(self) -> &'static str {
        match self {
            RequestState::Ready => "ready",
            RequestState::Pending => "pending",
            RequestState::Waiting => "waiting",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
            RequestState::Abandoned => "abandoned",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "ready" => RequestState::Ready,
            "pending" => RequestState::Pending,
            "waiting" => RequestState::Waiting,
            "completed" => RequestState::Completed,
            "failed" => RequestState::Failed,
            "abandoned" => RequestState::Abandoned,
            other => anyhow::bail!("unknown request state {other:?} in database row"),
        })
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller-supplied request to enqueue. Headers are provided decrypted;
/// `insert_request` encrypts them before the row is written.
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub priority: i32,
    pub method: String,
    pub url: String,
    pub headers_json: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub retry_factor: i32,
    pub retry_inconsistent: bool,
}

impl Default for NewRequest {
    fn default() -> Self {
        Self {
            priority: 0,
            method: "POST".to_string(),
            url: String::new(),
            headers_json: None,
            payload: None,
            retry_factor: 2,
            retry_inconsistent: true,
        }
    }
}

/// A fully materialized request row, headers already decrypted.
#[derive(Debug, Clone)]
pub struct RequestRow {
    pub id: i64,
    pub priority: i32,
    pub method: String,
    pub url: String,
    pub headers_json: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub state: RequestState,
    pub state_changed_at: DateTime<Utc>,
    pub retry_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub retry_factor: i32,
    pub retry_inconsistent: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub abandoned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timings_cpu_ms: Option<f64>,
    pub timings_wall_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl RequestRow {
    fn from_row(row: &PgRow, key: Option<&HeaderKey>) -> Result<Self> {
        let state_str: String = row.try_get("state").context("reading requests.state")?;
        let ciphertext: Option<Vec<u8>> = row
            .try_get("headers_ciphertext")
            .context("reading requests.headers_ciphertext")?;
        let nonce: Option<Vec<u8>> = row
            .try_get("headers_nonce")
            .context("reading requests.headers_nonce")?;
        let headers_json = match (ciphertext, nonce, key) {
            (Some(ct), Some(n), Some(key)) => Some(
                crypto::decrypt_headers(key, &ct, &n)
                    .context("decrypting requests.headers_ciphertext")?,
            ),
            (Some(_), Some(_), None) => {
                anyhow::bail!("row has encrypted headers but no header key was provided")
            }
            _ => None,
        };

        Ok(RequestRow {
            id: row.try_get("id").context("reading requests.id")?,
            priority: row.try_get("priority").context("reading requests.priority")?,
            method: row.try_get("method").context("reading requests.method")?,
            url: row.try_get("url").context("reading requests.url")?,
            headers_json,
            payload: row.try_get("payload").context("reading requests.payload")?,
            state: RequestState::from_str(&state_str)?,
            state_changed_at: row
                .try_get("state_changed_at")
                .context("reading requests.state_changed_at")?,
            retry_at: row.try_get("retry_at").context("reading requests.retry_at")?,
            retry_count: row
                .try_get("retry_count")
                .context("reading requests.retry_count")?,
            retry_factor: row
                .try_get("retry_factor")
                .context("reading requests.retry_factor")?,
            retry_inconsistent: row
                .try_get("retry_inconsistent")
                .context("reading requests.retry_inconsistent")?,
            locked_at: row.try_get("locked_at").context("reading requests.locked_at")?,
            abandoned_at: row
                .try_get("abandoned_at")
                .context("reading requests.abandoned_at")?,
            completed_at: row
                .try_get("completed_at")
                .context("reading requests.completed_at")?,
            timings_cpu_ms: row
                .try_get("timings_cpu_ms")
                .context("reading requests.timings_cpu_ms")?,
            timings_wall_ms: row
                .try_get("timings_wall_ms")
                .context("reading requests.timings_wall_ms")?,
            created_at: row.try_get("created_at").context("reading requests.created_at")?,
        })
    }
}

/// One recorded delivery attempt.
#[derive(Debug, Clone)]
pub struct RequestLogRow {
    pub id: i64,
    pub request_id: i64,
    pub response_code: i32,
    pub response_body: Option<String>,
    pub response_headers: Option<serde_json::Value>,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ready: i64,
    pub pending: i64,
    pub waiting: i64,
    pub completed: i64,
    pub failed: i64,
    pub abandoned: i64,
}

/// Connect using `INSURANCE_DATABASE_URL`, the same discovery mechanism the
/// teacher's daemon uses for its own Postgres pool.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DATABASE_URL)
        .with_context(|| format!("missing env var {ENV_DATABASE_URL}"))?;
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .with_context(|| "connecting to Postgres".to_string())
}

/// Run the embedded migrations against `pool`.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("running insurance-db migrations")
}

/// Count rows per state, for operational visibility (`insurance-cli db status`).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let row = sqlx::query(
        r#"
        select
            count(*) filter (where state = 'ready')     as ready,
            count(*) filter (where state = 'pending')    as pending,
            count(*) filter (where state = 'waiting')    as waiting,
            count(*) filter (where state = 'completed')  as completed,
            count(*) filter (where state = 'failed')     as failed,
            count(*) filter (where state = 'abandoned')  as abandoned
        from requests
        "#,
    )
    .fetch_one(pool)
    .await
    .context("querying requests state counts")?;

    Ok(DbStatus {
        ready: row.try_get("ready")?,
        pending: row.try_get("pending")?,
        waiting: row.try_get("waiting")?,
        completed: row.try_get("completed")?,
        failed: row.try_get("failed")?,
        abandoned: row.try_get("abandoned")?,
    })
}

/// Insert a new request in state `ready`. This is the sole entry point for
/// callers handing work to the engine (spec.md §4.A "insert").
pub async fn insert_request(
    pool: &PgPool,
    req: &NewRequest,
    key: Option<&HeaderKey>,
) -> Result<i64> {
    let (ciphertext, nonce) = match (&req.headers_json, key) {
        (Some(json), Some(key)) => {
            let (ct, n) = crypto::encrypt_headers(key, json)?;
            (Some(ct), Some(n))
        }
        (Some(_), None) => anyhow::bail!("headers provided but no header encryption key set"),
        (None, _) => (None, None),
    };

    let row = sqlx::query(
        r#"
        insert into requests
            (priority, method, url, headers_ciphertext, headers_nonce, payload,
             retry_factor, retry_inconsistent, state, state_changed_at)
        values
            ($1, $2, $3, $4, $5, $6, $7, $8, 'ready', now())
        returning id
        "#,
    )
    .bind(req.priority)
    .bind(&req.method)
    .bind(&req.url)
    .bind(ciphertext)
    .bind(nonce)
    .bind(&req.payload)
    .bind(req.retry_factor)
    .bind(req.retry_inconsistent)
    .fetch_one(pool)
    .await
    .context("inserting request")?;

    row.try_get::<i64, _>("id").context("reading inserted request id")
}

/// Fetch full rows for a set of ids, ordered by `(priority asc, id asc)` —
/// the same ordering `claim_ready_batch` claimed them in.
pub async fn load(pool: &PgPool, ids: &[i64], key: Option<&HeaderKey>) -> Result<Vec<RequestRow>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query(
        r#"
        select * from requests
        where id = any($1)
        order by priority asc, id asc
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await
    .context("loading requests by id")?;

    rows.iter().map(|row| RequestRow::from_row(row, key)).collect()
}

/// Atomically claim up to `limit` ready, unlocked rows and mark them
/// `pending`. Gated behind `runtime-claim`: only the worker engine may call
/// this, enforced at compile time rather than by convention.
#[cfg(feature = "runtime-claim")]
pub async fn claim_ready_batch(pool: &PgPool, limit: i64) -> Result<Vec<i64>> {
    const MAX_DEADLOCK_RETRIES: u32 = 5;

    let mut attempt = 0;
    loop {
        attempt += 1;
        match claim_ready_batch_once(pool, limit).await {
            Ok(ids) => return Ok(ids),
            Err(e) if attempt < MAX_DEADLOCK_RETRIES && is_serialization_failure(&e) => {
                tracing::warn!(attempt, "claim_ready_batch hit a serialization failure, retrying");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(feature = "runtime-claim")]
async fn claim_ready_batch_once(pool: &PgPool, limit: i64) -> Result<Vec<i64>> {
    let rows = sqlx::query(
        r#"
        with claimable as (
            select id from requests
            where state = 'ready' and locked_at is null
            order by priority asc, id asc
            limit $1
            for update skip locked
        )
        update requests
        set state = 'pending', locked_at = now(), state_changed_at = now()
        where id in (select id from claimable)
        returning id
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("claiming ready batch")?;

    rows.iter()
        .map(|row| row.try_get::<i64, _>("id").context("reading claimed id"))
        .collect()
}

#[cfg(feature = "runtime-claim")]
fn is_serialization_failure(e: &anyhow::Error) -> bool {
    e.chain()
        .filter_map(|cause| cause.downcast_ref::<sqlx::Error>())
        .any(|sqlx_err| match sqlx_err {
            sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("40001"),
            _ => false,
        })
}

/// Mark a pending row `completed`. Refuses silently (affects zero rows) if
/// the row is not currently `pending` — the caller should treat a
/// non-pending completion attempt as a processor bug, not retry it.
pub async fn complete(
    pool: &PgPool,
    id: i64,
    timings_cpu_ms: f64,
    timings_wall_ms: f64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        update requests
        set state = 'completed',
            state_changed_at = now(),
            completed_at = now(),
            locked_at = null,
            timings_cpu_ms = $2,
            timings_wall_ms = $3
        where id = $1 and state = 'pending'
        "#,
    )
    .bind(id)
    .bind(timings_cpu_ms)
    .bind(timings_wall_ms)
    .execute(pool)
    .await
    .context("completing request")?;

    Ok(result.rows_affected() == 1)
}

/// Mark a pending row `failed` (max retries exhausted, or a non-retriable
/// outcome). Terminal. `retry_count` is written as given — callers pass the
/// unchanged count when exhaustion ends the row (the failing attempt itself
/// isn't counted as a further retry) and the incremented count when a
/// single non-retryable outcome ends it on the first attempt.
pub async fn fail(pool: &PgPool, id: i64, retry_count: i32) -> Result<bool> {
    let result = sqlx::query(
        r#"
        update requests
        set state = 'failed', state_changed_at = now(), locked_at = null, retry_count = $2
        where id = $1 and state = 'pending'
        "#,
    )
    .bind(id)
    .bind(retry_count)
    .execute(pool)
    .await
    .context("failing request")?;

    Ok(result.rows_affected() == 1)
}

/// Move a pending row to `waiting` with a computed `retry_at` and bumped
/// `retry_count`, releasing its lock.
pub async fn defer(
    pool: &PgPool,
    id: i64,
    retry_at: DateTime<Utc>,
    retry_count: i32,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        update requests
        set state = 'waiting',
            state_changed_at = now(),
            retry_at = $2,
            retry_count = $3,
            locked_at = null
        where id = $1 and state = 'pending'
        "#,
    )
    .bind(id)
    .bind(retry_at)
    .bind(retry_count)
    .execute(pool)
    .await
    .context("deferring request")?;

    Ok(result.rows_affected() == 1)
}

/// Release a pending row's lock without changing its state, returning it to
/// the ready predicate. Used for stuck-pending admin recovery (spec.md §5)
/// and for releasing a claimed-but-unprocessed row on worker crash recovery.
pub async fn unlock(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        update requests
        set state = 'ready', state_changed_at = now(), locked_at = null
        where id = $1 and state = 'pending'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await
    .context("unlocking request")?;

    Ok(result.rows_affected() == 1)
}

/// Move every `waiting` row whose `retry_at` has passed back to `ready`.
/// Set-based and idempotent: running it twice in the same instant affects
/// rows only once, since the second run's `WHERE` clause matches nothing
/// left in `waiting`.
pub async fn promote_waiting_to_ready(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        update requests
        set state = 'ready', state_changed_at = now(), retry_at = null
        where state = 'waiting' and retry_at <= now()
        "#,
    )
    .execute(pool)
    .await
    .context("promoting waiting requests to ready")?;

    Ok(result.rows_affected())
}

/// Record a delivery attempt. Always succeeds independently of the request's
/// current state; the log is an append-only audit trail.
pub async fn append_log(
    pool: &PgPool,
    request_id: i64,
    response_code: i32,
    response_body: Option<&str>,
    response_headers: Option<&serde_json::Value>,
) -> Result<i64> {
    let row = sqlx::query(
        r#"
        insert into request_logs (request_id, response_code, response_body, response_headers)
        values ($1, $2, $3, $4)
        returning id
        "#,
    )
    .bind(request_id)
    .bind(response_code)
    .bind(response_body)
    .bind(response_headers)
    .fetch_one(pool)
    .await
    .context("appending request log")?;

    row.try_get::<i64, _>("id").context("reading inserted log id")
}

/// Fetch the attempt history for a request, oldest first.
pub async fn load_logs(pool: &PgPool, request_id: i64) -> Result<Vec<RequestLogRow>> {
    let rows = sqlx::query(
        r#"
        select * from request_logs
        where request_id = $1
        order by attempted_at asc
        "#,
    )
    .bind(request_id)
    .fetch_all(pool)
    .await
    .context("loading request logs")?;

    rows.iter()
        .map(|row| {
            Ok(RequestLogRow {
                id: row.try_get("id").context("reading request_logs.id")?,
                request_id: row
                    .try_get("request_id")
                    .context("reading request_logs.request_id")?,
                response_code: row
                    .try_get("response_code")
                    .context("reading request_logs.response_code")?,
                response_body: row
                    .try_get("response_body")
                    .context("reading request_logs.response_body")?,
                response_headers: row
                    .try_get("response_headers")
                    .context("reading request_logs.response_headers")?,
                attempted_at: row
                    .try_get("attempted_at")
                    .context("reading request_logs.attempted_at")?,
            })
        })
        .collect()
}

/// Administrative action: move any non-terminal row to `abandoned`. Refuses
/// (returns `Ok(false)`) if the row is already `completed`, `failed`, or
/// `abandoned` — terminal states never re-open.
pub async fn abandon(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        update requests
        set state = 'abandoned', state_changed_at = now(), abandoned_at = now(), locked_at = null, retry_at = null
        where id = $1 and state in ('ready', 'pending', 'waiting')
        "#,
    )
    .bind(id)
    .execute(pool)
    .await
    .context("abandoning request")?;

    Ok(result.rows_affected() == 1)
}

/// Test-only row construction: insert a request directly into an arbitrary
/// state, bypassing the public lifecycle, for scenario setup.
#[cfg(feature = "testkit")]
pub async fn testkit_insert_row(
    pool: &PgPool,
    state: RequestState,
    priority: i32,
    locked: bool,
    retry_at: Option<DateTime<Utc>>,
    retry_count: i32,
) -> Result<i64> {
    let locked_at = if locked { Some(Utc::now()) } else { None };
    let row = sqlx::query(
        r#"
        insert into requests
            (priority, method, url, state, state_changed_at, locked_at, retry_at, retry_count)
        values
            ($1, 'POST', 'https://example.test/webhook', $2, now(), $3, $4, $5)
        returning id
        "#,
    )
    .bind(priority)
    .bind(state.as_str())
    .bind(locked_at)
    .bind(retry_at)
    .bind(retry_count)
    .fetch_one(pool)
    .await
    .context("inserting testkit row")?;

    row.try_get::<i64, _>("id").context("reading testkit row id")
}

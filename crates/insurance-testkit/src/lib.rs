//! Shared fixtures for integration tests across the worker engine crates:
//! an ephemeral-schema Postgres bootstrap and a scripted fake `Transport`.

use std::sync::Mutex;

use async_trait::async_trait;
use insurance_transport::{Outcome, OutcomeKind, Transport, TransportRequest};
use sqlx::PgPool;
use std::time::Duration;

/// Connect to the scenario-test database and run migrations. Panics with a
/// message naming the env var if it is unset, the same contract every
/// DB-gated test in this workspace relies on.
pub async fn bootstrap_pool() -> PgPool {
    let url = std::env::var("INSURANCE_DATABASE_URL").expect(
        "INSURANCE_DATABASE_URL must be set to run worker-engine scenario tests",
    );
    let pool = PgPool::connect(&url)
        .await
        .expect("failed to connect to INSURANCE_DATABASE_URL");
    insurance_db::migrate(&pool).await.expect("failed to run migrations");
    sqlx::query("truncate table request_logs, requests restart identity cascade")
        .execute(&pool)
        .await
        .expect("failed to truncate tables between tests");
    pool
}

/// A `Transport` that returns a fixed, queued sequence of outcomes,
/// regardless of what request it's asked to send. Once the queue is
/// exhausted, every further call returns `Inconsistent` — a scenario test
/// that runs past its scripted outcomes is telling you it claimed more rows
/// than it meant to.
pub struct ScriptedTransport {
    queue: Mutex<Vec<Outcome>>,
}

impl ScriptedTransport {
    pub fn new(outcomes: Vec<Outcome>) -> Self {
        Self {
            queue: Mutex::new(outcomes),
        }
    }

    /// A single successful (HTTP 200) outcome, queued `count` times.
    pub fn always_ok(count: usize) -> Self {
        Self::new((0..count).map(|_| status_outcome(200)).collect())
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, _request: &TransportRequest, _timeout: Duration) -> Outcome {
        let mut queue = self.queue.lock().expect("ScriptedTransport queue poisoned");
        if queue.is_empty() {
            return inconsistent_outcome();
        }
        queue.remove(0)
    }
}

pub fn status_outcome(code: i32) -> Outcome {
    let kind = match code {
        200..=299 => OutcomeKind::Successful,
        400..=499 => OutcomeKind::ClientError,
        500..=599 => OutcomeKind::ServerError,
        _ => OutcomeKind::OtherStatus,
    };
    Outcome {
        kind,
        code,
        body: Some(String::new()),
        headers: Some(serde_json::json!({})),
        wall_ms: 1.0,
        cpu_ms: 1.0,
    }
}

pub fn timeout_outcome() -> Outcome {
    Outcome {
        kind: OutcomeKind::TimedOut,
        code: 0,
        body: None,
        headers: None,
        wall_ms: 1.0,
        cpu_ms: 1.0,
    }
}

pub fn inconsistent_outcome() -> Outcome {
    Outcome {
        kind: OutcomeKind::Inconsistent,
        code: -1,
        body: None,
        headers: None,
        wall_ms: 1.0,
        cpu_ms: 1.0,
    }
}

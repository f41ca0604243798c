use std::sync::Arc;
use std::time::Duration;

use insurance_db::RequestState;
use insurance_testkit::{inconsistent_outcome, status_outcome, timeout_outcome, ScriptedTransport};
use insurance_worker::Worker;

fn test_config() -> insurance_config::WorkerConfig {
    insurance_config::WorkerConfig {
        enabled: true,
        batch_size: 100,
        tick_microseconds: 2_000_000,
        timeout_seconds: 5,
        maximum_number_of_retries: 10,
        keep_alive: true,
        use_db_reconnect: false,
        base_delay_ms: 1,
        retry_ceiling_seconds: 3_600,
    }
}

async fn force_due(pool: &sqlx::PgPool, id: i64) {
    sqlx::query("update requests set retry_at = now() - interval '1 second' where id = $1")
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires INSURANCE_DATABASE_URL"]
async fn scenario_1_happy_path() {
    let pool = insurance_testkit::bootstrap_pool().await;
    let id = insurance_db::testkit_insert_row(&pool, RequestState::Ready, 5, false, None, 0)
        .await
        .unwrap();

    let transport = Arc::new(ScriptedTransport::new(vec![status_outcome(200)]));
    let mut worker = Worker::new(pool.clone(), transport, test_config(), None);
    worker.run_once().await.unwrap();

    let row = insurance_db::load(&pool, &[id], None).await.unwrap().remove(0);
    assert_eq!(row.state, RequestState::Completed);
    assert_eq!(row.retry_count, 0);

    let logs = insurance_db::load_logs(&pool, id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].response_code, 200);
}

#[tokio::test]
#[ignore = "requires INSURANCE_DATABASE_URL"]
async fn scenario_2_client_error_is_non_retryable() {
    let pool = insurance_testkit::bootstrap_pool().await;
    let id = insurance_db::testkit_insert_row(&pool, RequestState::Ready, 0, false, None, 0)
        .await
        .unwrap();

    let transport = Arc::new(ScriptedTransport::new(vec![status_outcome(404)]));
    let mut worker = Worker::new(pool.clone(), transport, test_config(), None);
    worker.run_once().await.unwrap();

    let row = insurance_db::load(&pool, &[id], None).await.unwrap().remove(0);
    assert_eq!(row.state, RequestState::Failed);
    assert_eq!(row.retry_count, 1);

    let logs = insurance_db::load_logs(&pool, id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].response_code, 404);
}

#[tokio::test]
#[ignore = "requires INSURANCE_DATABASE_URL"]
async fn scenario_3_server_error_backs_off_with_increasing_retry_at() {
    let pool = insurance_testkit::bootstrap_pool().await;
    let id = insurance_db::testkit_insert_row(&pool, RequestState::Ready, 0, false, None, 0)
        .await
        .unwrap();

    let transport = Arc::new(ScriptedTransport::new(vec![
        status_outcome(503),
        status_outcome(503),
        status_outcome(503),
    ]));
    let mut worker = Worker::new(pool.clone(), transport, test_config(), None);

    worker.run_once().await.unwrap();
    let row1 = insurance_db::load(&pool, &[id], None).await.unwrap().remove(0);
    assert_eq!(row1.state, RequestState::Waiting);
    assert_eq!(row1.retry_count, 1);
    let first_retry_at = row1.retry_at.unwrap();

    force_due(&pool, id).await;
    insurance_db::promote_waiting_to_ready(&pool).await.unwrap();
    worker.run_once().await.unwrap();
    let row2 = insurance_db::load(&pool, &[id], None).await.unwrap().remove(0);
    assert_eq!(row2.state, RequestState::Waiting);
    assert_eq!(row2.retry_count, 2);
    assert!(row2.retry_at.unwrap() > first_retry_at);

    force_due(&pool, id).await;
    insurance_db::promote_waiting_to_ready(&pool).await.unwrap();
    worker.run_once().await.unwrap();
    let row3 = insurance_db::load(&pool, &[id], None).await.unwrap().remove(0);
    assert_eq!(row3.state, RequestState::Waiting);
    assert_eq!(row3.retry_count, 3);
}

#[tokio::test]
#[ignore = "requires INSURANCE_DATABASE_URL"]
async fn scenario_4_exhaustion_fails_without_a_final_increment() {
    let pool = insurance_testkit::bootstrap_pool().await;
    let id = insurance_db::testkit_insert_row(&pool, RequestState::Ready, 0, false, None, 0)
        .await
        .unwrap();

    let mut cfg = test_config();
    cfg.maximum_number_of_retries = 2;

    let transport = Arc::new(ScriptedTransport::new(vec![
        status_outcome(503),
        status_outcome(503),
        status_outcome(503),
    ]));
    let mut worker = Worker::new(pool.clone(), transport, cfg, None);

    worker.run_once().await.unwrap();
    let row1 = insurance_db::load(&pool, &[id], None).await.unwrap().remove(0);
    assert_eq!(row1.state, RequestState::Waiting);
    assert_eq!(row1.retry_count, 1);

    force_due(&pool, id).await;
    insurance_db::promote_waiting_to_ready(&pool).await.unwrap();
    worker.run_once().await.unwrap();
    let row2 = insurance_db::load(&pool, &[id], None).await.unwrap().remove(0);
    assert_eq!(row2.state, RequestState::Waiting);
    assert_eq!(row2.retry_count, 2);

    force_due(&pool, id).await;
    insurance_db::promote_waiting_to_ready(&pool).await.unwrap();
    worker.run_once().await.unwrap();
    let row3 = insurance_db::load(&pool, &[id], None).await.unwrap().remove(0);
    assert_eq!(row3.state, RequestState::Failed);
    assert_eq!(row3.retry_count, 2, "the exhausting attempt must not add a further increment");
}

#[tokio::test]
#[ignore = "requires INSURANCE_DATABASE_URL"]
async fn scenario_5_timeout_is_retryable() {
    let pool = insurance_testkit::bootstrap_pool().await;
    let id = insurance_db::testkit_insert_row(&pool, RequestState::Ready, 0, false, None, 0)
        .await
        .unwrap();

    let transport = Arc::new(ScriptedTransport::new(vec![timeout_outcome()]));
    let mut worker = Worker::new(pool.clone(), transport, test_config(), None);
    worker.run_once().await.unwrap();

    let row = insurance_db::load(&pool, &[id], None).await.unwrap().remove(0);
    assert_eq!(row.state, RequestState::Waiting);
    assert_eq!(row.retry_count, 1);

    let logs = insurance_db::load_logs(&pool, id).await.unwrap();
    assert_eq!(logs[0].response_code, 0);
}

#[tokio::test]
#[ignore = "requires INSURANCE_DATABASE_URL"]
async fn scenario_6_inconsistent_with_retry_disabled_fails_immediately() {
    let pool = insurance_testkit::bootstrap_pool().await;
    let id = insurance_db::testkit_insert_row(&pool, RequestState::Ready, 0, false, None, 0)
        .await
        .unwrap();
    sqlx::query("update requests set retry_inconsistent = false where id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let transport = Arc::new(ScriptedTransport::new(vec![inconsistent_outcome()]));
    let mut worker = Worker::new(pool.clone(), transport, test_config(), None);
    worker.run_once().await.unwrap();

    let row = insurance_db::load(&pool, &[id], None).await.unwrap().remove(0);
    assert_eq!(row.state, RequestState::Failed);

    let logs = insurance_db::load_logs(&pool, id).await.unwrap();
    assert_eq!(logs[0].response_code, -1);
    assert!(logs[0].response_body.is_none());
}

#[tokio::test]
#[ignore = "requires INSURANCE_DATABASE_URL"]
async fn scenario_7_batch_of_two_both_unlocked_after_cycle() {
    let pool = insurance_testkit::bootstrap_pool().await;
    let a = insurance_db::testkit_insert_row(&pool, RequestState::Ready, 0, false, None, 0)
        .await
        .unwrap();
    let b = insurance_db::testkit_insert_row(&pool, RequestState::Ready, 1, false, None, 0)
        .await
        .unwrap();

    let transport = Arc::new(ScriptedTransport::new(vec![status_outcome(200), status_outcome(200)]));
    let mut worker = Worker::new(pool.clone(), transport, test_config(), None);
    worker.run_once().await.unwrap();

    let rows = insurance_db::load(&pool, &[a, b], None).await.unwrap();
    for row in rows {
        assert!(row.locked_at.is_none(), "row {} must be unlocked after the cycle", row.id);
        assert_eq!(row.state, RequestState::Completed);
    }
}

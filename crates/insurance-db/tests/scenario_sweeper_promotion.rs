#![cfg(feature = "testkit")]

mod common;

use chrono::Utc;
use insurance_db::RequestState;

#[tokio::test]
#[ignore = "requires INSURANCE_DATABASE_URL"]
async fn promote_moves_only_due_waiting_rows_to_ready() {
    let pool = common::test_pool().await;

    let due = insurance_db::testkit_insert_row(
        &pool,
        RequestState::Waiting,
        0,
        false,
        Some(Utc::now() - chrono::Duration::seconds(5)),
        1,
    )
    .await
    .unwrap();
    let not_due = insurance_db::testkit_insert_row(
        &pool,
        RequestState::Waiting,
        0,
        false,
        Some(Utc::now() + chrono::Duration::hours(1)),
        1,
    )
    .await
    .unwrap();

    let promoted = insurance_db::promote_waiting_to_ready(&pool).await.unwrap();
    assert_eq!(promoted, 1);

    let rows = insurance_db::load(&pool, &[due, not_due], None).await.unwrap();
    let due_row = rows.iter().find(|r| r.id == due).unwrap();
    let not_due_row = rows.iter().find(|r| r.id == not_due).unwrap();
    assert_eq!(due_row.state, RequestState::Ready);
    assert!(due_row.retry_at.is_none());
    assert_eq!(not_due_row.state, RequestState::Waiting);
}

#[tokio::test]
#[ignore = "requires INSURANCE_DATABASE_URL"]
async fn promote_is_idempotent_when_run_twice() {
    let pool = common::test_pool().await;

    insurance_db::testkit_insert_row(
        &pool,
        RequestState::Waiting,
        0,
        false,
        Some(Utc::now() - chrono::Duration::seconds(5)),
        1,
    )
    .await
    .unwrap();

    let first = insurance_db::promote_waiting_to_ready(&pool).await.unwrap();
    let second = insurance_db::promote_waiting_to_ready(&pool).await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 0, "a second sweep must not re-promote rows it already moved");
}

#[tokio::test]
#[ignore = "requires INSURANCE_DATABASE_URL"]
async fn abandon_refuses_terminal_rows() {
    let pool = common::test_pool().await;

    let completed = insurance_db::testkit_insert_row(&pool, RequestState::Completed, 0, false, None, 0)
        .await
        .unwrap();

    let abandoned = insurance_db::abandon(&pool, completed).await.unwrap();
    assert!(!abandoned, "a completed row must never transition to abandoned");

    let waiting = insurance_db::testkit_insert_row(
        &pool,
        RequestState::Waiting,
        0,
        false,
        Some(Utc::now() + chrono::Duration::hours(1)),
        1,
    )
    .await
    .unwrap();
    let abandoned = insurance_db::abandon(&pool, waiting).await.unwrap();
    assert!(abandoned, "a non-terminal row can be abandoned");
}

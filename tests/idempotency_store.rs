//! Idempotency key store against a real database

mod common;

use futures_util::future::join_all;
use uuid::Uuid;

use hbrc_platform::idempotency::{IdempotencyError, IdempotencyRepository, IdempotencyStatus};

fn request_hash() -> String {
    IdempotencyRepository::compute_request_hash(br#"{"amount":"100.00"}"#)
}

#[tokio::test]
async fn test_failed_key_is_reclaimed_by_exactly_one_request() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let repository = IdempotencyRepository::new(pool);
    let key = Uuid::new_v4();
    let hash = request_hash();

    assert!(repository.start_processing(key, &hash).await.unwrap().is_none());
    repository.mark_failed(key).await.unwrap();

    let attempts = join_all((0..8).map(|_| repository.start_processing(key, &hash))).await;

    let winners = attempts.iter().filter(|a| matches!(a, Ok(None))).count();
    let busy = attempts
        .iter()
        .filter(|a| matches!(a, Err(IdempotencyError::KeyInProgress)))
        .count();
    assert_eq!(winners, 1, "attempts: {:?}", attempts);
    assert_eq!(busy, attempts.len() - 1);

    let stored = repository.get(key).await.unwrap().unwrap();
    assert_eq!(stored.status, IdempotencyStatus::Processing);
}

#[tokio::test]
async fn test_stale_key_is_taken_over_once() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let repository = IdempotencyRepository::new(pool.clone());
    let key = Uuid::new_v4();
    let hash = request_hash();

    assert!(repository.start_processing(key, &hash).await.unwrap().is_none());
    assert!(matches!(
        repository.start_processing(key, &hash).await,
        Err(IdempotencyError::KeyInProgress)
    ));

    sqlx::query(
        "UPDATE idempotency_keys SET processing_started_at = NOW() - INTERVAL '10 minutes' WHERE key = $1",
    )
    .bind(key)
    .execute(&pool)
    .await
    .unwrap();

    assert!(repository.start_processing(key, &hash).await.unwrap().is_none());
    assert!(matches!(
        repository.start_processing(key, &hash).await,
        Err(IdempotencyError::KeyInProgress)
    ));
}

#[tokio::test]
async fn test_completed_key_replays_and_rejects_other_bodies() {
    let Some(pool) = common::setup_test_db().await else {
        return;
    };
    let repository = IdempotencyRepository::new(pool);
    let key = Uuid::new_v4();
    let hash = request_hash();
    let resource = Uuid::new_v4();

    assert!(repository.start_processing(key, &hash).await.unwrap().is_none());
    repository
        .mark_completed(key, Some(resource), 201, serde_json::json!({ "id": resource }))
        .await
        .unwrap();

    let replay = repository.start_processing(key, &hash).await.unwrap().unwrap();
    assert_eq!(replay.response_status, Some(201));
    assert_eq!(replay.resource_id, Some(resource));

    let other = IdempotencyRepository::compute_request_hash(br#"{"amount":"200.00"}"#);
    assert!(matches!(
        repository.start_processing(key, &other).await,
        Err(IdempotencyError::HashMismatch(_))
    ));
}

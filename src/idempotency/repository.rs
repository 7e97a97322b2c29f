//! Idempotency Repository
//!
//! Stores `Idempotency-Key` headers with a hash of the request they came
//! with and, once the request succeeded, the response to replay.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Keys stuck in processing longer than this may be retried.
pub const STALE_AFTER_MINUTES: i64 = 5;

/// Idempotency key status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<String> for IdempotencyStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => IdempotencyStatus::Processing,
            "completed" => IdempotencyStatus::Completed,
            "failed" => IdempotencyStatus::Failed,
            _ => IdempotencyStatus::Pending,
        }
    }
}

impl std::fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdempotencyStatus::Pending => write!(f, "pending"),
            IdempotencyStatus::Processing => write!(f, "processing"),
            IdempotencyStatus::Completed => write!(f, "completed"),
            IdempotencyStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Stored idempotency key
#[derive(Debug, Clone)]
pub struct IdempotencyKey {
    pub key: Uuid,
    pub request_hash: String,
    pub resource_id: Option<Uuid>,
    pub response_status: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub status: IdempotencyStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyKey {
    /// Processing for longer than `STALE_AFTER_MINUTES`
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == IdempotencyStatus::Processing
            && self
                .processing_started_at
                .map_or(true, |started| now - started >= Duration::minutes(STALE_AFTER_MINUTES))
    }
}

/// Reclaim a key nobody is actively processing
const TAKEOVER_SQL: &str = r#"
    UPDATE idempotency_keys
    SET processing_status = 'processing', processing_started_at = NOW()
    WHERE key = $1
      AND request_hash = $2
      AND processing_status <> 'completed'
      AND (
          processing_status <> 'processing'
          OR processing_started_at IS NULL
          OR processing_started_at < NOW() - make_interval(mins => $3)
      )
"#;

type KeyRow = (
    Uuid,
    String,
    Option<Uuid>,
    Option<i32>,
    Option<serde_json::Value>,
    String,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Idempotency Repository Error
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Key already exists and is being processed")]
    KeyInProgress,

    #[error("Request hash mismatch for key {0}")]
    HashMismatch(Uuid),

    #[error("Key not found: {0}")]
    NotFound(Uuid),
}

/// Repository for managing idempotency keys
#[derive(Debug, Clone)]
pub struct IdempotencyRepository {
    pool: PgPool,
}

impl IdempotencyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get an existing, unexpired idempotency key
    pub async fn get(&self, key: Uuid) -> Result<Option<IdempotencyKey>, IdempotencyError> {
        let row: Option<KeyRow> = sqlx::query_as(
            r#"
            SELECT
                key, request_hash, resource_id, response_status, response_body,
                processing_status, processing_started_at, created_at, expires_at
            FROM idempotency_keys
            WHERE key = $1 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(
                key,
                request_hash,
                resource_id,
                response_status,
                response_body,
                status,
                processing_started_at,
                created_at,
                expires_at,
            )| IdempotencyKey {
                key,
                request_hash,
                resource_id,
                response_status,
                response_body,
                status: IdempotencyStatus::from(status),
                processing_started_at,
                created_at,
                expires_at,
            },
        ))
    }

    /// Claim a key for processing.
    ///
    /// Returns `Ok(None)` when the caller should run the request, and
    /// `Ok(Some(key))` when the key already completed and its response
    /// should be replayed.
    pub async fn start_processing(
        &self,
        key: Uuid,
        request_hash: &str,
    ) -> Result<Option<IdempotencyKey>, IdempotencyError> {
        if let Some(existing) = self.get(key).await? {
            if existing.request_hash != request_hash {
                return Err(IdempotencyError::HashMismatch(key));
            }

            match existing.status {
                IdempotencyStatus::Completed => return Ok(Some(existing)),
                IdempotencyStatus::Processing if !existing.is_stale(Utc::now()) => {
                    return Err(IdempotencyError::KeyInProgress)
                }
                _ => {}
            }

            // Failed, pending or stale: take it over unless another request
            // claimed it since the read above
            let claimed = sqlx::query(TAKEOVER_SQL)
                .bind(key)
                .bind(request_hash)
                .bind(STALE_AFTER_MINUTES as i32)
                .execute(&self.pool)
                .await?
                .rows_affected();

            if claimed == 0 {
                return Err(IdempotencyError::KeyInProgress);
            }

            return Ok(None);
        }

        // Expired rows still occupy the primary key until cleanup runs
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, request_hash, processing_status, processing_started_at)
            VALUES ($1, $2, 'processing', NOW())
            ON CONFLICT (key) DO UPDATE
            SET request_hash = EXCLUDED.request_hash,
                processing_status = 'processing',
                processing_started_at = NOW(),
                resource_id = NULL,
                response_status = NULL,
                response_body = NULL,
                created_at = NOW(),
                expires_at = NOW() + INTERVAL '24 hours'
            WHERE idempotency_keys.expires_at <= NOW()
            "#,
        )
        .bind(key)
        .bind(request_hash)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            // Lost a race with a concurrent request using the same key
            return Err(IdempotencyError::KeyInProgress);
        }

        Ok(None)
    }

    /// Mark an idempotency key as completed with response
    pub async fn mark_completed(
        &self,
        key: Uuid,
        resource_id: Option<Uuid>,
        response_status: i32,
        response_body: serde_json::Value,
    ) -> Result<(), IdempotencyError> {
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET
                processing_status = 'completed',
                resource_id = $2,
                response_status = $3,
                response_body = $4
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(resource_id)
        .bind(response_status)
        .bind(response_body)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IdempotencyError::NotFound(key));
        }

        Ok(())
    }

    /// Mark an idempotency key as failed so the client may retry it
    pub async fn mark_failed(&self, key: Uuid) -> Result<(), IdempotencyError> {
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'failed'
            WHERE key = $1
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IdempotencyError::NotFound(key));
        }

        Ok(())
    }

    /// Release keys stuck in processing
    pub async fn reset_stale(&self) -> Result<u64, IdempotencyError> {
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'failed'
            WHERE processing_status = 'processing'
              AND processing_started_at < NOW() - make_interval(mins => $1)
            "#,
        )
        .bind(STALE_AFTER_MINUTES as i32)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    /// Delete expired idempotency keys
    pub async fn cleanup_expired(&self) -> Result<u64, IdempotencyError> {
        let rows = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows)
    }

    /// SHA-256 of the request, for conflict detection
    pub fn compute_request_hash(body: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(body);
        hex::encode(hasher.finalize())
    }
}

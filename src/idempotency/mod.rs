//! Idempotency module
//!
//! Prevents duplicate request processing using idempotency keys.

mod repository;

use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;

pub use repository::{
    IdempotencyError, IdempotencyKey, IdempotencyRepository, IdempotencyStatus,
    STALE_AFTER_MINUTES,
};

/// Runs an operation at most once per `Idempotency-Key`
#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    repository: IdempotencyRepository,
}

impl IdempotencyGuard {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repository: IdempotencyRepository::new(pool),
        }
    }

    /// Hash of the operation name and its request, so one key can't be
    /// reused across endpoints either.
    pub fn request_hash<R: Serialize>(scope: &str, request: &R) -> Result<String, AppError> {
        let body = serde_json::to_vec(&(scope, request))
            .map_err(|e| AppError::Internal(format!("request hashing failed: {}", e)))?;
        Ok(IdempotencyRepository::compute_request_hash(&body))
    }

    /// Run `operation`, or replay its stored result when `key` already
    /// completed with the same request.
    pub async fn run<R, T, F, Fut>(
        &self,
        key: Option<Uuid>,
        scope: &str,
        request: &R,
        operation: F,
    ) -> Result<T, AppError>
    where
        R: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let Some(key) = key else {
            return operation().await;
        };

        let hash = Self::request_hash(scope, request)?;

        if let Some(existing) = self.repository.start_processing(key, &hash).await? {
            if let Some(body) = existing.response_body {
                tracing::info!(idempotency_key = %key, scope, "Replaying idempotent response");
                return serde_json::from_value(body)
                    .map_err(|e| AppError::Internal(format!("stored response unreadable: {}", e)));
            }
        }

        match operation().await {
            Ok(result) => {
                let body = serde_json::to_value(&result)
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                let resource_id = body
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok());

                self.repository
                    .mark_completed(key, resource_id, 200, body)
                    .await?;
                Ok(result)
            }
            Err(err) => {
                if let Err(e) = self.repository.mark_failed(key).await {
                    tracing::warn!(idempotency_key = %key, error = %e, "Failed to release idempotency key");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_hash_is_scoped() {
        let body = json!({ "amount": "100.00" });

        let deposit = IdempotencyGuard::request_hash("wallet.deposit", &body).unwrap();
        let withdraw = IdempotencyGuard::request_hash("wallet.withdraw", &body).unwrap();

        assert_ne!(deposit, withdraw);
        assert_eq!(
            deposit,
            IdempotencyGuard::request_hash("wallet.deposit", &body).unwrap()
        );
    }
}

//! Bearer tokens
//!
//! Tokens are random strings handed to the client once; only their
//! SHA-256 hex digest is stored in `api_tokens`.

use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Principal, PrincipalKind};

const TOKEN_PREFIX: &str = "hbrc_";
const TOKEN_BYTES: usize = 32;

/// SHA-256 hex of a raw token
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// A new random token
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}{}", TOKEN_PREFIX, hex::encode(bytes))
}

/// Resolve a raw token to its principal. Inactive, expired and unknown
/// tokens all resolve to `None`, as do tokens whose owner is deactivated.
pub async fn resolve_token(pool: &PgPool, token: &str) -> Result<Option<Principal>, sqlx::Error> {
    let row: Option<(Uuid, String, Uuid, Vec<String>)> = sqlx::query_as(
        r#"
        SELECT t.id, t.principal_kind, t.principal_id, t.permissions
        FROM api_tokens t
        LEFT JOIN employees e ON t.principal_kind = 'employee' AND e.id = t.principal_id
        LEFT JOIN customers c ON t.principal_kind = 'customer' AND c.id = t.principal_id
        WHERE t.token_hash = $1
          AND t.is_active
          AND (t.expires_at IS NULL OR t.expires_at > NOW())
          AND COALESCE(e.is_active, c.is_active, FALSE)
        "#,
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await?;

    let Some((token_id, kind, principal_id, permissions)) = row else {
        return Ok(None);
    };

    let Ok(kind) = kind.parse::<PrincipalKind>() else {
        tracing::warn!(%token_id, "Token has unknown principal kind");
        return Ok(None);
    };

    let mut principal = match kind {
        PrincipalKind::Employee => Principal::employee(principal_id, permissions),
        PrincipalKind::Customer => Principal::customer(principal_id),
    };
    principal.token_id = token_id;

    Ok(Some(principal))
}

/// Store a new token and return the raw value
pub async fn issue_token(
    pool: &PgPool,
    kind: PrincipalKind,
    principal_id: Uuid,
    permissions: &[String],
    expires_at: Option<DateTime<Utc>>,
) -> Result<String, sqlx::Error> {
    let token = generate_token();

    sqlx::query(
        r#"
        INSERT INTO api_tokens (id, token_hash, principal_kind, principal_id, permissions, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(hash_token(&token))
    .bind(kind.as_str())
    .bind(principal_id)
    .bind(permissions)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique_and_prefixed() {
        let a = generate_token();
        let b = generate_token();

        assert!(a.starts_with("hbrc_"));
        assert_eq!(a.len(), TOKEN_PREFIX.len() + TOKEN_BYTES * 2);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token() {
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}

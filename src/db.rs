//! Database module
//!
//! Connectivity and schema checks. The schema itself lives in
//! `migrations/0001_initial.sql`.

use sqlx::PgPool;

/// Tables the server cannot run without
const REQUIRED_TABLES: &[&str] = &[
    "customers",
    "employees",
    "api_tokens",
    "services",
    "service_requests",
    "invoices",
    "invoice_items",
    "wallets",
    "payments",
    "wallet_transactions",
    "notifications",
    "audit_logs",
    "idempotency_keys",
];

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check that every required table exists
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let mut missing = Vec::new();

    for table in REQUIRED_TABLES.iter().copied() {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            missing.push(table);
        }
    }

    if !missing.is_empty() {
        tracing::error!(
            missing = ?missing,
            "Required tables do not exist. Apply migrations/0001_initial.sql"
        );
        return Ok(false);
    }

    Ok(true)
}

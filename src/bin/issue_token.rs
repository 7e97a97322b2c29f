//! Bearer token issuing tool
//!
//! Run with:
//!   cargo run --bin issue_token -- --employee <uuid> --permissions admin
//!   cargo run --bin issue_token -- --customer <uuid> --days 30
//!
//! The raw token is printed once; only its hash is stored.

use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use hbrc_platform::auth;
use hbrc_platform::domain::PrincipalKind;

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    let (kind, principal_id) = match (arg_value(&args, "--employee"), arg_value(&args, "--customer")) {
        (Some(id), None) => (PrincipalKind::Employee, Uuid::parse_str(id)?),
        (None, Some(id)) => (PrincipalKind::Customer, Uuid::parse_str(id)?),
        _ => anyhow::bail!("pass exactly one of --employee <uuid> or --customer <uuid>"),
    };

    let permissions: Vec<String> = match kind {
        PrincipalKind::Employee => arg_value(&args, "--permissions")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect(),
        PrincipalKind::Customer => Vec::new(),
    };

    let expires_at = match arg_value(&args, "--days") {
        Some(days) => Some(Utc::now() + Duration::days(days.parse()?)),
        None => None,
    };

    let database_url = std::env::var("DATABASE_URL")?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    let table = match kind {
        PrincipalKind::Employee => "employees",
        PrincipalKind::Customer => "customers",
    };
    let exists: bool = sqlx::query_scalar(&format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1 AND is_active)",
        table
    ))
    .bind(principal_id)
    .fetch_one(&pool)
    .await?;

    if !exists {
        anyhow::bail!("no active {} with id {}", kind, principal_id);
    }

    let token = auth::issue_token(&pool, kind, principal_id, &permissions, expires_at).await?;

    println!("Issued {} token for {}", kind, principal_id);
    if !permissions.is_empty() {
        println!("Permissions: {}", permissions.join(", "));
    }
    if let Some(expires_at) = expires_at {
        println!("Expires: {}", expires_at);
    }
    println!("\n{}\n", token);
    println!("Store it now; it cannot be shown again.");

    Ok(())
}

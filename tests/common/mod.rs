//! Common test utilities
//!
//! DB-backed tests need `DATABASE_URL`; without it they return early.
//! Every test seeds its own employees and customers with unique emails so
//! tests can share one database and run in parallel.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tokio::sync::OnceCell;
use tower::util::ServiceExt;
use uuid::Uuid;

use hbrc_platform::api;
use hbrc_platform::auth;
use hbrc_platform::domain::PrincipalKind;
use hbrc_platform::AppState;

const SCHEMA: &str = include_str!("../../migrations/0001_initial.sql");

static SCHEMA_APPLIED: OnceCell<()> = OnceCell::const_new();

/// Connect and make sure the schema exists; `None` when no database is configured
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    SCHEMA_APPLIED
        .get_or_init(|| async {
            pool.execute(SCHEMA).await.expect("Failed to apply schema");
        })
        .await;

    Some(pool)
}

/// A router wired to a database plus an admin token
pub struct TestApp {
    pub pool: PgPool,
    pub app: Router,
    pub admin_id: Uuid,
    pub admin_token: String,
}

impl TestApp {
    pub async fn new() -> Option<Self> {
        let pool = setup_test_db().await?;
        let app = api::create_router(AppState::new(pool.clone(), "EGP"));

        let (admin_id, admin_token) = seed_employee(&pool, &["admin"]).await;

        Some(Self {
            pool,
            app,
            admin_id,
            admin_token,
        })
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        send(&self.app, method, uri, token, body).await
    }

    /// Create a customer through the API and issue it a token
    pub async fn create_customer(&self, name: &str) -> (Uuid, Uuid, String) {
        let email = format!("{}@customers.test", Uuid::new_v4().simple());
        let (status, body) = self
            .request(
                "POST",
                "/api/v1/customers",
                Some(&self.admin_token),
                Some(serde_json::json!({ "name": name, "email": email })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "customer creation failed: {}", body);

        let customer_id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
        let wallet_id: Uuid = body["wallet"]["id"].as_str().unwrap().parse().unwrap();

        let token = auth::issue_token(&self.pool, PrincipalKind::Customer, customer_id, &[], None)
            .await
            .expect("Failed to issue customer token");

        (customer_id, wallet_id, token)
    }

    /// Create an active catalog service through the API
    pub async fn create_service(&self, base_price: &str) -> Uuid {
        let code = format!("SVC-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let (status, body) = self
            .request(
                "POST",
                "/api/v1/services",
                Some(&self.admin_token),
                Some(serde_json::json!({
                    "code": code,
                    "name_en": "Concrete compression test",
                    "name_ar": "اختبار ضغط الخرسانة",
                    "base_price": base_price,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "service creation failed: {}", body);

        body["id"].as_str().unwrap().parse().unwrap()
    }
}

/// Insert an employee directly and issue a token with `permissions`
pub async fn seed_employee(pool: &PgPool, permissions: &[&str]) -> (Uuid, String) {
    let id = Uuid::new_v4();
    let permissions: Vec<String> = permissions.iter().map(|p| p.to_string()).collect();

    sqlx::query(
        r#"
        INSERT INTO employees (id, name, email, permissions)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(id)
    .bind("Test Employee")
    .bind(format!("{}@staff.test", id.simple()))
    .bind(&permissions)
    .execute(pool)
    .await
    .expect("Failed to seed employee");

    let token = auth::issue_token(pool, PrincipalKind::Employee, id, &permissions, None)
        .await
        .expect("Failed to issue employee token");

    (id, token)
}

/// One request through the router, body parsed as JSON (Null when empty)
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }

    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

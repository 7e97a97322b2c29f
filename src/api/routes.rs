//! API Routes
//!
//! Router assembly and the helpers shared by every resource module.

use axum::{
    extract::{Extension, Query, State},
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use validator::Validate;

use crate::audit::{AuditFilter, AuditLogEntry, AuditLogService};
use crate::domain::{Amount, Page, PageRequest, Principal};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

use super::{catalog, invoices, middleware as mw, notifications, payments, service_requests, wallets};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

// =========================================================================
// Shared helpers
// =========================================================================

/// Optional `Idempotency-Key` header; present but malformed is a 400
pub(crate) fn idempotency_key(headers: &HeaderMap) -> AppResult<Option<Uuid>> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .map(Some)
        .ok_or_else(|| AppError::InvalidRequest("Idempotency-Key must be a UUID".to_string()))
}

/// Decimal string → positive 2dp amount, reported against `field`
pub(crate) fn parse_amount(field: &str, value: &str) -> AppResult<Amount> {
    value
        .parse::<Amount>()
        .map_err(|e| AppError::field(field, e.to_string()))
}

/// Run `validator` rules on a request body
pub(crate) fn validated<T: Validate>(request: T) -> AppResult<T> {
    request.validate()?;
    Ok(request)
}

// =========================================================================
// Router
// =========================================================================

/// Full application router: public endpoints, the gateway callbacks, the
/// notification socket and the authenticated `/api/v1` tree.
pub fn create_router(state: AppState) -> Router {
    // Layers run last-added first: logging -> auth -> handler
    let protected_routes = Router::new()
        .merge(catalog::routes())
        .merge(service_requests::routes())
        .merge(invoices::routes())
        .merge(payments::routes())
        .merge(wallets::routes())
        .merge(notifications::routes())
        .route("/audit", get(list_audit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            mw::auth_middleware,
        ));

    // HMAC-verified instead of bearer-authenticated
    let gateway_routes = payments::gateway_routes();

    let api = Router::new()
        .merge(gateway_routes)
        .merge(protected_routes)
        .layer(middleware::from_fn(mw::logging_middleware));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws/notifications", get(notifications::ws_handler))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http().make_span_with(mw::request_span))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub online_payments: bool,
}

/// Liveness probe; never touches the database
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online_payments: state.gateway.is_some(),
    })
}

// =========================================================================
// GET /audit
// =========================================================================

async fn list_audit(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filter): Query<AuditFilter>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<AuditLogEntry>>> {
    principal.require("audit:read")?;

    let entries = AuditLogService::new(state.pool).list(&filter, page).await?;
    Ok(Json(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_idempotency_key_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers).unwrap(), None);

        let key = Uuid::new_v4();
        headers.insert(
            IDEMPOTENCY_KEY_HEADER,
            HeaderValue::from_str(&key.to_string()).unwrap(),
        );
        assert_eq!(idempotency_key(&headers).unwrap(), Some(key));

        headers.insert(IDEMPOTENCY_KEY_HEADER, HeaderValue::from_static("retry-1"));
        assert!(matches!(
            idempotency_key(&headers),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_parse_amount_reports_field() {
        assert_eq!(parse_amount("amount", "100.5").unwrap().to_string(), "100.50");

        match parse_amount("amount", "-3") {
            Err(AppError::Validation(fields)) => assert!(fields.contains_key("amount")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}

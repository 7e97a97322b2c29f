//! Payment endpoints and the Paymob callbacks

use std::collections::HashMap;

use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{OperationContext, Page, PageRequest, Principal};
use crate::error::{AppError, AppResult};
use crate::gateway::CallbackFields;
use crate::handlers::{PaymentFilter, PaymentHandler, PaymentRecord, Reconciliation};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub hmac: Option<String>,
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments", get(list))
        .route("/payments/:id", get(get_one))
        .route("/payments/:id/refund", post(refund))
}

/// Unauthenticated; every request must carry a valid HMAC
pub(crate) fn gateway_routes() -> Router<AppState> {
    Router::new()
        .route("/payments/paymob/callback", post(paymob_callback))
        .route("/payments/paymob/redirect", get(paymob_redirect))
}

fn handler(state: &AppState) -> PaymentHandler {
    PaymentHandler::new(state.pool.clone(), state.gateway.clone(), state.notifier())
}

async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filter): Query<PaymentFilter>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<PaymentRecord>>> {
    Ok(Json(handler(&state).list(&filter, page, &principal).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PaymentRecord>> {
    Ok(Json(handler(&state).get(id, &principal).await?))
}

async fn refund(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PaymentRecord>> {
    Ok(Json(handler(&state).refund(id, &principal, &context).await?))
}

// =========================================================================
// Paymob
// =========================================================================

/// Server-to-server processed callback: `{"type": "TRANSACTION", "obj": {...}}`
async fn paymob_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    Json(body): Json<Value>,
) -> AppResult<Json<Reconciliation>> {
    let hmac = query.hmac.ok_or(AppError::InvalidSignature)?;

    let fields = CallbackFields::from_processed_json(&body)
        .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

    Ok(Json(handler(&state).reconcile(fields, &hmac).await?))
}

/// Browser redirect after checkout; the transaction arrives as a flat query
async fn paymob_redirect(
    State(state): State<AppState>,
    Query(mut query): Query<HashMap<String, String>>,
) -> AppResult<Json<Reconciliation>> {
    let hmac = query.remove("hmac").ok_or(AppError::InvalidSignature)?;
    let fields = CallbackFields::from_redirect_query(&query);

    Ok(Json(handler(&state).reconcile(fields, &hmac).await?))
}

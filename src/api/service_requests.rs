//! Service request endpoints

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::{OperationContext, Page, PageRequest, Principal, ServiceRequestStatus};
use crate::error::AppResult;
use crate::handlers::{
    InvoiceDetail, InvoiceHandler, ServiceRequestFilter, ServiceRequestHandler,
    ServiceRequestRecord, SubmitRequestCommand, TransitionRequestCommand,
};
use crate::state::AppState;

use super::routes::validated;

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitServiceRequest {
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    pub service_id: Uuid,
    #[validate(length(min = 1, max = 200, message = "title is required"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub details: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangeStatusRequest {
    pub status: ServiceRequestStatus,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub employee_id: Uuid,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceFromRequest {
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/service-requests", post(submit).get(list))
        .route("/service-requests/:id", get(get_one))
        .route("/service-requests/:id/status", post(change_status))
        .route("/service-requests/:id/assign", post(assign))
        .route("/service-requests/:id/cancel", post(cancel))
        .route("/service-requests/:id/invoice", post(create_invoice))
}

fn handler(state: &AppState) -> ServiceRequestHandler {
    ServiceRequestHandler::new(state.pool.clone(), state.notifier())
}

async fn submit(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<SubmitServiceRequest>,
) -> AppResult<(StatusCode, Json<ServiceRequestRecord>)> {
    let request = validated(request)?;

    let command = SubmitRequestCommand {
        customer_id: request.customer_id,
        service_id: request.service_id,
        title: request.title,
        details: request.details,
    };

    let created = handler(&state).submit(command, &principal, &context).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filter): Query<ServiceRequestFilter>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<ServiceRequestRecord>>> {
    Ok(Json(handler(&state).list(&filter, page, &principal).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServiceRequestRecord>> {
    Ok(Json(handler(&state).get(id, &principal).await?))
}

async fn change_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChangeStatusRequest>,
) -> AppResult<Json<ServiceRequestRecord>> {
    let request = validated(request)?;

    let command = TransitionRequestCommand {
        request_id: id,
        status: request.status,
        note: request.note,
    };

    Ok(Json(handler(&state).transition(command, &principal, &context).await?))
}

async fn assign(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignRequest>,
) -> AppResult<Json<ServiceRequestRecord>> {
    let updated = handler(&state)
        .assign(id, request.employee_id, &principal, &context)
        .await?;
    Ok(Json(updated))
}

/// The body is optional
async fn cancel(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    request: Option<Json<CancelRequest>>,
) -> AppResult<Json<ServiceRequestRecord>> {
    let Json(request) = request.unwrap_or_default();

    let updated = handler(&state)
        .cancel(id, request.reason, &principal, &context)
        .await?;
    Ok(Json(updated))
}

async fn create_invoice(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    request: Option<Json<InvoiceFromRequest>>,
) -> AppResult<(StatusCode, Json<InvoiceDetail>)> {
    let Json(request) = request.unwrap_or_default();

    let invoices = InvoiceHandler::new(state.pool.clone(), state.notifier(), &state.currency);
    let invoice = invoices
        .from_service_request(id, request.due_date, &principal, &context)
        .await?;

    Ok((StatusCode::CREATED, Json(invoice)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_status_request_deserialize() {
        let request: ChangeStatusRequest =
            serde_json::from_str(r#"{"status": "IN_PROGRESS", "note": "Samples received"}"#)
                .unwrap();

        assert_eq!(request.status, ServiceRequestStatus::InProgress);
        assert_eq!(request.note.as_deref(), Some("Samples received"));
    }

    #[test]
    fn test_submit_request_requires_title() {
        let request: SubmitServiceRequest = serde_json::from_str(&format!(
            r#"{{"service_id": "{}", "title": ""}}"#,
            Uuid::new_v4()
        ))
        .unwrap();

        assert!(validated(request).is_err());
    }
}

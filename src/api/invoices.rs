//! Invoice endpoints, including the three ways to pay one

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::{OperationContext, Page, PageRequest, PaymentMethod, Principal};
use crate::error::AppResult;
use crate::handlers::{
    CreateInvoiceCommand, InitiatePaymentCommand, InvoiceDetail, InvoiceFilter, InvoiceHandler,
    InvoiceItemInput, InvoiceRecord, OnlineCheckout, PayWithWalletCommand, PaymentHandler,
    PaymentRecord, PaymentTarget, RecordPaymentCommand, WalletHandler, WalletPayment,
};
use crate::state::AppState;

use super::routes::{idempotency_key, parse_amount, validated};

#[derive(Debug, Deserialize)]
pub struct InvoiceItemRequest {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    pub customer_id: Uuid,
    #[serde(default)]
    pub service_request_id: Option<Uuid>,
    pub items: Vec<InvoiceItemRequest>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManualPaymentRequest {
    pub amount: String,
    pub method: PaymentMethod,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub reference: Option<String>,
}

/// Body of pay-online and pay-with-wallet; omitted amount means the
/// full balance due
#[derive(Debug, Default, Deserialize)]
pub struct PayRequest {
    #[serde(default)]
    pub amount: Option<String>,
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/invoices", post(create).get(list))
        .route("/invoices/:id", get(get_one))
        .route("/invoices/:id/issue", post(issue))
        .route("/invoices/:id/send", post(send))
        .route("/invoices/:id/cancel", post(cancel))
        .route("/invoices/:id/payments", post(record_payment))
        .route("/invoices/:id/pay-online", post(pay_online))
        .route("/invoices/:id/pay-with-wallet", post(pay_with_wallet))
}

fn handler(state: &AppState) -> InvoiceHandler {
    InvoiceHandler::new(state.pool.clone(), state.notifier(), &state.currency)
}

async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateInvoiceRequest>,
) -> AppResult<(StatusCode, Json<InvoiceDetail>)> {
    let request = validated(request)?;

    let command = CreateInvoiceCommand {
        customer_id: request.customer_id,
        service_request_id: request.service_request_id,
        items: request
            .items
            .into_iter()
            .map(|item| InvoiceItemInput {
                description: item.description,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect(),
        due_date: request.due_date,
        notes: request.notes,
    };

    let invoice = handler(&state).create(command, &principal, &context).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filter): Query<InvoiceFilter>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<InvoiceRecord>>> {
    Ok(Json(handler(&state).list(&filter, page, &principal).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<InvoiceDetail>> {
    Ok(Json(handler(&state).get(id, &principal).await?))
}

async fn issue(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<InvoiceRecord>> {
    Ok(Json(handler(&state).issue(id, &principal, &context).await?))
}

async fn send(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<InvoiceRecord>> {
    Ok(Json(handler(&state).send(id, &principal, &context).await?))
}

async fn cancel(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<InvoiceRecord>> {
    Ok(Json(handler(&state).cancel(id, &principal, &context).await?))
}

/// Staff record cash or bank transfer
async fn record_payment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<ManualPaymentRequest>,
) -> AppResult<(StatusCode, Json<PaymentRecord>)> {
    let request = validated(request)?;
    let idem_key = idempotency_key(&headers)?;

    let command = RecordPaymentCommand {
        invoice_id: id,
        amount: parse_amount("amount", &request.amount)?,
        method: request.method,
        reference: request.reference,
    };

    let payments = PaymentHandler::new(state.pool.clone(), state.gateway.clone(), state.notifier());
    let payment = payments
        .record_manual(command, idem_key, &principal, &context)
        .await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

async fn pay_online(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    request: Option<Json<PayRequest>>,
) -> AppResult<(StatusCode, Json<OnlineCheckout>)> {
    let Json(request) = request.unwrap_or_default();
    let idem_key = idempotency_key(&headers)?;

    let command = InitiatePaymentCommand {
        target: PaymentTarget::Invoice(id),
        amount: request
            .amount
            .as_deref()
            .map(|a| parse_amount("amount", a))
            .transpose()?,
    };

    let payments = PaymentHandler::new(state.pool.clone(), state.gateway.clone(), state.notifier());
    let checkout = payments
        .initiate_online(command, idem_key, &principal, &context)
        .await?;

    Ok((StatusCode::CREATED, Json(checkout)))
}

async fn pay_with_wallet(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    request: Option<Json<PayRequest>>,
) -> AppResult<(StatusCode, Json<WalletPayment>)> {
    let Json(request) = request.unwrap_or_default();
    let idem_key = idempotency_key(&headers)?;

    let command = PayWithWalletCommand {
        invoice_id: id,
        amount: request
            .amount
            .as_deref()
            .map(|a| parse_amount("amount", a))
            .transpose()?,
    };

    let wallets = WalletHandler::new(state.pool.clone(), state.notifier(), &state.currency);
    let receipt = wallets
        .pay_invoice(command, idem_key, &principal, &context)
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_create_invoice_request_deserialize() {
        let json = format!(
            r#"{{
                "customer_id": "{}",
                "items": [{{"description": "Soil test", "quantity": "2", "unit_price": "450.00"}}],
                "due_date": "2026-11-30"
            }}"#,
            Uuid::new_v4()
        );

        let request: CreateInvoiceRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(request.items[0].unit_price, dec!(450.00));
        assert_eq!(request.due_date, NaiveDate::from_ymd_opt(2026, 11, 30));
        assert!(request.service_request_id.is_none());
    }

    #[test]
    fn test_item_rules_are_left_to_the_handler() {
        // Empty lists and line limits are checked with the computed totals
        let json = format!(r#"{{"customer_id": "{}", "items": []}}"#, Uuid::new_v4());
        let request: CreateInvoiceRequest = serde_json::from_str(&json).unwrap();
        assert!(validated(request).is_ok());

        let json = format!(
            r#"{{"customer_id": "{}", "items": [], "notes": "{}"}}"#,
            Uuid::new_v4(),
            "x".repeat(2001)
        );
        let request: CreateInvoiceRequest = serde_json::from_str(&json).unwrap();
        assert!(validated(request).is_err());
    }

    #[test]
    fn test_manual_payment_method_wire_name() {
        let request: ManualPaymentRequest =
            serde_json::from_str(r#"{"amount": "250", "method": "BANK_TRANSFER"}"#).unwrap();
        assert_eq!(request.method, PaymentMethod::BankTransfer);
    }
}

//! Wallet endpoints

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::{
    Direction, LedgerEntry, LedgerVerification, OperationContext, Page, PageRequest, Principal,
};
use crate::error::AppResult;
use crate::handlers::{
    InitiatePaymentCommand, LedgerCommand, LedgerReceipt, OnlineCheckout, PaymentHandler,
    PaymentTarget, TransactionFilter, WalletHandler, WalletRecord,
};
use crate::state::AppState;

use super::routes::{idempotency_key, parse_amount, validated};

#[derive(Debug, Deserialize)]
pub struct OpenWalletRequest {
    pub customer_id: Uuid,
}

/// Deposit or withdrawal
#[derive(Debug, Deserialize, Validate)]
pub struct LedgerRequest {
    pub amount: String,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub description: Option<String>,
    #[serde(default)]
    pub reference_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AdjustRequest {
    pub direction: Direction,
    pub amount: String,
    #[validate(length(min = 1, max = 500, message = "a reason is required for adjustments"))]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct FreezeRequest {
    #[validate(length(min = 1, max = 500, message = "reason is required"))]
    pub reason: String,
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/wallets", post(open))
        .route("/wallets/me", get(get_mine))
        .route("/wallets/:id", get(get_one))
        .route("/wallets/:id/transactions", get(list_transactions))
        .route("/wallets/:id/verify", get(verify))
        .route("/wallets/:id/deposit", post(deposit))
        .route("/wallets/:id/withdraw", post(withdraw))
        .route("/wallets/:id/adjust", post(adjust))
        .route("/wallets/:id/top-up", post(top_up))
        .route("/wallets/:id/freeze", post(freeze))
        .route("/wallets/:id/unfreeze", post(unfreeze))
}

fn handler(state: &AppState) -> WalletHandler {
    WalletHandler::new(state.pool.clone(), state.notifier(), &state.currency)
}

async fn open(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<OpenWalletRequest>,
) -> AppResult<(StatusCode, Json<WalletRecord>)> {
    let wallet = handler(&state)
        .open(request.customer_id, &principal, &context)
        .await?;
    Ok((StatusCode::CREATED, Json(wallet)))
}

async fn get_mine(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> AppResult<Json<WalletRecord>> {
    Ok(Json(handler(&state).get_mine(&principal).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<WalletRecord>> {
    Ok(Json(handler(&state).get(id, &principal).await?))
}

async fn list_transactions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Query(filter): Query<TransactionFilter>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<LedgerEntry>>> {
    let entries = handler(&state)
        .list_transactions(id, &filter, page, &principal)
        .await?;
    Ok(Json(entries))
}

async fn verify(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LedgerVerification>> {
    Ok(Json(handler(&state).verify(id, &principal).await?))
}

async fn deposit(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<LedgerRequest>,
) -> AppResult<(StatusCode, Json<LedgerReceipt>)> {
    let request = validated(request)?;
    let idem_key = idempotency_key(&headers)?;

    let command = LedgerCommand::deposit(id, parse_amount("amount", &request.amount)?);
    let command = with_details(command, request.description, request.reference_id);

    let receipt = handler(&state)
        .apply(command, idem_key, &principal, &context)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn withdraw(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<LedgerRequest>,
) -> AppResult<(StatusCode, Json<LedgerReceipt>)> {
    let request = validated(request)?;
    let idem_key = idempotency_key(&headers)?;

    let command = LedgerCommand::withdraw(id, parse_amount("amount", &request.amount)?);
    let command = with_details(command, request.description, request.reference_id);

    let receipt = handler(&state)
        .apply(command, idem_key, &principal, &context)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn adjust(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<AdjustRequest>,
) -> AppResult<(StatusCode, Json<LedgerReceipt>)> {
    let request = validated(request)?;
    let idem_key = idempotency_key(&headers)?;

    let command = LedgerCommand::adjust(
        id,
        request.direction,
        parse_amount("amount", &request.amount)?,
    )
    .with_description(request.description);

    let receipt = handler(&state)
        .apply(command, idem_key, &principal, &context)
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

fn with_details(
    command: LedgerCommand,
    description: Option<String>,
    reference_id: Option<Uuid>,
) -> LedgerCommand {
    let command = match description {
        Some(description) => command.with_description(description),
        None => command,
    };
    match reference_id {
        Some(reference_id) => command.with_reference(reference_id),
        None => command,
    }
}

/// Card top-up through the gateway; the deposit lands when the callback
/// reports success
async fn top_up(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<TopUpRequest>,
) -> AppResult<(StatusCode, Json<OnlineCheckout>)> {
    let idem_key = idempotency_key(&headers)?;

    let command = InitiatePaymentCommand {
        target: PaymentTarget::WalletTopUp(id),
        amount: Some(parse_amount("amount", &request.amount)?),
    };

    let payments = PaymentHandler::new(state.pool.clone(), state.gateway.clone(), state.notifier());
    let checkout = payments
        .initiate_online(command, idem_key, &principal, &context)
        .await?;

    Ok((StatusCode::CREATED, Json(checkout)))
}

async fn freeze(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<FreezeRequest>,
) -> AppResult<Json<WalletRecord>> {
    let request = validated(request)?;
    let wallet = handler(&state)
        .freeze(id, request.reason, &principal, &context)
        .await?;
    Ok(Json(wallet))
}

async fn unfreeze(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<WalletRecord>> {
    Ok(Json(handler(&state).unfreeze(id, &principal, &context).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LedgerOperation;

    #[test]
    fn test_with_details() {
        let wallet_id = Uuid::new_v4();
        let reference = Uuid::new_v4();
        let command = LedgerCommand::deposit(wallet_id, parse_amount("amount", "75").unwrap());

        let command = with_details(command, Some("Cash at counter".to_string()), Some(reference));

        assert_eq!(command.operation, LedgerOperation::Deposit);
        assert_eq!(command.description.as_deref(), Some("Cash at counter"));
        assert_eq!(command.reference_id, Some(reference));
    }

    #[test]
    fn test_adjust_request_needs_reason() {
        let request: AdjustRequest =
            serde_json::from_str(r#"{"direction": "DEBIT", "amount": "10", "description": ""}"#)
                .unwrap();

        assert_eq!(request.direction, Direction::Debit);
        assert!(validated(request).is_err());
    }
}

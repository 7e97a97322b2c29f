//! Customer, employee and service catalog endpoints

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::domain::{OperationContext, Page, PageRequest, Principal};
use crate::error::AppResult;
use crate::handlers::{
    CreateCustomerCommand, CreateEmployeeCommand, CreateServiceCommand, CustomerHandler,
    CustomerRecord, CustomerSearch, CustomerWithWallet, EmployeeHandler, EmployeeRecord,
    ServiceHandler, ServiceListFilter, ServiceRecord, UpdateCustomerCommand,
    UpdateServiceCommand,
};
use crate::state::AppState;

use super::routes::validated;

// =========================================================================
// Request types
// =========================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCustomerRequest {
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub organization: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCustomerRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200, message = "name cannot be empty"))]
    pub name: Option<String>,
    #[serde(default)]
    #[validate(email(message = "email is invalid"))]
    pub email: Option<String>,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub organization: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEmployeeRequest {
    #[validate(length(min = 1, max = 200, message = "name is required"))]
    pub name: String,
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateServiceRequest {
    #[validate(length(min = 1, max = 50, message = "code is required"))]
    pub code: String,
    #[validate(length(min = 1, max = 200, message = "name_en is required"))]
    pub name_en: String,
    #[validate(length(min = 1, max = 200, message = "name_ar is required"))]
    pub name_ar: String,
    #[serde(default)]
    pub description: Option<String>,
    pub base_price: Decimal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateServiceRequest {
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub name_en: Option<String>,
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub name_ar: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub base_price: Option<Decimal>,
}

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/customers", post(create_customer).get(list_customers))
        .route(
            "/customers/:id",
            get(get_customer).patch(update_customer).delete(deactivate_customer),
        )
        .route("/employees", post(create_employee).get(list_employees))
        .route(
            "/employees/:id",
            get(get_employee).delete(deactivate_employee),
        )
        .route("/services", post(create_service).get(list_services))
        .route(
            "/services/:id",
            get(get_service).patch(update_service).delete(deactivate_service),
        )
}

// =========================================================================
// Customers
// =========================================================================

async fn create_customer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateCustomerRequest>,
) -> AppResult<(StatusCode, Json<CustomerWithWallet>)> {
    let request = validated(request)?;
    let handler = CustomerHandler::new(state.pool, &state.currency);

    let command = CreateCustomerCommand {
        name: request.name,
        email: request.email,
        phone: request.phone,
        organization: request.organization,
    };

    let customer = handler.create(command, &principal, &context).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

async fn list_customers(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(search): Query<CustomerSearch>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<CustomerRecord>>> {
    let handler = CustomerHandler::new(state.pool, &state.currency);
    Ok(Json(handler.list(&search, page, &principal).await?))
}

async fn get_customer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<CustomerRecord>> {
    let handler = CustomerHandler::new(state.pool, &state.currency);
    Ok(Json(handler.get(id, &principal).await?))
}

async fn update_customer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCustomerRequest>,
) -> AppResult<Json<CustomerRecord>> {
    let request = validated(request)?;
    let handler = CustomerHandler::new(state.pool, &state.currency);

    let command = UpdateCustomerCommand {
        name: request.name,
        email: request.email,
        phone: request.phone,
        organization: request.organization,
    };

    Ok(Json(handler.update(id, command, &principal, &context).await?))
}

/// Soft delete
async fn deactivate_customer(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let handler = CustomerHandler::new(state.pool, &state.currency);
    handler.deactivate(id, &principal, &context).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =========================================================================
// Employees
// =========================================================================

async fn create_employee(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateEmployeeRequest>,
) -> AppResult<(StatusCode, Json<EmployeeRecord>)> {
    let request = validated(request)?;
    let handler = EmployeeHandler::new(state.pool);

    let command = CreateEmployeeCommand {
        name: request.name,
        email: request.email,
        job_title: request.job_title,
        permissions: request.permissions,
    };

    let employee = handler.create(command, &principal, &context).await?;
    Ok((StatusCode::CREATED, Json(employee)))
}

async fn list_employees(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<EmployeeRecord>>> {
    let handler = EmployeeHandler::new(state.pool);
    Ok(Json(handler.list(page, &principal).await?))
}

async fn get_employee(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<EmployeeRecord>> {
    let handler = EmployeeHandler::new(state.pool);
    Ok(Json(handler.get(id, &principal).await?))
}

async fn deactivate_employee(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let handler = EmployeeHandler::new(state.pool);
    handler.deactivate(id, &principal, &context).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =========================================================================
// Services
// =========================================================================

async fn create_service(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Json(request): Json<CreateServiceRequest>,
) -> AppResult<(StatusCode, Json<ServiceRecord>)> {
    let request = validated(request)?;
    let handler = ServiceHandler::new(state.pool);

    let command = CreateServiceCommand {
        code: request.code,
        name_en: request.name_en,
        name_ar: request.name_ar,
        description: request.description,
        base_price: request.base_price,
    };

    let service = handler.create(command, &principal, &context).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

async fn list_services(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(filter): Query<ServiceListFilter>,
    Query(page): Query<PageRequest>,
) -> AppResult<Json<Page<ServiceRecord>>> {
    let handler = ServiceHandler::new(state.pool);
    Ok(Json(handler.list(&filter, page, &principal).await?))
}

async fn get_service(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ServiceRecord>> {
    let handler = ServiceHandler::new(state.pool);
    Ok(Json(handler.get(id, &principal).await?))
}

async fn update_service(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateServiceRequest>,
) -> AppResult<Json<ServiceRecord>> {
    let request = validated(request)?;
    let handler = ServiceHandler::new(state.pool);

    let command = UpdateServiceCommand {
        name_en: request.name_en,
        name_ar: request.name_ar,
        description: request.description,
        base_price: request.base_price,
    };

    Ok(Json(handler.update(id, command, &principal, &context).await?))
}

async fn deactivate_service(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let handler = ServiceHandler::new(state.pool);
    handler.deactivate(id, &principal, &context).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_create_customer_request_validation() {
        let request: CreateCustomerRequest = serde_json::from_str(
            r#"{"name": "", "email": "not-an-email"}"#,
        )
        .unwrap();

        match validated(request) {
            Err(AppError::Validation(fields)) => {
                assert!(fields.contains_key("name"));
                assert!(fields.contains_key("email"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_service_request_accepts_string_price() {
        let request: CreateServiceRequest = serde_json::from_str(
            r#"{"code": "CT-01", "name_en": "Core test", "name_ar": "اختبار القلب", "base_price": "1500.00"}"#,
        )
        .unwrap();

        assert_eq!(request.base_price, Decimal::new(150000, 2));
        assert!(validated(request).is_ok());
    }
}

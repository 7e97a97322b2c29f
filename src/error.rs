//! Error handling module
//!
//! Centralized error types and HTTP response conversion. Every error body
//! is bilingual: `error` in English, `error_ar` in Arabic.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::audit::AuditLogError;
use crate::domain::{AmountError, DomainError, UnknownVariant};
use crate::gateway::GatewayError;
use crate::idempotency::IdempotencyError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Field name → validation messages
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Idempotency conflict: same key with different request")]
    IdempotencyConflict,

    #[error("A request with this idempotency key is still being processed")]
    IdempotencyInProgress,

    #[error("Invalid callback signature")]
    InvalidSignature,

    // Gateway errors (5xx)
    #[error("Online payments are not configured")]
    GatewayUnavailable,

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// A single-field validation error
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![message.into()]);
        AppError::Validation(fields)
    }

    /// Map a unique-constraint violation to a 409, pass everything else through
    pub fn unique_violation(err: sqlx::Error, message: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                AppError::Conflict(message.to_string())
            }
            _ => AppError::Database(err),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let fields = errors
            .field_errors()
            .into_iter()
            .map(|(field, errs)| {
                let messages = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                (field.to_string(), messages)
            })
            .collect();

        AppError::Validation(fields)
    }
}

impl From<AmountError> for AppError {
    fn from(err: AmountError) -> Self {
        AppError::field("amount", err.to_string())
    }
}

/// A stored status string we can't parse means the database holds data
/// this build doesn't understand.
impl From<UnknownVariant> for AppError {
    fn from(err: UnknownVariant) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<IdempotencyError> for AppError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::HashMismatch(_) => AppError::IdempotencyConflict,
            IdempotencyError::KeyInProgress => AppError::IdempotencyInProgress,
            IdempotencyError::Database(e) => AppError::Database(e),
            IdempotencyError::NotFound(key) => {
                AppError::Internal(format!("idempotency key vanished: {}", key))
            }
        }
    }
}

impl From<AuditLogError> for AppError {
    fn from(err: AuditLogError) -> Self {
        match err {
            AuditLogError::Database(e) => AppError::Database(e),
            AuditLogError::Serialization(e) => AppError::Internal(e.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_ar: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldErrors>,
}

impl AppError {
    /// HTTP status, machine code, Arabic message and details
    fn parts(&self) -> (StatusCode, String, String, Option<String>) {
        match self {
            // 400 Bad Request
            AppError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "validation_failed".into(),
                "البيانات المرسلة غير صالحة".into(),
                None,
            ),
            AppError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request".into(),
                "الطلب غير صالح".into(),
                Some(msg.clone()),
            ),

            // 401 Unauthorized
            AppError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "يجب تسجيل الدخول".into(),
                Some(msg.clone()),
            ),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature".into(),
                "توقيع غير صالح".into(),
                None,
            ),

            // 403 Forbidden
            AppError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                "forbidden".into(),
                "غير مسموح لك بتنفيذ هذا الإجراء".into(),
                Some(msg.clone()),
            ),

            // 409 Conflict
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                "conflict".into(),
                "تتعارض العملية مع بيانات موجودة".into(),
                Some(msg.clone()),
            ),
            AppError::IdempotencyConflict => (
                StatusCode::CONFLICT,
                "idempotency_conflict".into(),
                "مفتاح التكرار مستخدم لطلب مختلف".into(),
                None,
            ),
            AppError::IdempotencyInProgress => (
                StatusCode::CONFLICT,
                "idempotency_in_progress".into(),
                "الطلب قيد التنفيذ بالفعل".into(),
                None,
            ),

            // Gateway
            AppError::GatewayUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "gateway_unavailable".into(),
                "الدفع الإلكتروني غير متاح حالياً".into(),
                None,
            ),
            AppError::Gateway(e) => {
                tracing::error!(error = %e, "Payment gateway error");
                (
                    StatusCode::BAD_GATEWAY,
                    "gateway_error".into(),
                    "تعذر الاتصال ببوابة الدفع".into(),
                    None,
                )
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => {
                let (status, code, details) = match domain_err {
                    DomainError::NotFound { entity, id } => (
                        StatusCode::NOT_FOUND,
                        format!("{}_not_found", entity.code()),
                        Some(id.to_string()),
                    ),
                    DomainError::InsufficientBalance { .. } => (
                        StatusCode::BAD_REQUEST,
                        "insufficient_balance".into(),
                        Some(domain_err.to_string()),
                    ),
                    DomainError::WalletFrozen { reason } => (
                        StatusCode::BAD_REQUEST,
                        "wallet_frozen".into(),
                        Some(reason.clone()),
                    ),
                    DomainError::InvalidAmount(msg) => (
                        StatusCode::BAD_REQUEST,
                        "invalid_amount".into(),
                        Some(msg.clone()),
                    ),
                    DomainError::Overpayment { .. } => (
                        StatusCode::BAD_REQUEST,
                        "overpayment".into(),
                        Some(domain_err.to_string()),
                    ),
                    DomainError::InvalidTransition { .. } => (
                        StatusCode::CONFLICT,
                        "invalid_transition".into(),
                        Some(domain_err.to_string()),
                    ),
                    DomainError::InvoiceNotPayable { status } => (
                        StatusCode::CONFLICT,
                        "invoice_not_payable".into(),
                        Some(status.clone()),
                    ),
                    DomainError::InvoiceHasPayments => {
                        (StatusCode::CONFLICT, "invoice_has_payments".into(), None)
                    }
                    DomainError::Forbidden(msg) => {
                        (StatusCode::FORBIDDEN, "forbidden".into(), Some(msg.clone()))
                    }
                    DomainError::BusinessRuleViolation(msg) => (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        "business_rule_violation".into(),
                        Some(msg.clone()),
                    ),
                    DomainError::VersionConflict { expected, found } => (
                        StatusCode::CONFLICT,
                        "version_conflict".into(),
                        Some(format!("expected {}, found {}", expected, found)),
                    ),
                    DomainError::DuplicateOperation { key } => (
                        StatusCode::CONFLICT,
                        "duplicate_operation".into(),
                        Some(key.clone()),
                    ),
                };
                (status, code, domain_err.message_ar(), details)
            }

            // 500 Internal Server Error
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error".into(),
                    "حدث خطأ داخلي".into(),
                    None,
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error".into(),
                    "حدث خطأ داخلي".into(),
                    None,
                )
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "config_error".into(),
                    "حدث خطأ داخلي".into(),
                    None,
                )
            }
        }
    }

    /// Server errors never leak their text to clients
    fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Internal(_) | AppError::Config(_) => {
                "Internal server error".to_string()
            }
            AppError::Gateway(_) => "Payment gateway error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, error_ar, details) = self.parts();

        let fields = match &self {
            AppError::Validation(fields) => Some(fields.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.public_message(),
            error_ar,
            error_code,
            details,
            fields,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Entity;
    use uuid::Uuid;

    #[test]
    fn test_not_found_code_uses_entity() {
        let err = AppError::from(DomainError::not_found(Entity::Invoice, Uuid::nil()));
        let (status, code, error_ar, _) = err.parts();

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, "invoice_not_found");
        assert_eq!(error_ar, "الفاتورة غير موجود");
    }

    #[test]
    fn test_amount_error_becomes_field_error() {
        let err = AppError::from(AmountError::Overflow);
        match err {
            AppError::Validation(fields) => assert!(fields.contains_key("amount")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_idempotency_mapping() {
        let err = AppError::from(IdempotencyError::HashMismatch(Uuid::nil()));
        assert!(matches!(err, AppError::IdempotencyConflict));
        assert_eq!(err.parts().0, StatusCode::CONFLICT);
    }

    #[test]
    fn test_server_errors_are_opaque() {
        let err = AppError::Internal("secret detail".to_string());
        assert_eq!(err.public_message(), "Internal server error");
        assert_eq!(err.parts().0, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_gateway_status_codes() {
        assert_eq!(
            AppError::GatewayUnavailable.parts().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Gateway(GatewayError::NotConfigured).parts().0,
            StatusCode::BAD_GATEWAY
        );
    }
}

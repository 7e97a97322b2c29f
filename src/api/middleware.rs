//! API Middleware
//!
//! Bearer token authentication and request logging.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::auth;
use crate::domain::OperationContext;
use crate::error::AppError;
use crate::state::AppState;

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";

/// `Authorization: Bearer <token>` → raw token
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Correlation id from the request, or a fresh one
pub fn correlation_id(headers: &HeaderMap) -> Uuid {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}

// =========================================================================
// Bearer Token Authentication Middleware
// =========================================================================

/// Resolve the bearer token to a `Principal` and build the request's
/// `OperationContext`. Both are stored in request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = bearer_token(&headers).ok_or_else(|| {
        AppError::Unauthorized("missing bearer token".to_string()).into_response()
    })?;

    let principal = match auth::resolve_token(&state.pool, token).await {
        Ok(Some(principal)) => principal,
        Ok(None) => {
            return Err(
                AppError::Unauthorized("invalid or expired token".to_string()).into_response(),
            );
        }
        Err(e) => {
            tracing::error!("Database error during token validation: {}", e);
            return Err(AppError::Database(e).into_response());
        }
    };

    let mut context = OperationContext::new()
        .with_principal(&principal)
        .with_correlation_id(correlation_id(&headers));

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        context = context.with_client_ip(addr.ip());
    }

    tracing::debug!(
        principal_id = %principal.id,
        kind = %principal.kind,
        "Authenticated request"
    );

    request.extensions_mut().insert(principal);
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

// =========================================================================
// Header masking
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-api-key"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Query parameters that carry credentials: the gateway `hmac` and the
/// socket `token`
const SECRET_PARAMS: [&str; 2] = ["hmac", "token"];

fn mask_query(uri: &axum::http::Uri) -> String {
    let Some(query) = uri.query() else {
        return uri.to_string();
    };

    let masked: Vec<String> = query
        .split('&')
        .map(|pair| {
            let name = pair.split('=').next().unwrap_or_default();
            if SECRET_PARAMS.contains(&name) {
                format!("{}=[REDACTED]", name)
            } else {
                pair.to_string()
            }
        })
        .collect();

    format!("{}?{}", uri.path(), masked.join("&"))
}

/// `TraceLayer` span with the path only; query strings are never recorded
pub fn request_span(request: &Request<Body>) -> tracing::Span {
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = mask_query(request.uri());
    let version = request.version();

    let headers = mask_headers_for_logging(request.headers());
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        version = ?version,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("authorization", "Bearer hbrc_secret".parse().unwrap());
        headers.insert("x-correlation-id", "abc".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);

        let auth = masked.iter().find(|(k, _)| k == "authorization");
        let content_type = masked.iter().find(|(k, _)| k == "content-type");
        let correlation = masked.iter().find(|(k, _)| k == "x-correlation-id");

        assert_eq!(auth.unwrap().1, "[REDACTED]");
        assert_eq!(content_type.unwrap().1, "application/json");
        assert_eq!(correlation.unwrap().1, "abc");
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, "Bearer hbrc_abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("hbrc_abc"));

        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_correlation_id_falls_back_to_new() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, id.to_string().parse().unwrap());
        assert_eq!(correlation_id(&headers), id);

        headers.insert(CORRELATION_ID_HEADER, "not-a-uuid".parse().unwrap());
        assert_ne!(correlation_id(&headers), id);
    }

    #[test]
    fn test_mask_query_hides_credentials() {
        let uri: axum::http::Uri = "/api/v1/payments/paymob/redirect?id=1&hmac=abcd&success=true"
            .parse()
            .unwrap();
        assert_eq!(
            mask_query(&uri),
            "/api/v1/payments/paymob/redirect?id=1&hmac=[REDACTED]&success=true"
        );

        let uri: axum::http::Uri = "/ws/notifications?token=hbrc_x".parse().unwrap();
        assert_eq!(mask_query(&uri), "/ws/notifications?token=[REDACTED]");

        let uri: axum::http::Uri = "/ws/notifications?page=1&token=hbrc_x".parse().unwrap();
        assert_eq!(mask_query(&uri), "/ws/notifications?page=1&token=[REDACTED]");

        let uri: axum::http::Uri = "/api/v1/invoices?page=2".parse().unwrap();
        assert_eq!(mask_query(&uri), "/api/v1/invoices?page=2");

        let uri: axum::http::Uri = "/api/v1/invoices".parse().unwrap();
        assert_eq!(mask_query(&uri), "/api/v1/invoices");
    }

    #[test]
    fn test_request_span_leaves_out_query() {
        let request = Request::builder()
            .method("GET")
            .uri("/ws/notifications?token=hbrc_secret")
            .body(Body::empty())
            .unwrap();

        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = request_span(&request);
            let metadata = span.metadata().unwrap();
            let fields: Vec<&str> = metadata.fields().iter().map(|f| f.name()).collect();

            assert_eq!(metadata.name(), "http_request");
            assert_eq!(fields, ["method", "path"]);
        });
    }
}

//! Operation Context
//!
//! The authenticated caller (`Principal`) and the per-request metadata
//! carried into handlers for authorization, auditing and tracing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use uuid::Uuid;

use super::DomainError;

/// Permission that implies every other permission.
pub const ADMIN_PERMISSION: &str = "admin";

/// Who a bearer token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Employee,
    Customer,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::Employee => "employee",
            PrincipalKind::Customer => "customer",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employee" => Ok(PrincipalKind::Employee),
            "customer" => Ok(PrincipalKind::Customer),
            other => Err(format!("unknown principal kind: {}", other)),
        }
    }
}

/// Authenticated caller resolved from a bearer token
#[derive(Debug, Clone)]
pub struct Principal {
    pub token_id: Uuid,
    pub id: Uuid,
    pub kind: PrincipalKind,
    pub permissions: Vec<String>,
}

impl Principal {
    pub fn employee(id: Uuid, permissions: Vec<String>) -> Self {
        Self {
            token_id: Uuid::nil(),
            id,
            kind: PrincipalKind::Employee,
            permissions,
        }
    }

    pub fn customer(id: Uuid) -> Self {
        Self {
            token_id: Uuid::nil(),
            id,
            kind: PrincipalKind::Customer,
            permissions: Vec::new(),
        }
    }

    pub fn is_staff(&self) -> bool {
        self.kind == PrincipalKind::Employee
    }

    /// Customer id when the caller is a customer
    pub fn customer_id(&self) -> Option<Uuid> {
        match self.kind {
            PrincipalKind::Customer => Some(self.id),
            PrincipalKind::Employee => None,
        }
    }

    /// Staff permission check; customers never hold staff permissions
    pub fn has_permission(&self, permission: &str) -> bool {
        self.is_staff()
            && self
                .permissions
                .iter()
                .any(|p| p == permission || p == ADMIN_PERMISSION)
    }

    /// Require a staff permission
    pub fn require(&self, permission: &str) -> Result<(), DomainError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(DomainError::Forbidden(format!(
                "{} permission required",
                permission
            )))
        }
    }

    /// Require any staff member
    pub fn require_staff(&self) -> Result<(), DomainError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(DomainError::Forbidden("staff only".to_string()))
        }
    }

    /// Tenant boundary: staff see every customer, customers only themselves
    pub fn can_access_customer(&self, customer_id: Uuid) -> bool {
        self.is_staff() || self.id == customer_id
    }
}

/// Context for an operation, used for auditing and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationContext {
    /// Token used for this request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<Uuid>,

    /// Acting employee or customer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_kind: Option<PrincipalKind>,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    /// Client IP address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
}

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self {
            token_id: None,
            actor_id: None,
            actor_kind: None,
            correlation_id: None,
            client_ip: None,
        }
    }

    /// Context for work done by background jobs or gateway callbacks
    pub fn system() -> Self {
        Self::new().with_correlation_id(Uuid::new_v4())
    }

    /// Create context for an authenticated principal
    pub fn with_principal(mut self, principal: &Principal) -> Self {
        self.token_id = Some(principal.token_id);
        self.actor_id = Some(principal.id);
        self.actor_kind = Some(principal.kind);
        self
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Create context with client IP
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let principal = Principal::customer(Uuid::new_v4());
        let correlation_id = Uuid::new_v4();

        let context = OperationContext::new()
            .with_principal(&principal)
            .with_correlation_id(correlation_id);

        assert_eq!(context.actor_id, Some(principal.id));
        assert_eq!(context.actor_kind, Some(PrincipalKind::Customer));
        assert_eq!(context.correlation_id, Some(correlation_id));
    }

    #[test]
    fn test_ensure_correlation_id() {
        let mut context = OperationContext::new();
        let id = context.ensure_correlation_id();
        assert_eq!(context.ensure_correlation_id(), id);
    }

    #[test]
    fn test_admin_implies_everything() {
        let admin = Principal::employee(Uuid::new_v4(), vec!["admin".to_string()]);
        assert!(admin.has_permission("wallets:write"));
        assert!(admin.require("invoices:write").is_ok());
    }

    #[test]
    fn test_customer_has_no_staff_permissions() {
        let mut customer = Principal::customer(Uuid::new_v4());
        customer.permissions = vec!["admin".to_string()];

        assert!(!customer.has_permission("wallets:write"));
        assert!(matches!(
            customer.require("wallets:write"),
            Err(DomainError::Forbidden(_))
        ));
    }

    #[test]
    fn test_tenant_boundary() {
        let customer = Principal::customer(Uuid::new_v4());
        let clerk = Principal::employee(Uuid::new_v4(), vec!["invoices:write".to_string()]);
        let other = Uuid::new_v4();

        assert!(customer.can_access_customer(customer.id));
        assert!(!customer.can_access_customer(other));
        assert!(clerk.can_access_customer(other));
    }

    #[test]
    fn test_principal_kind_parse() {
        assert_eq!("employee".parse::<PrincipalKind>(), Ok(PrincipalKind::Employee));
        assert!("robot".parse::<PrincipalKind>().is_err());
    }
}

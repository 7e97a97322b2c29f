//! Catalog Handlers
//!
//! Customers, employees and the service catalog. Creating a customer opens
//! their wallet in the same transaction.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::context::ADMIN_PERMISSION;
use crate::domain::{DomainError, Entity, OperationContext, Page, PageRequest, Principal};
use crate::error::{AppError, AppResult};

use super::records::{
    CustomerRecord, EmployeeRecord, ServiceRecord, WalletRecord, CUSTOMER_COLUMNS,
    EMPLOYEE_COLUMNS, SERVICE_COLUMNS,
};
use super::wallet_handler::open_in;
use super::{
    CreateCustomerCommand, CreateEmployeeCommand, CreateServiceCommand, UpdateCustomerCommand,
    UpdateServiceCommand,
};

const CATALOG_PERMISSION: &str = "catalog:write";

/// A new customer and the wallet opened for them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerWithWallet {
    #[serde(flatten)]
    pub customer: CustomerRecord,
    pub wallet: WalletRecord,
}

/// `GET /customers?search=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomerSearch {
    pub search: Option<String>,
}

/// `GET /services?include_inactive=`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceListFilter {
    #[serde(default)]
    pub include_inactive: bool,
}

fn require_email(email: &str) -> AppResult<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(AppError::field("email", "invalid email address")),
    }
}

fn require_text(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        Err(AppError::field(field, format!("{} is required", field)))
    } else {
        Ok(())
    }
}

// =========================================================================
// Customers
// =========================================================================

pub struct CustomerHandler {
    pool: PgPool,
    currency: String,
}

impl CustomerHandler {
    pub fn new(pool: PgPool, currency: impl Into<String>) -> Self {
        Self {
            pool,
            currency: currency.into(),
        }
    }

    pub async fn create(
        &self,
        command: CreateCustomerCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<CustomerWithWallet> {
        actor.require(CATALOG_PERMISSION)?;
        require_text("name", &command.name)?;
        require_email(&command.email)?;

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO customers (id, name, email, phone, organization)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            CUSTOMER_COLUMNS
        );
        let customer: CustomerRecord = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(command.name.trim())
            .bind(command.email.trim().to_lowercase())
            .bind(&command.phone)
            .bind(&command.organization)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::unique_violation(e, "email already registered"))?;

        AuditLogBuilder::new(AuditAction::CustomerCreated)
            .resource("customer", customer.id)
            .after_state(&customer)
            .write(&mut *tx, context)
            .await?;

        let (wallet, _) = open_in(&mut tx, customer.id, &self.currency, context).await?;

        tx.commit().await?;

        tracing::info!(customer_id = %customer.id, wallet_id = %wallet.id, "Customer created");

        Ok(CustomerWithWallet { customer, wallet })
    }

    /// Staff, or the customer themself
    pub async fn get(&self, id: Uuid, actor: &Principal) -> AppResult<CustomerRecord> {
        if !actor.can_access_customer(id) {
            return Err(DomainError::not_found(Entity::Customer, id).into());
        }

        let sql = format!("SELECT {} FROM customers WHERE id = $1", CUSTOMER_COLUMNS);
        sqlx::query_as::<_, CustomerRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DomainError::not_found(Entity::Customer, id).into())
    }

    pub async fn update(
        &self,
        id: Uuid,
        command: UpdateCustomerCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<CustomerRecord> {
        if actor.customer_id() != Some(id) {
            actor.require(CATALOG_PERMISSION)?;
        }
        if command.is_empty() {
            return Err(AppError::InvalidRequest("nothing to update".to_string()));
        }
        if let Some(name) = &command.name {
            require_text("name", name)?;
        }
        if let Some(email) = &command.email {
            require_email(email)?;
        }

        let before = self.get(id, actor).await?;

        let sql = format!(
            r#"
            UPDATE customers
            SET name = COALESCE($2, name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                organization = COALESCE($5, organization),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            CUSTOMER_COLUMNS
        );
        let mut tx = self.pool.begin().await?;
        let after: CustomerRecord = sqlx::query_as(&sql)
            .bind(id)
            .bind(command.name.as_deref().map(str::trim))
            .bind(command.email.as_deref().map(|e| e.trim().to_lowercase()))
            .bind(&command.phone)
            .bind(&command.organization)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::unique_violation(e, "email already registered"))?;

        AuditLogBuilder::new(AuditAction::CustomerUpdated)
            .resource("customer", id)
            .before_state(&before)
            .after_state(&after)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        Ok(after)
    }

    /// Soft delete; the customer's tokens stop resolving
    pub async fn deactivate(
        &self,
        id: Uuid,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<CustomerRecord> {
        actor.require(CATALOG_PERMISSION)?;

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE customers SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            CUSTOMER_COLUMNS
        );
        let customer: CustomerRecord = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DomainError::not_found(Entity::Customer, id))?;

        AuditLogBuilder::new(AuditAction::CustomerDeactivated)
            .resource("customer", id)
            .after_state(&customer)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(customer_id = %id, "Customer deactivated");

        Ok(customer)
    }

    /// Staff only; `search` matches name, email or organization
    pub async fn list(
        &self,
        search: &CustomerSearch,
        page: PageRequest,
        actor: &Principal,
    ) -> AppResult<Page<CustomerRecord>> {
        actor.require_staff()?;

        let pattern = search
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM customers
            WHERE $1::TEXT IS NULL OR name ILIKE $1 OR email ILIKE $1 OR organization ILIKE $1
            "#,
        )
        .bind(&pattern)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            r#"
            SELECT {} FROM customers
            WHERE $1::TEXT IS NULL OR name ILIKE $1 OR email ILIKE $1 OR organization ILIKE $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            CUSTOMER_COLUMNS
        );
        let items: Vec<CustomerRecord> = sqlx::query_as(&sql)
            .bind(&pattern)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, page))
    }
}

// =========================================================================
// Employees
// =========================================================================

pub struct EmployeeHandler {
    pool: PgPool,
}

impl EmployeeHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        command: CreateEmployeeCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<EmployeeRecord> {
        actor.require(ADMIN_PERMISSION)?;
        require_text("name", &command.name)?;
        require_email(&command.email)?;

        let mut permissions: Vec<String> = command
            .permissions
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        permissions.sort();
        permissions.dedup();

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO employees (id, name, email, job_title, permissions)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            EMPLOYEE_COLUMNS
        );
        let employee: EmployeeRecord = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(command.name.trim())
            .bind(command.email.trim().to_lowercase())
            .bind(&command.job_title)
            .bind(&permissions)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::unique_violation(e, "email already registered"))?;

        AuditLogBuilder::new(AuditAction::EmployeeCreated)
            .resource("employee", employee.id)
            .after_state(&employee)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(employee_id = %employee.id, "Employee created");

        Ok(employee)
    }

    pub async fn get(&self, id: Uuid, actor: &Principal) -> AppResult<EmployeeRecord> {
        actor.require_staff()?;

        let sql = format!("SELECT {} FROM employees WHERE id = $1", EMPLOYEE_COLUMNS);
        sqlx::query_as::<_, EmployeeRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DomainError::not_found(Entity::Employee, id).into())
    }

    pub async fn list(&self, page: PageRequest, actor: &Principal) -> AppResult<Page<EmployeeRecord>> {
        actor.require_staff()?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM employees")
            .fetch_one(&self.pool)
            .await?;

        let sql = format!(
            "SELECT {} FROM employees ORDER BY name LIMIT $1 OFFSET $2",
            EMPLOYEE_COLUMNS
        );
        let items: Vec<EmployeeRecord> = sqlx::query_as(&sql)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn deactivate(
        &self,
        id: Uuid,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<EmployeeRecord> {
        actor.require(ADMIN_PERMISSION)?;

        if actor.id == id {
            return Err(DomainError::BusinessRuleViolation(
                "employees cannot deactivate themselves".to_string(),
            )
            .into());
        }

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE employees SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            EMPLOYEE_COLUMNS
        );
        let employee: EmployeeRecord = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DomainError::not_found(Entity::Employee, id))?;

        AuditLogBuilder::new(AuditAction::EmployeeDeactivated)
            .resource("employee", id)
            .after_state(&employee)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(employee_id = %id, "Employee deactivated");

        Ok(employee)
    }
}

// =========================================================================
// Services
// =========================================================================

pub struct ServiceHandler {
    pool: PgPool,
}

impl ServiceHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        command: CreateServiceCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<ServiceRecord> {
        actor.require(CATALOG_PERMISSION)?;
        require_text("code", &command.code)?;
        require_text("name_en", &command.name_en)?;
        require_text("name_ar", &command.name_ar)?;
        require_price(command.base_price)?;

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO services (id, code, name_en, name_ar, description, base_price)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            SERVICE_COLUMNS
        );
        let service: ServiceRecord = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(command.code.trim().to_uppercase())
            .bind(command.name_en.trim())
            .bind(command.name_ar.trim())
            .bind(&command.description)
            .bind(command.base_price)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::unique_violation(e, "service code already exists"))?;

        AuditLogBuilder::new(AuditAction::ServiceCreated)
            .resource("service", service.id)
            .after_state(&service)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        Ok(service)
    }

    /// Customers only see services still offered
    pub async fn get(&self, id: Uuid, actor: &Principal) -> AppResult<ServiceRecord> {
        let sql = format!("SELECT {} FROM services WHERE id = $1", SERVICE_COLUMNS);
        let service: Option<ServiceRecord> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        service
            .filter(|s| s.is_active || actor.is_staff())
            .ok_or_else(|| DomainError::not_found(Entity::Service, id).into())
    }

    pub async fn update(
        &self,
        id: Uuid,
        command: UpdateServiceCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<ServiceRecord> {
        actor.require(CATALOG_PERMISSION)?;
        if let Some(price) = command.base_price {
            require_price(price)?;
        }

        let before = self.get(id, actor).await?;

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE services
            SET name_en = COALESCE($2, name_en),
                name_ar = COALESCE($3, name_ar),
                description = COALESCE($4, description),
                base_price = COALESCE($5, base_price),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SERVICE_COLUMNS
        );
        let after: ServiceRecord = sqlx::query_as(&sql)
            .bind(id)
            .bind(&command.name_en)
            .bind(&command.name_ar)
            .bind(&command.description)
            .bind(command.base_price)
            .fetch_one(&mut *tx)
            .await?;

        AuditLogBuilder::new(AuditAction::ServiceUpdated)
            .resource("service", id)
            .before_state(&before)
            .after_state(&after)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        Ok(after)
    }

    pub async fn deactivate(
        &self,
        id: Uuid,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<ServiceRecord> {
        actor.require(CATALOG_PERMISSION)?;

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE services SET is_active = FALSE, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            SERVICE_COLUMNS
        );
        let service: ServiceRecord = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DomainError::not_found(Entity::Service, id))?;

        AuditLogBuilder::new(AuditAction::ServiceDeactivated)
            .resource("service", id)
            .after_state(&service)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        Ok(service)
    }

    pub async fn list(
        &self,
        filter: &ServiceListFilter,
        page: PageRequest,
        actor: &Principal,
    ) -> AppResult<Page<ServiceRecord>> {
        let active_only = !(filter.include_inactive && actor.is_staff());

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM services WHERE $1 = FALSE OR is_active")
                .bind(active_only)
                .fetch_one(&self.pool)
                .await?;

        let sql = format!(
            r#"
            SELECT {} FROM services
            WHERE $1 = FALSE OR is_active
            ORDER BY code
            LIMIT $2 OFFSET $3
            "#,
            SERVICE_COLUMNS
        );
        let items: Vec<ServiceRecord> = sqlx::query_as(&sql)
            .bind(active_only)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, page))
    }
}

fn require_price(price: Decimal) -> AppResult<()> {
    if price < Decimal::ZERO {
        return Err(AppError::field("base_price", "base price cannot be negative"));
    }
    if price.scale() > 2 {
        return Err(AppError::field("base_price", "at most 2 decimal places"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_require_email() {
        assert!(require_email("eng@hbrc.edu.eg").is_ok());
        assert!(require_email("  eng@hbrc.edu.eg ").is_ok());
        assert!(require_email("not-an-email").is_err());
        assert!(require_email("@hbrc.edu.eg").is_err());
        assert!(require_email("eng@localhost").is_err());
    }

    #[test]
    fn test_require_price() {
        assert!(require_price(dec!(0)).is_ok());
        assert!(require_price(dec!(1500.50)).is_ok());
        assert!(require_price(dec!(-1)).is_err());
        assert!(require_price(dec!(1.005)).is_err());
    }

    #[test]
    fn test_require_text_names_the_field() {
        match require_text("title", "   ") {
            Err(AppError::Validation(fields)) => assert!(fields.contains_key("title")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}

//! Invoice Handler
//!
//! Invoice creation and the manual lifecycle actions. Payment-driven status
//! changes go through `refresh_invoice_status`, which every payment path
//! calls inside its own transaction.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::reference::{reference_number, INVOICE_PREFIX};
use crate::domain::{
    invoice_status, Balance, DomainError, Entity, InvoiceAction, InvoiceStatus, OperationContext,
    Page, PageRequest, Principal, ServiceRequestStatus, MAX_AMOUNT, MAX_SCALE,
};
use crate::error::{AppError, AppResult};
use crate::notifications::{Notice, NotificationService};

use super::records::{
    CustomerRecord, InvoiceDetail, InvoiceItemRecord, InvoiceRecord, ServiceRecord,
    ServiceRequestRecord, CUSTOMER_COLUMNS, INVOICE_COLUMNS, SERVICE_COLUMNS,
    SERVICE_REQUEST_COLUMNS,
};
use super::{CreateInvoiceCommand, InvoiceItemInput};

const RESOURCE: &str = "invoice";
const PERMISSION: &str = "invoices:write";

/// `GET /invoices` filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub overdue_only: bool,
}

/// Result of re-deriving an invoice's status
#[derive(Debug, Clone)]
pub struct InvoiceRefresh {
    pub previous: InvoiceStatus,
    pub invoice: InvoiceRecord,
}

impl InvoiceRefresh {
    pub fn changed(&self) -> bool {
        self.invoice.status != self.previous.as_str()
    }

    /// Status-change notice for the invoice's customer, if the status moved
    pub fn notice(&self) -> Option<Notice> {
        if !self.changed() {
            return None;
        }
        let status = self.invoice.status().ok()?;
        Some(Notice::invoice_status_changed(
            self.invoice.customer_id,
            self.invoice.id,
            &self.invoice.invoice_number,
            status,
        ))
    }
}

// =========================================================================
// Shared invoice queries
// =========================================================================

pub(crate) async fn lock_invoice(conn: &mut PgConnection, id: Uuid) -> AppResult<InvoiceRecord> {
    let sql = format!("SELECT {} FROM invoices WHERE id = $1 FOR UPDATE", INVOICE_COLUMNS);
    sqlx::query_as::<_, InvoiceRecord>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DomainError::not_found(Entity::Invoice, id).into())
}

/// Recompute `amount_paid` from PAID payments and re-derive the status.
/// The caller owns the transaction; the invoice row is locked here.
pub(crate) async fn refresh_invoice_status(
    conn: &mut PgConnection,
    invoice_id: Uuid,
    context: &OperationContext,
) -> AppResult<InvoiceRefresh> {
    let invoice = lock_invoice(conn, invoice_id).await?;
    let previous = invoice.status()?;

    let amount_paid: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE invoice_id = $1 AND status = 'PAID'",
    )
    .bind(invoice_id)
    .fetch_one(&mut *conn)
    .await?;

    let mut snapshot = invoice.snapshot()?;
    snapshot.amount_paid = amount_paid;
    let next = snapshot.derive_status(Utc::now().date_naive());

    let paid_at = if next == InvoiceStatus::Paid {
        invoice.paid_at.or_else(|| Some(Utc::now()))
    } else {
        None
    };

    let sql = format!(
        r#"
        UPDATE invoices
        SET amount_paid = $2, status = $3, paid_at = $4, updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        INVOICE_COLUMNS
    );
    let updated: InvoiceRecord = sqlx::query_as(&sql)
        .bind(invoice_id)
        .bind(amount_paid)
        .bind(next.as_str())
        .bind(paid_at)
        .fetch_one(&mut *conn)
        .await?;

    if previous != next {
        AuditLogBuilder::new(AuditAction::InvoiceStatusChanged)
            .resource(RESOURCE, invoice_id)
            .before_state(&serde_json::json!({ "status": previous, "amount_paid": invoice.amount_paid }))
            .after_state(&serde_json::json!({ "status": next, "amount_paid": amount_paid }))
            .write(&mut *conn, context)
            .await?;

        tracing::info!(
            invoice_id = %invoice_id,
            from = %previous,
            to = %next,
            "Invoice status re-derived"
        );
    }

    Ok(InvoiceRefresh {
        previous,
        invoice: updated,
    })
}

async fn fetch_items(pool: &PgPool, invoice_id: Uuid) -> AppResult<Vec<InvoiceItemRecord>> {
    let items = sqlx::query_as(
        r#"
        SELECT id, invoice_id, description, quantity, unit_price, line_total, position
        FROM invoice_items
        WHERE invoice_id = $1
        ORDER BY position
        "#,
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await?;

    Ok(items)
}

// =========================================================================
// InvoiceHandler
// =========================================================================

/// Handler for invoices
pub struct InvoiceHandler {
    pool: PgPool,
    notifier: NotificationService,
    currency: String,
}

impl InvoiceHandler {
    pub fn new(pool: PgPool, notifier: NotificationService, currency: impl Into<String>) -> Self {
        Self {
            pool,
            notifier,
            currency: currency.into(),
        }
    }

    /// Create a DRAFT invoice with its line items
    pub async fn create(
        &self,
        command: CreateInvoiceCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<InvoiceDetail> {
        actor.require(PERMISSION)?;
        let priced = validate_items(&command.items)?;

        let mut tx = self.pool.begin().await?;

        let customer = self.active_customer(&mut tx, command.customer_id).await?;

        if let Some(request_id) = command.service_request_id {
            let owner: Option<Uuid> =
                sqlx::query_scalar("SELECT customer_id FROM service_requests WHERE id = $1")
                    .bind(request_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            match owner {
                None => return Err(DomainError::not_found(Entity::ServiceRequest, request_id).into()),
                Some(owner) if owner != customer.id => {
                    return Err(AppError::field(
                        "service_request_id",
                        "service request belongs to another customer",
                    ))
                }
                Some(_) => {}
            }
        }

        let detail = self.insert_draft(&mut tx, &command, &priced, context).await?;
        tx.commit().await?;

        tracing::info!(
            invoice_id = %detail.invoice.id,
            invoice_number = %detail.invoice.invoice_number,
            total = %detail.invoice.total,
            "Invoice created"
        );

        Ok(detail)
    }

    /// DRAFT invoice billing a service request at the service's base price
    pub async fn from_service_request(
        &self,
        request_id: Uuid,
        due_date: Option<NaiveDate>,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<InvoiceDetail> {
        actor.require(PERMISSION)?;

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM service_requests WHERE id = $1",
            SERVICE_REQUEST_COLUMNS
        );
        let request: ServiceRequestRecord = sqlx::query_as(&sql)
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DomainError::not_found(Entity::ServiceRequest, request_id))?;

        let status = request.status()?;
        if matches!(
            status,
            ServiceRequestStatus::Rejected | ServiceRequestStatus::Cancelled
        ) {
            return Err(DomainError::BusinessRuleViolation(format!(
                "cannot invoice a {} service request",
                status
            ))
            .into());
        }

        let sql = format!("SELECT {} FROM services WHERE id = $1", SERVICE_COLUMNS);
        let service: ServiceRecord = sqlx::query_as(&sql)
            .bind(request.service_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DomainError::not_found(Entity::Service, request.service_id))?;

        self.active_customer(&mut tx, request.customer_id).await?;

        let command = CreateInvoiceCommand {
            customer_id: request.customer_id,
            service_request_id: Some(request.id),
            items: vec![InvoiceItemInput {
                description: format!("{} ({})", service.name_en, request.reference),
                quantity: Decimal::ONE,
                unit_price: service.base_price,
            }],
            due_date,
            notes: Some(format!("Service request {}", request.reference)),
        };
        let priced = validate_items(&command.items)?;

        let detail = self.insert_draft(&mut tx, &command, &priced, context).await?;
        tx.commit().await?;

        tracing::info!(
            invoice_id = %detail.invoice.id,
            request_id = %request_id,
            "Invoice created from service request"
        );

        Ok(detail)
    }

    pub async fn issue(
        &self,
        id: Uuid,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<InvoiceRecord> {
        self.apply_action(id, InvoiceAction::Issue, actor, context).await
    }

    pub async fn send(
        &self,
        id: Uuid,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<InvoiceRecord> {
        self.apply_action(id, InvoiceAction::Send, actor, context).await
    }

    pub async fn cancel(
        &self,
        id: Uuid,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<InvoiceRecord> {
        self.apply_action(id, InvoiceAction::Cancel, actor, context).await
    }

    async fn apply_action(
        &self,
        id: Uuid,
        action: InvoiceAction,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<InvoiceRecord> {
        actor.require(PERMISSION)?;

        let mut tx = self.pool.begin().await?;
        let invoice = lock_invoice(&mut tx, id).await?;
        let mut snapshot = invoice.snapshot()?;
        let previous = snapshot.status;

        snapshot.status = invoice_status::transition(&snapshot, action)?;

        let now = Utc::now();
        let mut issued_at = invoice.issued_at;
        let mut cancelled_at = invoice.cancelled_at;
        match action {
            InvoiceAction::Issue => issued_at = Some(now),
            InvoiceAction::Send => snapshot.sent_at = Some(now),
            InvoiceAction::Cancel => cancelled_at = Some(now),
        }

        let next = snapshot.derive_status(now.date_naive());

        let sql = format!(
            r#"
            UPDATE invoices
            SET status = $2, issued_at = $3, sent_at = $4, cancelled_at = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );
        let updated: InvoiceRecord = sqlx::query_as(&sql)
            .bind(id)
            .bind(next.as_str())
            .bind(issued_at)
            .bind(snapshot.sent_at)
            .bind(cancelled_at)
            .fetch_one(&mut *tx)
            .await?;

        AuditLogBuilder::new(AuditAction::InvoiceStatusChanged)
            .resource(RESOURCE, id)
            .before_state(&serde_json::json!({ "status": previous }))
            .after_state(&serde_json::json!({ "status": next, "action": action.to_string() }))
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(invoice_id = %id, action = %action, status = %next, "Invoice action applied");

        let notice = match action {
            InvoiceAction::Issue => Notice::invoice_issued(
                updated.customer_id,
                updated.id,
                &updated.invoice_number,
                updated.total,
            ),
            InvoiceAction::Send => Notice::invoice_sent(
                updated.customer_id,
                updated.id,
                &updated.invoice_number,
                updated.balance_due(),
            ),
            InvoiceAction::Cancel => Notice::invoice_status_changed(
                updated.customer_id,
                updated.id,
                &updated.invoice_number,
                next,
            ),
        };
        self.notifier.notify(notice).await;

        Ok(updated)
    }

    /// Re-derive one invoice's status in its own transaction
    pub async fn refresh_status(
        &self,
        id: Uuid,
        context: &OperationContext,
    ) -> AppResult<InvoiceRefresh> {
        let mut tx = self.pool.begin().await?;
        let refresh = refresh_invoice_status(&mut tx, id, context).await?;
        tx.commit().await?;

        if let Some(notice) = refresh.notice() {
            self.notifier.notify(notice).await;
        }

        Ok(refresh)
    }

    /// Move open invoices that are past due to OVERDUE. Returns how many moved.
    pub async fn mark_overdue(&self, today: NaiveDate) -> AppResult<u64> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM invoices
            WHERE status IN ('ISSUED', 'SENT') AND due_date < $1
            ORDER BY due_date
            "#,
        )
        .bind(today)
        .fetch_all(&self.pool)
        .await?;

        let context = OperationContext::system();
        let mut moved = 0;
        for id in ids {
            let refresh = self.refresh_status(id, &context).await?;
            if refresh.changed() {
                moved += 1;
            }
        }

        Ok(moved)
    }

    /// Invoice with items; customers only see their own
    pub async fn get(&self, id: Uuid, actor: &Principal) -> AppResult<InvoiceDetail> {
        let sql = format!("SELECT {} FROM invoices WHERE id = $1", INVOICE_COLUMNS);
        let invoice: InvoiceRecord = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .filter(|invoice: &InvoiceRecord| actor.can_access_customer(invoice.customer_id))
            .ok_or_else(|| DomainError::not_found(Entity::Invoice, id))?;

        let items = fetch_items(&self.pool, id).await?;

        Ok(InvoiceDetail {
            balance_due: invoice.balance_due(),
            invoice,
            items,
        })
    }

    pub async fn list(
        &self,
        filter: &InvoiceFilter,
        page: PageRequest,
        actor: &Principal,
    ) -> AppResult<Page<InvoiceRecord>> {
        let customer_id = actor.customer_id().or(filter.customer_id);

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM invoices");
        push_filters(&mut count, filter, customer_id);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM invoices", INVOICE_COLUMNS));
        push_filters(&mut query, filter, customer_id);
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let items = query
            .build_query_as::<InvoiceRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, page))
    }

    async fn active_customer(
        &self,
        conn: &mut PgConnection,
        customer_id: Uuid,
    ) -> AppResult<CustomerRecord> {
        let sql = format!("SELECT {} FROM customers WHERE id = $1", CUSTOMER_COLUMNS);
        let customer: CustomerRecord = sqlx::query_as(&sql)
            .bind(customer_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DomainError::not_found(Entity::Customer, customer_id))?;

        if !customer.is_active {
            return Err(DomainError::BusinessRuleViolation(
                "customer is deactivated".to_string(),
            )
            .into());
        }

        Ok(customer)
    }

    async fn insert_draft(
        &self,
        conn: &mut PgConnection,
        command: &CreateInvoiceCommand,
        priced: &PricedItems,
        context: &OperationContext,
    ) -> AppResult<InvoiceDetail> {
        let id = Uuid::new_v4();
        let number = reference_number(INVOICE_PREFIX, Utc::now().date_naive());

        let sql = format!(
            r#"
            INSERT INTO invoices (
                id, invoice_number, customer_id, service_request_id, status,
                currency, total, due_date, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );
        let invoice: InvoiceRecord = sqlx::query_as(&sql)
            .bind(id)
            .bind(&number)
            .bind(command.customer_id)
            .bind(command.service_request_id)
            .bind(InvoiceStatus::Draft.as_str())
            .bind(&self.currency)
            .bind(priced.total)
            .bind(command.due_date)
            .bind(&command.notes)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| AppError::unique_violation(e, "invoice number already taken, retry"))?;

        let mut items = Vec::with_capacity(command.items.len());
        for (position, (item, line_total)) in command.items.iter().zip(&priced.lines).enumerate() {
            let record: InvoiceItemRecord = sqlx::query_as(
                r#"
                INSERT INTO invoice_items (
                    id, invoice_id, description, quantity, unit_price, line_total, position
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, invoice_id, description, quantity, unit_price, line_total, position
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(id)
            .bind(&item.description)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(*line_total)
            .bind(position as i32)
            .fetch_one(&mut *conn)
            .await?;
            items.push(record);
        }

        AuditLogBuilder::new(AuditAction::InvoiceCreated)
            .resource(RESOURCE, id)
            .after_state(&invoice)
            .write(&mut *conn, context)
            .await?;

        Ok(InvoiceDetail {
            balance_due: invoice.balance_due(),
            invoice,
            items,
        })
    }
}

/// Line totals and the invoice total of a validated item list
#[derive(Debug, PartialEq)]
struct PricedItems {
    lines: Vec<Decimal>,
    total: Decimal,
}

fn validate_items(items: &[InvoiceItemInput]) -> AppResult<PricedItems> {
    if items.is_empty() {
        return Err(AppError::field("items", "at least one line item is required"));
    }

    let mut lines = Vec::with_capacity(items.len());
    let mut total = Decimal::ZERO;

    for (i, item) in items.iter().enumerate() {
        if item.description.trim().is_empty() {
            return Err(AppError::field(
                &format!("items[{}].description", i),
                "description is required",
            ));
        }
        if item.quantity <= Decimal::ZERO {
            return Err(AppError::field(
                &format!("items[{}].quantity", i),
                "quantity must be positive",
            ));
        }
        if item.quantity.normalize().scale() > MAX_SCALE {
            return Err(AppError::field(
                &format!("items[{}].quantity", i),
                format!("quantity allows at most {} decimal places", MAX_SCALE),
            ));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(AppError::field(
                &format!("items[{}].unit_price", i),
                "unit price cannot be negative",
            ));
        }
        if item.unit_price.normalize().scale() > MAX_SCALE {
            return Err(AppError::field(
                &format!("items[{}].unit_price", i),
                format!("unit price allows at most {} decimal places", MAX_SCALE),
            ));
        }

        let line = item
            .line_total()
            .filter(|line| Balance::new(*line).is_ok())
            .ok_or_else(|| {
                AppError::field(
                    &format!("items[{}].quantity", i),
                    format!("line total exceeds the maximum of {}", MAX_AMOUNT),
                )
            })?;

        total = total
            .checked_add(line)
            .filter(|total| Balance::new(*total).is_ok())
            .ok_or_else(|| {
                AppError::field(
                    "items",
                    format!("invoice total exceeds the maximum of {}", MAX_AMOUNT),
                )
            })?;
        lines.push(line);
    }

    Ok(PricedItems { lines, total })
}

fn push_filters(
    query: &mut QueryBuilder<'_, Postgres>,
    filter: &InvoiceFilter,
    customer_id: Option<Uuid>,
) {
    query.push(" WHERE TRUE");
    if let Some(customer_id) = customer_id {
        query.push(" AND customer_id = ").push_bind(customer_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if filter.overdue_only {
        query.push(" AND status = 'OVERDUE'");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(quantity: Decimal, unit_price: Decimal) -> InvoiceItemInput {
        InvoiceItemInput {
            description: "Soil test".to_string(),
            quantity,
            unit_price,
        }
    }

    fn rejected_field(items: &[InvoiceItemInput]) -> String {
        match validate_items(items) {
            Err(AppError::Validation(fields)) => {
                fields.keys().next().cloned().unwrap_or_default()
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_items() {
        let priced =
            validate_items(&[item(dec!(1), dec!(100)), item(dec!(2.5), dec!(40.10))]).unwrap();
        assert_eq!(priced.lines, vec![dec!(100), dec!(100.25)]);
        assert_eq!(priced.total, dec!(200.25));

        assert!(validate_items(&[item(dec!(2), dec!(0))]).is_ok());

        assert_eq!(rejected_field(&[]), "items");
        assert_eq!(
            rejected_field(&[item(dec!(1), dec!(1)), item(dec!(0), dec!(1))]),
            "items[1].quantity"
        );
        assert_eq!(rejected_field(&[item(dec!(1), dec!(-1))]), "items[0].unit_price");
    }

    #[test]
    fn test_validate_items_rejects_sub_cent_values() {
        // 0.004 × 1 would round to a zero line
        assert_eq!(rejected_field(&[item(dec!(0.004), dec!(1))]), "items[0].quantity");
        assert_eq!(rejected_field(&[item(dec!(1), dec!(10.005))]), "items[0].unit_price");

        // Trailing zeros are not extra precision
        assert!(validate_items(&[item(dec!(1.500), dec!(10.100))]).is_ok());
    }

    #[test]
    fn test_validate_items_overflow_is_a_field_error() {
        let result = validate_items(&[item(Decimal::MAX, dec!(2))]);

        match result {
            Err(AppError::Validation(fields)) => {
                assert!(fields.contains_key("items[0].quantity"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_items_caps_line_and_total() {
        // One line of 1e12
        assert_eq!(
            rejected_field(&[item(dec!(1000000), dec!(1000000))]),
            "items[0].quantity"
        );

        // Each line at the cap is fine, together they are not
        let at_cap = Decimal::from(MAX_AMOUNT);
        assert_eq!(validate_items(&[item(dec!(1), at_cap)]).unwrap().total, at_cap);
        assert_eq!(
            rejected_field(&[item(dec!(1), at_cap), item(dec!(1), dec!(0.01))]),
            "items"
        );
    }

    #[test]
    fn test_list_filters_scope_to_customer() {
        let filter = InvoiceFilter {
            status: Some(InvoiceStatus::Sent),
            customer_id: None,
            overdue_only: true,
        };
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM invoices");
        push_filters(&mut query, &filter, Some(Uuid::new_v4()));

        assert_eq!(
            query.sql(),
            "SELECT COUNT(*) FROM invoices WHERE TRUE AND customer_id = $1 AND status = $2 AND status = 'OVERDUE'"
        );
    }

    #[test]
    fn test_refresh_notice_only_on_change() {
        let now = Utc::now();
        let invoice = InvoiceRecord {
            id: Uuid::new_v4(),
            invoice_number: "INV-20260315-ABCDEF".to_string(),
            customer_id: Uuid::new_v4(),
            service_request_id: None,
            status: "PAID".to_string(),
            currency: "EGP".to_string(),
            total: dec!(100),
            amount_paid: dec!(100),
            due_date: None,
            notes: None,
            issued_at: Some(now),
            sent_at: None,
            paid_at: Some(now),
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };

        let unchanged = InvoiceRefresh {
            previous: InvoiceStatus::Paid,
            invoice: invoice.clone(),
        };
        assert!(!unchanged.changed());
        assert!(unchanged.notice().is_none());

        let changed = InvoiceRefresh {
            previous: InvoiceStatus::Issued,
            invoice,
        };
        assert!(changed.changed());
        assert!(changed.notice().is_some());
    }
}

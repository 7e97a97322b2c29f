//! Payment Handler
//!
//! Manual payments, online checkout through the gateway, gateway callback
//! reconciliation and refunds. Payment rows are locked `FOR UPDATE` while
//! their status changes, so a callback and a refund never race.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::{
    Amount, DomainError, Entity, LedgerEntry, LedgerOperation, OperationContext, Page,
    PageRequest, PaymentMethod, PaymentPurpose, PaymentStatus, Principal, WalletStatus,
};
use crate::error::{AppError, AppResult};
use crate::gateway::{BillingContact, CallbackFields, PaymentGateway, PaymentIntent};
use crate::idempotency::IdempotencyGuard;
use crate::notifications::{Notice, NotificationService};

use super::invoice_handler::{lock_invoice, refresh_invoice_status, InvoiceRefresh};
use super::records::{PaymentRecord, WalletRecord, PAYMENT_COLUMNS};
use super::wallet_handler::{fetch_wallet, post_entry, refund_to_wallet};
use super::{InitiatePaymentCommand, PaymentTarget, RecordPaymentCommand};

const RESOURCE: &str = "payment";
const PERMISSION: &str = "payments:write";

/// Values for a new `payments` row
#[derive(Debug, Clone)]
pub(crate) struct NewPayment {
    pub id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub wallet_id: Option<Uuid>,
    pub customer_id: Uuid,
    pub purpose: PaymentPurpose,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount: rust_decimal::Decimal,
    pub currency: String,
    pub reference: Option<String>,
    pub provider: Option<String>,
    pub recorded_by: Option<Uuid>,
}

/// A pending card payment and where to send the customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineCheckout {
    #[serde(flatten)]
    pub payment: PaymentRecord,
    pub checkout_url: String,
}

/// What a gateway callback did
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub payment_id: Uuid,
    pub status: PaymentStatus,
    /// False when the callback repeated an outcome already recorded
    pub applied: bool,
}

/// `GET /payments` filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentFilter {
    pub status: Option<PaymentStatus>,
    pub invoice_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub method: Option<PaymentMethod>,
}

// =========================================================================
// Shared payment queries
// =========================================================================

pub(crate) async fn insert_payment(
    conn: &mut PgConnection,
    payment: NewPayment,
) -> AppResult<PaymentRecord> {
    let paid_at = (payment.status == PaymentStatus::Paid).then(chrono::Utc::now);

    let sql = format!(
        r#"
        INSERT INTO payments (
            id, invoice_id, wallet_id, customer_id, purpose, method, status,
            amount, currency, reference, provider, recorded_by, paid_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    );

    let record = sqlx::query_as(&sql)
        .bind(payment.id)
        .bind(payment.invoice_id)
        .bind(payment.wallet_id)
        .bind(payment.customer_id)
        .bind(payment.purpose.as_str())
        .bind(payment.method.as_str())
        .bind(payment.status.as_str())
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.reference)
        .bind(&payment.provider)
        .bind(payment.recorded_by)
        .bind(paid_at)
        .fetch_one(&mut *conn)
        .await?;

    Ok(record)
}

pub(crate) async fn lock_payment(conn: &mut PgConnection, id: Uuid) -> AppResult<PaymentRecord> {
    let sql = format!("SELECT {} FROM payments WHERE id = $1 FOR UPDATE", PAYMENT_COLUMNS);
    sqlx::query_as::<_, PaymentRecord>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DomainError::not_found(Entity::Payment, id).into())
}

async fn set_status(
    conn: &mut PgConnection,
    id: Uuid,
    status: PaymentStatus,
    provider_txn_id: Option<&str>,
    failure_reason: Option<&str>,
) -> AppResult<PaymentRecord> {
    let sql = format!(
        r#"
        UPDATE payments
        SET status = $2,
            provider_txn_id = COALESCE($3, provider_txn_id),
            failure_reason = $4,
            paid_at = CASE WHEN $2 = 'PAID' THEN COALESCE(paid_at, NOW()) ELSE paid_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        PAYMENT_COLUMNS
    );

    let record = sqlx::query_as(&sql)
        .bind(id)
        .bind(status.as_str())
        .bind(provider_txn_id)
        .bind(failure_reason)
        .fetch_one(&mut *conn)
        .await?;

    Ok(record)
}

// =========================================================================
// PaymentHandler
// =========================================================================

/// Handler for payments
pub struct PaymentHandler {
    pool: PgPool,
    gateway: Option<Arc<dyn PaymentGateway>>,
    notifier: NotificationService,
    idempotency: IdempotencyGuard,
}

impl PaymentHandler {
    pub fn new(
        pool: PgPool,
        gateway: Option<Arc<dyn PaymentGateway>>,
        notifier: NotificationService,
    ) -> Self {
        Self {
            idempotency: IdempotencyGuard::new(pool.clone()),
            pool,
            gateway,
            notifier,
        }
    }

    fn gateway(&self) -> AppResult<&Arc<dyn PaymentGateway>> {
        self.gateway.as_ref().ok_or(AppError::GatewayUnavailable)
    }

    /// Staff record cash or a bank transfer against an invoice
    pub async fn record_manual(
        &self,
        command: RecordPaymentCommand,
        idempotency_key: Option<Uuid>,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<PaymentRecord> {
        actor.require(PERMISSION)?;

        if !command.method.is_manual() {
            return Err(AppError::field(
                "method",
                "only CASH or BANK_TRANSFER can be recorded manually",
            ));
        }

        self.idempotency
            .run(idempotency_key, "payment.record", &command, || {
                self.record_manual_inner(&command, actor, context)
            })
            .await
    }

    async fn record_manual_inner(
        &self,
        command: &RecordPaymentCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<PaymentRecord> {
        let mut tx = self.pool.begin().await?;

        let invoice = lock_invoice(&mut tx, command.invoice_id).await?;
        let status = invoice.status()?;
        if !status.accepts_payments() {
            return Err(DomainError::InvoiceNotPayable {
                status: status.to_string(),
            }
            .into());
        }

        let balance_due = invoice.balance_due();
        if command.amount.value() > balance_due {
            return Err(DomainError::Overpayment {
                attempted: command.amount.value(),
                balance_due,
            }
            .into());
        }

        let payment = insert_payment(
            &mut tx,
            NewPayment {
                id: Uuid::new_v4(),
                invoice_id: Some(invoice.id),
                wallet_id: None,
                customer_id: invoice.customer_id,
                purpose: PaymentPurpose::Invoice,
                method: command.method,
                status: PaymentStatus::Paid,
                amount: command.amount.value(),
                currency: invoice.currency.clone(),
                reference: command.reference.clone(),
                provider: None,
                recorded_by: Some(actor.id),
            },
        )
        .await?;

        let refresh = refresh_invoice_status(&mut tx, invoice.id, context).await?;

        AuditLogBuilder::new(AuditAction::PaymentRecorded)
            .resource(RESOURCE, payment.id)
            .after_state(&payment)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            method = %command.method,
            amount = %payment.amount,
            "Manual payment recorded"
        );

        self.notifier
            .notify(Notice::payment_received(
                payment.customer_id,
                payment.id,
                payment.amount,
            ))
            .await;
        self.notify_refresh(&refresh).await;

        Ok(payment)
    }

    /// Create a PENDING card payment and a checkout session for it
    pub async fn initiate_online(
        &self,
        command: InitiatePaymentCommand,
        idempotency_key: Option<Uuid>,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<OnlineCheckout> {
        let gateway = self.gateway()?.clone();

        if actor.is_staff() {
            actor.require(PERMISSION)?;
        }

        self.idempotency
            .run(idempotency_key, "payment.initiate", &command, || {
                self.initiate_online_inner(gateway, &command, actor, context)
            })
            .await
    }

    async fn initiate_online_inner(
        &self,
        gateway: Arc<dyn PaymentGateway>,
        command: &InitiatePaymentCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<OnlineCheckout> {
        let mut tx = self.pool.begin().await?;

        let (new_payment, description) = match command.target {
            PaymentTarget::Invoice(invoice_id) => {
                let invoice = lock_invoice(&mut tx, invoice_id).await?;
                if !actor.can_access_customer(invoice.customer_id) {
                    return Err(DomainError::not_found(Entity::Invoice, invoice_id).into());
                }

                let status = invoice.status()?;
                if !status.accepts_payments() {
                    return Err(DomainError::InvoiceNotPayable {
                        status: status.to_string(),
                    }
                    .into());
                }

                let balance_due = invoice.balance_due();
                let amount = match command.amount {
                    Some(amount) => amount,
                    None => Amount::new(balance_due)?,
                };
                if amount.value() > balance_due {
                    return Err(DomainError::Overpayment {
                        attempted: amount.value(),
                        balance_due,
                    }
                    .into());
                }

                let payment = NewPayment {
                    id: Uuid::new_v4(),
                    invoice_id: Some(invoice.id),
                    wallet_id: None,
                    customer_id: invoice.customer_id,
                    purpose: PaymentPurpose::Invoice,
                    method: PaymentMethod::Card,
                    status: PaymentStatus::Pending,
                    amount: amount.value(),
                    currency: invoice.currency.clone(),
                    reference: None,
                    provider: Some(gateway.provider_id().to_string()),
                    recorded_by: Some(actor.id),
                };
                (payment, format!("Invoice {}", invoice.invoice_number))
            }
            PaymentTarget::WalletTopUp(wallet_id) => {
                let wallet: WalletRecord = fetch_wallet(&mut tx, wallet_id).await?;
                if !actor.can_access_customer(wallet.customer_id) {
                    return Err(DomainError::not_found(Entity::Wallet, wallet_id).into());
                }
                if wallet.status == WalletStatus::Frozen.as_str() {
                    return Err(DomainError::wallet_frozen(
                        wallet.frozen_reason.clone().unwrap_or_default(),
                    )
                    .into());
                }

                let amount = command
                    .amount
                    .ok_or_else(|| AppError::field("amount", "amount is required for a top-up"))?;

                let payment = NewPayment {
                    id: Uuid::new_v4(),
                    invoice_id: None,
                    wallet_id: Some(wallet.id),
                    customer_id: wallet.customer_id,
                    purpose: PaymentPurpose::WalletTopUp,
                    method: PaymentMethod::Card,
                    status: PaymentStatus::Pending,
                    amount: amount.value(),
                    currency: wallet.currency.clone(),
                    reference: None,
                    provider: Some(gateway.provider_id().to_string()),
                    recorded_by: Some(actor.id),
                };
                (payment, "Wallet top-up".to_string())
            }
        };

        let (name, email, phone): (String, String, Option<String>) =
            sqlx::query_as("SELECT name, email, phone FROM customers WHERE id = $1")
                .bind(new_payment.customer_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| DomainError::not_found(Entity::Customer, new_payment.customer_id))?;

        let intent = PaymentIntent {
            payment_id: new_payment.id,
            amount: Amount::new(new_payment.amount)?,
            currency: new_payment.currency.clone(),
            description,
            billing: BillingContact::from_full_name(&name, &email, phone),
        };

        let payment = insert_payment(&mut tx, new_payment).await?;
        tx.commit().await?;

        let session = match gateway.create_checkout(&intent).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(payment_id = %payment.id, error = %e, "Checkout creation failed");
                let mut conn = self.pool.acquire().await?;
                set_status(
                    &mut conn,
                    payment.id,
                    PaymentStatus::Failed,
                    None,
                    Some("checkout creation failed"),
                )
                .await?;
                return Err(e.into());
            }
        };

        let sql = format!(
            "UPDATE payments SET provider_order_id = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            PAYMENT_COLUMNS
        );
        let payment: PaymentRecord = sqlx::query_as(&sql)
            .bind(payment.id)
            .bind(&session.provider_order_id)
            .fetch_one(&self.pool)
            .await?;

        AuditLogBuilder::new(AuditAction::PaymentInitiated)
            .resource(RESOURCE, payment.id)
            .after_state(&payment)
            .write(&self.pool, context)
            .await?;

        tracing::info!(
            payment_id = %payment.id,
            provider_order_id = %session.provider_order_id,
            amount = %payment.amount,
            "Online payment initiated"
        );

        Ok(OnlineCheckout {
            payment,
            checkout_url: session.checkout_url,
        })
    }

    /// Apply a signed gateway callback. Repeated callbacks are no-ops.
    pub async fn reconcile(&self, fields: CallbackFields, hmac: &str) -> AppResult<Reconciliation> {
        let gateway = self.gateway()?;

        if !gateway.verify_signature(&fields, hmac) {
            tracing::warn!(
                order_id = fields.get("order.id"),
                transaction_id = fields.get("id"),
                "Rejected callback with invalid signature"
            );
            return Err(AppError::InvalidSignature);
        }

        let callback = fields
            .to_callback()
            .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
        let context = OperationContext::system();

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            SELECT {} FROM payments
            WHERE (provider = $1 AND provider_order_id = $2) OR id = $3
            LIMIT 1
            FOR UPDATE
            "#,
            PAYMENT_COLUMNS
        );
        let payment: PaymentRecord = sqlx::query_as(&sql)
            .bind(gateway.provider_id())
            .bind(&callback.provider_order_id)
            .bind(callback.merchant_order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| {
                tracing::warn!(
                    provider_order_id = %callback.provider_order_id,
                    merchant_order_id = ?callback.merchant_order_id,
                    "Callback for unknown payment"
                );
                DomainError::not_found(
                    Entity::Payment,
                    callback.merchant_order_id.unwrap_or_default(),
                )
            })?;

        let current = payment.status()?;
        let mut target = callback.outcome().payment_status();
        let mut failure_reason = callback.message.clone().filter(|_| target == PaymentStatus::Failed);

        if target == PaymentStatus::Paid {
            let expected_cents = Amount::new(payment.amount)?.to_minor_units();
            if callback.amount_cents != expected_cents {
                tracing::warn!(
                    payment_id = %payment.id,
                    expected_cents,
                    received_cents = callback.amount_cents,
                    "Callback amount mismatch, marking payment failed"
                );
                target = PaymentStatus::Failed;
                failure_reason = Some(format!(
                    "amount mismatch: expected {} cents, received {}",
                    expected_cents, callback.amount_cents
                ));
            }
        }

        let late_settlement = current.accepts_late_settlement(target);
        if current == target || !(current.can_transition_to(target) || late_settlement) {
            tracing::info!(
                payment_id = %payment.id,
                current = %current,
                outcome = %target,
                "Callback ignored, nothing to apply"
            );
            tx.commit().await?;
            return Ok(Reconciliation {
                payment_id: payment.id,
                status: current,
                applied: false,
            });
        }

        if late_settlement {
            tracing::warn!(
                payment_id = %payment.id,
                transaction_id = %callback.transaction_id,
                "Provider captured an expired checkout, settling it late"
            );
        }

        let updated = set_status(
            &mut tx,
            payment.id,
            target,
            Some(&callback.transaction_id),
            failure_reason.as_deref(),
        )
        .await?;

        let mut refresh: Option<InvoiceRefresh> = None;
        let mut ledger: Option<(WalletRecord, LedgerEntry)> = None;

        match (updated.purpose()?, target) {
            (PaymentPurpose::Invoice, PaymentStatus::Paid | PaymentStatus::Refunded) => {
                if let Some(invoice_id) = updated.invoice_id {
                    refresh = Some(refresh_invoice_status(&mut tx, invoice_id, &context).await?);
                }
            }
            (PaymentPurpose::WalletTopUp, PaymentStatus::Paid | PaymentStatus::Refunded) => {
                let wallet_id = updated.wallet_id.ok_or_else(|| {
                    AppError::Internal(format!("top-up payment {} has no wallet", updated.id))
                })?;
                let wallet = fetch_wallet(&mut tx, wallet_id).await?;
                let (operation, description) = if target == PaymentStatus::Paid {
                    (LedgerOperation::SettledTopUp, "Card top-up")
                } else {
                    (LedgerOperation::Withdrawal, "Card top-up refunded")
                };

                ledger = Some(
                    post_entry(
                        &mut tx,
                        wallet,
                        operation,
                        &Amount::new(updated.amount)?,
                        Some(updated.id),
                        description.to_string(),
                        &context,
                    )
                    .await?,
                );
            }
            _ => {}
        }

        AuditLogBuilder::new(AuditAction::PaymentReconciled)
            .resource(RESOURCE, updated.id)
            .before_state(&serde_json::json!({
                "status": current,
                "late_settlement": late_settlement,
            }))
            .after_state(&updated)
            .write(&mut *tx, &context)
            .await?;

        tx.commit().await?;

        tracing::info!(
            payment_id = %updated.id,
            from = %current,
            to = %target,
            transaction_id = %callback.transaction_id,
            "Payment reconciled"
        );

        let notice = match target {
            PaymentStatus::Paid => Some(Notice::payment_received(
                updated.customer_id,
                updated.id,
                updated.amount,
            )),
            PaymentStatus::Failed => Some(Notice::payment_failed(
                updated.customer_id,
                updated.id,
                updated.amount,
            )),
            PaymentStatus::Refunded => Some(Notice::payment_refunded(
                updated.customer_id,
                updated.id,
                updated.amount,
            )),
            PaymentStatus::Pending | PaymentStatus::Cancelled => None,
        };
        if let Some(notice) = notice {
            self.notifier.notify(notice).await;
        }
        if let Some((wallet, entry)) = ledger {
            self.notify_ledger(&wallet, &entry).await;
        }
        if let Some(refresh) = refresh {
            self.notify_refresh(&refresh).await;
        }

        Ok(Reconciliation {
            payment_id: updated.id,
            status: target,
            applied: true,
        })
    }

    /// Refund a PAID payment. Wallet payments are credited back to the
    /// wallet; card payments are refunded by the provider and arrive as a
    /// callback.
    pub async fn refund(
        &self,
        payment_id: Uuid,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<PaymentRecord> {
        actor.require(PERMISSION)?;

        let mut tx = self.pool.begin().await?;
        let payment = lock_payment(&mut tx, payment_id).await?;

        let status = payment.status()?;
        if !status.can_transition_to(PaymentStatus::Refunded) {
            return Err(DomainError::invalid_transition(Entity::Payment, status, "refund").into());
        }

        let ledger = match payment.method()? {
            PaymentMethod::Card => {
                return Err(DomainError::BusinessRuleViolation(
                    "card payments are refunded through the payment provider".to_string(),
                )
                .into())
            }
            PaymentMethod::Wallet => Some(refund_to_wallet(&mut tx, &payment, context).await?),
            PaymentMethod::Cash | PaymentMethod::BankTransfer => None,
        };

        let updated = set_status(&mut tx, payment.id, PaymentStatus::Refunded, None, None).await?;

        let refresh = match updated.invoice_id {
            Some(invoice_id) => Some(refresh_invoice_status(&mut tx, invoice_id, context).await?),
            None => None,
        };

        AuditLogBuilder::new(AuditAction::PaymentRefunded)
            .resource(RESOURCE, updated.id)
            .before_state(&payment)
            .after_state(&updated)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(payment_id = %updated.id, amount = %updated.amount, "Payment refunded");

        self.notifier
            .notify(Notice::payment_refunded(
                updated.customer_id,
                updated.id,
                updated.amount,
            ))
            .await;
        if let Some((wallet, entry)) = ledger {
            self.notify_ledger(&wallet, &entry).await;
        }
        if let Some(refresh) = refresh {
            self.notify_refresh(&refresh).await;
        }

        Ok(updated)
    }

    /// Cancel card payments still PENDING after `older_than_hours`
    pub async fn expire_pending(&self, older_than_hours: i64) -> AppResult<u64> {
        let expired: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE payments
            SET status = 'CANCELLED', failure_reason = 'checkout expired', updated_at = NOW()
            WHERE status = 'PENDING'
              AND method = 'CARD'
              AND created_at < NOW() - make_interval(hours => $1)
            RETURNING id
            "#,
        )
        .bind(older_than_hours as i32)
        .fetch_all(&self.pool)
        .await?;

        let context = OperationContext::system();
        for id in &expired {
            AuditLogBuilder::new(AuditAction::PaymentExpired)
                .resource(RESOURCE, *id)
                .after_state(&serde_json::json!({ "status": PaymentStatus::Cancelled }))
                .write(&self.pool, &context)
                .await?;
        }

        Ok(expired.len() as u64)
    }

    /// Customers only see their own payments
    pub async fn get(&self, id: Uuid, actor: &Principal) -> AppResult<PaymentRecord> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        let payment: Option<PaymentRecord> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        payment
            .filter(|p| actor.can_access_customer(p.customer_id))
            .ok_or_else(|| DomainError::not_found(Entity::Payment, id).into())
    }

    pub async fn list(
        &self,
        filter: &PaymentFilter,
        page: PageRequest,
        actor: &Principal,
    ) -> AppResult<Page<PaymentRecord>> {
        let customer_id = actor.customer_id().or(filter.customer_id);

        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM payments");
        push_filters(&mut count, filter, customer_id);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM payments", PAYMENT_COLUMNS));
        push_filters(&mut query, filter, customer_id);
        query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let items = query
            .build_query_as::<PaymentRecord>()
            .fetch_all(&self.pool)
            .await?;

        Ok(Page::new(items, total, page))
    }

    async fn notify_ledger(&self, wallet: &WalletRecord, entry: &LedgerEntry) {
        self.notifier
            .notify(Notice::wallet_updated(
                wallet.customer_id,
                wallet.id,
                entry.kind,
                entry.amount,
                entry.balance_after,
            ))
            .await;
    }

    async fn notify_refresh(&self, refresh: &InvoiceRefresh) {
        if let Some(notice) = refresh.notice() {
            self.notifier.notify(notice).await;
        }
    }
}

fn push_filters(
    query: &mut QueryBuilder<'_, Postgres>,
    filter: &PaymentFilter,
    customer_id: Option<Uuid>,
) {
    query.push(" WHERE TRUE");
    if let Some(customer_id) = customer_id {
        query.push(" AND customer_id = ").push_bind(customer_id);
    }
    if let Some(invoice_id) = filter.invoice_id {
        query.push(" AND invoice_id = ").push_bind(invoice_id);
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(method) = filter.method {
        query.push(" AND method = ").push_bind(method.as_str());
    }
}

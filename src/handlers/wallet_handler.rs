//! Wallet Handler
//!
//! Every balance change runs in one transaction: the wallet row is updated
//! with an optimistic check on `version`, then the ledger row is inserted.
//! A concurrent writer makes the update match zero rows and the whole
//! operation fails with `VersionConflict`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditLogBuilder};
use crate::domain::wallet::verify_ledger;
use crate::domain::{
    Amount, DomainError, Entity, InvoiceStatus, LedgerEntry, LedgerOperation, LedgerVerification,
    OperationContext, Page, PageRequest, PaymentMethod, PaymentPurpose, PaymentStatus, Principal,
    Wallet, WalletTransactionType,
};
use crate::error::{AppError, AppResult};
use crate::idempotency::IdempotencyGuard;
use crate::notifications::{Notice, NotificationService};

use super::invoice_handler::{lock_invoice, refresh_invoice_status};
use super::payment_handler::{insert_payment, NewPayment};
use super::records::{
    LedgerRecord, PaymentRecord, WalletRecord, LEDGER_COLUMNS, WALLET_COLUMNS,
};
use super::{LedgerCommand, PayWithWalletCommand};

const RESOURCE: &str = "wallet";
const PERMISSION: &str = "wallets:write";

/// A ledger entry together with the wallet it left behind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerReceipt {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub wallet: WalletRecord,
}

/// An invoice paid from a wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletPayment {
    #[serde(flatten)]
    pub payment: PaymentRecord,
    pub transaction: LedgerEntry,
    pub invoice_status: InvoiceStatus,
    pub balance_due: Decimal,
    pub wallet_balance: Decimal,
}

/// `GET /wallets/:id/transactions` filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionFilter {
    #[serde(rename = "type")]
    pub kind: Option<WalletTransactionType>,
}

// =========================================================================
// Shared wallet queries
// =========================================================================

pub(crate) async fn fetch_wallet(conn: &mut PgConnection, id: Uuid) -> AppResult<WalletRecord> {
    let sql = format!("SELECT {} FROM wallets WHERE id = $1", WALLET_COLUMNS);
    sqlx::query_as::<_, WalletRecord>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DomainError::not_found(Entity::Wallet, id).into())
}

pub(crate) async fn wallet_for_customer(
    conn: &mut PgConnection,
    customer_id: Uuid,
) -> AppResult<WalletRecord> {
    let sql = format!("SELECT {} FROM wallets WHERE customer_id = $1", WALLET_COLUMNS);
    sqlx::query_as::<_, WalletRecord>(&sql)
        .bind(customer_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| {
            DomainError::BusinessRuleViolation("customer has no wallet".to_string()).into()
        })
}

/// Open the customer's wallet, or return the one they already have.
/// The flag is true when a wallet was created.
pub(crate) async fn open_in(
    conn: &mut PgConnection,
    customer_id: Uuid,
    currency: &str,
    context: &OperationContext,
) -> AppResult<(WalletRecord, bool)> {
    let wallet = Wallet::open(Uuid::new_v4(), customer_id, currency);

    let sql = format!(
        r#"
        INSERT INTO wallets (id, customer_id, currency, balance, status, version)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (customer_id) DO NOTHING
        RETURNING {}
        "#,
        WALLET_COLUMNS
    );
    let created: Option<WalletRecord> = sqlx::query_as(&sql)
        .bind(wallet.id())
        .bind(wallet.customer_id())
        .bind(wallet.currency())
        .bind(wallet.balance())
        .bind(wallet.status().as_str())
        .bind(wallet.version())
        .fetch_optional(&mut *conn)
        .await?;

    match created {
        Some(record) => {
            AuditLogBuilder::new(AuditAction::WalletOpened)
                .resource(RESOURCE, record.id)
                .after_state(&record)
                .write(&mut *conn, context)
                .await?;

            tracing::info!(wallet_id = %record.id, customer_id = %customer_id, "Wallet opened");
            Ok((record, true))
        }
        None => Ok((wallet_for_customer(&mut *conn, customer_id).await?, false)),
    }
}

/// Apply one ledger operation to a wallet row read in this transaction.
pub(crate) async fn post_entry(
    conn: &mut PgConnection,
    record: WalletRecord,
    operation: LedgerOperation,
    amount: &Amount,
    reference_id: Option<Uuid>,
    description: String,
    context: &OperationContext,
) -> AppResult<(WalletRecord, LedgerEntry)> {
    let wallet = record.to_domain()?;
    let expected_version = wallet.version();
    let entry = wallet.prepare(operation, amount, reference_id, description)?;
    let wallet = wallet.apply(&entry);

    let rows = sqlx::query(
        r#"
        UPDATE wallets
        SET balance = $2, version = $3, updated_at = NOW()
        WHERE id = $1 AND version = $4
        "#,
    )
    .bind(wallet.id())
    .bind(wallet.balance())
    .bind(wallet.version())
    .bind(expected_version)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if rows == 0 {
        return Err(version_conflict(&mut *conn, wallet.id(), expected_version).await);
    }

    sqlx::query(
        r#"
        INSERT INTO wallet_transactions (
            id, wallet_id, sequence, kind, direction, amount,
            balance_before, balance_after, reference_id, description,
            created_by, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(entry.id)
    .bind(entry.wallet_id)
    .bind(entry.sequence)
    .bind(entry.kind.as_str())
    .bind(entry.direction.as_str())
    .bind(entry.amount)
    .bind(entry.balance_before)
    .bind(entry.balance_after)
    .bind(entry.reference_id)
    .bind(&entry.description)
    .bind(context.actor_id)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;

    AuditLogBuilder::new(AuditAction::WalletMutated)
        .resource(RESOURCE, entry.wallet_id)
        .before_state(&serde_json::json!({
            "balance": entry.balance_before,
            "version": expected_version,
        }))
        .after_state(&entry)
        .write(&mut *conn, context)
        .await?;

    tracing::info!(
        wallet_id = %entry.wallet_id,
        kind = %entry.kind,
        amount = %entry.amount,
        balance_after = %entry.balance_after,
        sequence = entry.sequence,
        "Ledger entry posted"
    );

    Ok((record.updated_from(&wallet), entry))
}

/// Credit a PAID wallet payment back to its wallet. The caller holds the
/// payment row lock, marks it REFUNDED and re-derives the invoice.
pub(crate) async fn refund_to_wallet(
    conn: &mut PgConnection,
    payment: &PaymentRecord,
    context: &OperationContext,
) -> AppResult<(WalletRecord, LedgerEntry)> {
    let wallet_id = payment.wallet_id.ok_or_else(|| {
        AppError::Internal(format!("wallet payment {} has no wallet", payment.id))
    })?;

    let record = fetch_wallet(&mut *conn, wallet_id).await?;
    let amount = Amount::new(payment.amount)?;

    post_entry(
        conn,
        record,
        LedgerOperation::Refund,
        &amount,
        Some(payment.id),
        format!("Refund of payment {}", payment.id),
        context,
    )
    .await
}

async fn version_conflict(conn: &mut PgConnection, wallet_id: Uuid, expected: i64) -> AppError {
    let found: Option<i64> = sqlx::query_scalar("SELECT version FROM wallets WHERE id = $1")
        .bind(wallet_id)
        .fetch_optional(&mut *conn)
        .await
        .unwrap_or(None);

    tracing::warn!(
        wallet_id = %wallet_id,
        expected,
        found = ?found,
        "Wallet version conflict"
    );

    DomainError::VersionConflict {
        expected,
        found: found.unwrap_or(-1),
    }
    .into()
}

// =========================================================================
// WalletHandler
// =========================================================================

/// Handler for wallets and their ledgers
pub struct WalletHandler {
    pool: PgPool,
    notifier: NotificationService,
    idempotency: IdempotencyGuard,
    currency: String,
}

impl WalletHandler {
    pub fn new(pool: PgPool, notifier: NotificationService, currency: impl Into<String>) -> Self {
        Self {
            idempotency: IdempotencyGuard::new(pool.clone()),
            pool,
            notifier,
            currency: currency.into(),
        }
    }

    /// Open a wallet for a customer; idempotent per customer
    pub async fn open(
        &self,
        customer_id: Uuid,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<WalletRecord> {
        actor.require(PERMISSION)?;

        let mut tx = self.pool.begin().await?;

        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM customers WHERE id = $1")
            .bind(customer_id)
            .fetch_optional(&mut *tx)
            .await?;
        match active {
            None => return Err(DomainError::not_found(Entity::Customer, customer_id).into()),
            Some(false) => {
                return Err(DomainError::BusinessRuleViolation(
                    "customer is deactivated".to_string(),
                )
                .into())
            }
            Some(true) => {}
        }

        let (record, _) = open_in(&mut tx, customer_id, &self.currency, context).await?;
        tx.commit().await?;

        Ok(record)
    }

    /// Customers only see their own wallet
    pub async fn get(&self, id: Uuid, actor: &Principal) -> AppResult<WalletRecord> {
        let mut conn = self.pool.acquire().await?;
        let record = fetch_wallet(&mut conn, id).await?;

        if !actor.can_access_customer(record.customer_id) {
            return Err(DomainError::not_found(Entity::Wallet, id).into());
        }

        Ok(record)
    }

    /// The calling customer's wallet
    pub async fn get_mine(&self, actor: &Principal) -> AppResult<WalletRecord> {
        let customer_id = actor.customer_id().ok_or_else(|| {
            DomainError::Forbidden("only customers have a wallet".to_string())
        })?;

        let mut conn = self.pool.acquire().await?;
        wallet_for_customer(&mut conn, customer_id).await
    }

    /// Staff deposit, withdrawal or adjustment
    pub async fn apply(
        &self,
        command: LedgerCommand,
        idempotency_key: Option<Uuid>,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<LedgerReceipt> {
        actor.require(PERMISSION)?;

        if matches!(
            command.operation,
            LedgerOperation::Purchase | LedgerOperation::Refund | LedgerOperation::SettledTopUp
        ) {
            return Err(AppError::InvalidRequest(format!(
                "{} is not a staff wallet operation",
                command.operation.kind()
            )));
        }

        let scope = format!("wallet.{}", command.operation.kind().as_str().to_lowercase());

        self.idempotency
            .run(idempotency_key, &scope, &command, || self.apply_inner(&command, context))
            .await
    }

    async fn apply_inner(
        &self,
        command: &LedgerCommand,
        context: &OperationContext,
    ) -> AppResult<LedgerReceipt> {
        let mut tx = self.pool.begin().await?;

        let record = fetch_wallet(&mut tx, command.wallet_id).await?;
        let description = command
            .description
            .clone()
            .unwrap_or_else(|| command.operation.kind().to_string());

        let (wallet, entry) = post_entry(
            &mut tx,
            record,
            command.operation,
            &command.amount,
            command.reference_id,
            description,
            context,
        )
        .await?;

        tx.commit().await?;

        self.notifier
            .notify(Notice::wallet_updated(
                wallet.customer_id,
                wallet.id,
                entry.kind,
                entry.amount,
                entry.balance_after,
            ))
            .await;

        Ok(LedgerReceipt { entry, wallet })
    }

    /// Pay an invoice from the customer's wallet
    pub async fn pay_invoice(
        &self,
        command: PayWithWalletCommand,
        idempotency_key: Option<Uuid>,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<WalletPayment> {
        if actor.is_staff() {
            actor.require("payments:write")?;
        }

        self.idempotency
            .run(idempotency_key, "wallet.pay_invoice", &command, || {
                self.pay_invoice_inner(&command, actor, context)
            })
            .await
    }

    async fn pay_invoice_inner(
        &self,
        command: &PayWithWalletCommand,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<WalletPayment> {
        let mut tx = self.pool.begin().await?;

        let invoice = lock_invoice(&mut tx, command.invoice_id).await?;
        if !actor.can_access_customer(invoice.customer_id) {
            return Err(DomainError::not_found(Entity::Invoice, invoice.id).into());
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

        let record = wallet_for_customer(&mut tx, invoice.customer_id).await?;
        if record.currency != invoice.currency {
            return Err(DomainError::BusinessRuleViolation(format!(
                "wallet currency {} does not match invoice currency {}",
                record.currency, invoice.currency
            ))
            .into());
        }

        let payment_id = Uuid::new_v4();
        let (wallet, entry) = post_entry(
            &mut tx,
            record,
            LedgerOperation::Purchase,
            &amount,
            Some(payment_id),
            format!("Payment for invoice {}", invoice.invoice_number),
            context,
        )
        .await?;

        let payment = insert_payment(
            &mut tx,
            NewPayment {
                id: payment_id,
                invoice_id: Some(invoice.id),
                wallet_id: Some(wallet.id),
                customer_id: invoice.customer_id,
                purpose: PaymentPurpose::Invoice,
                method: PaymentMethod::Wallet,
                status: PaymentStatus::Paid,
                amount: amount.value(),
                currency: invoice.currency.clone(),
                reference: Some(entry.id.to_string()),
                provider: None,
                recorded_by: Some(actor.id),
            },
        )
        .await?;

        let refresh = refresh_invoice_status(&mut tx, invoice.id, context).await?;

        AuditLogBuilder::new(AuditAction::PaymentRecorded)
            .resource("payment", payment.id)
            .after_state(&payment)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            wallet_id = %wallet.id,
            amount = %payment.amount,
            "Invoice paid from wallet"
        );

        self.notifier
            .notify(Notice::wallet_updated(
                wallet.customer_id,
                wallet.id,
                entry.kind,
                entry.amount,
                entry.balance_after,
            ))
            .await;
        self.notifier
            .notify(Notice::payment_received(
                payment.customer_id,
                payment.id,
                payment.amount,
            ))
            .await;
        if let Some(notice) = refresh.notice() {
            self.notifier.notify(notice).await;
        }

        Ok(WalletPayment {
            invoice_status: refresh.invoice.status()?,
            balance_due: refresh.invoice.balance_due(),
            wallet_balance: wallet.balance,
            transaction: entry,
            payment,
        })
    }

    pub async fn freeze(
        &self,
        id: Uuid,
        reason: String,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<WalletRecord> {
        actor.require(PERMISSION)?;
        self.set_frozen(id, Some(reason), context).await
    }

    pub async fn unfreeze(
        &self,
        id: Uuid,
        actor: &Principal,
        context: &OperationContext,
    ) -> AppResult<WalletRecord> {
        actor.require(PERMISSION)?;
        self.set_frozen(id, None, context).await
    }

    async fn set_frozen(
        &self,
        id: Uuid,
        reason: Option<String>,
        context: &OperationContext,
    ) -> AppResult<WalletRecord> {
        let mut tx = self.pool.begin().await?;

        let record = fetch_wallet(&mut tx, id).await?;
        let wallet = record.to_domain()?;
        let frozen = reason.is_some();

        let updated = match reason {
            Some(reason) => wallet.freeze(reason)?,
            None => wallet.unfreeze()?,
        };

        let rows = sqlx::query(
            r#"
            UPDATE wallets
            SET status = $2, frozen_reason = $3, updated_at = NOW()
            WHERE id = $1 AND version = $4
            "#,
        )
        .bind(id)
        .bind(updated.status().as_str())
        .bind(updated.frozen_reason())
        .bind(wallet.version())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(version_conflict(&mut tx, id, wallet.version()).await);
        }

        let action = if frozen {
            AuditAction::WalletFrozen
        } else {
            AuditAction::WalletUnfrozen
        };
        let before = record.clone();
        let record = record.updated_from(&updated);

        AuditLogBuilder::new(action)
            .resource(RESOURCE, id)
            .before_state(&before)
            .after_state(&record)
            .write(&mut *tx, context)
            .await?;

        tx.commit().await?;

        tracing::info!(wallet_id = %id, frozen, "Wallet status changed");

        self.notifier
            .notify(Notice::wallet_status_changed(record.customer_id, id, frozen))
            .await;

        Ok(record)
    }

    /// Newest entries first
    pub async fn list_transactions(
        &self,
        id: Uuid,
        filter: &TransactionFilter,
        page: PageRequest,
        actor: &Principal,
    ) -> AppResult<Page<LedgerEntry>> {
        self.get(id, actor).await?;

        let kind = filter.kind.map(|k| k.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM wallet_transactions WHERE wallet_id = $1 AND ($2::TEXT IS NULL OR kind = $2)",
        )
        .bind(id)
        .bind(kind)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            r#"
            SELECT {} FROM wallet_transactions
            WHERE wallet_id = $1 AND ($2::TEXT IS NULL OR kind = $2)
            ORDER BY sequence DESC
            LIMIT $3 OFFSET $4
            "#,
            LEDGER_COLUMNS
        );
        let rows: Vec<LedgerRecord> = sqlx::query_as(&sql)
            .bind(id)
            .bind(kind)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, total, page))
    }

    /// Replay the whole ledger against the stored balance
    pub async fn verify(&self, id: Uuid, actor: &Principal) -> AppResult<LedgerVerification> {
        actor.require_staff()?;

        let mut conn = self.pool.acquire().await?;
        let record = fetch_wallet(&mut conn, id).await?;

        let sql = format!(
            "SELECT {} FROM wallet_transactions WHERE wallet_id = $1 ORDER BY sequence",
            LEDGER_COLUMNS
        );
        let rows: Vec<LedgerRecord> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;

        let entries = rows
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let verification = verify_ledger(&entries, record.balance);
        if !verification.is_valid {
            tracing::error!(
                wallet_id = %id,
                first_invalid_entry = ?verification.first_invalid_entry,
                problem = ?verification.problem,
                "Wallet ledger failed verification"
            );
        }

        Ok(verification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::domain::Direction;

    #[test]
    fn test_ledger_receipt_flattens_entry() {
        let now = Utc::now();
        let wallet = WalletRecord {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            currency: "EGP".to_string(),
            balance: dec!(0),
            status: "ACTIVE".to_string(),
            frozen_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let amount = Amount::new(dec!(25)).unwrap();
        let entry = wallet
            .to_domain()
            .unwrap()
            .prepare(LedgerOperation::Deposit, &amount, None, "Cash deposit")
            .unwrap();

        let receipt = LedgerReceipt {
            wallet: wallet.clone(),
            entry: entry.clone(),
        };
        let json = serde_json::to_value(&receipt).unwrap();

        assert_eq!(json["id"], entry.id.to_string());
        assert_eq!(json["kind"], "DEPOSIT");
        assert_eq!(json["direction"], "CREDIT");
        assert_eq!(json["wallet"]["id"], wallet.id.to_string());

        let back: LedgerReceipt = serde_json::from_value(json).unwrap();
        assert_eq!(back.entry, entry);
        assert_eq!(back.entry.direction, Direction::Credit);
    }

    #[test]
    fn test_transaction_filter_reads_type() {
        let filter: TransactionFilter = serde_json::from_str(r#"{"type":"REFUND"}"#).unwrap();
        assert_eq!(filter.kind, Some(WalletTransactionType::Refund));

        let empty: TransactionFilter = serde_json::from_str("{}").unwrap();
        assert!(empty.kind.is_none());
    }
}

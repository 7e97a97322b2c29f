//! Notifications
//!
//! Bilingual notifications are stored in `notifications` and pushed to
//! connected WebSocket clients through the `NotificationHub`. Delivery is
//! best-effort: a failed insert or publish is logged and never fails the
//! business operation that triggered it.

mod hub;

pub use hub::{NotificationHub, Subscription};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    InvoiceStatus, Page, PageRequest, ServiceRequestStatus, WalletTransactionType,
};

/// Stored notification, also the WebSocket message body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: String,
    pub title_en: String,
    pub title_ar: String,
    pub body_en: String,
    pub body_ar: String,
    pub payload: Value,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    WalletUpdated,
    WalletStatusChanged,
    InvoiceIssued,
    InvoiceSent,
    InvoiceStatusChanged,
    PaymentReceived,
    PaymentFailed,
    PaymentRefunded,
    ServiceRequestStatusChanged,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::WalletUpdated => "wallet.updated",
            NotificationKind::WalletStatusChanged => "wallet.status_changed",
            NotificationKind::InvoiceIssued => "invoice.issued",
            NotificationKind::InvoiceSent => "invoice.sent",
            NotificationKind::InvoiceStatusChanged => "invoice.status_changed",
            NotificationKind::PaymentReceived => "payment.received",
            NotificationKind::PaymentFailed => "payment.failed",
            NotificationKind::PaymentRefunded => "payment.refunded",
            NotificationKind::ServiceRequestStatusChanged => "service_request.status_changed",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A notification waiting to be stored
#[derive(Debug, Clone)]
pub struct Notice {
    recipient_id: Uuid,
    kind: NotificationKind,
    title_en: String,
    title_ar: String,
    body_en: String,
    body_ar: String,
    payload: Value,
}

impl Notice {
    pub fn new(
        recipient_id: Uuid,
        kind: NotificationKind,
        title_en: impl Into<String>,
        title_ar: impl Into<String>,
    ) -> Self {
        Self {
            recipient_id,
            kind,
            title_en: title_en.into(),
            title_ar: title_ar.into(),
            body_en: String::new(),
            body_ar: String::new(),
            payload: json!({}),
        }
    }

    pub fn body(mut self, body_en: impl Into<String>, body_ar: impl Into<String>) -> Self {
        self.body_en = body_en.into();
        self.body_ar = body_ar.into();
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn recipient_id(&self) -> Uuid {
        self.recipient_id
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    pub fn into_notification(self) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            recipient_id: self.recipient_id,
            kind: self.kind.as_str().to_string(),
            title_en: self.title_en,
            title_ar: self.title_ar,
            body_en: self.body_en,
            body_ar: self.body_ar,
            payload: self.payload,
            is_read: false,
            created_at: Utc::now(),
        }
    }

    // =====================================================================
    // Wallet
    // =====================================================================

    pub fn wallet_updated(
        customer_id: Uuid,
        wallet_id: Uuid,
        kind: WalletTransactionType,
        amount: Decimal,
        balance: Decimal,
    ) -> Self {
        Notice::new(
            customer_id,
            NotificationKind::WalletUpdated,
            "Wallet updated",
            "تم تحديث المحفظة",
        )
        .body(
            format!("{} of {:.2}. New balance: {:.2}", kind, amount, balance),
            format!("{} بقيمة {:.2}. الرصيد الحالي: {:.2}", kind.label_ar(), amount, balance),
        )
        .payload(json!({
            "wallet_id": wallet_id,
            "transaction_type": kind,
            "amount": amount,
            "balance": balance,
        }))
    }

    pub fn wallet_status_changed(customer_id: Uuid, wallet_id: Uuid, frozen: bool) -> Self {
        let (title_en, title_ar) = if frozen {
            ("Wallet frozen", "تم تجميد المحفظة")
        } else {
            ("Wallet reactivated", "تم إعادة تفعيل المحفظة")
        };

        Notice::new(customer_id, NotificationKind::WalletStatusChanged, title_en, title_ar)
            .payload(json!({ "wallet_id": wallet_id, "frozen": frozen }))
    }

    // =====================================================================
    // Invoices
    // =====================================================================

    pub fn invoice_issued(customer_id: Uuid, invoice_id: Uuid, number: &str, total: Decimal) -> Self {
        Notice::new(
            customer_id,
            NotificationKind::InvoiceIssued,
            format!("Invoice {} issued", number),
            format!("تم إصدار الفاتورة {}", number),
        )
        .body(
            format!("Amount due: {:.2}", total),
            format!("المبلغ المستحق: {:.2}", total),
        )
        .payload(json!({ "invoice_id": invoice_id, "invoice_number": number, "total": total }))
    }

    pub fn invoice_sent(customer_id: Uuid, invoice_id: Uuid, number: &str, balance_due: Decimal) -> Self {
        Notice::new(
            customer_id,
            NotificationKind::InvoiceSent,
            format!("Invoice {} is ready for payment", number),
            format!("الفاتورة {} جاهزة للسداد", number),
        )
        .body(
            format!("Balance due: {:.2}", balance_due),
            format!("المتبقي للسداد: {:.2}", balance_due),
        )
        .payload(json!({
            "invoice_id": invoice_id,
            "invoice_number": number,
            "balance_due": balance_due,
        }))
    }

    pub fn invoice_status_changed(
        customer_id: Uuid,
        invoice_id: Uuid,
        number: &str,
        status: InvoiceStatus,
    ) -> Self {
        Notice::new(
            customer_id,
            NotificationKind::InvoiceStatusChanged,
            format!("Invoice {} is now {}", number, status),
            format!("حالة الفاتورة {}: {}", number, status.label_ar()),
        )
        .payload(json!({ "invoice_id": invoice_id, "invoice_number": number, "status": status }))
    }

    // =====================================================================
    // Payments
    // =====================================================================

    pub fn payment_received(customer_id: Uuid, payment_id: Uuid, amount: Decimal) -> Self {
        Notice::new(
            customer_id,
            NotificationKind::PaymentReceived,
            "Payment received",
            "تم استلام الدفعة",
        )
        .body(
            format!("We received your payment of {:.2}", amount),
            format!("تم استلام دفعتك بقيمة {:.2}", amount),
        )
        .payload(json!({ "payment_id": payment_id, "amount": amount }))
    }

    pub fn payment_failed(customer_id: Uuid, payment_id: Uuid, amount: Decimal) -> Self {
        Notice::new(
            customer_id,
            NotificationKind::PaymentFailed,
            "Payment failed",
            "فشلت عملية الدفع",
        )
        .body(
            format!("Your payment of {:.2} did not go through", amount),
            format!("لم تتم عملية الدفع بقيمة {:.2}", amount),
        )
        .payload(json!({ "payment_id": payment_id, "amount": amount }))
    }

    pub fn payment_refunded(customer_id: Uuid, payment_id: Uuid, amount: Decimal) -> Self {
        Notice::new(
            customer_id,
            NotificationKind::PaymentRefunded,
            "Payment refunded",
            "تم استرداد الدفعة",
        )
        .body(
            format!("{:.2} has been refunded", amount),
            format!("تم رد مبلغ {:.2}", amount),
        )
        .payload(json!({ "payment_id": payment_id, "amount": amount }))
    }

    // =====================================================================
    // Service requests
    // =====================================================================

    pub fn service_request_status(
        customer_id: Uuid,
        request_id: Uuid,
        reference: &str,
        status: ServiceRequestStatus,
    ) -> Self {
        Notice::new(
            customer_id,
            NotificationKind::ServiceRequestStatusChanged,
            format!("Request {} is now {}", reference, status),
            format!("حالة الطلب {}: {}", reference, status.label_ar()),
        )
        .payload(json!({ "request_id": request_id, "reference": reference, "status": status }))
    }
}

/// Stores notifications and pushes them to live subscribers
#[derive(Debug, Clone)]
pub struct NotificationService {
    pool: PgPool,
    hub: NotificationHub,
}

impl NotificationService {
    pub fn new(pool: PgPool, hub: NotificationHub) -> Self {
        Self { pool, hub }
    }

    /// Persist and publish. Call after the triggering transaction commits.
    pub async fn notify(&self, notice: Notice) {
        let kind = notice.kind();
        let recipient_id = notice.recipient_id();

        match self.insert(notice.into_notification()).await {
            Ok(notification) => {
                self.hub.publish(notification);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    kind = %kind,
                    recipient_id = %recipient_id,
                    "Failed to store notification"
                );
            }
        }
    }

    async fn insert(&self, notification: Notification) -> Result<Notification, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, recipient_id, kind, title_en, title_ar, body_en, body_ar,
                payload, is_read, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(notification.id)
        .bind(notification.recipient_id)
        .bind(&notification.kind)
        .bind(&notification.title_en)
        .bind(&notification.title_ar)
        .bind(&notification.body_en)
        .bind(&notification.body_ar)
        .bind(&notification.payload)
        .bind(notification.is_read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(notification)
    }

    /// A recipient's notifications, newest first
    pub async fn list(
        &self,
        recipient_id: Uuid,
        unread_only: bool,
        page: PageRequest,
    ) -> Result<Page<Notification>, sqlx::Error> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notifications
            WHERE recipient_id = $1 AND ($2 = FALSE OR is_read = FALSE)
            "#,
        )
        .bind(recipient_id)
        .bind(unread_only)
        .fetch_one(&self.pool)
        .await?;

        let items: Vec<Notification> = sqlx::query_as(
            r#"
            SELECT id, recipient_id, kind, title_en, title_ar, body_en, body_ar,
                   payload, is_read, created_at
            FROM notifications
            WHERE recipient_id = $1 AND ($2 = FALSE OR is_read = FALSE)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(recipient_id)
        .bind(unread_only)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::new(items, total, page))
    }

    /// Returns false when the notification doesn't exist or isn't the recipient's
    pub async fn mark_read(&self, recipient_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let rows = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE id = $1 AND recipient_id = $2",
        )
        .bind(id)
        .bind(recipient_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    pub async fn mark_all_read(&self, recipient_id: Uuid) -> Result<u64, sqlx::Error> {
        let rows = sqlx::query(
            "UPDATE notifications SET is_read = TRUE WHERE recipient_id = $1 AND is_read = FALSE",
        )
        .bind(recipient_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wallet_updated_notice_is_bilingual() {
        let customer = Uuid::new_v4();
        let notification = Notice::wallet_updated(
            customer,
            Uuid::new_v4(),
            WalletTransactionType::Deposit,
            dec!(250),
            dec!(400.5),
        )
        .into_notification();

        assert_eq!(notification.recipient_id, customer);
        assert_eq!(notification.kind, "wallet.updated");
        assert_eq!(notification.body_en, "DEPOSIT of 250.00. New balance: 400.50");
        assert!(notification.body_ar.contains("إيداع"));
        assert_eq!(notification.payload["transaction_type"], "DEPOSIT");
        assert!(!notification.is_read);
    }

    #[test]
    fn test_invoice_status_notice() {
        let notification = Notice::invoice_status_changed(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "INV-20260315-ABC123",
            InvoiceStatus::Paid,
        )
        .into_notification();

        assert_eq!(notification.title_en, "Invoice INV-20260315-ABC123 is now PAID");
        assert!(notification.title_ar.contains("مدفوعة"));
        assert_eq!(notification.payload["status"], "PAID");
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(
            NotificationKind::ServiceRequestStatusChanged.as_str(),
            "service_request.status_changed"
        );
        assert_eq!(NotificationKind::PaymentFailed.to_string(), "payment.failed");
    }
}

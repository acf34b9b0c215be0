use crate::{
    db::models::{transactions::TransactionDBResponse, vouchers::VoucherKind},
    payments::reconcile::{ReconcileOutcome, Reconciliation},
    types::{CourseId, TransactionId, UserId, VoucherId},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionCreate {
    #[schema(value_type = String, format = "uuid")]
    pub course_id: CourseId,
    /// Optional voucher code, case-insensitive
    pub voucher_code: Option<String>,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TransactionId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = String, format = "uuid")]
    pub course_id: CourseId,
    /// Course price at purchase time
    pub course_price: i64,
    pub discount_amount: i64,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub voucher_id: Option<VoucherId>,
    pub voucher_kind: Option<VoucherKind>,
    #[schema(value_type = String)]
    pub tax_rate: Decimal,
    pub tax_amount: i64,
    /// Invoiced amount
    pub amount: i64,
    pub due_date: DateTime<Utc>,
    pub invoice_id: Option<String>,
    /// Where the buyer pays
    pub invoice_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of asking the gateway about a transaction's invoice
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentCheckResponse {
    pub outcome: ReconcileOutcome,
    pub transaction: TransactionResponse,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListTransactionsQuery {
    /// Number of items to skip
    pub skip: Option<i64>,

    /// Maximum number of items to return
    pub limit: Option<i64>,

    /// Only paid (`true`) or unpaid (`false`) transactions
    pub paid: Option<bool>,
}

// Conversions
impl From<TransactionDBResponse> for TransactionResponse {
    fn from(db: TransactionDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            course_id: db.course_id,
            course_price: db.course_price,
            discount_amount: db.discount_amount,
            voucher_id: db.voucher_id,
            voucher_kind: db.voucher_kind,
            tax_rate: db.tax_rate,
            tax_amount: db.tax_amount,
            amount: db.amount,
            due_date: db.due_date,
            invoice_id: db.invoice_id,
            invoice_url: db.invoice_url,
            paid_at: db.paid_at,
            payment_method: db.payment_method,
            created_at: db.created_at,
        }
    }
}

impl From<Reconciliation> for PaymentCheckResponse {
    fn from(reconciliation: Reconciliation) -> Self {
        Self {
            outcome: reconciliation.outcome,
            transaction: reconciliation.transaction.into(),
        }
    }
}

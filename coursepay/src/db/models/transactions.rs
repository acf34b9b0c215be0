use crate::types::{CourseId, TransactionId, UserId, VoucherId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

use super::vouchers::VoucherKind;

/// Database request for a course purchase; every price field is a snapshot taken at
/// creation time so later course or voucher edits never change what was invoiced.
#[derive(Debug, Clone)]
pub struct TransactionCreateDBRequest {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub course_price: i64,
    pub discount_amount: i64,
    pub voucher_id: Option<VoucherId>,
    pub voucher_kind: Option<VoucherKind>,
    pub tax_rate: Decimal,
    pub tax_amount: i64,
    pub amount: i64,
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionDBResponse {
    pub id: TransactionId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub course_price: i64,
    pub discount_amount: i64,
    pub voucher_id: Option<VoucherId>,
    pub voucher_kind: Option<VoucherKind>,
    pub tax_rate: Decimal,
    pub tax_amount: i64,
    pub amount: i64,
    pub due_date: DateTime<Utc>,
    pub invoice_id: Option<String>,
    pub invoice_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionDBResponse {
    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }

    /// Unpaid and still payable
    pub fn is_outstanding(&self, now: DateTime<Utc>) -> bool {
        !self.is_paid() && self.due_date > now
    }
}

/// Filter for listing transactions
#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub user_id: Option<UserId>,
    pub paid: Option<bool>,
    pub skip: i64,
    pub limit: i64,
}

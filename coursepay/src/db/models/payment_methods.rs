use crate::types::{PaymentMethodId, WalletId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct PaymentMethodCreateDBRequest {
    pub wallet_id: WalletId,
    pub bank_code: String,
    pub account_number: String,
    pub holder_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentMethodUpdateDBRequest {
    pub bank_code: Option<String>,
    pub account_number: Option<String>,
    pub holder_name: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentMethodDBResponse {
    pub id: PaymentMethodId,
    pub wallet_id: WalletId,
    pub bank_code: String,
    pub account_number: String,
    pub holder_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft delete marker; withdrawals keep pointing at deleted methods
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PaymentMethodDBResponse {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Filter for listing a wallet's payment methods
#[derive(Debug, Clone)]
pub struct PaymentMethodFilter {
    pub wallet_id: WalletId,
    pub include_deleted: bool,
}

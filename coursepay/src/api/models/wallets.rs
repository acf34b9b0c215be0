use crate::{
    db::models::{
        ledger::{LedgerAudit, LedgerEntryKind, LedgerEntryStatus, WalletTransactionDBResponse},
        wallets::WalletDBResponse,
    },
    types::{PaymentMethodId, TransactionId, UserId, WalletId, WalletTransactionId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletCreate {
    /// Account holder name used for payouts
    pub full_name: String,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OtpVerify {
    pub otp: String,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: WalletId,
    #[schema(value_type = String, format = "uuid")]
    pub instructor_id: UserId,
    pub full_name: String,
    pub phone: String,
    pub address: String,
    /// Available balance in the smallest currency unit. Pending withdrawals are already deducted.
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OtpVerifyResponse {
    pub valid: bool,
}

/// A ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletTransactionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: WalletTransactionId,
    #[schema(value_type = String, format = "uuid")]
    pub wallet_id: WalletId,
    pub kind: LedgerEntryKind,
    pub amount: i64,
    /// The course purchase that produced this income
    #[schema(value_type = Option<String>, format = "uuid")]
    pub transaction_id: Option<TransactionId>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub payment_method_id: Option<PaymentMethodId>,
    /// The failed withdrawal this entry refunds
    #[schema(value_type = Option<String>, format = "uuid")]
    pub refund_of: Option<WalletTransactionId>,
    pub description: String,
    pub status: LedgerEntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletAuditResponse {
    #[schema(value_type = String, format = "uuid")]
    pub wallet_id: WalletId,
    pub balance: i64,
    /// Balance recomputed from the ledger
    pub ledger_balance: i64,
    pub consistent: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListLedgerQuery {
    /// Number of items to skip
    pub skip: Option<i64>,

    /// Maximum number of items to return
    pub limit: Option<i64>,

    pub kind: Option<LedgerEntryKind>,

    pub status: Option<LedgerEntryStatus>,
}

// Conversions
impl From<WalletDBResponse> for WalletResponse {
    fn from(db: WalletDBResponse) -> Self {
        Self {
            id: db.id,
            instructor_id: db.instructor_id,
            full_name: db.full_name,
            phone: db.phone,
            address: db.address,
            balance: db.balance,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

impl From<WalletTransactionDBResponse> for WalletTransactionResponse {
    fn from(db: WalletTransactionDBResponse) -> Self {
        Self {
            id: db.id,
            wallet_id: db.wallet_id,
            kind: db.kind,
            amount: db.amount,
            transaction_id: db.transaction_id,
            payment_method_id: db.payment_method_id,
            refund_of: db.refund_of,
            description: db.description,
            status: db.status,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

impl WalletAuditResponse {
    pub fn new(wallet_id: WalletId, audit: LedgerAudit) -> Self {
        Self {
            wallet_id,
            balance: audit.balance,
            ledger_balance: audit.ledger_balance,
            consistent: audit.is_consistent(),
        }
    }
}

use crate::types::{PaymentMethodId, TransactionId, WalletId, WalletTransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Direction of a ledger entry, stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    Income,
    Outcome,
}

/// Ledger entry status. Withdrawals move pending -> success | failed; both are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryStatus {
    Pending,
    Success,
    Failed,
}

/// Admin decision on a pending withdrawal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Success,
    Failed,
}

impl From<SettlementOutcome> for LedgerEntryStatus {
    fn from(outcome: SettlementOutcome) -> Self {
        match outcome {
            SettlementOutcome::Success => LedgerEntryStatus::Success,
            SettlementOutcome::Failed => LedgerEntryStatus::Failed,
        }
    }
}

/// Income from a confirmed course sale
#[derive(Debug, Clone)]
pub struct IncomePostDBRequest {
    pub wallet_id: WalletId,
    pub amount: i64,
    pub transaction_id: TransactionId,
    pub description: String,
}

/// Instructor-initiated withdrawal. The OTP gate runs before this reaches the ledger.
#[derive(Debug, Clone)]
pub struct WithdrawalCreateDBRequest {
    pub wallet_id: WalletId,
    pub payment_method_id: PaymentMethodId,
    pub amount: i64,
}

/// Database response for a ledger entry
#[derive(Debug, Clone)]
pub struct WalletTransactionDBResponse {
    pub id: WalletTransactionId,
    pub wallet_id: WalletId,
    pub kind: LedgerEntryKind,
    pub amount: i64,
    pub transaction_id: Option<TransactionId>,
    pub payment_method_id: Option<PaymentMethodId>,
    pub refund_of: Option<WalletTransactionId>,
    pub description: String,
    pub status: LedgerEntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of settling a withdrawal: the updated entry, plus the refund when it failed
#[derive(Debug, Clone)]
pub struct SettlementDBResponse {
    pub withdrawal: WalletTransactionDBResponse,
    pub refund: Option<WalletTransactionDBResponse>,
    pub balance_after: i64,
}

/// Stored balance next to the balance implied by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerAudit {
    pub balance: i64,
    pub ledger_balance: i64,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_balance
    }
}

/// Filter for listing ledger entries
#[derive(Debug, Clone)]
pub struct LedgerFilter {
    pub wallet_id: Option<WalletId>,
    pub kind: Option<LedgerEntryKind>,
    pub status: Option<LedgerEntryStatus>,
    pub newest_first: bool,
    pub skip: i64,
    pub limit: i64,
}

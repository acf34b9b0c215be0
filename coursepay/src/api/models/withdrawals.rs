use crate::{
    api::models::wallets::WalletTransactionResponse,
    db::models::ledger::{LedgerEntryStatus, SettlementDBResponse, SettlementOutcome},
    errors::Error,
    types::{PaymentMethodId, SortOrder, WalletId},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WithdrawalCreate {
    #[schema(value_type = String, format = "uuid")]
    pub wallet_id: WalletId,
    #[schema(value_type = String, format = "uuid")]
    pub payment_method_id: PaymentMethodId,
    /// Positive integer in the smallest currency unit
    #[serde(default)]
    #[schema(value_type = i64)]
    pub amount: serde_json::Value,
    /// Code from `POST /wallet/otp`
    pub otp: String,
}

impl WithdrawalCreate {
    /// Accepts only positive JSON integers. Strings, fractions, zero and negatives are rejected.
    pub fn positive_amount(&self) -> Result<i64, Error> {
        self.amount.as_i64().filter(|amount| *amount > 0).ok_or_else(|| Error::BadRequest {
            message: "Amount must be a positive integer".to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WithdrawalCreatedResponse {
    pub message: String,
    pub withdrawal: WalletTransactionResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WithdrawalSettle {
    pub status: SettlementOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettlementResponse {
    pub message: String,
    pub withdrawal: WalletTransactionResponse,
    /// The compensating income entry, present when the withdrawal failed
    pub refund: Option<WalletTransactionResponse>,
    /// Wallet balance after settlement
    pub balance: i64,
}

impl From<SettlementDBResponse> for SettlementResponse {
    fn from(db: SettlementDBResponse) -> Self {
        let message = match db.withdrawal.status {
            LedgerEntryStatus::Failed => "Withdrawal marked as failed and refunded",
            _ => "Withdrawal marked as successful",
        };
        Self {
            message: message.to_string(),
            withdrawal: db.withdrawal.into(),
            refund: db.refund.map(Into::into),
            balance: db.balance_after,
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListWithdrawalsQuery {
    /// Number of items to skip
    pub skip: Option<i64>,

    /// Maximum number of items to return
    pub limit: Option<i64>,

    pub status: Option<LedgerEntryStatus>,

    /// Recency order, newest first by default
    pub order: Option<SortOrder>,
}

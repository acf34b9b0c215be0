use crate::{
    db::models::payment_methods::PaymentMethodDBResponse,
    errors::Error,
    types::{PaymentMethodId, WalletId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentMethodCreate {
    /// Bank or e-wallet code understood by the payout rail, e.g. `BCA`
    pub bank_code: String,
    pub account_number: String,
    pub holder_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PaymentMethodUpdate {
    pub bank_code: Option<String>,
    pub account_number: Option<String>,
    pub holder_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentMethodResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PaymentMethodId,
    #[schema(value_type = String, format = "uuid")]
    pub wallet_id: WalletId,
    pub bank_code: String,
    pub account_number: String,
    pub holder_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn require_non_empty(field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::BadRequest {
            message: format!("{field} must not be empty"),
        });
    }
    Ok(())
}

fn require_digits(value: &str) -> Result<(), Error> {
    if !value.trim().chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::BadRequest {
            message: "account_number must contain only digits".to_string(),
        });
    }
    Ok(())
}

impl PaymentMethodCreate {
    pub fn validate(&self) -> Result<(), Error> {
        require_non_empty("bank_code", &self.bank_code)?;
        require_non_empty("account_number", &self.account_number)?;
        require_non_empty("holder_name", &self.holder_name)?;
        require_digits(&self.account_number)
    }
}

impl PaymentMethodUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        if let Some(bank_code) = &self.bank_code {
            require_non_empty("bank_code", bank_code)?;
        }
        if let Some(account_number) = &self.account_number {
            require_non_empty("account_number", account_number)?;
            require_digits(account_number)?;
        }
        if let Some(holder_name) = &self.holder_name {
            require_non_empty("holder_name", holder_name)?;
        }
        Ok(())
    }
}

impl From<PaymentMethodDBResponse> for PaymentMethodResponse {
    fn from(db: PaymentMethodDBResponse) -> Self {
        Self {
            id: db.id,
            wallet_id: db.wallet_id,
            bank_code: db.bank_code,
            account_number: db.account_number,
            holder_name: db.holder_name,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

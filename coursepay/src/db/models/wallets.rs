use crate::types::{UserId, WalletId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct WalletCreateDBRequest {
    pub instructor_id: UserId,
    pub full_name: String,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct WalletDBResponse {
    pub id: WalletId,
    pub instructor_id: UserId,
    pub full_name: String,
    pub phone: String,
    pub address: String,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

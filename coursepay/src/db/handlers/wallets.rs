use crate::{
    db::{
        errors::Result,
        models::wallets::{WalletCreateDBRequest, WalletDBResponse},
    },
    types::{UserId, WalletId},
};
use sqlx::PgConnection;
use tracing::instrument;

const WALLET_COLUMNS: &str = "id, instructor_id, full_name, phone, address, balance, created_at, updated_at";

/// Wallet rows. Balances are only ever changed through [`super::Ledger`].
pub struct Wallets<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Wallets<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Create a zero-balance wallet. A second wallet for the same instructor fails with a
    /// unique violation on `wallets_instructor_id_key`.
    #[instrument(skip(self, request), fields(instructor_id = %request.instructor_id), err)]
    pub async fn create(&mut self, request: &WalletCreateDBRequest) -> Result<WalletDBResponse> {
        let wallet = sqlx::query_as::<_, WalletDBResponse>(&format!(
            r#"
            INSERT INTO wallets (instructor_id, full_name, phone, address)
            VALUES ($1, $2, $3, $4)
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(request.instructor_id)
        .bind(&request.full_name)
        .bind(&request.phone)
        .bind(&request.address)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(wallet)
    }

    pub async fn get_by_id(&mut self, id: WalletId) -> Result<Option<WalletDBResponse>> {
        let wallet = sqlx::query_as::<_, WalletDBResponse>(&format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(wallet)
    }

    pub async fn get_by_instructor(&mut self, instructor_id: UserId) -> Result<Option<WalletDBResponse>> {
        let wallet = sqlx::query_as::<_, WalletDBResponse>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE instructor_id = $1"
        ))
        .bind(instructor_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(wallet)
    }
}

use crate::{
    db::{
        errors::{DbError, Result},
        models::ledger::{
            IncomePostDBRequest, LedgerAudit, LedgerEntryKind, LedgerEntryStatus, LedgerFilter, SettlementDBResponse,
            SettlementOutcome, WalletTransactionDBResponse, WithdrawalCreateDBRequest,
        },
    },
    types::{WalletId, WalletTransactionId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, FromRow, PgConnection, Postgres, QueryBuilder};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

pub const REFUND_DESCRIPTION: &str = "Refund";

const ENTRY_COLUMNS: &str =
    "id, wallet_id, kind, amount, transaction_id, payment_method_id, refund_of, description, status, created_at, updated_at";

// Database entity model for a wallet ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletTransaction {
    pub id: WalletTransactionId,
    pub wallet_id: WalletId,
    pub kind: LedgerEntryKind,
    pub amount: i64,
    pub transaction_id: Option<Uuid>,
    pub payment_method_id: Option<Uuid>,
    pub refund_of: Option<WalletTransactionId>,
    pub description: String,
    pub status: LedgerEntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WalletTransaction> for WalletTransactionDBResponse {
    fn from(entry: WalletTransaction) -> Self {
        Self {
            id: entry.id,
            wallet_id: entry.wallet_id,
            kind: entry.kind,
            amount: entry.amount,
            transaction_id: entry.transaction_id,
            payment_method_id: entry.payment_method_id,
            refund_of: entry.refund_of,
            description: entry.description,
            status: entry.status,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

/// The wallet ledger. Every balance change happens here, in the same database transaction
/// as the entry that explains it, and always as a single conditional `UPDATE`.
pub struct Ledger<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Ledger<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Record a successful income entry and credit the wallet.
    ///
    /// A second posting for the same commerce transaction fails with a unique violation on
    /// `wallet_transactions_sale_income_key` and changes nothing.
    #[instrument(skip(self, request), fields(wallet_id = %request.wallet_id, amount = request.amount), err)]
    pub async fn post_income(&mut self, request: &IncomePostDBRequest) -> Result<WalletTransactionDBResponse> {
        let mut tx = self.db.begin().await?;

        let entry = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            INSERT INTO wallet_transactions (wallet_id, kind, amount, transaction_id, description, status)
            VALUES ($1, 'income', $2, $3, $4, 'success')
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(request.wallet_id)
        .bind(request.amount)
        .bind(request.transaction_id)
        .bind(&request.description)
        .fetch_one(&mut *tx)
        .await?;

        let balance = credit(&mut tx, request.wallet_id, request.amount).await?;
        trace!("Credited {} to wallet {}, balance now {}", request.amount, request.wallet_id, balance);

        tx.commit().await?;

        Ok(WalletTransactionDBResponse::from(entry))
    }

    /// Reserve funds for a withdrawal: debit the balance and record a pending outcome entry.
    ///
    /// Returns `None` when the balance does not cover the amount; nothing is written then.
    #[instrument(skip(self, request), fields(wallet_id = %request.wallet_id, amount = request.amount), err)]
    pub async fn request_withdrawal(&mut self, request: &WithdrawalCreateDBRequest) -> Result<Option<WalletTransactionDBResponse>> {
        let mut tx = self.db.begin().await?;

        let debited = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE wallets SET balance = balance - $1, updated_at = NOW()
            WHERE id = $2 AND balance >= $1
            RETURNING balance
            "#,
        )
        .bind(request.amount)
        .bind(request.wallet_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = debited else {
            debug!("Wallet {} cannot cover withdrawal of {}", request.wallet_id, request.amount);
            return Ok(None);
        };

        let entry = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            INSERT INTO wallet_transactions (wallet_id, kind, amount, payment_method_id, description, status)
            VALUES ($1, 'outcome', $2, $3, 'Withdrawal', 'pending')
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(request.wallet_id)
        .bind(request.amount)
        .bind(request.payment_method_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        trace!("Reserved {} from wallet {}, balance now {}", request.amount, request.wallet_id, balance);

        Ok(Some(WalletTransactionDBResponse::from(entry)))
    }

    /// Lock an entry for the rest of the caller's transaction
    pub async fn lock_entry(&mut self, id: WalletTransactionId) -> Result<Option<WalletTransactionDBResponse>> {
        let entry = sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {ENTRY_COLUMNS} FROM wallet_transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(entry.map(WalletTransactionDBResponse::from))
    }

    /// Move a pending withdrawal to its terminal status. A failed withdrawal gets a
    /// compensating income entry and its amount back on the balance.
    ///
    /// Fails with [`DbError::NotFound`] unless `id` is a pending outcome entry.
    #[instrument(skip(self), err)]
    pub async fn settle_withdrawal(&mut self, id: WalletTransactionId, outcome: SettlementOutcome) -> Result<SettlementDBResponse> {
        let mut tx = self.db.begin().await?;

        let withdrawal = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            UPDATE wallet_transactions SET status = $2, updated_at = NOW()
            WHERE id = $1 AND kind = 'outcome' AND status = 'pending'
            RETURNING {ENTRY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(LedgerEntryStatus::from(outcome))
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

        let (refund, balance_after) = match outcome {
            SettlementOutcome::Success => {
                let balance = sqlx::query_scalar::<_, i64>("SELECT balance FROM wallets WHERE id = $1")
                    .bind(withdrawal.wallet_id)
                    .fetch_one(&mut *tx)
                    .await?;
                (None, balance)
            }
            SettlementOutcome::Failed => {
                let refund = sqlx::query_as::<_, WalletTransaction>(&format!(
                    r#"
                    INSERT INTO wallet_transactions (wallet_id, kind, amount, payment_method_id, refund_of, description, status)
                    VALUES ($1, 'income', $2, $3, $4, $5, 'success')
                    RETURNING {ENTRY_COLUMNS}
                    "#
                ))
                .bind(withdrawal.wallet_id)
                .bind(withdrawal.amount)
                .bind(withdrawal.payment_method_id)
                .bind(withdrawal.id)
                .bind(REFUND_DESCRIPTION)
                .fetch_one(&mut *tx)
                .await?;

                let balance = credit(&mut tx, withdrawal.wallet_id, withdrawal.amount).await?;
                (Some(WalletTransactionDBResponse::from(refund)), balance)
            }
        };

        tx.commit().await?;

        Ok(SettlementDBResponse {
            withdrawal: WalletTransactionDBResponse::from(withdrawal),
            refund,
            balance_after,
        })
    }

    pub async fn get_by_id(&mut self, id: WalletTransactionId) -> Result<Option<WalletTransactionDBResponse>> {
        let entry = sqlx::query_as::<_, WalletTransaction>(&format!("SELECT {ENTRY_COLUMNS} FROM wallet_transactions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(entry.map(WalletTransactionDBResponse::from))
    }

    pub async fn list(&mut self, filter: &LedgerFilter) -> Result<Vec<WalletTransactionDBResponse>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!("SELECT {ENTRY_COLUMNS} FROM wallet_transactions WHERE TRUE"));
        if let Some(wallet_id) = filter.wallet_id {
            query.push(" AND wallet_id = ").push_bind(wallet_id);
        }
        if let Some(kind) = filter.kind {
            query.push(" AND kind = ").push_bind(kind);
        }
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status);
        }
        query.push(if filter.newest_first {
            " ORDER BY created_at DESC, seq DESC"
        } else {
            " ORDER BY created_at ASC, seq ASC"
        });
        query.push(" OFFSET ").push_bind(filter.skip);
        query.push(" LIMIT ").push_bind(filter.limit);

        let entries = query.build_query_as::<WalletTransaction>().fetch_all(&mut *self.db).await?;
        Ok(entries.into_iter().map(WalletTransactionDBResponse::from).collect())
    }

    /// Compare the stored balance with the balance implied by the ledger
    pub async fn audit(&mut self, wallet_id: WalletId) -> Result<Option<LedgerAudit>> {
        let row = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT w.balance,
                COALESCE((
                    SELECT SUM(CASE WHEN kind = 'income' THEN amount ELSE -amount END)
                    FROM wallet_transactions
                    WHERE wallet_id = w.id
                      AND ((kind = 'income' AND status = 'success')
                        OR (kind = 'outcome' AND status IN ('pending', 'success')))
                ), 0)::BIGINT
            FROM wallets w
            WHERE w.id = $1
            "#,
        )
        .bind(wallet_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row.map(|(balance, ledger_balance)| LedgerAudit { balance, ledger_balance }))
    }
}

async fn credit(db: &mut PgConnection, wallet_id: WalletId, amount: i64) -> Result<i64> {
    sqlx::query_scalar::<_, i64>("UPDATE wallets SET balance = balance + $1, updated_at = NOW() WHERE id = $2 RETURNING balance")
        .bind(amount)
        .bind(wallet_id)
        .fetch_optional(db)
        .await?
        .ok_or(DbError::NotFound)
}

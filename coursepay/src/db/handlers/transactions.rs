use crate::{
    db::{
        errors::{DbError, Result},
        models::transactions::{TransactionCreateDBRequest, TransactionDBResponse, TransactionFilter},
    },
    types::{CourseId, TransactionId, UserId},
};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{instrument, trace};

const TRANSACTION_COLUMNS: &str = "id, user_id, course_id, course_price, discount_amount, voucher_id, voucher_kind, tax_rate, \
     tax_amount, amount, due_date, invoice_id, invoice_url, paid_at, payment_method, created_at, updated_at";

/// Advisory lock key for a (user, course) pair: the first 8 bytes of each id, xored
fn purchase_lock_key(user_id: UserId, course_id: CourseId) -> i64 {
    let mut key = [0u8; 8];
    for (i, (u, c)) in user_id.as_bytes().iter().zip(course_id.as_bytes()).take(8).enumerate() {
        key[i] = u ^ c;
    }
    i64::from_be_bytes(key)
}

/// Commerce transactions (course purchases)
pub struct Transactions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Transactions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Serialize purchases of one course by one user until the caller's transaction ends.
    ///
    /// Uses `pg_advisory_xact_lock`, which blocks until the lock is free and releases on
    /// commit or rollback, so it must run inside an open transaction.
    pub async fn lock_purchase(&mut self, user_id: UserId, course_id: CourseId) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1 FROM (SELECT pg_advisory_xact_lock($1)) AS _")
            .bind(purchase_lock_key(user_id, course_id))
            .fetch_one(&mut *self.db)
            .await?;
        trace!("Acquired purchase lock for user {} course {}", user_id, course_id);
        Ok(())
    }

    /// Most recent unpaid transaction for this purchase that is still payable
    pub async fn find_outstanding(&mut self, user_id: UserId, course_id: CourseId) -> Result<Option<TransactionDBResponse>> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE user_id = $1 AND course_id = $2 AND paid_at IS NULL AND due_date > NOW()
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(transaction)
    }

    #[instrument(skip(self, request), fields(user_id = %request.user_id, course_id = %request.course_id, amount = request.amount), err)]
    pub async fn create(&mut self, request: &TransactionCreateDBRequest) -> Result<TransactionDBResponse> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>(&format!(
            r#"
            INSERT INTO transactions (
                user_id, course_id, course_price, discount_amount, voucher_id, voucher_kind,
                tax_rate, tax_amount, amount, due_date
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(request.user_id)
        .bind(request.course_id)
        .bind(request.course_price)
        .bind(request.discount_amount)
        .bind(request.voucher_id)
        .bind(request.voucher_kind)
        .bind(request.tax_rate)
        .bind(request.tax_amount)
        .bind(request.amount)
        .bind(request.due_date)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(transaction)
    }

    pub async fn set_invoice(&mut self, id: TransactionId, invoice_id: &str, invoice_url: &str) -> Result<TransactionDBResponse> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>(&format!(
            r#"
            UPDATE transactions SET invoice_id = $2, invoice_url = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(invoice_id)
        .bind(invoice_url)
        .fetch_optional(&mut *self.db)
        .await?;

        transaction.ok_or(DbError::NotFound)
    }

    pub async fn get_by_id(&mut self, id: TransactionId) -> Result<Option<TransactionDBResponse>> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(transaction)
    }

    /// Row-lock a transaction for the rest of the caller's transaction
    pub async fn lock_by_id(&mut self, id: TransactionId) -> Result<Option<TransactionDBResponse>> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(transaction)
    }

    /// Record the payment. Only an unpaid row is updated; a paid one gives [`DbError::NotFound`].
    #[instrument(skip(self), err)]
    pub async fn mark_paid(&mut self, id: TransactionId, paid_at: DateTime<Utc>, payment_method: Option<&str>) -> Result<TransactionDBResponse> {
        let transaction = sqlx::query_as::<_, TransactionDBResponse>(&format!(
            r#"
            UPDATE transactions SET paid_at = $2, payment_method = $3, updated_at = NOW()
            WHERE id = $1 AND paid_at IS NULL
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(paid_at)
        .bind(payment_method)
        .fetch_optional(&mut *self.db)
        .await?;

        transaction.ok_or(DbError::NotFound)
    }

    pub async fn list(&mut self, filter: &TransactionFilter) -> Result<Vec<TransactionDBResponse>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE TRUE"));
        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        match filter.paid {
            Some(true) => {
                query.push(" AND paid_at IS NOT NULL");
            }
            Some(false) => {
                query.push(" AND paid_at IS NULL");
            }
            None => {}
        }
        query.push(" ORDER BY created_at DESC, id DESC");
        query.push(" OFFSET ").push_bind(filter.skip);
        query.push(" LIMIT ").push_bind(filter.limit);

        let transactions = query.build_query_as::<TransactionDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(transactions)
    }
}

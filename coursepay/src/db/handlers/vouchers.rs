use crate::{
    db::{
        errors::Result,
        models::vouchers::{VoucherCreateDBRequest, VoucherDBResponse, VoucherFilter},
    },
    types::{UserId, VoucherId},
};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{instrument, trace};

const VOUCHER_COLUMNS: &str = "id, code, kind, instructor_id, discount_percent, expires_at, created_by, created_at";

/// Voucher codes are stored upper-cased and matched case-insensitively
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

fn usage_lock_half(id: uuid::Uuid) -> i32 {
    let bytes = id.as_bytes();
    i32::from_be_bytes([bytes[0] ^ bytes[8], bytes[1] ^ bytes[9], bytes[2] ^ bytes[10], bytes[3] ^ bytes[11]])
}

pub struct Vouchers<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Vouchers<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(code = %request.code, kind = ?request.kind), err)]
    pub async fn create(&mut self, request: &VoucherCreateDBRequest) -> Result<VoucherDBResponse> {
        let voucher = sqlx::query_as::<_, VoucherDBResponse>(&format!(
            r#"
            INSERT INTO vouchers (code, kind, instructor_id, discount_percent, expires_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {VOUCHER_COLUMNS}
            "#
        ))
        .bind(normalize_code(&request.code))
        .bind(request.kind)
        .bind(request.instructor_id)
        .bind(request.discount_percent)
        .bind(request.expires_at)
        .bind(request.created_by)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(voucher)
    }

    pub async fn get_by_id(&mut self, id: VoucherId) -> Result<Option<VoucherDBResponse>> {
        let voucher = sqlx::query_as::<_, VoucherDBResponse>(&format!("SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(voucher)
    }

    pub async fn get_by_code(&mut self, code: &str) -> Result<Option<VoucherDBResponse>> {
        let voucher = sqlx::query_as::<_, VoucherDBResponse>(&format!("SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE code = $1"))
            .bind(normalize_code(code))
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(voucher)
    }

    pub async fn list(&mut self, filter: &VoucherFilter) -> Result<Vec<VoucherDBResponse>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!("SELECT {VOUCHER_COLUMNS} FROM vouchers WHERE TRUE"));
        if let Some(instructor_id) = filter.instructor_id {
            query.push(" AND instructor_id = ").push_bind(instructor_id);
        }
        query.push(" ORDER BY created_at DESC, id DESC");
        query.push(" OFFSET ").push_bind(filter.skip);
        query.push(" LIMIT ").push_bind(filter.limit);

        let vouchers = query.build_query_as::<VoucherDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(vouchers)
    }

    /// Serialize checkouts that spend `voucher_id` for `user_id` until the surrounding
    /// transaction ends. Uses the two-key advisory lock space, apart from purchase locks.
    pub async fn lock_usage(&mut self, voucher_id: VoucherId, user_id: UserId) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1 FROM (SELECT pg_advisory_xact_lock($1, $2)) AS _")
            .bind(usage_lock_half(voucher_id))
            .bind(usage_lock_half(user_id))
            .fetch_one(&mut *self.db)
            .await?;
        trace!("Acquired voucher lock for voucher {} user {}", voucher_id, user_id);
        Ok(())
    }

    /// Whether the user already spent this voucher: a paid transaction, or one still payable.
    /// Expired unpaid transactions release the voucher.
    pub async fn is_used_by(&mut self, voucher_id: VoucherId, user_id: UserId) -> Result<bool> {
        let used = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM transactions
                WHERE voucher_id = $1 AND user_id = $2
                  AND (paid_at IS NOT NULL OR due_date > NOW())
            )
            "#,
        )
        .bind(voucher_id)
        .bind(user_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(used)
    }

    /// Transactions keep their snapshot; their voucher reference is cleared
    #[instrument(skip(self), err)]
    pub async fn delete(&mut self, id: VoucherId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM vouchers WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::Role,
        db::{errors::DbError, models::vouchers::VoucherKind},
        test_utils::create_test_user,
    };
    use chrono::{Duration, Utc};
    use sqlx::PgPool;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  save20 "), "SAVE20");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_codes_are_case_insensitive_and_unique(pool: PgPool) {
        let admin = create_test_user(&pool, Role::Admin).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut vouchers = Vouchers::new(&mut conn);

        let request = VoucherCreateDBRequest {
            code: "welcome10".to_string(),
            kind: VoucherKind::Platform,
            instructor_id: None,
            discount_percent: 10,
            expires_at: Utc::now() + Duration::days(7),
            created_by: admin.id,
        };
        let voucher = vouchers.create(&request).await.unwrap();
        assert_eq!(voucher.code, "WELCOME10");

        let found = vouchers.get_by_code("Welcome10").await.unwrap().unwrap();
        assert_eq!(found.id, voucher.id);

        assert!(matches!(vouchers.create(&request).await, Err(DbError::UniqueViolation { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_instructor_voucher_requires_instructor(pool: PgPool) {
        let admin = create_test_user(&pool, Role::Admin).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut vouchers = Vouchers::new(&mut conn);

        let result = vouchers
            .create(&VoucherCreateDBRequest {
                code: "ORPHAN".to_string(),
                kind: VoucherKind::Instructor,
                instructor_id: None,
                discount_percent: 10,
                expires_at: Utc::now() + Duration::days(7),
                created_by: admin.id,
            })
            .await;
        assert!(matches!(result, Err(DbError::CheckViolation { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_by_instructor(pool: PgPool) {
        let first = create_test_user(&pool, Role::Instructor).await;
        let second = create_test_user(&pool, Role::Instructor).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut vouchers = Vouchers::new(&mut conn);

        for (code, instructor) in [("FIRST", &first), ("SECOND", &second)] {
            vouchers
                .create(&VoucherCreateDBRequest {
                    code: code.to_string(),
                    kind: VoucherKind::Instructor,
                    instructor_id: Some(instructor.id),
                    discount_percent: 15,
                    expires_at: Utc::now() + Duration::days(7),
                    created_by: instructor.id,
                })
                .await
                .unwrap();
        }

        let own = vouchers
            .list(&VoucherFilter {
                instructor_id: Some(first.id),
                skip: 0,
                limit: 100,
            })
            .await
            .unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].code, "FIRST");
    }
}

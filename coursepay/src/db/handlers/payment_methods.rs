use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::payment_methods::{
            PaymentMethodCreateDBRequest, PaymentMethodDBResponse, PaymentMethodFilter, PaymentMethodUpdateDBRequest,
        },
    },
    types::PaymentMethodId,
};
use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::instrument;

const PAYMENT_METHOD_COLUMNS: &str = "id, wallet_id, bank_code, account_number, holder_name, created_at, updated_at, deleted_at";

pub struct PaymentMethods<'c> {
    db: &'c mut PgConnection,
}

impl<'c> PaymentMethods<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl<'c> Repository for PaymentMethods<'c> {
    type CreateRequest = PaymentMethodCreateDBRequest;
    type UpdateRequest = PaymentMethodUpdateDBRequest;
    type Response = PaymentMethodDBResponse;
    type Id = PaymentMethodId;
    type Filter = PaymentMethodFilter;

    #[instrument(skip(self, request), fields(wallet_id = %request.wallet_id), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let method = sqlx::query_as::<_, PaymentMethodDBResponse>(&format!(
            r#"
            INSERT INTO payment_methods (wallet_id, bank_code, account_number, holder_name)
            VALUES ($1, $2, $3, $4)
            RETURNING {PAYMENT_METHOD_COLUMNS}
            "#
        ))
        .bind(request.wallet_id)
        .bind(&request.bank_code)
        .bind(&request.account_number)
        .bind(&request.holder_name)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(method)
    }

    /// Includes soft-deleted methods, which withdrawals may still reference
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let method = sqlx::query_as::<_, PaymentMethodDBResponse>(&format!(
            "SELECT {PAYMENT_METHOD_COLUMNS} FROM payment_methods WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(method)
    }

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let methods = sqlx::query_as::<_, PaymentMethodDBResponse>(&format!(
            r#"
            SELECT {PAYMENT_METHOD_COLUMNS}
            FROM payment_methods
            WHERE wallet_id = $1 AND ($2 OR deleted_at IS NULL)
            ORDER BY created_at ASC, id ASC
            "#
        ))
        .bind(filter.wallet_id)
        .bind(filter.include_deleted)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(methods)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let method = sqlx::query_as::<_, PaymentMethodDBResponse>(&format!(
            r#"
            UPDATE payment_methods SET
                bank_code = COALESCE($2, bank_code),
                account_number = COALESCE($3, account_number),
                holder_name = COALESCE($4, holder_name),
                updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {PAYMENT_METHOD_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(request.bank_code.as_deref())
        .bind(request.account_number.as_deref())
        .bind(request.holder_name.as_deref())
        .fetch_optional(&mut *self.db)
        .await?;

        method.ok_or(DbError::NotFound)
    }

    /// Soft delete; returns false if the method was missing or already deleted
    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("UPDATE payment_methods SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::Role,
        test_utils::{create_test_user, create_test_wallet},
    };
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_soft_delete_hides_from_listing_but_keeps_row(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let wallet = create_test_wallet(&pool, instructor.id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = PaymentMethods::new(&mut conn);

        let method = repo
            .create(&PaymentMethodCreateDBRequest {
                wallet_id: wallet.id,
                bank_code: "BCA".to_string(),
                account_number: "1234567890".to_string(),
                holder_name: "Grace Hopper".to_string(),
            })
            .await
            .unwrap();
        assert!(method.is_active());

        assert!(repo.delete(method.id).await.unwrap());
        assert!(!repo.delete(method.id).await.unwrap());

        let active = repo
            .list(&PaymentMethodFilter {
                wallet_id: wallet.id,
                include_deleted: false,
            })
            .await
            .unwrap();
        assert!(active.is_empty());

        let kept = repo.get_by_id(method.id).await.unwrap().expect("row is kept");
        assert!(!kept.is_active());

        let update = repo
            .update(
                method.id,
                &PaymentMethodUpdateDBRequest {
                    holder_name: Some("Someone Else".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(update, Err(DbError::NotFound)));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_partial_update(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let wallet = create_test_wallet(&pool, instructor.id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = PaymentMethods::new(&mut conn);

        let method = repo
            .create(&PaymentMethodCreateDBRequest {
                wallet_id: wallet.id,
                bank_code: "BCA".to_string(),
                account_number: "1234567890".to_string(),
                holder_name: "Grace Hopper".to_string(),
            })
            .await
            .unwrap();

        let updated = repo
            .update(
                method.id,
                &PaymentMethodUpdateDBRequest {
                    account_number: Some("999".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.account_number, "999");
        assert_eq!(updated.bank_code, "BCA");
    }
}

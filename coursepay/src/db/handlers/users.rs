use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::users::{UserCreateDBRequest, UserDBResponse, UserFilter, UserUpdateDBRequest},
    },
    types::UserId,
};
use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

const USER_COLUMNS: &str = "id, email, full_name, role, created_at, updated_at";

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn get_user_by_email(&mut self, email: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)"))
            .bind(email)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl<'c> Repository for Users<'c> {
    type CreateRequest = UserCreateDBRequest;
    type UpdateRequest = UserUpdateDBRequest;
    type Response = UserDBResponse;
    type Id = UserId;
    type Filter = UserFilter;

    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            "INSERT INTO users (email, full_name, role) VALUES ($1, $2, $3) RETURNING {USER_COLUMNS}"
        ))
        .bind(request.email.trim().to_lowercase())
        .bind(&request.full_name)
        .bind(request.role)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(user)
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM users WHERE TRUE"));
        if let Some(role) = filter.role {
            query.push(" AND role = ").push_bind(role);
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let pattern = format!("%{}%", search.to_lowercase());
            query
                .push(" AND (lower(email) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR lower(full_name) LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        query.push(if filter.newest_first {
            " ORDER BY created_at DESC, id DESC"
        } else {
            " ORDER BY created_at ASC, id ASC"
        });
        query.push(" OFFSET ").push_bind(filter.skip);
        query.push(" LIMIT ").push_bind(filter.limit);

        let users = query.build_query_as::<UserDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(users)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let user = sqlx::query_as::<_, UserDBResponse>(&format!(
            r#"
            UPDATE users SET
                full_name = COALESCE($2, full_name),
                role = COALESCE($3, role),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(request.full_name.as_deref())
        .bind(request.role)
        .fetch_optional(&mut *self.db)
        .await?;

        user.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }
}

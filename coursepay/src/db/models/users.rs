use crate::{api::models::users::Role, types::UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserDBResponse {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub full_name: Option<String>,
    pub role: Option<Role>,
}

/// Filter for listing users
#[derive(Debug, Clone)]
pub struct UserFilter {
    pub role: Option<Role>,
    /// Case-insensitive match on email or full name
    pub search: Option<String>,
    pub newest_first: bool,
    pub skip: i64,
    pub limit: i64,
}

impl UserFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            role: None,
            search: None,
            newest_first: true,
            skip,
            limit,
        }
    }
}

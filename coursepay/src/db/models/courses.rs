use crate::types::{CourseId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone)]
pub struct CourseCreateDBRequest {
    pub instructor_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub price: i64,
    pub discounted_price: Option<i64>,
}

/// Partial update; `discounted_price: Some(None)` clears the discount
#[derive(Debug, Clone, Default)]
pub struct CourseUpdateDBRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub discounted_price: Option<Option<i64>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CourseDBResponse {
    pub id: CourseId,
    pub instructor_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub price: i64,
    pub discounted_price: Option<i64>,
    pub is_published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseDBResponse {
    /// Price a buyer pays before vouchers and tax
    pub fn effective_price(&self) -> i64 {
        self.discounted_price.unwrap_or(self.price)
    }
}

/// Filter for listing courses
#[derive(Debug, Clone)]
pub struct CourseFilter {
    pub instructor_id: Option<UserId>,
    pub published_only: bool,
    pub skip: i64,
    pub limit: i64,
}

use crate::{
    db::models::courses::CourseDBResponse,
    types::{CourseId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::{IntoParams, ToSchema};

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CourseCreate {
    pub title: String,
    pub description: Option<String>,
    /// Price in the smallest currency unit
    pub price: i64,
    /// Optional sale price, must not exceed `price`
    pub discounted_price: Option<i64>,
}

/// Distinguishes an absent field from an explicit `null`
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    /// Send `null` to remove the sale price
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<i64>)]
    pub discounted_price: Option<Option<i64>>,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CourseResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: CourseId,
    #[schema(value_type = String, format = "uuid")]
    pub instructor_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub price: i64,
    pub discounted_price: Option<i64>,
    /// What a buyer pays before vouchers and tax
    pub effective_price: i64,
    pub is_published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListCoursesQuery {
    /// Number of items to skip
    pub skip: Option<i64>,

    /// Maximum number of items to return
    pub limit: Option<i64>,

    /// Only the caller's own courses, drafts included (instructors)
    pub mine: Option<bool>,
}

impl From<CourseDBResponse> for CourseResponse {
    fn from(db: CourseDBResponse) -> Self {
        Self {
            effective_price: db.effective_price(),
            id: db.id,
            instructor_id: db.instructor_id,
            title: db.title,
            description: db.description,
            price: db.price,
            discounted_price: db.discounted_price,
            is_published: db.is_published,
            published_at: db.published_at,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

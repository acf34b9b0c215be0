use crate::{
    db::models::enrollments::{EnrollmentDBResponse, ProgressDBResponse},
    types::{CourseId, EnrollmentId, TransactionId, UserId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressCreate {
    /// The lesson or section content that was completed
    #[schema(value_type = String, format = "uuid")]
    pub content_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressResponse {
    #[schema(value_type = String, format = "uuid")]
    pub content_id: Uuid,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnrollmentResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: EnrollmentId,
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    #[schema(value_type = String, format = "uuid")]
    pub course_id: CourseId,
    #[schema(value_type = String, format = "uuid")]
    pub transaction_id: TransactionId,
    pub created_at: DateTime<Utc>,
    /// Only populated when fetching a single enrollment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Vec<ProgressResponse>>,
}

impl EnrollmentResponse {
    pub fn with_progress(mut self, progress: Vec<ProgressResponse>) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListEnrollmentsQuery {
    /// Number of items to skip
    pub skip: Option<i64>,

    /// Maximum number of items to return
    pub limit: Option<i64>,
}

impl From<EnrollmentDBResponse> for EnrollmentResponse {
    fn from(db: EnrollmentDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            course_id: db.course_id,
            transaction_id: db.transaction_id,
            created_at: db.created_at,
            progress: None,
        }
    }
}

impl From<ProgressDBResponse> for ProgressResponse {
    fn from(db: ProgressDBResponse) -> Self {
        Self {
            content_id: db.content_id,
            completed_at: db.completed_at,
        }
    }
}

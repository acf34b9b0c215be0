use crate::types::{CourseId, EnrollmentId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EnrollmentCreateDBRequest {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, FromRow)]
pub struct EnrollmentDBResponse {
    pub id: EnrollmentId,
    pub user_id: UserId,
    pub course_id: CourseId,
    pub transaction_id: TransactionId,
    pub created_at: DateTime<Utc>,
}

/// One completed piece of course content
#[derive(Debug, Clone, FromRow)]
pub struct ProgressDBResponse {
    pub content_id: Uuid,
    pub completed_at: DateTime<Utc>,
}

use crate::{
    db::{
        errors::Result,
        models::enrollments::{EnrollmentCreateDBRequest, EnrollmentDBResponse, ProgressDBResponse},
    },
    types::{CourseId, EnrollmentId, UserId},
};
use sqlx::PgConnection;
use tracing::instrument;
use uuid::Uuid;

const ENROLLMENT_COLUMNS: &str = "id, user_id, course_id, transaction_id, created_at";

pub struct Enrollments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Enrollments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Enroll a user. Returns `None` if the user is already enrolled in the course.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, course_id = %request.course_id), err)]
    pub async fn create(&mut self, request: &EnrollmentCreateDBRequest) -> Result<Option<EnrollmentDBResponse>> {
        let enrollment = sqlx::query_as::<_, EnrollmentDBResponse>(&format!(
            r#"
            INSERT INTO enrollments (user_id, course_id, transaction_id)
            VALUES ($1, $2, $3)
            ON CONFLICT ON CONSTRAINT enrollments_user_course_key DO NOTHING
            RETURNING {ENROLLMENT_COLUMNS}
            "#
        ))
        .bind(request.user_id)
        .bind(request.course_id)
        .bind(request.transaction_id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(enrollment)
    }

    pub async fn get_by_id(&mut self, id: EnrollmentId) -> Result<Option<EnrollmentDBResponse>> {
        let enrollment = sqlx::query_as::<_, EnrollmentDBResponse>(&format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(enrollment)
    }

    pub async fn is_enrolled(&mut self, user_id: UserId, course_id: CourseId) -> Result<bool> {
        let enrolled = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM enrollments WHERE user_id = $1 AND course_id = $2)")
            .bind(user_id)
            .bind(course_id)
            .fetch_one(&mut *self.db)
            .await?;
        Ok(enrolled)
    }

    pub async fn list_for_user(&mut self, user_id: UserId, skip: i64, limit: i64) -> Result<Vec<EnrollmentDBResponse>> {
        let enrollments = sqlx::query_as::<_, EnrollmentDBResponse>(&format!(
            r#"
            SELECT {ENROLLMENT_COLUMNS}
            FROM enrollments
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#
        ))
        .bind(user_id)
        .bind(skip)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(enrollments)
    }

    /// Append a completed content item; completing it again keeps the first timestamp
    pub async fn record_progress(&mut self, enrollment_id: EnrollmentId, content_id: Uuid) -> Result<ProgressDBResponse> {
        let progress = sqlx::query_as::<_, ProgressDBResponse>(
            r#"
            WITH inserted AS (
                INSERT INTO enrollment_progress (enrollment_id, content_id)
                VALUES ($1, $2)
                ON CONFLICT (enrollment_id, content_id) DO NOTHING
                RETURNING content_id, completed_at
            )
            SELECT content_id, completed_at FROM inserted
            UNION ALL
            SELECT content_id, completed_at FROM enrollment_progress
            WHERE enrollment_id = $1 AND content_id = $2
            LIMIT 1
            "#,
        )
        .bind(enrollment_id)
        .bind(content_id)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(progress)
    }

    pub async fn list_progress(&mut self, enrollment_id: EnrollmentId) -> Result<Vec<ProgressDBResponse>> {
        let progress = sqlx::query_as::<_, ProgressDBResponse>(
            "SELECT content_id, completed_at FROM enrollment_progress WHERE enrollment_id = $1 ORDER BY completed_at ASC, content_id ASC",
        )
        .bind(enrollment_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(progress)
    }
}

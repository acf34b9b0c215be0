use crate::{
    db::{
        errors::{DbError, Result},
        models::courses::{CourseCreateDBRequest, CourseDBResponse, CourseFilter, CourseUpdateDBRequest},
    },
    types::CourseId,
};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::instrument;

const COURSE_COLUMNS: &str =
    "id, instructor_id, title, description, price, discounted_price, is_published, published_at, created_at, updated_at";

pub struct Courses<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Courses<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(instructor_id = %request.instructor_id), err)]
    pub async fn create(&mut self, request: &CourseCreateDBRequest) -> Result<CourseDBResponse> {
        let course = sqlx::query_as::<_, CourseDBResponse>(&format!(
            r#"
            INSERT INTO courses (instructor_id, title, description, price, discounted_price)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {COURSE_COLUMNS}
            "#
        ))
        .bind(request.instructor_id)
        .bind(&request.title)
        .bind(request.description.as_deref())
        .bind(request.price)
        .bind(request.discounted_price)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(course)
    }

    pub async fn get_by_id(&mut self, id: CourseId) -> Result<Option<CourseDBResponse>> {
        let course = sqlx::query_as::<_, CourseDBResponse>(&format!("SELECT {COURSE_COLUMNS} FROM courses WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(course)
    }

    pub async fn list(&mut self, filter: &CourseFilter) -> Result<Vec<CourseDBResponse>> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(format!("SELECT {COURSE_COLUMNS} FROM courses WHERE TRUE"));
        if let Some(instructor_id) = filter.instructor_id {
            query.push(" AND instructor_id = ").push_bind(instructor_id);
        }
        if filter.published_only {
            query.push(" AND is_published");
        }
        query.push(" ORDER BY created_at DESC, id DESC");
        query.push(" OFFSET ").push_bind(filter.skip);
        query.push(" LIMIT ").push_bind(filter.limit);

        let courses = query.build_query_as::<CourseDBResponse>().fetch_all(&mut *self.db).await?;
        Ok(courses)
    }

    /// Partial update. Price changes never touch existing transactions, which keep their snapshot.
    #[instrument(skip(self, request), err)]
    pub async fn update(&mut self, id: CourseId, request: &CourseUpdateDBRequest) -> Result<CourseDBResponse> {
        let (set_discount, discounted_price) = match request.discounted_price {
            Some(value) => (true, value),
            None => (false, None),
        };

        let course = sqlx::query_as::<_, CourseDBResponse>(&format!(
            r#"
            UPDATE courses SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                price = COALESCE($4, price),
                discounted_price = CASE WHEN $5 THEN $6 ELSE discounted_price END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {COURSE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(request.title.as_deref())
        .bind(request.description.as_deref())
        .bind(request.price)
        .bind(set_discount)
        .bind(discounted_price)
        .fetch_optional(&mut *self.db)
        .await?;

        course.ok_or(DbError::NotFound)
    }

    /// Publish a course; publishing twice keeps the original `published_at`
    #[instrument(skip(self), err)]
    pub async fn publish(&mut self, id: CourseId) -> Result<CourseDBResponse> {
        let course = sqlx::query_as::<_, CourseDBResponse>(&format!(
            r#"
            UPDATE courses SET
                is_published = TRUE,
                published_at = COALESCE(published_at, NOW()),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {COURSE_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        course.ok_or(DbError::NotFound)
    }

    pub async fn unpublish(&mut self, id: CourseId) -> Result<CourseDBResponse> {
        let course = sqlx::query_as::<_, CourseDBResponse>(&format!(
            "UPDATE courses SET is_published = FALSE, updated_at = NOW() WHERE id = $1 RETURNING {COURSE_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        course.ok_or(DbError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::models::users::Role, test_utils::create_test_user};
    use sqlx::PgPool;

    fn request(instructor_id: crate::types::UserId, price: i64) -> CourseCreateDBRequest {
        CourseCreateDBRequest {
            instructor_id,
            title: "Systems Programming".to_string(),
            description: Some("Ownership and borrowing".to_string()),
            price,
            discounted_price: None,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_discount_can_be_set_and_cleared(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut courses = Courses::new(&mut conn);

        let course = courses.create(&request(instructor.id, 100_000)).await.unwrap();
        assert_eq!(course.effective_price(), 100_000);

        let discounted = courses
            .update(
                course.id,
                &CourseUpdateDBRequest {
                    discounted_price: Some(Some(80_000)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(discounted.effective_price(), 80_000);

        let renamed = courses
            .update(
                course.id,
                &CourseUpdateDBRequest {
                    title: Some("Advanced Systems".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.discounted_price, Some(80_000), "untouched fields are kept");

        let cleared = courses
            .update(
                course.id,
                &CourseUpdateDBRequest {
                    discounted_price: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.discounted_price, None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_discount_above_price_is_rejected(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut courses = Courses::new(&mut conn);

        let mut req = request(instructor.id, 50_000);
        req.discounted_price = Some(60_000);
        assert!(matches!(courses.create(&req).await, Err(DbError::CheckViolation { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_listing_published_courses(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut courses = Courses::new(&mut conn);

        let draft = courses.create(&request(instructor.id, 10_000)).await.unwrap();
        let live = courses.create(&request(instructor.id, 20_000)).await.unwrap();
        let published = courses.publish(live.id).await.unwrap();
        assert!(published.is_published);
        assert!(published.published_at.is_some());

        let public = courses
            .list(&CourseFilter {
                instructor_id: None,
                published_only: true,
                skip: 0,
                limit: 100,
            })
            .await
            .unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].id, live.id);

        let mine = courses
            .list(&CourseFilter {
                instructor_id: Some(instructor.id),
                published_only: false,
                skip: 0,
                limit: 100,
            })
            .await
            .unwrap();
        assert!(mine.iter().any(|c| c.id == draft.id));
        assert_eq!(mine.len(), 2);
    }
}

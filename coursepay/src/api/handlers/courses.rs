use crate::{
    api::models::{
        courses::{CourseCreate, CourseResponse, CourseUpdate, ListCoursesQuery},
        users::{CurrentUser, Role},
    },
    auth::permissions::{can_update_all_resources, can_update_own_resource, operation, resource, RequiresPermission},
    db::{
        handlers::{Courses, Wallets},
        models::courses::{CourseCreateDBRequest, CourseDBResponse, CourseFilter, CourseUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{pagination, CourseId, Operation, Permission, Resource},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgConnection;
use tracing::info;

fn validate_prices(price: i64, discounted_price: Option<i64>) -> Result<()> {
    if price < 0 {
        return Err(Error::BadRequest {
            message: "price must not be negative".to_string(),
        });
    }
    if let Some(discounted) = discounted_price {
        if discounted < 0 || discounted > price {
            return Err(Error::BadRequest {
                message: "discounted_price must be between 0 and price".to_string(),
            });
        }
    }
    Ok(())
}

fn not_found(id: CourseId) -> Error {
    Error::NotFound {
        resource: "Course".to_string(),
        id: id.to_string(),
    }
}

/// Load a course the caller may modify: their own, or any course for admins
async fn load_editable(conn: &mut PgConnection, current_user: &CurrentUser, id: CourseId) -> Result<CourseDBResponse> {
    let course = Courses::new(conn).get_by_id(id).await?.ok_or_else(|| not_found(id))?;

    if !can_update_all_resources(current_user, Resource::Courses)
        && !can_update_own_resource(current_user, Resource::Courses, course.instructor_id)
    {
        return Err(Error::InsufficientPermissions {
            required: Permission::Any(vec![
                Permission::Allow(Resource::Courses, Operation::UpdateAll),
                Permission::Allow(Resource::Courses, Operation::UpdateOwn),
            ]),
            action: Operation::UpdateOwn,
            resource: format!("course {id}"),
        });
    }
    Ok(course)
}

#[utoipa::path(
    post,
    path = "/courses",
    tag = "courses",
    summary = "Create course",
    description = "Create a draft course owned by the calling instructor",
    request_body = CourseCreate,
    responses(
        (status = 201, description = "Course created", body = CourseResponse),
        (status = 400, description = "Invalid title or prices"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn create_course(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Courses, operation::CreateOwn>,
    Json(data): Json<CourseCreate>,
) -> Result<(StatusCode, Json<CourseResponse>)> {
    if data.title.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "title must not be empty".to_string(),
        });
    }
    validate_prices(data.price, data.discounted_price)?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let course = Courses::new(&mut pool_conn)
        .create(&CourseCreateDBRequest {
            instructor_id: current_user.id,
            title: data.title.trim().to_string(),
            description: data.description,
            price: data.price,
            discounted_price: data.discounted_price,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CourseResponse::from(course))))
}

#[utoipa::path(
    get,
    path = "/courses",
    tag = "courses",
    summary = "List courses",
    description = "List published courses. Instructors can pass `mine=true` to list their own courses, drafts included.",
    params(ListCoursesQuery),
    responses(
        (status = 200, description = "List of courses", body = [CourseResponse]),
        (status = 401, description = "Unauthorized"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn list_courses(
    State(state): State<AppState>,
    Query(query): Query<ListCoursesQuery>,
    current_user: CurrentUser,
) -> Result<Json<Vec<CourseResponse>>> {
    let (skip, limit) = pagination(query.skip, query.limit);
    let filter = if query.mine.unwrap_or(false) {
        if current_user.role == Role::User {
            return Err(Error::InsufficientPermissions {
                required: Permission::Allow(Resource::Courses, Operation::ReadOwn),
                action: Operation::ReadOwn,
                resource: "own courses".to_string(),
            });
        }
        CourseFilter {
            instructor_id: Some(current_user.id),
            published_only: false,
            skip,
            limit,
        }
    } else {
        CourseFilter {
            instructor_id: None,
            published_only: true,
            skip,
            limit,
        }
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let courses = Courses::new(&mut pool_conn).list(&filter).await?;

    Ok(Json(courses.into_iter().map(CourseResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/courses/{id}",
    tag = "courses",
    summary = "Get course",
    description = "Drafts are only visible to their instructor and admins",
    params(
        ("id" = String, Path, description = "Course ID"),
    ),
    responses(
        (status = 200, description = "Course", body = CourseResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Course not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn get_course(State(state): State<AppState>, Path(id): Path<CourseId>, current_user: CurrentUser) -> Result<Json<CourseResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let course = Courses::new(&mut pool_conn).get_by_id(id).await?.ok_or_else(|| not_found(id))?;

    // Return 404 to avoid leaking drafts
    if !course.is_published && !current_user.is_admin() && course.instructor_id != current_user.id {
        return Err(not_found(id));
    }

    Ok(Json(CourseResponse::from(course)))
}

#[utoipa::path(
    patch,
    path = "/courses/{id}",
    tag = "courses",
    summary = "Update course",
    params(
        ("id" = String, Path, description = "Course ID"),
    ),
    request_body = CourseUpdate,
    responses(
        (status = 200, description = "Updated course", body = CourseResponse),
        (status = 400, description = "Invalid title or prices"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - not the course's instructor"),
        (status = 404, description = "Course not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn update_course(
    State(state): State<AppState>,
    Path(id): Path<CourseId>,
    current_user: CurrentUser,
    Json(data): Json<CourseUpdate>,
) -> Result<Json<CourseResponse>> {
    if data.title.as_deref().is_some_and(|title| title.trim().is_empty()) {
        return Err(Error::BadRequest {
            message: "title must not be empty".to_string(),
        });
    }

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let existing = load_editable(&mut tx, &current_user, id).await?;

    let price = data.price.unwrap_or(existing.price);
    let discounted_price = data.discounted_price.unwrap_or(existing.discounted_price);
    validate_prices(price, discounted_price)?;

    let course = Courses::new(&mut tx)
        .update(
            id,
            &CourseUpdateDBRequest {
                title: data.title.map(|title| title.trim().to_string()),
                description: data.description,
                price: data.price,
                discounted_price: data.discounted_price,
            },
        )
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(CourseResponse::from(course)))
}

#[utoipa::path(
    post,
    path = "/courses/{id}/publish",
    tag = "courses",
    summary = "Publish course",
    description = "Make a course purchasable. The instructor must have a wallet to receive income.",
    params(
        ("id" = String, Path, description = "Course ID"),
    ),
    responses(
        (status = 200, description = "Published course", body = CourseResponse),
        (status = 400, description = "Instructor has no wallet"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - not the course's instructor"),
        (status = 404, description = "Course not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn publish_course(State(state): State<AppState>, Path(id): Path<CourseId>, current_user: CurrentUser) -> Result<Json<CourseResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let existing = load_editable(&mut tx, &current_user, id).await?;

    if Wallets::new(&mut tx).get_by_instructor(existing.instructor_id).await?.is_none() {
        return Err(Error::BadRequest {
            message: "Create a wallet before publishing a course".to_string(),
        });
    }

    let course = Courses::new(&mut tx).publish(id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    info!(course_id = %course.id, instructor_id = %course.instructor_id, "Course published");
    Ok(Json(CourseResponse::from(course)))
}

#[utoipa::path(
    post,
    path = "/courses/{id}/unpublish",
    tag = "courses",
    summary = "Unpublish course",
    description = "Stop selling a course. Existing purchases and enrollments are kept.",
    params(
        ("id" = String, Path, description = "Course ID"),
    ),
    responses(
        (status = 200, description = "Unpublished course", body = CourseResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - not the course's instructor"),
        (status = 404, description = "Course not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn unpublish_course(State(state): State<AppState>, Path(id): Path<CourseId>, current_user: CurrentUser) -> Result<Json<CourseResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    load_editable(&mut tx, &current_user, id).await?;

    let course = Courses::new(&mut tx).unpublish(id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(CourseResponse::from(course)))
}

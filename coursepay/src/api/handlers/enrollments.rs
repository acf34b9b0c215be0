use crate::{
    api::models::{
        enrollments::{EnrollmentResponse, ListEnrollmentsQuery, ProgressCreate, ProgressResponse},
        users::CurrentUser,
    },
    auth::permissions::{can_read_all_resources, can_read_own_resource, can_update_own_resource, operation, resource, RequiresPermission},
    db::{handlers::Enrollments, models::enrollments::EnrollmentDBResponse},
    errors::{Error, Result},
    types::{pagination, EnrollmentId, Resource},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgConnection;

fn not_found(id: EnrollmentId) -> Error {
    Error::NotFound {
        resource: "Enrollment".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/enrollments",
    tag = "enrollments",
    summary = "List my enrollments",
    params(ListEnrollmentsQuery),
    responses(
        (status = 200, description = "Enrollments of the current user", body = [EnrollmentResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn list_enrollments(
    State(state): State<AppState>,
    Query(query): Query<ListEnrollmentsQuery>,
    current_user: RequiresPermission<resource::Enrollments, operation::ReadOwn>,
) -> Result<Json<Vec<EnrollmentResponse>>> {
    let (skip, limit) = pagination(query.skip, query.limit);

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let enrollments = Enrollments::new(&mut pool_conn).list_for_user(current_user.id, skip, limit).await?;

    Ok(Json(enrollments.into_iter().map(EnrollmentResponse::from).collect()))
}

/// Load an enrollment visible to the caller; others' enrollments look missing
async fn load_readable(conn: &mut PgConnection, current_user: &CurrentUser, id: EnrollmentId) -> Result<EnrollmentDBResponse> {
    let enrollment = Enrollments::new(conn).get_by_id(id).await?.ok_or_else(|| not_found(id))?;
    if can_read_own_resource(current_user, Resource::Enrollments, enrollment.user_id)
        || can_read_all_resources(current_user, Resource::Enrollments)
    {
        Ok(enrollment)
    } else {
        Err(not_found(id))
    }
}

#[utoipa::path(
    get,
    path = "/enrollments/{id}",
    tag = "enrollments",
    summary = "Get enrollment with progress",
    params(
        ("id" = String, Path, description = "Enrollment ID"),
    ),
    responses(
        (status = 200, description = "Enrollment and completed content", body = EnrollmentResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Enrollment not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn get_enrollment(
    State(state): State<AppState>,
    Path(id): Path<EnrollmentId>,
    current_user: CurrentUser,
) -> Result<Json<EnrollmentResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let enrollment = load_readable(&mut pool_conn, &current_user, id).await?;
    let progress = Enrollments::new(&mut pool_conn).list_progress(enrollment.id).await?;

    Ok(Json(
        EnrollmentResponse::from(enrollment).with_progress(progress.into_iter().map(ProgressResponse::from).collect()),
    ))
}

#[utoipa::path(
    post,
    path = "/enrollments/{id}/progress",
    tag = "enrollments",
    summary = "Mark content as completed",
    description = "Completing the same content twice keeps the first completion time",
    params(
        ("id" = String, Path, description = "Enrollment ID"),
    ),
    request_body = ProgressCreate,
    responses(
        (status = 201, description = "Progress recorded", body = ProgressResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Enrollment not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn record_progress(
    State(state): State<AppState>,
    Path(id): Path<EnrollmentId>,
    current_user: CurrentUser,
    Json(data): Json<ProgressCreate>,
) -> Result<(StatusCode, Json<ProgressResponse>)> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Enrollments::new(&mut pool_conn);

    let enrollment = repo.get_by_id(id).await?.ok_or_else(|| not_found(id))?;
    // Progress belongs to the learner; admins can read it but not write it
    if !can_update_own_resource(&current_user, Resource::Enrollments, enrollment.user_id) {
        return Err(not_found(id));
    }

    let progress = repo.record_progress(enrollment.id, data.content_id).await?;
    Ok((StatusCode::CREATED, Json(ProgressResponse::from(progress))))
}

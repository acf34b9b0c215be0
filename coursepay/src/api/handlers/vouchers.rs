use crate::{
    api::models::{
        users::CurrentUser,
        vouchers::{ListVouchersQuery, VoucherCreate, VoucherResponse},
    },
    auth::permissions::{can_delete_all_resources, can_delete_own_resource, can_read_all_resources, operation, resource, RequiresPermission},
    db::{
        handlers::{vouchers::normalize_code, Vouchers},
        models::vouchers::{VoucherCreateDBRequest, VoucherFilter, VoucherKind},
    },
    errors::{Error, Result},
    types::{pagination, Operation, Permission, Resource, VoucherId},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;

fn validate(data: &VoucherCreate) -> Result<String> {
    let code = normalize_code(&data.code);
    if code.is_empty() || code.len() > 32 || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(Error::BadRequest {
            message: "code must be 1-32 letters, digits, '-' or '_'".to_string(),
        });
    }
    if !(1..=100).contains(&data.discount_percent) {
        return Err(Error::BadRequest {
            message: "discount_percent must be between 1 and 100".to_string(),
        });
    }
    if data.expires_at <= Utc::now() {
        return Err(Error::BadRequest {
            message: "expires_at must be in the future".to_string(),
        });
    }
    Ok(code)
}

#[utoipa::path(
    post,
    path = "/vouchers",
    tag = "vouchers",
    summary = "Create voucher",
    description = "Admins create platform vouchers that apply to every course. Instructors create vouchers for their own courses.",
    request_body = VoucherCreate,
    responses(
        (status = 201, description = "Voucher created", body = VoucherResponse),
        (status = 400, description = "Invalid code, percentage or expiry"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors and admins only"),
        (status = 409, description = "Code already in use"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn create_voucher(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Vouchers, operation::CreateOwn>,
    Json(data): Json<VoucherCreate>,
) -> Result<(StatusCode, Json<VoucherResponse>)> {
    let code = validate(&data)?;
    let (kind, instructor_id) = if current_user.is_admin() {
        (VoucherKind::Platform, None)
    } else {
        (VoucherKind::Instructor, Some(current_user.id))
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let voucher = Vouchers::new(&mut pool_conn)
        .create(&VoucherCreateDBRequest {
            code,
            kind,
            instructor_id,
            discount_percent: data.discount_percent,
            expires_at: data.expires_at,
            created_by: current_user.id,
        })
        .await
        .map_err(|e| match e {
            e if e.is_unique_violation_on("vouchers_code_key") => Error::Conflict {
                message: "Voucher code is already in use".to_string(),
            },
            e => Error::Database(e),
        })?;

    Ok((StatusCode::CREATED, Json(VoucherResponse::from(voucher))))
}

#[utoipa::path(
    get,
    path = "/vouchers",
    tag = "vouchers",
    summary = "List vouchers",
    description = "Admins see every voucher, instructors see their own",
    params(ListVouchersQuery),
    responses(
        (status = 200, description = "List of vouchers", body = [VoucherResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors and admins only"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn list_vouchers(
    State(state): State<AppState>,
    Query(query): Query<ListVouchersQuery>,
    current_user: RequiresPermission<resource::Vouchers, operation::ReadOwn>,
) -> Result<Json<Vec<VoucherResponse>>> {
    let (skip, limit) = pagination(query.skip, query.limit);
    let instructor_id = (!can_read_all_resources(&current_user, Resource::Vouchers)).then_some(current_user.id);

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let vouchers = Vouchers::new(&mut pool_conn)
        .list(&VoucherFilter {
            instructor_id,
            skip,
            limit,
        })
        .await?;

    Ok(Json(vouchers.into_iter().map(VoucherResponse::from).collect()))
}

#[utoipa::path(
    delete,
    path = "/vouchers/{id}",
    tag = "vouchers",
    summary = "Delete voucher",
    description = "Purchases that used the voucher keep their discount snapshot",
    params(
        ("id" = String, Path, description = "Voucher ID"),
    ),
    responses(
        (status = 204, description = "Voucher deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - not the voucher's owner"),
        (status = 404, description = "Voucher not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn delete_voucher(State(state): State<AppState>, Path(id): Path<VoucherId>, current_user: CurrentUser) -> Result<StatusCode> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Vouchers::new(&mut tx);

    let voucher = repo.get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Voucher".to_string(),
        id: id.to_string(),
    })?;

    let owns = voucher
        .instructor_id
        .is_some_and(|owner| can_delete_own_resource(&current_user, Resource::Vouchers, owner));
    if !owns && !can_delete_all_resources(&current_user, Resource::Vouchers) {
        return Err(Error::InsufficientPermissions {
            required: Permission::Any(vec![
                Permission::Allow(Resource::Vouchers, Operation::DeleteAll),
                Permission::Allow(Resource::Vouchers, Operation::DeleteOwn),
            ]),
            action: Operation::DeleteOwn,
            resource: format!("voucher {id}"),
        });
    }

    repo.delete(id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::models::users::Role, test_utils::*};
    use chrono::Duration;
    use serde_json::json;
    use sqlx::PgPool;

    fn body(code: &str, percent: i32) -> serde_json::Value {
        json!({
            "code": code,
            "discount_percent": percent,
            "expires_at": Utc::now() + Duration::days(7),
        })
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_voucher_kind_follows_role(pool: PgPool) {
        let (app, _, _) = create_test_app(pool.clone()).await;
        let admin = create_test_user(&pool, Role::Admin).await;
        let instructor = create_test_user(&pool, Role::Instructor).await;

        let (name, value) = add_auth_headers(&admin);
        let response = app.post("/api/v1/vouchers").add_header(name, value).json(&body("launch", 10)).await;
        response.assert_status(StatusCode::CREATED);
        let platform: VoucherResponse = response.json();
        assert_eq!(platform.kind, VoucherKind::Platform);
        assert_eq!(platform.code, "LAUNCH");
        assert_eq!(platform.instructor_id, None);

        let (name, value) = add_auth_headers(&instructor);
        let response = app.post("/api/v1/vouchers").add_header(name, value).json(&body("MYCOURSE", 25)).await;
        response.assert_status(StatusCode::CREATED);
        let own: VoucherResponse = response.json();
        assert_eq!(own.kind, VoucherKind::Instructor);
        assert_eq!(own.instructor_id, Some(instructor.id));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_invalid_and_duplicate_vouchers(pool: PgPool) {
        let (app, _, _) = create_test_app(pool.clone()).await;
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let (name, value) = add_auth_headers(&instructor);

        for bad in [body("ZERO", 0), body("TOO-MUCH", 101), body("has space", 10)] {
            let response = app
                .post("/api/v1/vouchers")
                .add_header(name.clone(), value.clone())
                .json(&bad)
                .await;
            response.assert_status(StatusCode::BAD_REQUEST);
        }

        app.post("/api/v1/vouchers")
            .add_header(name.clone(), value.clone())
            .json(&body("DUP", 10))
            .await
            .assert_status(StatusCode::CREATED);
        let response = app.post("/api/v1/vouchers").add_header(name, value).json(&body("dup", 10)).await;
        response.assert_status(StatusCode::CONFLICT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_students_cannot_manage_vouchers(pool: PgPool) {
        let (app, _, _) = create_test_app(pool.clone()).await;
        let student = create_test_user(&pool, Role::User).await;
        let (name, value) = add_auth_headers(&student);

        app.post("/api/v1/vouchers")
            .add_header(name.clone(), value.clone())
            .json(&body("FREE", 100))
            .await
            .assert_status(StatusCode::FORBIDDEN);
        app.get("/api/v1/vouchers")
            .add_header(name, value)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_instructors_list_and_delete_only_their_own(pool: PgPool) {
        let (app, _, _) = create_test_app(pool.clone()).await;
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let other = create_test_user(&pool, Role::Instructor).await;
        let mine = create_test_voucher(&pool, "MINE", VoucherKind::Instructor, Some(instructor.id), 10).await;
        let theirs = create_test_voucher(&pool, "THEIRS", VoucherKind::Instructor, Some(other.id), 10).await;
        create_test_voucher(&pool, "PLATFORM", VoucherKind::Platform, None, 10).await;

        let (name, value) = add_auth_headers(&instructor);
        let response = app.get("/api/v1/vouchers").add_header(name.clone(), value.clone()).await;
        response.assert_status_ok();
        let listed: Vec<VoucherResponse> = response.json();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, mine.id);

        app.delete(&format!("/api/v1/vouchers/{}", theirs.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::FORBIDDEN);
        app.delete(&format!("/api/v1/vouchers/{}", mine.id))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }
}

use crate::{
    api::models::users::{CurrentUser, ListUsersQuery, UserCreate, UserResponse, UserUpdate},
    auth::permissions::{can_read_all_resources, can_read_own_resource, operation, resource, RequiresPermission},
    db::{
        errors::DbError,
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserFilter, UserUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{pagination, Operation, Permission, Resource, SortOrder, UserId, UserIdOrCurrent},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

// GET /users - List users (admin only)
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    summary = "List users",
    description = "List users, filterable by role and searchable by email or name (admin only)",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "List of users", body = [UserResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
    _: RequiresPermission<resource::Users, operation::ReadAll>,
) -> Result<Json<Vec<UserResponse>>> {
    let (skip, limit) = pagination(query.skip, query.limit);
    let filter = UserFilter {
        role: query.role,
        search: query.search,
        newest_first: query.order.unwrap_or_default() == SortOrder::Desc,
        skip,
        limit,
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let users = Users::new(&mut pool_conn).list(&filter).await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

// POST /users - Create user (admin only)
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    summary = "Create user",
    request_body = UserCreate,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid email or name"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 409, description = "A user with this email already exists"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Users, operation::CreateAll>,
    Json(data): Json<UserCreate>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    if !data.email.contains('@') {
        return Err(Error::BadRequest {
            message: "A valid email is required".to_string(),
        });
    }
    if data.full_name.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "full_name must not be empty".to_string(),
        });
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut pool_conn)
        .create(&UserCreateDBRequest {
            email: data.email,
            full_name: data.full_name.trim().to_string(),
            role: data.role,
        })
        .await
        .map_err(|e| match e {
            DbError::UniqueViolation { .. } => Error::Conflict {
                message: "A user with this email already exists".to_string(),
            },
            e => Error::Database(e),
        })?;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

// GET /users/{user_id} - Get specific user (admin only) or current user
#[utoipa::path(
    get,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Get user",
    description = "Get a specific user by ID or current user",
    params(
        ("user_id" = String, Path, description = "User ID (UUID) or 'current' for current user"),
    ),
    responses(
        (status = 200, description = "User information", body = UserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - can only view own user data unless admin"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserIdOrCurrent>,
    // Can't use RequiresPermission here because we need conditional logic for own vs other users
    current_user: CurrentUser,
) -> Result<Json<UserResponse>> {
    let target_user_id = match user_id {
        UserIdOrCurrent::Current(_) => current_user.id,
        UserIdOrCurrent::Id(uuid) => {
            let can_read_all_users = can_read_all_resources(&current_user, Resource::Users);
            let can_read_own_user = can_read_own_resource(&current_user, Resource::Users, uuid);

            if !can_read_all_users && !can_read_own_user {
                return Err(Error::InsufficientPermissions {
                    required: Permission::Any(vec![
                        Permission::Allow(Resource::Users, Operation::ReadAll),
                        Permission::Allow(Resource::Users, Operation::ReadOwn),
                    ]),
                    action: Operation::ReadAll,
                    resource: format!("user data for user {uuid}"),
                });
            }
            uuid
        }
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut pool_conn)
        .get_by_id(target_user_id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "User".to_string(),
            id: target_user_id.to_string(),
        })?;

    Ok(Json(UserResponse::from(user)))
}

// PATCH /users/{user_id} - Update user (admin only)
#[utoipa::path(
    patch,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Update user",
    description = "Change a user's name or role (admin only)",
    params(
        ("user_id" = String, Path, description = "User ID (UUID)"),
    ),
    request_body = UserUpdate,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "User not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: RequiresPermission<resource::Users, operation::UpdateAll>,
    Json(data): Json<UserUpdate>,
) -> Result<Json<UserResponse>> {
    if user_id == current_user.id && data.role.is_some_and(|role| role != current_user.role) {
        return Err(Error::BadRequest {
            message: "Admins cannot change their own role".to_string(),
        });
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut pool_conn)
        .update(
            user_id,
            &UserUpdateDBRequest {
                full_name: data.full_name.map(|name| name.trim().to_string()).filter(|name| !name.is_empty()),
                role: data.role,
            },
        )
        .await
        .map_err(|e| match e {
            DbError::NotFound => Error::NotFound {
                resource: "User".to_string(),
                id: user_id.to_string(),
            },
            e => Error::Database(e),
        })?;

    Ok(Json(UserResponse::from(user)))
}

// DELETE /users/{user_id} - Delete user (admin only)
#[utoipa::path(
    delete,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Delete user",
    description = "Delete a user without purchase or wallet history (admin only)",
    params(
        ("user_id" = String, Path, description = "User ID (UUID)"),
    ),
    responses(
        (status = 204, description = "User deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - admin access required"),
        (status = 404, description = "User not found"),
        (status = 409, description = "User still owns courses, purchases or a wallet"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: RequiresPermission<resource::Users, operation::DeleteAll>,
) -> Result<StatusCode> {
    if user_id == current_user.id {
        return Err(Error::BadRequest {
            message: "Admins cannot delete themselves".to_string(),
        });
    }

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let deleted = Users::new(&mut pool_conn).delete(user_id).await.map_err(|e| match e {
        DbError::ForeignKeyViolation { .. } => Error::Conflict {
            message: "User still owns courses, purchases or a wallet".to_string(),
        },
        e => Error::Database(e),
    })?;

    if !deleted {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: user_id.to_string(),
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

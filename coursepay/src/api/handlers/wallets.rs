use crate::{
    api::models::{
        users::CurrentUser,
        wallets::{
            ListLedgerQuery, MessageResponse, OtpVerify, OtpVerifyResponse, WalletAuditResponse, WalletCreate, WalletResponse,
            WalletTransactionResponse,
        },
    },
    auth::permissions::{operation, resource, RequiresPermission},
    crypto::generate_otp,
    db::{
        handlers::{Ledger, Tokens, Wallets},
        models::{
            ledger::LedgerFilter,
            tokens::{TokenCreateDBRequest, TokenKind},
            wallets::{WalletCreateDBRequest, WalletDBResponse},
        },
    },
    email::wallet_otp_email,
    errors::{Error, Result},
    types::{pagination, WalletId},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgConnection;
use tracing::{info, instrument};

/// The caller's wallet, or `NotFound` when they have not created one yet
pub(crate) async fn own_wallet(conn: &mut PgConnection, current_user: &CurrentUser) -> Result<WalletDBResponse> {
    Wallets::new(conn)
        .get_by_instructor(current_user.id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Wallet".to_string(),
            id: current_user.id.to_string(),
        })
}

fn require_non_empty(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::BadRequest {
            message: format!("{field} must not be empty"),
        });
    }
    Ok(value.to_string())
}

#[utoipa::path(
    post,
    path = "/wallet",
    tag = "wallet",
    summary = "Create wallet",
    description = "Each instructor has at most one wallet. It starts with a zero balance.",
    request_body = WalletCreate,
    responses(
        (status = 201, description = "Wallet created", body = WalletResponse),
        (status = 400, description = "Missing holder details"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
        (status = 409, description = "Wallet already exists"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
#[instrument(skip_all, fields(instructor_id = %current_user.id))]
pub async fn create_wallet(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Wallets, operation::CreateOwn>,
    Json(data): Json<WalletCreate>,
) -> Result<(StatusCode, Json<WalletResponse>)> {
    let request = WalletCreateDBRequest {
        instructor_id: current_user.id,
        full_name: require_non_empty("full_name", &data.full_name)?,
        phone: require_non_empty("phone", &data.phone)?,
        address: require_non_empty("address", &data.address)?,
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let wallet = Wallets::new(&mut pool_conn).create(&request).await.map_err(|e| match e {
        e if e.is_unique_violation_on("wallets_instructor_id_key") => Error::Conflict {
            message: "Wallet already exists".to_string(),
        },
        e => Error::Database(e),
    })?;

    info!("Created wallet {} for instructor {}", wallet.id, current_user.id);
    Ok((StatusCode::CREATED, Json(WalletResponse::from(wallet))))
}

#[utoipa::path(
    get,
    path = "/wallet",
    tag = "wallet",
    summary = "Get my wallet",
    responses(
        (status = 200, description = "The caller's wallet", body = WalletResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
        (status = 404, description = "No wallet yet"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn get_wallet(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Wallets, operation::ReadOwn>,
) -> Result<Json<WalletResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let wallet = own_wallet(&mut pool_conn, &current_user).await?;
    Ok(Json(WalletResponse::from(wallet)))
}

#[utoipa::path(
    post,
    path = "/wallet/otp",
    tag = "wallet",
    summary = "Send withdrawal OTP",
    description = "Emails a 6-digit code that authorizes one withdrawal. Requesting a new code invalidates the previous one.",
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
        (status = 404, description = "No wallet yet"),
        (status = 502, description = "Email could not be sent"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
#[instrument(skip_all, fields(instructor_id = %current_user.id))]
pub async fn issue_otp(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Withdrawals, operation::CreateOwn>,
) -> Result<Json<MessageResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let wallet = own_wallet(&mut tx, &current_user).await?;

    let code = generate_otp();
    let token = Tokens::new(&mut tx)
        .issue(&TokenCreateDBRequest {
            kind: TokenKind::WalletOtp,
            subject_id: wallet.id,
            secret: code.clone(),
        })
        .await?;

    let ttl_minutes = TokenKind::WalletOtp.ttl().num_minutes();
    let email = wallet_otp_email(&current_user.full_name, &code, ttl_minutes);
    // The token is only committed once the code has actually left; email.send_timeout bounds the wait
    state.mailer.send(&current_user.email, &email.subject, &email.html).await?;

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!("Issued wallet OTP for wallet {}, expires at {}", wallet.id, token.expires_at);

    Ok(Json(MessageResponse {
        message: "OTP sent to your email".to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/wallet/otp/verify",
    tag = "wallet",
    summary = "Check a withdrawal OTP",
    description = "Reports whether the code is valid without using it up",
    request_body = OtpVerify,
    responses(
        (status = 200, description = "Verification result", body = OtpVerifyResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
        (status = 404, description = "No wallet yet"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Withdrawals, operation::CreateOwn>,
    Json(data): Json<OtpVerify>,
) -> Result<Json<OtpVerifyResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let wallet = own_wallet(&mut pool_conn, &current_user).await?;
    let valid = Tokens::new(&mut pool_conn)
        .verify(TokenKind::WalletOtp, wallet.id, data.otp.trim())
        .await?;
    Ok(Json(OtpVerifyResponse { valid }))
}

#[utoipa::path(
    get,
    path = "/wallet/transactions",
    tag = "wallet",
    summary = "List my ledger",
    description = "Income and withdrawal entries of the caller's wallet, newest first",
    params(ListLedgerQuery),
    responses(
        (status = 200, description = "Ledger entries", body = [WalletTransactionResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
        (status = 404, description = "No wallet yet"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn list_wallet_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListLedgerQuery>,
    current_user: RequiresPermission<resource::Wallets, operation::ReadOwn>,
) -> Result<Json<Vec<WalletTransactionResponse>>> {
    let (skip, limit) = pagination(query.skip, query.limit);

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let wallet = own_wallet(&mut pool_conn, &current_user).await?;
    let entries = Ledger::new(&mut pool_conn)
        .list(&LedgerFilter {
            wallet_id: Some(wallet.id),
            kind: query.kind,
            status: query.status,
            newest_first: true,
            skip,
            limit,
        })
        .await?;

    Ok(Json(entries.into_iter().map(WalletTransactionResponse::from).collect()))
}

#[utoipa::path(
    get,
    path = "/mods/wallets/{id}",
    tag = "moderation",
    summary = "Get any wallet",
    params(
        ("id" = String, Path, description = "Wallet ID"),
    ),
    responses(
        (status = 200, description = "Wallet", body = WalletResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - admins only"),
        (status = 404, description = "Wallet not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn get_wallet_by_id(
    State(state): State<AppState>,
    Path(id): Path<WalletId>,
    _: RequiresPermission<resource::Wallets, operation::ReadAll>,
) -> Result<Json<WalletResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let wallet = Wallets::new(&mut pool_conn).get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Wallet".to_string(),
        id: id.to_string(),
    })?;
    Ok(Json(WalletResponse::from(wallet)))
}

#[utoipa::path(
    get,
    path = "/mods/wallets/{id}/audit",
    tag = "moderation",
    summary = "Audit a wallet",
    description = "Compares the stored balance with the balance recomputed from the ledger",
    params(
        ("id" = String, Path, description = "Wallet ID"),
    ),
    responses(
        (status = 200, description = "Audit result", body = WalletAuditResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - admins only"),
        (status = 404, description = "Wallet not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn audit_wallet(
    State(state): State<AppState>,
    Path(id): Path<WalletId>,
    _: RequiresPermission<resource::Wallets, operation::ReadAll>,
) -> Result<Json<WalletAuditResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let audit = Ledger::new(&mut pool_conn).audit(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Wallet".to_string(),
        id: id.to_string(),
    })?;
    Ok(Json(WalletAuditResponse::new(id, audit)))
}

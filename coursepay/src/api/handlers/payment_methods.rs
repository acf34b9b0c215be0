use crate::{
    api::{
        handlers::wallets::own_wallet,
        models::payment_methods::{PaymentMethodCreate, PaymentMethodResponse, PaymentMethodUpdate},
    },
    auth::permissions::{operation, resource, RequiresPermission},
    db::{
        handlers::{PaymentMethods, Repository},
        models::{
            payment_methods::{PaymentMethodCreateDBRequest, PaymentMethodDBResponse, PaymentMethodFilter, PaymentMethodUpdateDBRequest},
            wallets::WalletDBResponse,
        },
    },
    errors::{Error, Result},
    types::PaymentMethodId,
    AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgConnection;

/// An active payment method attached to `wallet`
async fn load_owned(conn: &mut PgConnection, wallet: &WalletDBResponse, id: PaymentMethodId) -> Result<PaymentMethodDBResponse> {
    match PaymentMethods::new(conn).get_by_id(id).await? {
        Some(method) if method.wallet_id == wallet.id && method.is_active() => Ok(method),
        _ => Err(Error::NotFound {
            resource: "Payment method".to_string(),
            id: id.to_string(),
        }),
    }
}

#[utoipa::path(
    get,
    path = "/wallet/payment-methods",
    tag = "wallet",
    summary = "List payout accounts",
    responses(
        (status = 200, description = "Active payment methods of the caller's wallet", body = [PaymentMethodResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
        (status = 404, description = "No wallet yet"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn list_payment_methods(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::PaymentMethods, operation::ReadOwn>,
) -> Result<Json<Vec<PaymentMethodResponse>>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let wallet = own_wallet(&mut pool_conn, &current_user).await?;
    let methods = PaymentMethods::new(&mut pool_conn)
        .list(&PaymentMethodFilter {
            wallet_id: wallet.id,
            include_deleted: false,
        })
        .await?;
    Ok(Json(methods.into_iter().map(PaymentMethodResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/wallet/payment-methods",
    tag = "wallet",
    summary = "Add payout account",
    request_body = PaymentMethodCreate,
    responses(
        (status = 201, description = "Payment method added", body = PaymentMethodResponse),
        (status = 400, description = "Invalid account details"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
        (status = 404, description = "No wallet yet"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn create_payment_method(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::PaymentMethods, operation::CreateOwn>,
    Json(data): Json<PaymentMethodCreate>,
) -> Result<(StatusCode, Json<PaymentMethodResponse>)> {
    data.validate()?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let wallet = own_wallet(&mut pool_conn, &current_user).await?;
    let method = PaymentMethods::new(&mut pool_conn)
        .create(&PaymentMethodCreateDBRequest {
            wallet_id: wallet.id,
            bank_code: data.bank_code.trim().to_uppercase(),
            account_number: data.account_number.trim().to_string(),
            holder_name: data.holder_name.trim().to_string(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(PaymentMethodResponse::from(method))))
}

#[utoipa::path(
    patch,
    path = "/wallet/payment-methods/{id}",
    tag = "wallet",
    summary = "Update payout account",
    params(
        ("id" = String, Path, description = "Payment method ID"),
    ),
    request_body = PaymentMethodUpdate,
    responses(
        (status = 200, description = "Payment method updated", body = PaymentMethodResponse),
        (status = 400, description = "Invalid account details"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
        (status = 404, description = "Payment method not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn update_payment_method(
    State(state): State<AppState>,
    Path(id): Path<PaymentMethodId>,
    current_user: RequiresPermission<resource::PaymentMethods, operation::UpdateOwn>,
    Json(data): Json<PaymentMethodUpdate>,
) -> Result<Json<PaymentMethodResponse>> {
    data.validate()?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let wallet = own_wallet(&mut tx, &current_user).await?;
    load_owned(&mut tx, &wallet, id).await?;

    let method = PaymentMethods::new(&mut tx)
        .update(
            id,
            &PaymentMethodUpdateDBRequest {
                bank_code: data.bank_code.map(|code| code.trim().to_uppercase()),
                account_number: data.account_number.map(|number| number.trim().to_string()),
                holder_name: data.holder_name.map(|name| name.trim().to_string()),
            },
        )
        .await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(Json(PaymentMethodResponse::from(method)))
}

#[utoipa::path(
    delete,
    path = "/wallet/payment-methods/{id}",
    tag = "wallet",
    summary = "Remove payout account",
    description = "Pending withdrawals to a removed account can only be settled as failed",
    params(
        ("id" = String, Path, description = "Payment method ID"),
    ),
    responses(
        (status = 204, description = "Payment method removed"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
        (status = 404, description = "Payment method not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn delete_payment_method(
    State(state): State<AppState>,
    Path(id): Path<PaymentMethodId>,
    current_user: RequiresPermission<resource::PaymentMethods, operation::DeleteOwn>,
) -> Result<StatusCode> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let wallet = own_wallet(&mut tx, &current_user).await?;
    load_owned(&mut tx, &wallet, id).await?;

    PaymentMethods::new(&mut tx).delete(id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    Ok(StatusCode::NO_CONTENT)
}

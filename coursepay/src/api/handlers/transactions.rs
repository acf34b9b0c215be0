use crate::{
    api::models::{
        transactions::{ListTransactionsQuery, PaymentCheckResponse, TransactionCreate, TransactionResponse},
        users::CurrentUser,
    },
    auth::permissions::{self, operation, resource, RequiresPermission},
    db::{handlers::Transactions, models::transactions::{TransactionDBResponse, TransactionFilter}},
    errors::{Error, Result},
    payments::{
        checkout::{create_purchase, Purchase},
        reconcile::check_and_reconcile,
    },
    types::{pagination, Operation, Resource, TransactionId},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sqlx::PgPool;

/// Load a transaction the caller may see. Other users' transactions are reported as missing.
async fn load_visible(db: &PgPool, current_user: &CurrentUser, id: TransactionId) -> Result<TransactionDBResponse> {
    let mut pool_conn = db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let has_read_all = permissions::has_permission(current_user, Resource::Transactions, Operation::ReadAll);

    match Transactions::new(&mut pool_conn).get_by_id(id).await? {
        Some(tx) if has_read_all || tx.user_id == current_user.id => Ok(tx),
        // Return 404 to avoid leaking existence
        _ => Err(Error::NotFound {
            resource: "Transaction".to_string(),
            id: id.to_string(),
        }),
    }
}

/// Buy a course
#[utoipa::path(
    post,
    path = "/transactions",
    tag = "transactions",
    summary = "Purchase a course",
    description = "Create a transaction and an invoice for a published course. If the caller already has an unpaid, unexpired transaction for the course it is returned instead.",
    request_body = TransactionCreate,
    responses(
        (status = 201, description = "Transaction created", body = TransactionResponse),
        (status = 200, description = "Existing outstanding transaction", body = TransactionResponse),
        (status = 400, description = "Voucher expired or not applicable"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - students only"),
        (status = 404, description = "Course or voucher not found"),
        (status = 409, description = "Already enrolled, or voucher already used"),
        (status = 502, description = "Payment gateway unavailable"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn create_transaction(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Transactions, operation::CreateOwn>,
    Json(data): Json<TransactionCreate>,
) -> Result<(StatusCode, Json<TransactionResponse>)> {
    let purchase = create_purchase(
        &state.db,
        state.gateway.as_ref(),
        &state.config.payments,
        &current_user,
        data.course_id,
        data.voucher_code.as_deref(),
    )
    .await?;

    let (status, transaction) = match purchase {
        Purchase::Created(tx) => (StatusCode::CREATED, tx),
        Purchase::Existing(tx) => (StatusCode::OK, tx),
    };
    Ok((status, Json(TransactionResponse::from(transaction))))
}

/// Get a specific transaction by ID
#[utoipa::path(
    get,
    path = "/transactions/{transaction_id}",
    tag = "transactions",
    summary = "Get a specific transaction",
    description = "Users can only access their own transactions",
    params(
        ("transaction_id" = String, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Transaction details", body = TransactionResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Transaction not found"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
    current_user: CurrentUser,
) -> Result<Json<TransactionResponse>> {
    let transaction = load_visible(&state.db, &current_user, transaction_id).await?;
    Ok(Json(TransactionResponse::from(transaction)))
}

/// List transactions
#[utoipa::path(
    get,
    path = "/transactions",
    tag = "transactions",
    summary = "List transactions",
    description = "Admins see every transaction, other users see their own",
    params(ListTransactionsQuery),
    responses(
        (status = 200, description = "List of transactions", body = [TransactionResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListTransactionsQuery>,
    current_user: CurrentUser,
) -> Result<Json<Vec<TransactionResponse>>> {
    let (skip, limit) = pagination(query.skip, query.limit);
    let has_read_all = permissions::has_permission(&current_user, Resource::Transactions, Operation::ReadAll);

    let filter = TransactionFilter {
        user_id: (!has_read_all).then_some(current_user.id),
        paid: query.paid,
        skip,
        limit,
    };

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transactions = Transactions::new(&mut pool_conn).list(&filter).await?;

    Ok(Json(transactions.into_iter().map(TransactionResponse::from).collect()))
}

/// Check payment
#[utoipa::path(
    get,
    path = "/transactions/{transaction_id}/check",
    tag = "transactions",
    summary = "Check payment status",
    description = "Ask the payment gateway whether the invoice was paid. The first check that sees a payment enrolls the buyer and credits the instructor; later checks report `already_paid`.",
    params(
        ("transaction_id" = String, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Reconciliation outcome", body = PaymentCheckResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Transaction not found"),
        (status = 502, description = "Payment gateway unavailable"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn check_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<TransactionId>,
    current_user: CurrentUser,
) -> Result<Json<PaymentCheckResponse>> {
    let transaction = load_visible(&state.db, &current_user, transaction_id).await?;
    let reconciliation = check_and_reconcile(&state.db, state.gateway.as_ref(), transaction).await?;
    Ok(Json(PaymentCheckResponse::from(reconciliation)))
}

use crate::{
    api::models::{
        wallets::WalletTransactionResponse,
        withdrawals::{ListWithdrawalsQuery, SettlementResponse, WithdrawalCreate, WithdrawalCreatedResponse, WithdrawalSettle},
    },
    auth::permissions::{operation, resource, RequiresPermission},
    db::{
        handlers::{Ledger, PaymentMethods, Repository, Tokens, Users, Wallets},
        models::{
            ledger::{LedgerEntryKind, LedgerEntryStatus, LedgerFilter, SettlementDBResponse, SettlementOutcome, WithdrawalCreateDBRequest},
            tokens::TokenKind,
        },
    },
    email::withdrawal_settled_email,
    errors::{Error, Result},
    types::{pagination, SortOrder, WalletTransactionId},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::{info, instrument, warn};

#[utoipa::path(
    post,
    path = "/withdrawals",
    tag = "withdrawals",
    summary = "Request a withdrawal",
    description = "Reserves the amount from the wallet balance and records a pending withdrawal. Requires a code from `POST /wallet/otp`, which is used up on success.",
    request_body = WithdrawalCreate,
    responses(
        (status = 201, description = "Withdrawal requested", body = WithdrawalCreatedResponse),
        (status = 400, description = "Invalid amount, invalid OTP or insufficient balance"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - instructors only"),
        (status = 404, description = "Wallet or payment method not found"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
#[instrument(skip_all, fields(instructor_id = %current_user.id, wallet_id = %data.wallet_id))]
pub async fn create_withdrawal(
    State(state): State<AppState>,
    current_user: RequiresPermission<resource::Withdrawals, operation::CreateOwn>,
    Json(data): Json<WithdrawalCreate>,
) -> Result<(StatusCode, Json<WithdrawalCreatedResponse>)> {
    let amount = data.positive_amount()?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let wallet = Wallets::new(&mut tx)
        .get_by_id(data.wallet_id)
        .await?
        .filter(|wallet| wallet.instructor_id == current_user.id)
        .ok_or_else(|| Error::NotFound {
            resource: "Wallet".to_string(),
            id: data.wallet_id.to_string(),
        })?;

    PaymentMethods::new(&mut tx)
        .get_by_id(data.payment_method_id)
        .await?
        .filter(|method| method.wallet_id == wallet.id && method.is_active())
        .ok_or_else(|| Error::NotFound {
            resource: "Payment method".to_string(),
            id: data.payment_method_id.to_string(),
        })?;

    if !Tokens::new(&mut tx).consume(TokenKind::WalletOtp, wallet.id, data.otp.trim()).await? {
        // Keep the failed-attempt count; nothing else was written
        tx.commit().await.map_err(|e| Error::Database(e.into()))?;
        return Err(Error::InvalidOtp);
    }

    let withdrawal = Ledger::new(&mut tx)
        .request_withdrawal(&WithdrawalCreateDBRequest {
            wallet_id: wallet.id,
            payment_method_id: data.payment_method_id,
            amount,
        })
        .await?
        .ok_or(Error::InsufficientFunds { requested: amount })?;

    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!("Withdrawal {} of {} requested from wallet {}", withdrawal.id, amount, wallet.id);

    Ok((
        StatusCode::CREATED,
        Json(WithdrawalCreatedResponse {
            message: "Withdrawal request submitted".to_string(),
            withdrawal: withdrawal.into(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/mods/withdrawals",
    tag = "moderation",
    summary = "List withdrawals",
    description = "Withdrawals across every wallet, newest first unless `order=asc`",
    params(ListWithdrawalsQuery),
    responses(
        (status = 200, description = "Withdrawal entries", body = [WalletTransactionResponse]),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - admins only"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
pub async fn list_withdrawals(
    State(state): State<AppState>,
    Query(query): Query<ListWithdrawalsQuery>,
    _: RequiresPermission<resource::Withdrawals, operation::ReadAll>,
) -> Result<Json<Vec<WalletTransactionResponse>>> {
    let (skip, limit) = pagination(query.skip, query.limit);

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let entries = Ledger::new(&mut pool_conn)
        .list(&LedgerFilter {
            wallet_id: None,
            kind: Some(LedgerEntryKind::Outcome),
            status: query.status,
            newest_first: query.order.unwrap_or_default() == SortOrder::Desc,
            skip,
            limit,
        })
        .await?;

    Ok(Json(entries.into_iter().map(WalletTransactionResponse::from).collect()))
}

#[utoipa::path(
    put,
    path = "/mods/withdrawals/{id}",
    tag = "moderation",
    summary = "Settle a withdrawal",
    description = "Marks a pending withdrawal as paid out or failed. A failed withdrawal is refunded to the wallet. The instructor is emailed either way.",
    params(
        ("id" = String, Path, description = "Withdrawal (ledger entry) ID"),
    ),
    request_body = WithdrawalSettle,
    responses(
        (status = 200, description = "Withdrawal settled", body = SettlementResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - admins only"),
        (status = 404, description = "Withdrawal not found"),
        (status = 409, description = "Already settled, or payout account removed"),
    ),
    security(
        ("BearerAuth" = [])
    )
)]
#[instrument(skip_all, fields(withdrawal_id = %id, outcome = ?data.status))]
pub async fn settle_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<WalletTransactionId>,
    _: RequiresPermission<resource::Withdrawals, operation::UpdateAll>,
    Json(data): Json<WithdrawalSettle>,
) -> Result<Json<SettlementResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let entry = Ledger::new(&mut tx)
        .lock_entry(id)
        .await?
        .filter(|entry| entry.kind == LedgerEntryKind::Outcome)
        .ok_or_else(|| Error::NotFound {
            resource: "Withdrawal".to_string(),
            id: id.to_string(),
        })?;
    if entry.status != LedgerEntryStatus::Pending {
        return Err(Error::AlreadyProcessed {
            resource: format!("Withdrawal {id}"),
        });
    }

    if data.status == SettlementOutcome::Success {
        let payable = match entry.payment_method_id {
            Some(method_id) => PaymentMethods::new(&mut tx)
                .get_by_id(method_id)
                .await?
                .is_some_and(|method| method.is_active()),
            None => false,
        };
        if !payable {
            return Err(Error::Conflict {
                message: "The payout account for this withdrawal was removed; settle it as failed instead".to_string(),
            });
        }
    }

    let settlement = Ledger::new(&mut tx).settle_withdrawal(id, data.status).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;
    info!("Withdrawal {} settled as {:?}, balance now {}", id, data.status, settlement.balance_after);

    notify_instructor(&state, &settlement).await;

    Ok(Json(SettlementResponse::from(settlement)))
}

/// Best effort; the settlement is already committed
async fn notify_instructor(state: &AppState, settlement: &SettlementDBResponse) {
    let result: Result<()> = async {
        let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let wallet = Wallets::new(&mut pool_conn)
            .get_by_id(settlement.withdrawal.wallet_id)
            .await?
            .ok_or_else(|| Error::Internal {
                operation: "load wallet for settlement email".to_string(),
            })?;
        let instructor = Users::new(&mut pool_conn)
            .get_by_id(wallet.instructor_id)
            .await?
            .ok_or_else(|| Error::Internal {
                operation: "load instructor for settlement email".to_string(),
            })?;

        let email = withdrawal_settled_email(&instructor.full_name, &settlement.withdrawal, &state.config.payments.currency);
        state.mailer.send(&instructor.email, &email.subject, &email.html).await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        warn!("Failed to notify instructor about withdrawal {}: {}", settlement.withdrawal.id, e);
    }
}

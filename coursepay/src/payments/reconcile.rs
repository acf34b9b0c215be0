//! Payment confirmation: ask the gateway about an invoice and, once paid, materialize the
//! purchase (transaction paid, buyer enrolled, instructor credited) in one database transaction.

use crate::{
    db::{
        errors::DbError,
        handlers::{Courses, Enrollments, Ledger, Transactions, Wallets},
        models::{enrollments::EnrollmentCreateDBRequest, ledger::IncomePostDBRequest, transactions::TransactionDBResponse},
    },
    errors::{Error, Result},
    payments::{gateway::PaymentGateway, pricing::creditable_amount},
    types::{TransactionId, WalletId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Nothing to do, the transaction was paid before this check
    AlreadyPaid,
    /// The gateway does not report a payment yet
    Unchanged,
    /// This check recorded the payment
    Paid,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub outcome: ReconcileOutcome,
    pub transaction: TransactionDBResponse,
}

/// Check a transaction against the gateway and apply a confirmed payment exactly once.
///
/// The gateway is queried outside the database transaction; the row is then locked and
/// re-checked so concurrent checks apply the payment once.
#[instrument(skip(db, gateway, transaction), fields(transaction_id = %transaction.id), err)]
pub async fn check_and_reconcile(db: &PgPool, gateway: &dyn PaymentGateway, transaction: TransactionDBResponse) -> Result<Reconciliation> {
    if transaction.is_paid() {
        return Ok(Reconciliation {
            outcome: ReconcileOutcome::AlreadyPaid,
            transaction,
        });
    }

    let Some(invoice_id) = transaction.invoice_id.as_deref() else {
        return Err(Error::Internal {
            operation: format!("reconcile transaction {} without an invoice", transaction.id),
        });
    };

    let invoice = gateway.get_invoice(invoice_id).await?;
    if !invoice.status.is_paid() {
        debug!("Invoice {} is {:?}", invoice_id, invoice.status);
        return Ok(Reconciliation {
            outcome: ReconcileOutcome::Unchanged,
            transaction,
        });
    }

    let mut tx = db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let mut transactions = Transactions::new(&mut tx);
    let locked = transactions.lock_by_id(transaction.id).await?.ok_or_else(|| Error::NotFound {
        resource: "Transaction".to_string(),
        id: transaction.id.to_string(),
    })?;
    if locked.is_paid() {
        return Ok(Reconciliation {
            outcome: ReconcileOutcome::AlreadyPaid,
            transaction: locked,
        });
    }

    let (paid, wallet_id, amount) = settle_purchase(
        &mut tx,
        locked.id,
        invoice.paid_at.unwrap_or_else(Utc::now),
        invoice.payment_method.as_deref(),
    )
    .await?;

    tx.commit().await.map_err(|e| Error::Database(DbError::from(e)))?;

    info!(
        transaction_id = %paid.id,
        wallet_id = %wallet_id,
        credited = amount,
        "Payment confirmed"
    );
    Ok(Reconciliation {
        outcome: ReconcileOutcome::Paid,
        transaction: paid,
    })
}

/// Mark a locked, unpaid transaction paid, enroll the buyer and credit the instructor.
///
/// Returns the paid transaction, the credited wallet and the credited amount. The caller owns
/// the database transaction.
pub(crate) async fn settle_purchase(
    conn: &mut PgConnection,
    transaction_id: TransactionId,
    paid_at: DateTime<Utc>,
    payment_method: Option<&str>,
) -> Result<(TransactionDBResponse, WalletId, i64)> {
    let paid = Transactions::new(conn).mark_paid(transaction_id, paid_at, payment_method).await?;

    let enrollment = Enrollments::new(conn)
        .create(&EnrollmentCreateDBRequest {
            user_id: paid.user_id,
            course_id: paid.course_id,
            transaction_id: paid.id,
        })
        .await?;
    if enrollment.is_none() {
        debug!("User {} was already enrolled in course {}", paid.user_id, paid.course_id);
    }

    // Unpublished courses are still honored: the buyer has paid
    let course = Courses::new(conn).get_by_id(paid.course_id).await?.ok_or_else(|| Error::Internal {
        operation: format!("load course {} for paid transaction {}", paid.course_id, paid.id),
    })?;
    let wallet = Wallets::new(conn)
        .get_by_instructor(course.instructor_id)
        .await?
        .ok_or_else(|| Error::Internal {
            operation: format!("credit instructor {}: wallet does not exist", course.instructor_id),
        })?;

    let amount = creditable_amount(paid.course_price, paid.discount_amount, paid.voucher_kind);
    if amount > 0 {
        Ledger::new(conn)
            .post_income(&IncomePostDBRequest {
                wallet_id: wallet.id,
                amount,
                transaction_id: paid.id,
                description: format!("Sale of {}", course.title),
            })
            .await
            .map_err(|e| match e {
                e if e.is_unique_violation_on("wallet_transactions_sale_income_key") => Error::AlreadyProcessed {
                    resource: "Transaction".to_string(),
                },
                e => Error::Database(e),
            })?;
    }

    Ok((paid, wallet.id, amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::{CurrentUser, Role},
        config::PaymentsConfig,
        db::models::vouchers::VoucherKind,
        payments::{
            checkout::create_purchase,
            gateway::InvoiceState,
        },
        test_utils::{create_test_course, create_test_user, create_test_voucher, create_test_wallet, MockGateway},
        types::WalletId,
    };

    async fn balance(pool: &PgPool, wallet_id: WalletId) -> i64 {
        sqlx::query_scalar("SELECT balance FROM wallets WHERE id = $1")
            .bind(wallet_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn purchase(pool: &PgPool, gateway: &MockGateway, buyer: &CurrentUser, course_id: uuid::Uuid, voucher: Option<&str>) -> TransactionDBResponse {
        create_purchase(pool, gateway, &PaymentsConfig::default(), buyer, course_id, voucher)
            .await
            .unwrap()
            .into_inner()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_paid_invoice_materializes_purchase_once(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let wallet = create_test_wallet(&pool, instructor.id).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 100_000).await;
        let gateway = MockGateway::default();

        let tx = purchase(&pool, &gateway, &buyer, course.id, None).await;

        let pending = check_and_reconcile(&pool, &gateway, tx.clone()).await.unwrap();
        assert_eq!(pending.outcome, ReconcileOutcome::Unchanged);
        assert_eq!(balance(&pool, wallet.id).await, 0);

        gateway.set_status(tx.invoice_id.as_deref().unwrap(), InvoiceState::Paid, Some("QRIS"));
        let paid = check_and_reconcile(&pool, &gateway, tx.clone()).await.unwrap();
        assert_eq!(paid.outcome, ReconcileOutcome::Paid);
        assert_eq!(paid.transaction.payment_method.as_deref(), Some("QRIS"));
        assert_eq!(balance(&pool, wallet.id).await, 100_000);

        // A stale copy of the unpaid row must not credit twice
        let again = check_and_reconcile(&pool, &gateway, tx).await.unwrap();
        assert_eq!(again.outcome, ReconcileOutcome::AlreadyPaid);
        let again = check_and_reconcile(&pool, &gateway, again.transaction).await.unwrap();
        assert_eq!(again.outcome, ReconcileOutcome::AlreadyPaid);
        assert_eq!(balance(&pool, wallet.id).await, 100_000);

        let enrolled: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments WHERE user_id = $1 AND course_id = $2")
            .bind(buyer.id)
            .bind(course.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enrolled, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_instructor_voucher_reduces_income(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let wallet = create_test_wallet(&pool, instructor.id).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 100_000).await;
        create_test_voucher(&pool, "MINE20", VoucherKind::Instructor, Some(instructor.id), 20).await;
        let gateway = MockGateway::default();

        let tx = purchase(&pool, &gateway, &buyer, course.id, Some("MINE20")).await;
        gateway.set_status(tx.invoice_id.as_deref().unwrap(), InvoiceState::Settled, None);
        check_and_reconcile(&pool, &gateway, tx).await.unwrap();

        assert_eq!(balance(&pool, wallet.id).await, 80_000);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_platform_voucher_keeps_full_income(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let wallet = create_test_wallet(&pool, instructor.id).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 100_000).await;
        create_test_voucher(&pool, "PLATFORM20", VoucherKind::Platform, None, 20).await;
        let gateway = MockGateway::default();

        let tx = purchase(&pool, &gateway, &buyer, course.id, Some("PLATFORM20")).await;
        gateway.set_status(tx.invoice_id.as_deref().unwrap(), InvoiceState::Paid, None);
        check_and_reconcile(&pool, &gateway, tx).await.unwrap();

        assert_eq!(balance(&pool, wallet.id).await, 100_000);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_missing_wallet_rolls_back(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 100_000).await;
        let gateway = MockGateway::default();

        let tx = purchase(&pool, &gateway, &buyer, course.id, None).await;
        sqlx::query("DELETE FROM wallets WHERE instructor_id = $1")
            .bind(instructor.id)
            .execute(&pool)
            .await
            .unwrap();
        gateway.set_status(tx.invoice_id.as_deref().unwrap(), InvoiceState::Paid, None);

        let result = check_and_reconcile(&pool, &gateway, tx.clone()).await;
        assert!(matches!(result, Err(Error::Internal { .. })));

        let paid_at: Option<chrono::DateTime<Utc>> = sqlx::query_scalar("SELECT paid_at FROM transactions WHERE id = $1")
            .bind(tx.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(paid_at.is_none(), "payment must not be recorded without crediting the instructor");
        let enrollments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM enrollments").fetch_one(&pool).await.unwrap();
        assert_eq!(enrollments, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unpublished_course_is_still_materialized(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let wallet = create_test_wallet(&pool, instructor.id).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 40_000).await;
        let gateway = MockGateway::default();

        let tx = purchase(&pool, &gateway, &buyer, course.id, None).await;
        sqlx::query("UPDATE courses SET is_published = FALSE WHERE id = $1")
            .bind(course.id)
            .execute(&pool)
            .await
            .unwrap();
        gateway.set_status(tx.invoice_id.as_deref().unwrap(), InvoiceState::Paid, None);

        let result = check_and_reconcile(&pool, &gateway, tx).await.unwrap();
        assert_eq!(result.outcome, ReconcileOutcome::Paid);
        assert_eq!(balance(&pool, wallet.id).await, 40_000);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_gateway_error_is_upstream(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        create_test_wallet(&pool, instructor.id).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 40_000).await;
        let gateway = MockGateway::default();

        let tx = purchase(&pool, &gateway, &buyer, course.id, None).await;
        gateway.set_failing(true);

        let result = check_and_reconcile(&pool, &gateway, tx).await;
        assert!(matches!(result, Err(Error::Upstream { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_concurrent_checks_credit_once(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let wallet = create_test_wallet(&pool, instructor.id).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 60_000).await;
        let gateway = std::sync::Arc::new(MockGateway::default());

        let tx = purchase(&pool, &gateway, &buyer, course.id, None).await;
        gateway.set_status(tx.invoice_id.as_deref().unwrap(), InvoiceState::Paid, None);

        let mut handles = vec![];
        for _ in 0..8 {
            let pool = pool.clone();
            let gateway = gateway.clone();
            let tx = tx.clone();
            handles.push(tokio::spawn(async move {
                check_and_reconcile(&pool, gateway.as_ref(), tx).await.expect("reconcile failed").outcome
            }));
        }

        let mut paid = 0;
        for handle in handles {
            if handle.await.unwrap() == ReconcileOutcome::Paid {
                paid += 1;
            }
        }
        assert_eq!(paid, 1);
        assert_eq!(balance(&pool, wallet.id).await, 60_000);
    }
}

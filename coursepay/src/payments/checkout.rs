//! Course purchase: price the course, persist the transaction and open a gateway invoice.

use crate::{
    api::models::users::CurrentUser,
    config::PaymentsConfig,
    db::{
        handlers::{Courses, Enrollments, Transactions, Vouchers},
        models::transactions::{TransactionCreateDBRequest, TransactionDBResponse},
    },
    errors::{Error, Result},
    payments::{
        gateway::{invoice_duration_secs, InvoiceRequest, PaymentGateway},
        pricing::{self, AppliedVoucher},
        reconcile::settle_purchase,
    },
    types::CourseId,
};
use chrono::Utc;
use sqlx::PgPool;
use tracing::{info, instrument};

/// Payment method recorded on transactions that cost nothing
pub const FREE_PAYMENT_METHOD: &str = "FREE";

#[derive(Debug)]
pub enum Purchase {
    /// A new transaction with a fresh invoice
    Created(TransactionDBResponse),
    /// The buyer already has a payable transaction for this course
    Existing(TransactionDBResponse),
}

impl Purchase {
    pub fn into_inner(self) -> TransactionDBResponse {
        match self {
            Purchase::Created(tx) | Purchase::Existing(tx) => tx,
        }
    }
}

/// Start (or resume) a purchase.
///
/// Runs in one database transaction holding the (buyer, course) advisory lock, so two
/// concurrent checkouts of the same course by the same buyer produce one invoice. Spending a
/// voucher additionally holds the (voucher, buyer) lock across the usage check and insert.
/// A purchase that costs nothing is settled at once without an invoice. A gateway failure
/// rolls everything back.
#[instrument(skip(db, gateway, config, buyer), fields(buyer_id = %buyer.id), err)]
pub async fn create_purchase(
    db: &PgPool,
    gateway: &dyn PaymentGateway,
    config: &PaymentsConfig,
    buyer: &CurrentUser,
    course_id: CourseId,
    voucher_code: Option<&str>,
) -> Result<Purchase> {
    let mut tx = db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let course = Courses::new(&mut tx)
        .get_by_id(course_id)
        .await?
        .filter(|c| c.is_published)
        .ok_or_else(|| Error::NotFound {
            resource: "Course".to_string(),
            id: course_id.to_string(),
        })?;

    if Enrollments::new(&mut tx).is_enrolled(buyer.id, course.id).await? {
        return Err(Error::Conflict {
            message: "You are already enrolled in this course".to_string(),
        });
    }

    let mut transactions = Transactions::new(&mut tx);
    transactions.lock_purchase(buyer.id, course.id).await?;
    if let Some(existing) = transactions.find_outstanding(buyer.id, course.id).await? {
        tx.commit().await.map_err(|e| Error::Database(e.into()))?;
        return Ok(Purchase::Existing(existing));
    }

    let voucher = match voucher_code.map(str::trim).filter(|c| !c.is_empty()) {
        None => None,
        Some(code) => {
            let mut vouchers = Vouchers::new(&mut tx);
            let voucher = vouchers.get_by_code(code).await?.ok_or_else(|| Error::NotFound {
                resource: "Voucher".to_string(),
                id: code.to_string(),
            })?;
            if voucher.is_expired(Utc::now()) {
                return Err(Error::BadRequest {
                    message: "Voucher has expired".to_string(),
                });
            }
            if !voucher.applies_to(&course) {
                return Err(Error::BadRequest {
                    message: "Voucher does not apply to this course".to_string(),
                });
            }
            vouchers.lock_usage(voucher.id, buyer.id).await?;
            if vouchers.is_used_by(voucher.id, buyer.id).await? {
                return Err(Error::Conflict {
                    message: "Voucher has already been used".to_string(),
                });
            }
            Some(voucher)
        }
    };

    let applied = voucher.as_ref().map(|v| AppliedVoucher {
        kind: v.kind,
        discount_percent: v.discount_percent,
    });
    let quote = pricing::quote(course.effective_price(), applied, config.tax_rate)?;
    let invoice_duration = chrono::Duration::from_std(config.invoice_duration).map_err(|e| Error::Internal {
        operation: format!("compute invoice due date: {e}"),
    })?;

    let created = Transactions::new(&mut tx)
        .create(&TransactionCreateDBRequest {
            user_id: buyer.id,
            course_id: course.id,
            course_price: quote.course_price,
            discount_amount: quote.discount_amount,
            voucher_id: voucher.as_ref().map(|v| v.id),
            voucher_kind: voucher.as_ref().map(|v| v.kind),
            tax_rate: config.tax_rate,
            tax_amount: quote.tax_amount,
            amount: quote.amount,
            due_date: Utc::now() + invoice_duration,
        })
        .await?;

    if quote.amount == 0 {
        let (paid, _, credited) = settle_purchase(&mut tx, created.id, Utc::now(), Some(FREE_PAYMENT_METHOD)).await?;
        tx.commit().await.map_err(|e| Error::Database(e.into()))?;
        info!(transaction_id = %paid.id, credited, "Enrolled without payment in course {}", course.id);
        return Ok(Purchase::Created(paid));
    }

    let invoice = gateway
        .create_invoice(&InvoiceRequest {
            external_id: created.id.to_string(),
            amount: quote.amount,
            currency: config.currency.clone(),
            payer_email: buyer.email.clone(),
            description: course.title.clone(),
            invoice_duration: invoice_duration_secs(config.invoice_duration),
        })
        .await?;

    let transaction = Transactions::new(&mut tx).set_invoice(created.id, &invoice.id, &invoice.invoice_url).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    info!(
        transaction_id = %transaction.id,
        amount = transaction.amount,
        "Opened invoice {} for course {}",
        invoice.id,
        course.id
    );
    Ok(Purchase::Created(transaction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::models::users::Role,
        db::models::vouchers::VoucherKind,
        test_utils::{create_test_course, create_test_user, create_test_voucher, create_test_wallet, MockGateway},
    };
    use rust_decimal::Decimal;
    use std::{sync::Arc, time::Duration};

    fn payments_config() -> PaymentsConfig {
        PaymentsConfig {
            tax_rate: Decimal::new(11, 2),
            ..Default::default()
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_purchase_snapshots_prices(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 100_000).await;
        create_test_voucher(&pool, "TEACH20", VoucherKind::Instructor, Some(instructor.id), 20).await;
        let gateway = MockGateway::default();

        let purchase = create_purchase(&pool, &gateway, &payments_config(), &buyer, course.id, Some("teach20"))
            .await
            .unwrap();
        let Purchase::Created(tx) = purchase else {
            panic!("expected a new transaction");
        };

        assert_eq!(tx.course_price, 100_000);
        assert_eq!(tx.discount_amount, 20_000);
        assert_eq!(tx.tax_amount, 8_800);
        assert_eq!(tx.amount, 88_800);
        assert_eq!(tx.voucher_kind, Some(VoucherKind::Instructor));
        assert_eq!(tx.invoice_id, Some(format!("inv_{}", tx.id)));
        assert_eq!(gateway.invoices_created(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_outstanding_transaction_is_reused(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 50_000).await;
        let gateway = MockGateway::default();
        let config = payments_config();

        let first = create_purchase(&pool, &gateway, &config, &buyer, course.id, None).await.unwrap();
        let second = create_purchase(&pool, &gateway, &config, &buyer, course.id, None).await.unwrap();

        assert!(matches!(second, Purchase::Existing(_)));
        assert_eq!(first.into_inner().id, second.into_inner().id);
        assert_eq!(gateway.invoices_created(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_gateway_failure_rolls_back(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 50_000).await;
        let gateway = MockGateway::default();
        gateway.set_failing(true);

        let result = create_purchase(&pool, &gateway, &payments_config(), &buyer, course.id, None).await;
        assert!(matches!(result, Err(Error::Upstream { .. })));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions").fetch_one(&pool).await.unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_voucher_rules(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let other_instructor = create_test_user(&pool, Role::Instructor).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 50_000).await;
        create_test_voucher(&pool, "OTHER10", VoucherKind::Instructor, Some(other_instructor.id), 10).await;
        let gateway = MockGateway::default();
        let config = payments_config();

        let wrong_course = create_purchase(&pool, &gateway, &config, &buyer, course.id, Some("OTHER10")).await;
        assert!(matches!(wrong_course, Err(Error::BadRequest { .. })));

        let missing = create_purchase(&pool, &gateway, &config, &buyer, course.id, Some("NOPE")).await;
        assert!(matches!(missing, Err(Error::NotFound { .. })));

        sqlx::query("UPDATE vouchers SET expires_at = NOW() - INTERVAL '1 day' WHERE code = 'OTHER10'")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("UPDATE vouchers SET instructor_id = $1 WHERE code = 'OTHER10'")
            .bind(instructor.id)
            .execute(&pool)
            .await
            .unwrap();
        let expired = create_purchase(&pool, &gateway, &config, &buyer, course.id, Some("OTHER10")).await;
        assert!(matches!(expired, Err(Error::BadRequest { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_voucher_is_single_use_per_buyer(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let first_course = create_test_course(&pool, instructor.id, 50_000).await;
        let second_course = create_test_course(&pool, instructor.id, 70_000).await;
        create_test_voucher(&pool, "ONCE", VoucherKind::Platform, None, 50).await;
        let gateway = MockGateway::default();
        let config = payments_config();

        create_purchase(&pool, &gateway, &config, &buyer, first_course.id, Some("ONCE"))
            .await
            .unwrap();
        let reuse = create_purchase(&pool, &gateway, &config, &buyer, second_course.id, Some("ONCE")).await;
        assert!(matches!(reuse, Err(Error::Conflict { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_voucher_is_single_use_under_concurrent_checkouts(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let first_course = create_test_course(&pool, instructor.id, 50_000).await;
        let second_course = create_test_course(&pool, instructor.id, 70_000).await;
        let voucher = create_test_voucher(&pool, "ONCE20", VoucherKind::Platform, None, 20).await;
        let gateway = Arc::new(MockGateway::default());
        gateway.set_latency(Duration::from_millis(300));

        let mut handles = vec![];
        for course_id in [first_course.id, second_course.id] {
            let pool = pool.clone();
            let gateway = Arc::clone(&gateway);
            let buyer = buyer.clone();
            handles.push(tokio::spawn(async move {
                create_purchase(&pool, gateway.as_ref(), &payments_config(), &buyer, course_id, Some("ONCE20")).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.expect("Task panicked") {
                Ok(_) => accepted += 1,
                Err(e) => assert!(matches!(e, Error::Conflict { .. }), "unexpected error: {e:?}"),
            }
        }
        assert_eq!(accepted, 1);

        let uses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE voucher_id = $1 AND user_id = $2")
            .bind(voucher.id)
            .bind(buyer.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(uses, 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_full_discount_enrolls_without_invoice(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let wallet = create_test_wallet(&pool, instructor.id).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 100_000).await;
        create_test_voucher(&pool, "GIFT100", VoucherKind::Platform, None, 100).await;
        let gateway = MockGateway::default();

        let purchase = create_purchase(&pool, &gateway, &payments_config(), &buyer, course.id, Some("GIFT100"))
            .await
            .unwrap();
        let Purchase::Created(tx) = purchase else {
            panic!("expected a new transaction");
        };

        assert_eq!(tx.amount, 0);
        assert!(tx.is_paid());
        assert_eq!(tx.payment_method.as_deref(), Some(FREE_PAYMENT_METHOD));
        assert_eq!(tx.invoice_id, None);
        assert_eq!(gateway.invoices_created(), 0);

        let mut conn = pool.acquire().await.unwrap();
        assert!(Enrollments::new(&mut conn).is_enrolled(buyer.id, course.id).await.unwrap());

        // A platform voucher does not reduce what the instructor earns
        let balance: i64 = sqlx::query_scalar("SELECT balance FROM wallets WHERE id = $1")
            .bind(wallet.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(balance, 100_000);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_free_course_enrolls_without_credit(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let wallet = create_test_wallet(&pool, instructor.id).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 0).await;
        let gateway = MockGateway::default();

        let tx = create_purchase(&pool, &gateway, &payments_config(), &buyer, course.id, None)
            .await
            .unwrap()
            .into_inner();
        assert!(tx.is_paid());
        assert_eq!(gateway.invoices_created(), 0);

        let entries: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM wallet_transactions WHERE wallet_id = $1")
            .bind(wallet.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(entries, 0);

        let again = create_purchase(&pool, &gateway, &payments_config(), &buyer, course.id, None).await;
        assert!(matches!(again, Err(Error::Conflict { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_unpublished_course_cannot_be_bought(pool: PgPool) {
        let instructor = create_test_user(&pool, Role::Instructor).await;
        let buyer = CurrentUser::from(create_test_user(&pool, Role::User).await);
        let course = create_test_course(&pool, instructor.id, 50_000).await;
        sqlx::query("UPDATE courses SET is_published = FALSE WHERE id = $1")
            .bind(course.id)
            .execute(&pool)
            .await
            .unwrap();

        let result = create_purchase(&pool, &MockGateway::default(), &payments_config(), &buyer, course.id, None).await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }
}

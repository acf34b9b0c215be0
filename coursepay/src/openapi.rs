use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{api, db, payments, types};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            let bearer = HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build();
            components.security_schemes.insert("BearerAuth".to_string(), SecurityScheme::Http(bearer));
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    servers(
        (url = "/api/v1", description = "Course commerce API")
    ),
    modifiers(&SecurityAddon),
    paths(
        api::handlers::users::list_users,
        api::handlers::users::create_user,
        api::handlers::users::get_user,
        api::handlers::users::update_user,
        api::handlers::users::delete_user,
        api::handlers::courses::list_courses,
        api::handlers::courses::create_course,
        api::handlers::courses::get_course,
        api::handlers::courses::update_course,
        api::handlers::courses::publish_course,
        api::handlers::courses::unpublish_course,
        api::handlers::vouchers::list_vouchers,
        api::handlers::vouchers::create_voucher,
        api::handlers::vouchers::delete_voucher,
        api::handlers::transactions::create_transaction,
        api::handlers::transactions::get_transaction,
        api::handlers::transactions::list_transactions,
        api::handlers::transactions::check_transaction,
        api::handlers::enrollments::list_enrollments,
        api::handlers::enrollments::get_enrollment,
        api::handlers::enrollments::record_progress,
        api::handlers::wallets::create_wallet,
        api::handlers::wallets::get_wallet,
        api::handlers::wallets::issue_otp,
        api::handlers::wallets::verify_otp,
        api::handlers::wallets::list_wallet_transactions,
        api::handlers::wallets::get_wallet_by_id,
        api::handlers::wallets::audit_wallet,
        api::handlers::payment_methods::list_payment_methods,
        api::handlers::payment_methods::create_payment_method,
        api::handlers::payment_methods::update_payment_method,
        api::handlers::payment_methods::delete_payment_method,
        api::handlers::withdrawals::create_withdrawal,
        api::handlers::withdrawals::list_withdrawals,
        api::handlers::withdrawals::settle_withdrawal,
    ),
    components(
        schemas(
            api::models::users::Role,
            api::models::users::UserCreate,
            api::models::users::UserUpdate,
            api::models::users::UserResponse,
            api::models::users::CurrentUser,
            api::models::courses::CourseCreate,
            api::models::courses::CourseUpdate,
            api::models::courses::CourseResponse,
            api::models::vouchers::VoucherCreate,
            api::models::vouchers::VoucherResponse,
            api::models::transactions::TransactionCreate,
            api::models::transactions::TransactionResponse,
            api::models::transactions::PaymentCheckResponse,
            api::models::enrollments::ProgressCreate,
            api::models::enrollments::ProgressResponse,
            api::models::enrollments::EnrollmentResponse,
            api::models::wallets::WalletCreate,
            api::models::wallets::WalletResponse,
            api::models::wallets::OtpVerify,
            api::models::wallets::OtpVerifyResponse,
            api::models::wallets::MessageResponse,
            api::models::wallets::WalletTransactionResponse,
            api::models::wallets::WalletAuditResponse,
            api::models::payment_methods::PaymentMethodCreate,
            api::models::payment_methods::PaymentMethodUpdate,
            api::models::payment_methods::PaymentMethodResponse,
            api::models::withdrawals::WithdrawalCreate,
            api::models::withdrawals::WithdrawalCreatedResponse,
            api::models::withdrawals::WithdrawalSettle,
            api::models::withdrawals::SettlementResponse,
            db::models::ledger::LedgerEntryKind,
            db::models::ledger::LedgerEntryStatus,
            db::models::ledger::SettlementOutcome,
            db::models::vouchers::VoucherKind,
            payments::reconcile::ReconcileOutcome,
            types::SortOrder,
        )
    ),
    tags(
        (name = "users", description = "User management API"),
        (name = "courses", description = "Course catalog"),
        (name = "vouchers", description = "Discount vouchers"),
        (name = "transactions", description = "Course purchases and payment checks"),
        (name = "enrollments", description = "Enrollments and learning progress"),
        (name = "wallet", description = "Instructor wallet, ledger and payout accounts"),
        (name = "withdrawals", description = "Instructor withdrawals"),
        (name = "moderation", description = "Admin wallet and withdrawal moderation"),
    ),
    info(
        title = "Coursepay API",
        version = "0.1.0",
        description = "API for selling courses, crediting instructors and paying them out",
    ),
)]
pub struct ApiDoc;

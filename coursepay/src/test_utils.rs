use crate::{
    api::models::users::{Role, UserResponse},
    auth::session::create_session_token,
    config::{Config, DatabaseConfig, EmailConfig, PaymentsConfig},
    db::{
        handlers::{Courses, PaymentMethods, Repository, Transactions, Users, Vouchers, Wallets},
        models::{
            courses::{CourseCreateDBRequest, CourseDBResponse},
            payment_methods::{PaymentMethodCreateDBRequest, PaymentMethodDBResponse},
            transactions::{TransactionCreateDBRequest, TransactionDBResponse},
            users::UserCreateDBRequest,
            vouchers::{VoucherCreateDBRequest, VoucherDBResponse, VoucherKind},
            wallets::{WalletCreateDBRequest, WalletDBResponse},
        },
    },
    email::{EmailError, Mailer},
    payments::gateway::{GatewayError, Invoice, InvoiceRequest, InvoiceState, InvoiceStatus, PaymentGateway},
    types::{UserId, WalletId},
    AppState,
};
use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use uuid::Uuid;

pub async fn create_test_app(pool: PgPool) -> (TestServer, Arc<MockGateway>, Arc<RecordingMailer>) {
    let gateway = Arc::new(MockGateway::default());
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::builder()
        .db(pool)
        .config(create_test_config())
        .gateway(gateway.clone())
        .mailer(mailer.clone())
        .build();

    let router = crate::build_router(state).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");
    (server, gateway, mailer)
}

pub fn create_test_config() -> Config {
    let database_url = std::env::var("TEST_DATABASE_URL").unwrap_or_else(|_| "postgres://postgres@localhost/test".to_string());

    Config {
        database_url: None,
        database: DatabaseConfig::External { url: database_url },
        host: "127.0.0.1".to_string(),
        port: 0,
        admin_email: "admin@test.com".to_string(),
        admin_name: "Test Admin".to_string(),
        secret_key: Some("test-secret-key-for-testing-only".to_string()),
        payments: PaymentsConfig {
            secret_key: Some("xnd_test".to_string()),
            tax_rate: Decimal::new(11, 2),
            ..Default::default()
        },
        email: EmailConfig::default(),
        enable_metrics: false,
        ..Default::default()
    }
}

pub async fn create_test_user(pool: &PgPool, role: Role) -> UserResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut users_repo = Users::new(&mut conn);
    let user_id = Uuid::new_v4();

    let user_create = UserCreateDBRequest {
        email: format!("testuser_{}@example.com", user_id.simple()),
        full_name: "Test User".to_string(),
        role,
    };

    let user = users_repo.create(&user_create).await.expect("Failed to create test user");
    UserResponse::from(user)
}

pub fn add_auth_headers(user: &UserResponse) -> (String, String) {
    let token = create_session_token(&create_test_config(), user.id, &user.email, user.role).expect("Failed to create session token");
    ("authorization".to_string(), format!("Bearer {token}"))
}

pub async fn create_test_wallet(pool: &PgPool, instructor_id: UserId) -> WalletDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Wallets::new(&mut conn)
        .create(&WalletCreateDBRequest {
            instructor_id,
            full_name: "Test Instructor".to_string(),
            phone: "+6281234567890".to_string(),
            address: "Jl. Sudirman 1, Jakarta".to_string(),
        })
        .await
        .expect("Failed to create test wallet")
}

pub async fn create_test_payment_method(pool: &PgPool, wallet_id: WalletId) -> PaymentMethodDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    PaymentMethods::new(&mut conn)
        .create(&PaymentMethodCreateDBRequest {
            wallet_id,
            bank_code: "BCA".to_string(),
            account_number: "1234567890".to_string(),
            holder_name: "Test Instructor".to_string(),
        })
        .await
        .expect("Failed to create test payment method")
}

/// A published course
pub async fn create_test_course(pool: &PgPool, instructor_id: UserId, price: i64) -> CourseDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut courses = Courses::new(&mut conn);
    let course = courses
        .create(&CourseCreateDBRequest {
            instructor_id,
            title: format!("Course {}", Uuid::new_v4().simple()),
            description: Some("A test course".to_string()),
            price,
            discounted_price: None,
        })
        .await
        .expect("Failed to create test course");
    courses.publish(course.id).await.expect("Failed to publish test course")
}

/// A paid sale of a fresh course by a fresh buyer. Nothing is credited and nobody is enrolled.
pub async fn create_test_sale(pool: &PgPool, instructor_id: UserId, amount: i64) -> TransactionDBResponse {
    let buyer = create_test_user(pool, Role::User).await;
    let course = create_test_course(pool, instructor_id, amount).await;

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    let mut transactions = Transactions::new(&mut conn);
    let transaction = transactions
        .create(&TransactionCreateDBRequest {
            user_id: buyer.id,
            course_id: course.id,
            course_price: amount,
            discount_amount: 0,
            voucher_id: None,
            voucher_kind: None,
            tax_rate: Decimal::ZERO,
            tax_amount: 0,
            amount,
            due_date: Utc::now() + Duration::days(1),
        })
        .await
        .expect("Failed to create test transaction");
    transactions
        .mark_paid(transaction.id, Utc::now(), Some("BANK_TRANSFER"))
        .await
        .expect("Failed to mark test transaction paid")
}

pub async fn create_test_voucher(
    pool: &PgPool,
    code: &str,
    kind: VoucherKind,
    instructor_id: Option<UserId>,
    discount_percent: i32,
) -> VoucherDBResponse {
    let created_by = match instructor_id {
        Some(id) => id,
        None => create_test_user(pool, Role::Admin).await.id,
    };

    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Vouchers::new(&mut conn)
        .create(&VoucherCreateDBRequest {
            code: code.to_string(),
            kind,
            instructor_id,
            discount_percent,
            expires_at: Utc::now() + Duration::days(30),
            created_by,
        })
        .await
        .expect("Failed to create test voucher")
}

/// In-process invoice gateway. Invoices are pending until a test marks them otherwise.
#[derive(Default)]
pub struct MockGateway {
    invoices: Mutex<HashMap<String, InvoiceStatus>>,
    created: AtomicUsize,
    failing: AtomicBool,
    latency: Mutex<Option<std::time::Duration>>,
}

impl MockGateway {
    /// Make `create_invoice` take at least `latency`
    pub fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.lock().expect("mock gateway lock poisoned") = Some(latency);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn invoices_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn set_status(&self, invoice_id: &str, status: InvoiceState, payment_method: Option<&str>) {
        let paid_at = status.is_paid().then(Utc::now);
        self.invoices.lock().expect("mock gateway lock poisoned").insert(
            invoice_id.to_string(),
            InvoiceStatus {
                status,
                payment_method: payment_method.map(str::to_string),
                paid_at,
            },
        );
    }

    fn check_available(&self) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 503,
                body: "gateway unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        let latency = *self.latency.lock().expect("mock gateway lock poisoned");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.check_available()?;
        let id = format!("inv_{}", request.external_id);
        self.set_status(&id, InvoiceState::Pending, None);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Invoice {
            invoice_url: format!("https://checkout.example.com/{id}"),
            id,
        })
    }

    async fn get_invoice(&self, invoice_id: &str) -> Result<InvoiceStatus, GatewayError> {
        self.check_available()?;
        self.invoices
            .lock()
            .expect("mock gateway lock poisoned")
            .get(invoice_id)
            .cloned()
            .ok_or_else(|| GatewayError::Status {
                status: 404,
                body: "INVOICE_NOT_FOUND_ERROR".to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Keeps every message instead of delivering it
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentEmail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().expect("mailer lock poisoned").clone()
    }

    /// The code from the newest OTP email sent to `to`
    pub fn last_otp_for(&self, to: &str) -> Option<String> {
        self.sent()
            .into_iter()
            .rev()
            .filter(|mail| mail.to == to)
            .find_map(|mail| {
                let start = mail.html.find("<strong>")? + "<strong>".len();
                let end = mail.html[start..].find("</strong>")? + start;
                Some(mail.html[start..end].to_string())
            })
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        if self.failing.load(Ordering::SeqCst) {
            // Any transport error will do
            return Err(EmailError::Address(
                "unreachable@".parse::<lettre::Address>().expect_err("address is invalid"),
            ));
        }
        self.sent.lock().expect("mailer lock poisoned").push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            html: html.to_string(),
        });
        Ok(())
    }
}

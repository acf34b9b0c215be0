mod api;
mod auth;
mod config;
mod crypto;
mod db;
mod email;
mod errors;
mod openapi;
mod payments;
mod types;

#[cfg(test)]
mod test_utils;

use crate::{
    api::models::users::Role,
    db::{
        handlers::{Repository, Tokens, Users},
        models::users::{UserCreateDBRequest, UserUpdateDBRequest},
    },
    email::{EmailService, Mailer},
    openapi::ApiDoc,
    payments::gateway::{PaymentGateway, XenditGateway},
    types::UserId,
};
use axum::{
    extract::Request,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    response::Response,
    routing::{delete, get, patch, post, put},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use clap::Parser;
use config::{Args, Config};
use sqlx::PgPool;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, Span};
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub gateway: Arc<dyn PaymentGateway>,
    pub mailer: Arc<dyn Mailer>,
}

/// Create the initial admin user if it doesn't exist. An existing account with that email is
/// promoted to admin.
pub async fn create_initial_admin_user(email: &str, full_name: &str, db: &PgPool) -> anyhow::Result<UserId> {
    let mut tx = db.begin().await?;
    let mut user_repo = Users::new(&mut tx);

    if let Some(existing_user) = user_repo.get_user_by_email(email).await? {
        if existing_user.role != Role::Admin {
            info!("Promoting existing user {} to admin", existing_user.id);
            user_repo
                .update(
                    existing_user.id,
                    &UserUpdateDBRequest {
                        role: Some(Role::Admin),
                        ..Default::default()
                    },
                )
                .await?;
        }
        tx.commit().await?;
        return Ok(existing_user.id);
    }

    let created_user = user_repo
        .create(&UserCreateDBRequest {
            email: email.to_string(),
            full_name: full_name.to_string(),
            role: Role::Admin,
        })
        .await?;

    tx.commit().await?;
    info!("Created initial admin user {}", created_user.id);
    Ok(created_user.id)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    use crate::config::CorsOrigin;

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    // Browsers reject credentialed responses with a wildcard origin
    let mut cors = if config.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
        cors.allow_origin(AllowOrigin::any())
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        cors.allow_origin(origins).allow_credentials(config.cors.allow_credentials)
    };

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        // User management (admin only for collection operations)
        .route("/users", get(api::handlers::users::list_users))
        .route("/users", post(api::handlers::users::create_user))
        .route("/users/{user_id}", get(api::handlers::users::get_user))
        .route("/users/{user_id}", patch(api::handlers::users::update_user))
        .route("/users/{user_id}", delete(api::handlers::users::delete_user))
        // Catalog
        .route("/courses", get(api::handlers::courses::list_courses))
        .route("/courses", post(api::handlers::courses::create_course))
        .route("/courses/{id}", get(api::handlers::courses::get_course))
        .route("/courses/{id}", patch(api::handlers::courses::update_course))
        .route("/courses/{id}/publish", post(api::handlers::courses::publish_course))
        .route("/courses/{id}/unpublish", post(api::handlers::courses::unpublish_course))
        .route("/vouchers", get(api::handlers::vouchers::list_vouchers))
        .route("/vouchers", post(api::handlers::vouchers::create_voucher))
        .route("/vouchers/{id}", delete(api::handlers::vouchers::delete_voucher))
        // Purchases
        .route("/transactions", get(api::handlers::transactions::list_transactions))
        .route("/transactions", post(api::handlers::transactions::create_transaction))
        .route("/transactions/{transaction_id}", get(api::handlers::transactions::get_transaction))
        .route(
            "/transactions/{transaction_id}/check",
            get(api::handlers::transactions::check_transaction),
        )
        .route("/enrollments", get(api::handlers::enrollments::list_enrollments))
        .route("/enrollments/{id}", get(api::handlers::enrollments::get_enrollment))
        .route("/enrollments/{id}/progress", post(api::handlers::enrollments::record_progress))
        // Instructor wallet
        .route("/wallet", get(api::handlers::wallets::get_wallet))
        .route("/wallet", post(api::handlers::wallets::create_wallet))
        .route("/wallet/otp", post(api::handlers::wallets::issue_otp))
        .route("/wallet/otp/verify", post(api::handlers::wallets::verify_otp))
        .route("/wallet/transactions", get(api::handlers::wallets::list_wallet_transactions))
        .route("/wallet/payment-methods", get(api::handlers::payment_methods::list_payment_methods))
        .route("/wallet/payment-methods", post(api::handlers::payment_methods::create_payment_method))
        .route(
            "/wallet/payment-methods/{id}",
            patch(api::handlers::payment_methods::update_payment_method),
        )
        .route(
            "/wallet/payment-methods/{id}",
            delete(api::handlers::payment_methods::delete_payment_method),
        )
        .route("/withdrawals", post(api::handlers::withdrawals::create_withdrawal))
        // Moderation (admin only)
        .route("/mods/withdrawals", get(api::handlers::withdrawals::list_withdrawals))
        .route("/mods/withdrawals/{id}", put(api::handlers::withdrawals::settle_withdrawal))
        .route("/mods/wallets/{id}", get(api::handlers::wallets::get_wallet_by_id))
        .route("/mods/wallets/{id}/audit", get(api::handlers::wallets::audit_wallet))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(|response: &Response<_>, latency: Duration, _span: &Span| {
                    tracing::info!(
                        status = %response.status(),
                        latency = ?latency,
                        "request completed"
                    );
                }),
        )
        .with_state(state.clone());

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/docs"));

    let cors_layer = create_cors_layer(&state.config)?;
    let mut router = router.layer(cors_layer);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(move || async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    Ok(router)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with environment filter
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    debug!("{:?}", args);

    let config = Config::load(&args)?;
    if args.validate {
        info!("Configuration in {} is valid", args.config.display());
        return Ok(());
    }

    // Database connection - handle both embedded and external
    let (embedded_db, database_url) = match &config.database {
        config::DatabaseConfig::Embedded { .. } => {
            let persistent = config.database.embedded_persistent();
            info!("Starting with embedded database (persistent: {})", persistent);
            if !persistent {
                info!("persistent=false: database will be ephemeral and data will be lost on shutdown");
            }
            let embedded_db = db::embedded::EmbeddedDatabase::start(config.database.embedded_data_dir(), persistent).await?;
            let url = embedded_db.connection_string().to_string();
            (Some(embedded_db), url)
        }
        config::DatabaseConfig::External { url } => {
            info!("Using external database");
            (None, url.clone())
        }
    };

    let pool = PgPool::connect(&database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    create_initial_admin_user(&config.admin_email, &config.admin_name, &pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create initial admin user: {}", e))?;

    {
        let mut conn = pool.acquire().await?;
        let purged = Tokens::new(&mut conn).purge_expired().await?;
        debug!("Purged {} expired tokens", purged);
    }

    let gateway = XenditGateway::new(&config.payments)?;
    let mailer = EmailService::new(&config.email)?;

    let state = AppState::builder()
        .db(pool.clone())
        .config(config.clone())
        .gateway(Arc::new(gateway))
        .mailer(Arc::new(mailer))
        .build();
    let router = build_router(state)?;

    let bind_addr = config.bind_address();
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("Listening on http://{}, docs at http://localhost:{}/docs", bind_addr, config.port);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    if let Some(embedded_db) = embedded_db {
        info!("Shutting down embedded database...");
        embedded_db.stop().await?;
    }

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

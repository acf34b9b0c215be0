//! Invoice-based payment gateway.
//!
//! [`XenditGateway`] talks to a Xendit-compatible invoice API with HTTP basic auth (secret key
//! as username, empty password). Requests are never retried.

use crate::{config::PaymentsConfig, errors::Error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};
use url::Url;

pub const GATEWAY_SERVICE: &str = "Payment gateway";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway secret key is not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid gateway url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<GatewayError> for Error {
    fn from(err: GatewayError) -> Self {
        Error::Upstream {
            service: GATEWAY_SERVICE.to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceRequest {
    /// Our transaction id, echoed back by the gateway
    pub external_id: String,
    pub amount: i64,
    pub currency: String,
    pub payer_email: String,
    pub description: String,
    /// Seconds until the invoice expires
    pub invoice_duration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub invoice_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceState {
    Pending,
    Paid,
    Settled,
    Expired,
    #[serde(other)]
    Unknown,
}

impl InvoiceState {
    pub fn is_paid(&self) -> bool {
        matches!(self, InvoiceState::Paid | InvoiceState::Settled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InvoiceStatus {
    pub status: InvoiceState,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError>;

    async fn get_invoice(&self, invoice_id: &str) -> Result<InvoiceStatus, GatewayError>;
}

pub struct XenditGateway {
    client: Client,
    base_url: Url,
    secret_key: Option<String>,
}

impl XenditGateway {
    pub fn new(config: &PaymentsConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.gateway_url.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn secret_key(&self) -> Result<&str, GatewayError> {
        self.secret_key.as_deref().ok_or(GatewayError::NotConfigured)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "Payment gateway request failed");
        Err(GatewayError::Status {
            status: status.as_u16(),
            body: body.chars().take(200).collect(),
        })
    }
}

#[async_trait]
impl PaymentGateway for XenditGateway {
    #[instrument(skip(self, request), fields(external_id = %request.external_id, amount = request.amount), err)]
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice, GatewayError> {
        let url = self.base_url.join("v2/invoices")?;
        let response = self
            .client
            .post(url)
            .basic_auth(self.secret_key()?, Some(""))
            .json(request)
            .send()
            .await?;

        let invoice: Invoice = Self::check(response).await?.json().await?;
        debug!("Created invoice {} for {}", invoice.id, request.external_id);
        Ok(invoice)
    }

    #[instrument(skip(self), err)]
    async fn get_invoice(&self, invoice_id: &str) -> Result<InvoiceStatus, GatewayError> {
        let url = self.base_url.join(&format!("v2/invoices/{invoice_id}"))?;
        let response = self.client.get(url).basic_auth(self.secret_key()?, Some("")).send().await?;

        Ok(Self::check(response).await?.json().await?)
    }
}

/// Invoice lifetime in whole seconds, as the gateway expects it
pub fn invoice_duration_secs(duration: Duration) -> u64 {
    duration.as_secs().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    /// Serve a tiny invoice API on a random local port
    async fn spawn_fake_gateway() -> Url {
        async fn create(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
            if headers.get("authorization").is_none() {
                return (StatusCode::UNAUTHORIZED, Json(json!({"error_code": "INVALID_API_KEY"})));
            }
            let id = format!("inv_{}", body["external_id"].as_str().unwrap_or_default());
            (
                StatusCode::OK,
                Json(json!({"id": id, "invoice_url": format!("https://checkout.example.com/{id}"), "status": "PENDING"})),
            )
        }

        async fn fetch(Path(id): Path<String>) -> (StatusCode, Json<Value>) {
            match id.as_str() {
                "inv_paid" => (
                    StatusCode::OK,
                    Json(json!({"id": id, "status": "PAID", "payment_method": "BANK_TRANSFER", "paid_at": "2025-10-19T10:00:00Z"})),
                ),
                "inv_pending" => (StatusCode::OK, Json(json!({"id": id, "status": "PENDING"}))),
                "inv_weird" => (StatusCode::OK, Json(json!({"id": id, "status": "SOMETHING_NEW"}))),
                _ => (StatusCode::NOT_FOUND, Json(json!({"error_code": "INVOICE_NOT_FOUND_ERROR"}))),
            }
        }

        let app = Router::new()
            .route("/v2/invoices", post(create))
            .route("/v2/invoices/{id}", get(fetch));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        Url::parse(&format!("http://{addr}/")).unwrap()
    }

    fn gateway(base_url: Url, secret_key: Option<&str>) -> XenditGateway {
        XenditGateway::new(&PaymentsConfig {
            gateway_url: base_url,
            secret_key: secret_key.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    fn invoice_request() -> InvoiceRequest {
        InvoiceRequest {
            external_id: "tx1".to_string(),
            amount: 111_000,
            currency: "IDR".to_string(),
            payer_email: "student@example.com".to_string(),
            description: "Rust 101".to_string(),
            invoice_duration: 86_400,
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_create_invoice() {
        let gateway = gateway(spawn_fake_gateway().await, Some("xnd_test"));
        let invoice = gateway.create_invoice(&invoice_request()).await.unwrap();
        assert_eq!(invoice.id, "inv_tx1");
        assert!(invoice.invoice_url.ends_with("/inv_tx1"));
    }

    #[test_log::test(tokio::test)]
    async fn test_get_invoice_states() {
        let gateway = gateway(spawn_fake_gateway().await, Some("xnd_test"));

        let paid = gateway.get_invoice("inv_paid").await.unwrap();
        assert!(paid.status.is_paid());
        assert_eq!(paid.payment_method.as_deref(), Some("BANK_TRANSFER"));
        assert!(paid.paid_at.is_some());

        let pending = gateway.get_invoice("inv_pending").await.unwrap();
        assert_eq!(pending.status, InvoiceState::Pending);
        assert!(!pending.status.is_paid());

        let unknown = gateway.get_invoice("inv_weird").await.unwrap();
        assert_eq!(unknown.status, InvoiceState::Unknown);
    }

    #[test_log::test(tokio::test)]
    async fn test_gateway_errors_become_upstream() {
        let gateway = gateway(spawn_fake_gateway().await, Some("xnd_test"));
        let err = gateway.get_invoice("inv_missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 404, .. }));
        assert!(matches!(Error::from(err), Error::Upstream { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_secret_key() {
        let gateway = gateway(spawn_fake_gateway().await, None);
        assert!(matches!(
            gateway.create_invoice(&invoice_request()).await,
            Err(GatewayError::NotConfigured)
        ));
    }

    #[test]
    fn test_settled_counts_as_paid() {
        assert!(InvoiceState::Settled.is_paid());
        assert!(!InvoiceState::Expired.is_paid());
    }
}

//! Outgoing email.
//!
//! [`EmailService`] delivers through SMTP, or writes `.eml` files to a directory for local
//! development. Handlers only see the [`Mailer`] trait.

use crate::{
    config::{EmailConfig, EmailTransportConfig},
    db::models::ledger::{LedgerEntryStatus, WalletTransactionDBResponse},
    errors::Error,
};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncFileTransport, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{debug, instrument};

pub const EMAIL_SERVICE: &str = "Email";

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("file delivery failed: {0}")]
    File(#[from] lettre::transport::file::Error),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl From<EmailError> for Error {
    fn from(err: EmailError) -> Self {
        Error::Upstream {
            service: EMAIL_SERVICE.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError>;
}

enum Transport {
    Smtp(AsyncSmtpTransport<Tokio1Executor>),
    File(AsyncFileTransport<Tokio1Executor>),
}

pub struct EmailService {
    from: Mailbox,
    transport: Transport,
    send_timeout: Duration,
}

impl EmailService {
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        let from = Mailbox::new(Some(config.from_name.clone()), config.from_email.parse()?);

        let transport = match &config.transport {
            EmailTransportConfig::Smtp {
                host,
                port,
                username,
                password,
                use_tls,
            } => {
                let mut builder = if *use_tls {
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
                } else {
                    AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                };
                builder = builder.port(*port).timeout(Some(config.send_timeout));
                if let (Some(username), Some(password)) = (username, password) {
                    builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
                }
                Transport::Smtp(builder.build())
            }
            EmailTransportConfig::File { path } => Transport::File(AsyncFileTransport::<Tokio1Executor>::new(path)),
        };

        Ok(Self {
            from,
            transport,
            send_timeout: config.send_timeout,
        })
    }
}

#[async_trait]
impl Mailer for EmailService {
    #[instrument(skip(self, html), err)]
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html.to_string())?;

        let delivery = async {
            match &self.transport {
                Transport::Smtp(smtp) => {
                    smtp.send(message).await?;
                }
                Transport::File(file) => {
                    let id = file.send(message).await?;
                    debug!("Wrote email {} to disk", id);
                }
            }
            Ok::<(), EmailError>(())
        };
        tokio::time::timeout(self.send_timeout, delivery)
            .await
            .map_err(|_| EmailError::Timeout(self.send_timeout))?
    }
}

/// A rendered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub subject: String,
    pub html: String,
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn wallet_otp_email(full_name: &str, code: &str, valid_minutes: i64) -> Email {
    Email {
        subject: "Your withdrawal verification code".to_string(),
        html: format!(
            "<p>Hi {},</p>\
             <p>Use this code to confirm your withdrawal request:</p>\
             <p><strong>{}</strong></p>\
             <p>The code expires in {} minutes. If you did not ask for it, you can ignore this email.</p>",
            escape(full_name),
            code,
            valid_minutes
        ),
    }
}

pub fn withdrawal_settled_email(full_name: &str, entry: &WalletTransactionDBResponse, currency: &str) -> Email {
    let (subject, body) = match entry.status {
        LedgerEntryStatus::Success => (
            "Your withdrawal has been paid",
            format!("Your withdrawal of {} {} has been transferred to your account.", entry.amount, currency),
        ),
        _ => (
            "Your withdrawal could not be completed",
            format!(
                "Your withdrawal of {} {} could not be completed. The amount has been returned to your wallet balance.",
                entry.amount, currency
            ),
        ),
    };

    Email {
        subject: subject.to_string(),
        html: format!("<p>Hi {},</p><p>{}</p>", escape(full_name), body),
    }
}

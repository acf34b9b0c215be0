//! Configuration loading.
//!
//! Values come from, in increasing priority: built-in defaults, the YAML file passed with
//! `--config`, `COURSEPAY_`-prefixed environment variables (`__` separates nested keys, e.g.
//! `COURSEPAY_PAYMENTS__SECRET_KEY`), and finally `DATABASE_URL`.

use anyhow::Context;
use clap::Parser;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use url::Url;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Course commerce and instructor payout service")]
pub struct Args {
    /// Path to the YAML configuration file
    #[arg(short = 'f', long, env = "COURSEPAY_CONFIG", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Load and validate the configuration, then exit
    #[arg(long, default_value_t = false)]
    pub validate: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Shortcut for an external database, takes precedence over `database`
    pub database_url: Option<String>,
    pub database: DatabaseConfig,
    /// Email of the bootstrap admin, created on startup if missing
    pub admin_email: String,
    pub admin_name: String,
    /// HMAC secret for bearer tokens
    pub secret_key: Option<String>,
    pub session: SessionConfig,
    pub payments: PaymentsConfig,
    pub email: EmailConfig,
    pub cors: CorsConfig,
    pub enable_metrics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_url: None,
            database: DatabaseConfig::default(),
            admin_email: "admin@example.com".to_string(),
            admin_name: "Administrator".to_string(),
            secret_key: None,
            session: SessionConfig::default(),
            payments: PaymentsConfig::default(),
            email: EmailConfig::default(),
            cors: CorsConfig::default(),
            enable_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatabaseConfig {
    External {
        url: String,
    },
    Embedded {
        #[serde(default)]
        data_dir: Option<PathBuf>,
        #[serde(default)]
        persistent: bool,
    },
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::External {
            url: "postgres://localhost:5432/coursepay".to_string(),
        }
    }
}

impl DatabaseConfig {
    pub fn embedded_persistent(&self) -> bool {
        matches!(self, DatabaseConfig::Embedded { persistent: true, .. })
    }

    pub fn embedded_data_dir(&self) -> Option<PathBuf> {
        match self {
            DatabaseConfig::Embedded { data_dir, .. } => data_dir.clone(),
            DatabaseConfig::External { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of bearer tokens minted by this service
    #[serde(with = "humantime_serde")]
    pub token_lifetime: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_lifetime: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    /// Base URL of the invoice gateway
    pub gateway_url: Url,
    /// Gateway secret key, sent as the basic-auth username
    pub secret_key: Option<String>,
    pub currency: String,
    /// How long an invoice (and its transaction) stays payable
    #[serde(with = "humantime_serde")]
    pub invoice_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Tax rate applied on top of the discounted price, e.g. 0.11
    pub tax_rate: Decimal,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            gateway_url: Url::parse("https://api.xendit.co").expect("static url is valid"),
            secret_key: None,
            currency: "IDR".to_string(),
            invoice_duration: Duration::from_secs(24 * 60 * 60),
            request_timeout: Duration::from_secs(10),
            tax_rate: Decimal::new(11, 2),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub from_email: String,
    pub from_name: String,
    pub transport: EmailTransportConfig,
    /// Upper bound on delivering one message, connection included
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from_email: "noreply@example.com".to_string(),
            from_name: "Course Platform".to_string(),
            transport: EmailTransportConfig::default(),
            send_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmailTransportConfig {
    Smtp {
        host: String,
        port: u16,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default = "default_true")]
        use_tls: bool,
    },
    /// Write messages to files instead of sending them, for development
    File { path: PathBuf },
}

impl Default for EmailTransportConfig {
    fn default() -> Self {
        EmailTransportConfig::File {
            path: PathBuf::from("./emails"),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<CorsOrigin>,
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Url(
                Url::parse("http://localhost:3000").expect("static url is valid"),
            )],
            allow_credentials: true,
            max_age: Some(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub enum CorsOrigin {
    Wildcard,
    Url(Url),
}

impl TryFrom<String> for CorsOrigin {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "*" {
            return Ok(CorsOrigin::Wildcard);
        }
        Url::parse(&value)
            .map(CorsOrigin::Url)
            .map_err(|e| format!("invalid CORS origin '{value}': {e}"))
    }
}

impl Config {
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut config: Config = Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("COURSEPAY_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database_url".into()))
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

        if let Some(url) = config.database_url.take() {
            config.database = DatabaseConfig::External { url };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        match self.secret_key.as_deref() {
            None => anyhow::bail!("secret_key is required to verify bearer tokens"),
            Some(key) if key.len() < 16 => anyhow::bail!("secret_key must be at least 16 characters"),
            Some(_) => {}
        }
        if self.payments.tax_rate < Decimal::ZERO || self.payments.tax_rate >= Decimal::ONE {
            anyhow::bail!("payments.tax_rate must be in [0, 1), got {}", self.payments.tax_rate);
        }
        if self.payments.currency.trim().is_empty() {
            anyhow::bail!("payments.currency must not be empty");
        }
        if self.payments.invoice_duration.is_zero() {
            anyhow::bail!("payments.invoice_duration must be positive");
        }
        if self.email.send_timeout.is_zero() {
            anyhow::bail!("email.send_timeout must be positive");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

use std::{env, fmt, time::Duration};

use anyhow::Context;

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub payment: PaymentConfig,
}

/// Settings for the external payment gateway.
#[derive(Clone)]
pub struct PaymentConfig {
    pub api_base: String,
    pub secret_key: String,
    pub webhook_secret: String,
    pub currency: String,
    pub timeout: Duration,
    /// Upper bound on the total time spent retrying a transient gateway failure.
    pub retry_max_elapsed: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        Ok(Self {
            port,
            database_url,
            host,
            jwt_secret,
            payment: PaymentConfig::from_env()?,
        })
    }
}

impl PaymentConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_base = env::var("PAYMENT_API_BASE")
            .unwrap_or_else(|_| "https://api.stripe.com".to_string());
        let secret_key =
            env::var("PAYMENT_SECRET_KEY").context("PAYMENT_SECRET_KEY is not set")?;
        let webhook_secret =
            env::var("PAYMENT_WEBHOOK_SECRET").context("PAYMENT_WEBHOOK_SECRET is not set")?;
        let currency = env::var("PAYMENT_CURRENCY")
            .map(|c| c.to_lowercase())
            .unwrap_or_else(|_| "usd".to_string());
        let timeout_secs = env::var("PAYMENT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        let retry_ms = env::var("PAYMENT_RETRY_MAX_ELAPSED_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(5000);
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key,
            webhook_secret,
            currency,
            timeout: Duration::from_secs(timeout_secs),
            retry_max_elapsed: Duration::from_millis(retry_ms),
        })
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &"[REDACTED]")
            .field("jwt_secret", &"[REDACTED]")
            .field("payment", &self.payment)
            .finish()
    }
}

impl fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("api_base", &self.api_base)
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("currency", &self.currency)
            .field("timeout", &self.timeout)
            .field("retry_max_elapsed", &self.retry_max_elapsed)
            .finish()
    }
}

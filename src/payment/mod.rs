//! Boundary to the external payment gateway.
//!
//! [`PaymentGateway`] is the seam: [`stripe::StripeGateway`] talks to a
//! Stripe-compatible REST API, [`mock::MockGateway`] stands in for it in
//! tests. [`PaymentClient`] wraps whichever gateway is configured and adds
//! bounded retry for transient failures.

pub mod mock;
pub mod stripe;
pub mod webhook;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use thiserror::Error;
use uuid::Uuid;

use crate::{config::PaymentConfig, error::AppError};

/// Parameters for one payment intent. `amount` is in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub idempotency_key: String,
}

impl IntentRequest {
    pub fn for_order(order_id: Uuid, user_id: Uuid, amount: i64, currency: &str) -> Self {
        Self {
            order_id,
            user_id,
            amount,
            currency: currency.to_string(),
            idempotency_key: format!("order-{order_id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway rejected the request: {0}")]
    Rejected(String),

    #[error("unexpected gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Timeouts and unavailability are worth retrying; a rejection is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Timeout | GatewayError::Unavailable(_))
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::ExternalService(err.to_string())
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub initial_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_elapsed: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct PaymentClient {
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
    webhook_secret: Arc<str>,
    retry: RetrySettings,
}

impl PaymentClient {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
        webhook_secret: impl Into<Arc<str>>,
        retry: RetrySettings,
    ) -> Self {
        Self {
            gateway,
            currency: currency.into(),
            webhook_secret: webhook_secret.into(),
            retry,
        }
    }

    /// Build a client for the Stripe-compatible gateway described by `config`.
    pub fn from_config(config: &PaymentConfig) -> anyhow::Result<Self> {
        let gateway =
            stripe::StripeGateway::new(&config.api_base, &config.secret_key, config.timeout)?;
        Ok(Self::new(
            Arc::new(gateway),
            config.currency.clone(),
            config.webhook_secret.as_str(),
            RetrySettings {
                max_elapsed: config.retry_max_elapsed,
                ..RetrySettings::default()
            },
        ))
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn webhook_secret(&self) -> &str {
        &self.webhook_secret
    }

    /// Create an intent, retrying transient failures with exponential backoff
    /// until the retry budget is spent.
    pub async fn create_intent(
        &self,
        request: &IntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_interval)
            .with_max_elapsed_time(Some(self.retry.max_elapsed))
            .build();

        let gateway = self.gateway.as_ref();
        backoff::future::retry_notify(
            policy,
            move || async move {
                gateway.create_intent(request).await.map_err(|err| {
                    if err.is_transient() {
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })
            },
            |err: GatewayError, wait: Duration| {
                tracing::warn!(
                    order_id = %request.order_id,
                    error = %err,
                    retry_in_ms = %wait.as_millis(),
                    "payment gateway call failed, retrying"
                );
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::{mock::MockGateway, *};

    fn client(gateway: Arc<MockGateway>, max_elapsed_ms: u64) -> PaymentClient {
        PaymentClient::new(
            gateway,
            "usd",
            "whsec_test",
            RetrySettings {
                initial_interval: Duration::from_millis(1),
                max_elapsed: Duration::from_millis(max_elapsed_ms),
            },
        )
    }

    fn request() -> IntentRequest {
        IntentRequest::for_order(Uuid::new_v4(), Uuid::new_v4(), 2500, "usd")
    }

    #[test]
    fn idempotency_key_is_derived_from_order() {
        let order_id = Uuid::new_v4();
        let req = IntentRequest::for_order(order_id, Uuid::new_v4(), 100, "usd");
        assert_eq!(req.idempotency_key, format!("order-{order_id}"));
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let gateway = Arc::new(MockGateway::failing_with(vec![
            GatewayError::Timeout,
            GatewayError::Unavailable("503".into()),
        ]));
        let payments = client(gateway.clone(), 2_000);

        let intent = payments.create_intent(&request()).await.unwrap();

        assert!(intent.client_secret.starts_with(&intent.id));
        assert_eq!(gateway.calls(), 3);
    }

    #[tokio::test]
    async fn does_not_retry_rejections() {
        let gateway = Arc::new(MockGateway::failing_with(vec![GatewayError::Rejected(
            "amount too small".into(),
        )]));
        let payments = client(gateway.clone(), 2_000);

        let err = payments.create_intent(&request()).await.unwrap_err();

        assert_eq!(err, GatewayError::Rejected("amount too small".into()));
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn gives_up_when_budget_is_spent() {
        let gateway = Arc::new(MockGateway::always_failing(GatewayError::Timeout));
        let payments = client(gateway.clone(), 30);

        let err = payments.create_intent(&request()).await.unwrap_err();

        assert_eq!(err, GatewayError::Timeout);
        assert!(gateway.calls() >= 1);
    }

    #[test]
    fn gateway_errors_surface_as_external_service() {
        let err: AppError = GatewayError::Timeout.into();
        assert!(matches!(err, AppError::ExternalService(_)));
    }
}

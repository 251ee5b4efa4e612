//! Stripe-compatible payment intent client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::instrument;

use super::{GatewayError, IntentRequest, PaymentGateway, PaymentIntent};

#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .field("secret_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct IntentBody {
    id: String,
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl StripeGateway {
    pub fn new(api_base: &str, secret_key: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount))]
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        let amount = request.amount.to_string();
        let order_id = request.order_id.to_string();
        let user_id = request.user_id.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", request.currency.as_str()),
            ("metadata[order_id]", order_id.as_str()),
            ("metadata[user_id]", user_id.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            let body: IntentBody = response
                .json()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
            let client_secret = body.client_secret.ok_or_else(|| {
                GatewayError::InvalidResponse("payment intent has no client_secret".into())
            })?;
            tracing::info!(intent_id = %body.id, "payment intent created");
            return Ok(PaymentIntent {
                id: body.id,
                client_secret,
            });
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error.message)
            .unwrap_or_else(|| status.to_string());
        Err(status_error(status, message))
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

fn status_error(status: StatusCode, message: String) -> GatewayError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        GatewayError::Unavailable(message)
    } else {
        GatewayError::Rejected(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_server_errors_are_transient() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "slow down".into()).is_transient());
        assert!(status_error(StatusCode::BAD_GATEWAY, "upstream".into()).is_transient());
    }

    #[test]
    fn client_errors_are_rejections() {
        let err = status_error(StatusCode::BAD_REQUEST, "Amount must be at least 50 cents".into());
        assert_eq!(
            err,
            GatewayError::Rejected("Amount must be at least 50 cents".into())
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn debug_output_hides_secret() {
        let gateway =
            StripeGateway::new("https://api.example.test/", "sk_live_secret", Duration::from_secs(1))
                .unwrap();
        let rendered = format!("{gateway:?}");
        assert!(!rendered.contains("sk_live_secret"));
        assert!(rendered.contains("https://api.example.test"));
    }
}

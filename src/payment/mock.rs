//! In-process gateway for tests and local runs.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use uuid::Uuid;

use super::{GatewayError, IntentRequest, PaymentGateway, PaymentIntent};

/// Issues `pi_mock_*` intents. Scripted failures are returned, in order,
/// before any intent is issued.
#[derive(Debug, Default)]
pub struct MockGateway {
    calls: AtomicUsize,
    failures: Mutex<VecDeque<GatewayError>>,
    always_fail: Option<GatewayError>,
    delay: Option<Duration>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_with(failures: Vec<GatewayError>) -> Self {
        Self {
            failures: Mutex::new(failures.into()),
            ..Self::default()
        }
    }

    pub fn always_failing(err: GatewayError) -> Self {
        Self {
            always_fail: Some(err),
            ..Self::default()
        }
    }

    /// Simulated network latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Option<GatewayError> {
        if let Some(err) = &self.always_fail {
            return Some(err.clone());
        }
        self.failures
            .lock()
            .map(|mut queue| queue.pop_front())
            .unwrap_or(None)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intent(&self, request: &IntentRequest) -> Result<PaymentIntent, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.next_failure() {
            return Err(err);
        }

        let id = format!("pi_mock_{}", Uuid::new_v4().simple());
        tracing::debug!(
            order_id = %request.order_id,
            amount = request.amount,
            intent_id = %id,
            "mock payment intent created"
        );
        Ok(PaymentIntent {
            client_secret: format!("{id}_secret_{}", Uuid::new_v4().simple()),
            id,
        })
    }
}

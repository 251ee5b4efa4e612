use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set, TransactionTrait};

use crate::{
    audit::{AuditAction, log_audit},
    dto::payment::{ClientSecretResponse, CreateIntentRequest, WebhookAck},
    entity::orders::ActiveModel as OrderActive,
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    order_status::OrderStatus,
    payment::{
        IntentRequest,
        webhook::{self, WebhookEvent},
    },
    policy,
    response::{ApiResponse, Meta},
    services::order_service,
    state::AppState,
};

/// Issue (or reissue) the payment intent for a pending order.
///
/// The order row is locked across the gateway call, so concurrent requests for
/// the same order are single-flight: the second waits, then returns the
/// intent the first one stored. A gateway failure rolls the transaction back
/// and leaves the order pending without an intent.
pub async fn create_payment_intent(
    state: &AppState,
    user: &AuthUser,
    payload: CreateIntentRequest,
) -> AppResult<ApiResponse<ClientSecretResponse>> {
    let txn = state.orm.begin().await?;
    let order = order_service::lock_order(&txn, payload.order_id).await?;

    policy::ensure(policy::can_view_order(user, order.user_id))?;
    if order.status != OrderStatus::Pending {
        return Err(AppError::Conflict("Order already paid or processed".into()));
    }

    if let (Some(intent_id), Some(client_secret)) =
        (&order.payment_intent_id, &order.payment_client_secret)
    {
        tracing::debug!(order_id = %order.id, intent_id = %intent_id, "reusing payment intent");
        let client_secret = client_secret.clone();
        txn.commit().await?;
        return Ok(ApiResponse::success(
            "Payment intent",
            ClientSecretResponse { client_secret },
            Some(Meta::empty()),
        ));
    }

    let request = IntentRequest::for_order(
        order.id,
        user.user_id,
        order.total_amount,
        state.payments.currency(),
    );
    let intent = state.payments.create_intent(&request).await?;

    let order_id = order.id;
    let mut active: OrderActive = order.into();
    active.payment_intent_id = Set(Some(intent.id.clone()));
    active.payment_client_secret = Set(Some(intent.client_secret.clone()));
    active.updated_at = Set(Utc::now().into());
    active.update(&txn).await?;
    txn.commit().await?;

    tracing::info!(order_id = %order_id, intent_id = %intent.id, "payment intent created");
    log_audit(
        &state.orm,
        Some(user.user_id),
        AuditAction::PaymentIntent,
        serde_json::json!({ "order_id": order_id, "payment_intent_id": intent.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Payment intent",
        ClientSecretResponse {
            client_secret: intent.client_secret,
        },
        Some(Meta::empty()),
    ))
}

/// Gateway event delivery. Only `payment_intent.succeeded` changes state.
pub async fn handle_webhook(
    state: &AppState,
    signature: Option<&str>,
    body: &[u8],
) -> AppResult<ApiResponse<WebhookAck>> {
    let signature =
        signature.ok_or_else(|| AppError::Validation("Missing webhook signature".into()))?;
    webhook::verify_signature(
        body,
        signature,
        state.payments.webhook_secret(),
        Utc::now().timestamp(),
    )
    .map_err(|err| AppError::Validation(format!("Invalid webhook signature: {err}")))?;

    let event: WebhookEvent = serde_json::from_slice(body)
        .map_err(|err| AppError::Validation(format!("Invalid webhook payload: {err}")))?;

    match event.succeeded_payment() {
        Some((order_id, intent_id)) => {
            order_service::mark_paid(state, order_id, intent_id).await?;
        }
        None => {
            tracing::debug!(event = %event.kind, "ignoring webhook event");
        }
    }

    Ok(ApiResponse::success(
        "Webhook received",
        WebhookAck { received: true },
        Some(Meta::empty()),
    ))
}


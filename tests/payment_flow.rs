mod common;

use std::time::Duration;

use chrono::Utc;
use storefront_checkout::{
    dto::{
        cart::CartItemRequest,
        orders::{PlaceOrderRequest, UpdateOrderStatusRequest},
        payment::CreateIntentRequest,
    },
    error::AppError,
    middleware::auth::{AuthUser, Role},
    order_status::OrderStatus,
    payment::{GatewayError, mock::MockGateway, webhook},
    services::{cart_service, order_service, payment_service},
    state::AppState,
};
use uuid::Uuid;

async fn pending_order(state: &AppState, user: &AuthUser) -> anyhow::Result<Uuid> {
    let address_id = common::create_address(state, user).await?;
    let product_id = common::create_product(state, 1250).await?;
    cart_service::add_item(state, user, CartItemRequest { product_id, quantity: 2 }).await?;
    let order = order_service::place_order(state, user, PlaceOrderRequest { address_id })
        .await?
        .data
        .expect("order");
    Ok(order.id)
}

async fn client_secret(state: &AppState, user: &AuthUser, order_id: Uuid) -> Result<String, AppError> {
    let resp =
        payment_service::create_payment_intent(state, user, CreateIntentRequest { order_id }).await?;
    Ok(resp.data.expect("secret").client_secret)
}

async fn stored_intent_id(state: &AppState, user: &AuthUser, order_id: Uuid) -> anyhow::Result<String> {
    let intent_id = order_service::get_order(state, user, order_id)
        .await?
        .data
        .and_then(|o| o.payment_intent_id)
        .expect("intent id");
    Ok(intent_id)
}

async fn set_status(
    state: &AppState,
    admin: &AuthUser,
    order_id: Uuid,
    status: OrderStatus,
) -> anyhow::Result<()> {
    order_service::update_status(state, admin, order_id, UpdateOrderStatusRequest { status }).await?;
    Ok(())
}

fn succeeded_event(order_id: Uuid, intent_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": webhook::PAYMENT_SUCCEEDED,
        "data": {
            "object": {
                "id": intent_id,
                "metadata": { "order_id": order_id.to_string() }
            }
        }
    }))
    .expect("event json")
}

#[tokio::test]
async fn intent_is_created_once_and_reused() -> anyhow::Result<()> {
    let Some(app) = common::setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let user = common::create_user(state, Role::User).await?;
    let order_id = pending_order(state, &user).await?;

    let first = client_secret(state, &user, order_id).await?;
    let second = client_secret(state, &user, order_id).await?;

    assert_eq!(first, second);
    assert!(first.starts_with("pi_mock_"));
    assert_eq!(app.gateway.calls(), 1);

    let order = order_service::get_order(state, &user, order_id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.payment_intent_id.is_some());
    Ok(())
}

#[tokio::test]
async fn concurrent_intent_requests_share_one_intent() -> anyhow::Result<()> {
    let Some(app) =
        common::setup_with(MockGateway::new().with_delay(Duration::from_millis(50))).await?
    else {
        return Ok(());
    };
    let state = &app.state;
    let user = common::create_user(state, Role::User).await?;
    let order_id = pending_order(state, &user).await?;

    let (a, b) = tokio::join!(
        client_secret(state, &user, order_id),
        client_secret(state, &user, order_id)
    );

    assert_eq!(a?, b?);
    assert_eq!(app.gateway.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn only_owner_or_admin_may_pay() -> anyhow::Result<()> {
    let Some(app) = common::setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let owner = common::create_user(state, Role::User).await?;
    let stranger = common::create_user(state, Role::User).await?;
    let order_id = pending_order(state, &owner).await?;

    let err = client_secret(state, &stranger, order_id)
        .await
        .expect_err("stranger");
    assert!(matches!(err, AppError::Forbidden));

    let err = client_secret(state, &owner, Uuid::new_v4())
        .await
        .expect_err("missing order");
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(app.gateway.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn gateway_outage_leaves_order_pending() -> anyhow::Result<()> {
    let Some(app) = common::setup_with(MockGateway::always_failing(GatewayError::Unavailable(
        "maintenance".into(),
    )))
    .await?
    else {
        return Ok(());
    };
    let state = &app.state;
    let user = common::create_user(state, Role::User).await?;
    let order_id = pending_order(state, &user).await?;

    let err = client_secret(state, &user, order_id)
        .await
        .expect_err("gateway down");
    assert!(matches!(err, AppError::ExternalService(_)));
    assert!(app.gateway.calls() > 1, "transient failures are retried");

    let order = order_service::get_order(state, &user, order_id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.status, OrderStatus::Pending);
    assert!(order.payment_intent_id.is_none());
    Ok(())
}

#[tokio::test]
async fn rejected_intent_is_not_retried() -> anyhow::Result<()> {
    let Some(app) = common::setup_with(MockGateway::always_failing(GatewayError::Rejected(
        "amount too small".into(),
    )))
    .await?
    else {
        return Ok(());
    };
    let state = &app.state;
    let user = common::create_user(state, Role::User).await?;
    let order_id = pending_order(state, &user).await?;

    let err = client_secret(state, &user, order_id)
        .await
        .expect_err("rejected");
    assert!(matches!(err, AppError::ExternalService(_)));
    assert_eq!(app.gateway.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn signed_webhook_marks_order_paid() -> anyhow::Result<()> {
    let Some(app) = common::setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let user = common::create_user(state, Role::User).await?;
    let order_id = pending_order(state, &user).await?;
    client_secret(state, &user, order_id).await?;

    let intent_id = order_service::get_order(state, &user, order_id)
        .await?
        .data
        .and_then(|o| o.payment_intent_id)
        .expect("intent id");

    let body = succeeded_event(order_id, &intent_id);
    let signature = webhook::sign(&body, common::WEBHOOK_SECRET, Utc::now().timestamp());

    let ack = payment_service::handle_webhook(state, Some(&signature), &body)
        .await?
        .data
        .expect("ack");
    assert!(ack.received);

    let order = order_service::get_order(state, &user, order_id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.status, OrderStatus::Paid);
    assert!(order.paid_at.is_some());

    // Redelivery of the same event changes nothing.
    payment_service::handle_webhook(state, Some(&signature), &body).await?;
    let again = order_service::get_order(state, &user, order_id)
        .await?
        .data
        .expect("order");
    assert_eq!(again.status, OrderStatus::Paid);
    assert_eq!(again.paid_at, order.paid_at);

    // A paid order no longer hands out a client secret.
    let err = client_secret(state, &user, order_id)
        .await
        .expect_err("already paid");
    assert!(matches!(err, AppError::Conflict(_)));

    let admin = common::create_user(state, Role::Admin).await?;
    let err = client_secret(state, &admin, order_id)
        .await
        .expect_err("already paid, whoever asks");
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(app.gateway.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn unsigned_or_mismatched_webhooks_are_refused() -> anyhow::Result<()> {
    let Some(app) = common::setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let user = common::create_user(state, Role::User).await?;
    let order_id = pending_order(state, &user).await?;
    client_secret(state, &user, order_id).await?;

    let body = succeeded_event(order_id, "pi_somebody_else");
    let now = Utc::now().timestamp();

    let err = payment_service::handle_webhook(state, None, &body)
        .await
        .expect_err("missing signature");
    assert!(matches!(err, AppError::Validation(_)));

    let forged = webhook::sign(&body, "wrong-secret", now);
    let err = payment_service::handle_webhook(state, Some(&forged), &body)
        .await
        .expect_err("forged signature");
    assert!(matches!(err, AppError::Validation(_)));

    let signature = webhook::sign(&body, common::WEBHOOK_SECRET, now);
    let err = payment_service::handle_webhook(state, Some(&signature), &body)
        .await
        .expect_err("intent of another order");
    assert!(matches!(err, AppError::Conflict(_)));

    let order = order_service::get_order(state, &user, order_id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.status, OrderStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn unrelated_webhook_events_are_acknowledged() -> anyhow::Result<()> {
    let Some(app) = common::setup().await? else {
        return Ok(());
    };
    let body = serde_json::to_vec(&serde_json::json!({
        "type": "payment_intent.created",
        "data": { "object": { "id": "pi_whatever" } }
    }))?;
    let signature = webhook::sign(&body, common::WEBHOOK_SECRET, Utc::now().timestamp());

    let ack = payment_service::handle_webhook(&app.state, Some(&signature), &body)
        .await?
        .data
        .expect("ack");
    assert!(ack.received);
    Ok(())
}

#[tokio::test]
async fn payment_for_cancelled_order_is_acknowledged_without_change() -> anyhow::Result<()> {
    let Some(app) = common::setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let user = common::create_user(state, Role::User).await?;
    let admin = common::create_user(state, Role::Admin).await?;
    let order_id = pending_order(state, &user).await?;
    client_secret(state, &user, order_id).await?;
    let intent_id = stored_intent_id(state, &user, order_id).await?;

    set_status(state, &admin, order_id, OrderStatus::Cancelled).await?;

    let body = succeeded_event(order_id, &intent_id);
    let signature = webhook::sign(&body, common::WEBHOOK_SECRET, Utc::now().timestamp());
    let ack = payment_service::handle_webhook(state, Some(&signature), &body)
        .await?
        .data
        .expect("ack");
    assert!(ack.received);

    let order = order_service::get_order(state, &user, order_id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert!(order.paid_at.is_none());
    Ok(())
}

#[tokio::test]
async fn late_redelivery_does_not_disturb_shipped_order() -> anyhow::Result<()> {
    let Some(app) = common::setup().await? else {
        return Ok(());
    };
    let state = &app.state;
    let user = common::create_user(state, Role::User).await?;
    let admin = common::create_user(state, Role::Admin).await?;
    let order_id = pending_order(state, &user).await?;
    client_secret(state, &user, order_id).await?;
    let intent_id = stored_intent_id(state, &user, order_id).await?;

    let body = succeeded_event(order_id, &intent_id);
    let signature = webhook::sign(&body, common::WEBHOOK_SECRET, Utc::now().timestamp());
    payment_service::handle_webhook(state, Some(&signature), &body).await?;
    set_status(state, &admin, order_id, OrderStatus::Shipped).await?;

    payment_service::handle_webhook(state, Some(&signature), &body).await?;

    let order = order_service::get_order(state, &user, order_id)
        .await?
        .data
        .expect("order");
    assert_eq!(order.status, OrderStatus::Shipped);
    assert!(order.paid_at.is_some());
    Ok(())
}

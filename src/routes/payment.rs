use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};

use crate::{
    dto::payment::{ClientSecretResponse, CreateIntentRequest, WebhookAck},
    error::AppResult,
    middleware::auth::AuthUser,
    payment::webhook::SIGNATURE_HEADER,
    response::ApiResponse,
    services::payment_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create-intent", post(create_intent))
        .route("/webhook", post(webhook))
}

#[utoipa::path(
    post,
    path = "/api/payment/create-intent",
    request_body = CreateIntentRequest,
    responses(
        (status = 200, description = "Client secret of the order's payment intent", body = ApiResponse<ClientSecretResponse>),
        (status = 403, description = "Not the owner or an administrator"),
        (status = 404, description = "Order not found"),
        (status = 409, description = "Order already paid or processed"),
        (status = 502, description = "Payment gateway unavailable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Payment"
)]
pub async fn create_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CreateIntentRequest>,
) -> AppResult<Json<ApiResponse<ClientSecretResponse>>> {
    let resp = payment_service::create_payment_intent(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/payment/webhook",
    request_body(content = String, description = "Signed gateway event", content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted", body = ApiResponse<WebhookAck>),
        (status = 400, description = "Missing or invalid signature"),
        (status = 409, description = "Event does not match the order"),
    ),
    tag = "Payment"
)]
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ApiResponse<WebhookAck>>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let resp = payment_service::handle_webhook(&state, signature, &body).await?;
    Ok(Json(resp))
}

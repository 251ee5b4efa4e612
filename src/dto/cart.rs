use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// Body of `POST /cart` and `PUT /cart`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CartItemRequest {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RemoveCartItemRequest {
    pub product_id: Uuid,
}

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{models::Order, order_status::OrderStatus, routes::params::PageInfo};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub address_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub current_page: i64,
    pub total_pages: i64,
    pub total_orders: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl OrderPage {
    pub fn new(orders: Vec<Order>, info: PageInfo) -> Self {
        Self {
            orders,
            current_page: info.current_page,
            total_pages: info.total_pages,
            total_orders: info.total,
            has_next_page: info.has_next_page,
            has_prev_page: info.has_prev_page,
        }
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

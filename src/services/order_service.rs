use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sea_orm::sea_query::LockType;
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::orders::{OrderPage, PlaceOrderRequest, UpdateOrderStatusRequest},
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Order, OrderLine},
    order_status::OrderStatus,
    policy,
    response::{ApiResponse, Meta},
    routes::params::{PageInfo, Pagination},
    services::{address_service, cart_service},
    state::AppState,
};

/// Turn the caller's cart into a pending order.
///
/// The cart row stays locked from the first read until commit, and the order
/// insert and the cart clear share one transaction: either the order exists
/// and the cart is empty, or nothing changed. A concurrent second checkout
/// waits on the lock and then finds an empty cart.
pub async fn place_order(
    state: &AppState,
    user: &AuthUser,
    payload: PlaceOrderRequest,
) -> AppResult<ApiResponse<Order>> {
    let txn = state.orm.begin().await?;

    let cart = cart_service::lock_cart(&txn, user.user_id)
        .await?
        .ok_or(AppError::EmptyCart)?;
    let lines = cart_service::priced_lines(&txn, cart.id).await?;
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    if address_service::find_owned(&txn, payload.address_id, user.user_id)
        .await?
        .is_none()
    {
        return Err(AppError::InvalidAddress);
    }

    let total = cart_service::sum_lines(&lines)?;
    let now = Utc::now();

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        address_id: Set(payload.address_id),
        total_amount: Set(total),
        status: Set(OrderStatus::Pending),
        payment_intent_id: Set(None),
        payment_client_secret: Set(None),
        paid_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    let mut items = Vec::with_capacity(lines.len());
    for (position, line) in lines.iter().enumerate() {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            position: Set(position as i32),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
        }
        .insert(&txn)
        .await?;
        items.push(item);
    }

    cart_service::delete_lines(&txn, cart.id).await?;
    cart_service::touch(&txn, cart).await?;

    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        user_id = %user.user_id,
        total,
        lines = items.len(),
        "order placed"
    );
    log_audit(
        &state.orm,
        Some(user.user_id),
        AuditAction::Checkout,
        serde_json::json!({ "order_id": order.id, "total": total }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order placed",
        order_from_entity(order, items),
        Some(Meta::empty()),
    ))
}

/// Newest first. Administrators page through every order, everyone else
/// through their own.
pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<OrderPage>> {
    let (page, limit, offset) = pagination.normalize();

    let mut finder = Orders::find();
    if !policy::can_list_all_orders(user) {
        finder = finder.filter(OrderCol::UserId.eq(user.user_id));
    }
    let finder = finder
        .order_by_desc(OrderCol::CreatedAt)
        .order_by_desc(OrderCol::Id);

    let total = finder.clone().count(&state.orm).await? as i64;
    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;
    let orders = attach_items(&state.orm, orders).await?;

    let info = PageInfo::new(page, limit, total);
    Ok(ApiResponse::success(
        "Orders",
        OrderPage::new(orders, info),
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound("Order not found"))?;
    policy::ensure(policy::can_view_order(user, order.user_id))?;

    let items = items_of(&state.orm, order.id).await?;
    Ok(ApiResponse::success(
        "Order",
        order_from_entity(order, items),
        Some(Meta::empty()),
    ))
}

/// Administrative status change (ship, deliver, cancel), checked against the
/// order lifecycle. `paid` is only reachable through [`mark_paid`].
pub async fn update_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    policy::ensure(policy::can_transition_order(user))?;

    let txn = state.orm.begin().await?;
    let order = lock_order(&txn, id).await?;
    let from = order.status;
    if payload.status == OrderStatus::Paid {
        return Err(AppError::InvalidTransition {
            from,
            to: OrderStatus::Paid,
        });
    }
    let order = transition(&txn, order, payload.status).await?;
    let items = items_of(&txn, order.id).await?;
    txn.commit().await?;

    tracing::info!(order_id = %order.id, from = %from, to = %order.status, "order status changed");
    log_audit(
        &state.orm,
        Some(user.user_id),
        AuditAction::OrderStatusUpdate,
        serde_json::json!({ "order_id": order.id, "from": from, "to": order.status }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order updated",
        order_from_entity(order, items),
        Some(Meta::empty()),
    ))
}

/// Record a confirmed payment for `id`. Redelivery of the same confirmation
/// is a no-op, including after the order has shipped. A confirmation for an
/// order that was cancelled in the meantime is logged and left alone.
pub async fn mark_paid(state: &AppState, id: Uuid, intent_id: &str) -> AppResult<Order> {
    let txn = state.orm.begin().await?;
    let order = lock_order(&txn, id).await?;

    if order.payment_intent_id.as_deref() != Some(intent_id) {
        return Err(AppError::Conflict(
            "Payment intent does not belong to this order".into(),
        ));
    }
    if order.paid_at.is_some() || order.status.is_terminal() {
        if order.paid_at.is_none() {
            tracing::warn!(
                order_id = %order.id,
                intent_id,
                status = %order.status,
                "payment confirmed for an order that can no longer be paid"
            );
        }
        let items = items_of(&txn, order.id).await?;
        txn.commit().await?;
        return Ok(order_from_entity(order, items));
    }

    let order = transition(&txn, order, OrderStatus::Paid).await?;
    let items = items_of(&txn, order.id).await?;
    txn.commit().await?;

    tracing::info!(order_id = %order.id, intent_id, "order paid");
    log_audit(
        &state.orm,
        Some(order.user_id),
        AuditAction::OrderPaid,
        serde_json::json!({ "order_id": order.id, "payment_intent_id": intent_id }),
    )
    .await;

    Ok(order_from_entity(order, items))
}

/// Lock order `id` until `txn` ends.
pub(crate) async fn lock_order(txn: &DatabaseTransaction, id: Uuid) -> AppResult<OrderModel> {
    Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(txn)
        .await?
        .ok_or(AppError::NotFound("Order not found"))
}

/// Apply one lifecycle step to a locked order.
async fn transition(
    txn: &DatabaseTransaction,
    order: OrderModel,
    to: OrderStatus,
) -> AppResult<OrderModel> {
    let from = order.status;
    if !from.can_transition_to(to) {
        return Err(AppError::InvalidTransition { from, to });
    }

    let now = Utc::now();
    let mut active: OrderActive = order.into();
    active.status = Set(to);
    active.updated_at = Set(now.into());
    if to == OrderStatus::Paid {
        active.paid_at = Set(Some(now.into()));
    }
    Ok(active.update(txn).await?)
}

pub(crate) async fn items_of<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> AppResult<Vec<OrderItemModel>> {
    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order_id))
        .order_by_asc(OrderItemCol::Position)
        .all(conn)
        .await?;
    Ok(items)
}

async fn attach_items<C: ConnectionTrait>(
    conn: &C,
    orders: Vec<OrderModel>,
) -> AppResult<Vec<Order>> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let mut by_order: HashMap<Uuid, Vec<OrderItemModel>> = HashMap::new();
    for item in OrderItems::find()
        .filter(OrderItemCol::OrderId.is_in(ids))
        .order_by_asc(OrderItemCol::OrderId)
        .order_by_asc(OrderItemCol::Position)
        .all(conn)
        .await?
    {
        by_order.entry(item.order_id).or_default().push(item);
    }

    Ok(orders
        .into_iter()
        .map(|order| {
            let items = by_order.remove(&order.id).unwrap_or_default();
            order_from_entity(order, items)
        })
        .collect())
}

pub(crate) fn order_from_entity(model: OrderModel, items: Vec<OrderItemModel>) -> Order {
    Order {
        id: model.id,
        user_id: model.user_id,
        address_id: model.address_id,
        items: items
            .into_iter()
            .map(|item| OrderLine {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect(),
        total: model.total_amount,
        status: model.status,
        payment_intent_id: model.payment_intent_id,
        paid_at: model.paid_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

//! Per-user cart.
//!
//! Every mutation runs in a transaction that holds `SELECT … FOR UPDATE` on
//! the user's `carts` row, so concurrent add/update/remove calls and checkout
//! for the same user are serialized rather than losing updates.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait,
    DatabaseTransaction, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use sea_orm::sea_query::{LockType, OnConflict};
use uuid::Uuid;

use crate::{
    audit::{AuditAction, log_audit},
    dto::cart::{CartItemRequest, RemoveCartItemRequest},
    entity::{
        cart_items::{ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems},
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts, Model as CartModel},
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{Cart, CartLine},
    response::{ApiResponse, Meta},
    services::catalog_service,
    state::AppState,
};

/// A cart line joined with the product's current catalog price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: i64,
    pub quantity: i32,
}

/// `Σ unit_price × quantity` in minor units. Fails rather than wrapping.
pub fn sum_lines(lines: &[PricedLine]) -> AppResult<i64> {
    lines.iter().try_fold(0i64, |acc, line| {
        line.unit_price
            .checked_mul(i64::from(line.quantity))
            .and_then(|line_total| acc.checked_add(line_total))
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("cart total overflows")))
    })
}

pub async fn get_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Cart>> {
    let txn = state.orm.begin().await?;
    ensure_cart(&txn, user.user_id).await?;
    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user.user_id))
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("cart vanished after upsert")))?;
    let view = load_view(&txn, &cart).await?;
    txn.commit().await?;

    Ok(ApiResponse::success("Cart", view, Some(Meta::empty())))
}

pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    payload: CartItemRequest,
) -> AppResult<ApiResponse<Cart>> {
    validate_quantity(payload.quantity)?;

    let txn = state.orm.begin().await?;
    if catalog_service::price_of(&txn, payload.product_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("Product not found"));
    }

    ensure_cart(&txn, user.user_id).await?;
    let cart = lock_cart(&txn, user.user_id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("cart vanished after upsert")))?;

    match find_line(&txn, cart.id, payload.product_id).await? {
        Some(line) => {
            let quantity = line
                .quantity
                .checked_add(payload.quantity)
                .ok_or_else(|| AppError::Validation("quantity is too large".into()))?;
            let mut active: CartItemActive = line.into();
            active.quantity = Set(quantity);
            active.update(&txn).await?;
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(payload.product_id),
                quantity: Set(payload.quantity),
                created_at: NotSet,
            }
            .insert(&txn)
            .await?;
        }
    }

    let cart = touch(&txn, cart).await?;
    let view = load_view(&txn, &cart).await?;
    txn.commit().await?;

    log_audit(
        &state.orm,
        Some(user.user_id),
        AuditAction::CartUpdate,
        serde_json::json!({ "product_id": payload.product_id, "added": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success("Item added to cart", view, Some(Meta::empty())))
}

pub async fn set_item_quantity(
    state: &AppState,
    user: &AuthUser,
    payload: CartItemRequest,
) -> AppResult<ApiResponse<Cart>> {
    validate_quantity(payload.quantity)?;

    let txn = state.orm.begin().await?;
    let cart = lock_cart(&txn, user.user_id)
        .await?
        .ok_or(AppError::NotFound("Cart not found"))?;
    let line = find_line(&txn, cart.id, payload.product_id)
        .await?
        .ok_or(AppError::NotFound("Product not in cart"))?;

    let mut active: CartItemActive = line.into();
    active.quantity = Set(payload.quantity);
    active.update(&txn).await?;

    let cart = touch(&txn, cart).await?;
    let view = load_view(&txn, &cart).await?;
    txn.commit().await?;

    log_audit(
        &state.orm,
        Some(user.user_id),
        AuditAction::CartUpdate,
        serde_json::json!({ "product_id": payload.product_id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success("Cart updated", view, Some(Meta::empty())))
}

/// Removing a product that is not in the cart is not an error.
pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    payload: RemoveCartItemRequest,
) -> AppResult<ApiResponse<Cart>> {
    let txn = state.orm.begin().await?;
    let cart = lock_cart(&txn, user.user_id)
        .await?
        .ok_or(AppError::NotFound("Cart not found"))?;

    let result = CartItems::delete_many()
        .filter(
            Condition::all()
                .add(CartItemCol::CartId.eq(cart.id))
                .add(CartItemCol::ProductId.eq(payload.product_id)),
        )
        .exec(&txn)
        .await?;

    let cart = if result.rows_affected > 0 {
        touch(&txn, cart).await?
    } else {
        cart
    };
    let view = load_view(&txn, &cart).await?;
    txn.commit().await?;

    if result.rows_affected > 0 {
        log_audit(
            &state.orm,
            Some(user.user_id),
            AuditAction::CartRemove,
            serde_json::json!({ "product_id": payload.product_id }),
        )
        .await;
    }

    Ok(ApiResponse::success("Removed from cart", view, Some(Meta::empty())))
}

pub async fn clear_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<Cart>> {
    let txn = state.orm.begin().await?;
    let cart = lock_cart(&txn, user.user_id)
        .await?
        .ok_or(AppError::NotFound("Cart not found"))?;

    delete_lines(&txn, cart.id).await?;
    let cart = touch(&txn, cart).await?;
    let view = load_view(&txn, &cart).await?;
    txn.commit().await?;

    log_audit(
        &state.orm,
        Some(user.user_id),
        AuditAction::CartClear,
        serde_json::json!({ "cart_id": view.id }),
    )
    .await;

    Ok(ApiResponse::success("Cart cleared", view, Some(Meta::empty())))
}

/// Create the user's cart if it does not exist yet. Safe under concurrent
/// first access thanks to the unique `user_id`.
pub(crate) async fn ensure_cart<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> AppResult<()> {
    let insert = Carts::insert(CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: NotSet,
        updated_at: NotSet,
    })
    .on_conflict(OnConflict::column(CartCol::UserId).do_nothing().to_owned())
    .exec_without_returning(conn)
    .await;

    match insert {
        Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Lock the user's cart row until `txn` ends. `None` if the user has no cart.
pub(crate) async fn lock_cart(
    txn: &DatabaseTransaction,
    user_id: Uuid,
) -> AppResult<Option<CartModel>> {
    let cart = Carts::find()
        .filter(CartCol::UserId.eq(user_id))
        .lock(LockType::Update)
        .one(txn)
        .await?;
    Ok(cart)
}

/// Cart lines in insertion order, priced at the catalog's current prices.
pub(crate) async fn priced_lines<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> AppResult<Vec<PricedLine>> {
    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart_id))
        .order_by_asc(CartItemCol::CreatedAt)
        .order_by_asc(CartItemCol::Id)
        .find_also_related(Products)
        .all(conn)
        .await?;

    rows.into_iter()
        .map(|(line, product)| {
            let product = product.ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!(
                    "cart line references missing product {}",
                    line.product_id
                ))
            })?;
            Ok(PricedLine {
                product_id: line.product_id,
                name: product.name,
                unit_price: product.price,
                quantity: line.quantity,
            })
        })
        .collect()
}

pub(crate) async fn delete_lines<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> AppResult<u64> {
    let result = CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

pub(crate) async fn touch<C: ConnectionTrait>(conn: &C, cart: CartModel) -> AppResult<CartModel> {
    let mut active: CartActive = cart.into();
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(conn).await?)
}

async fn find_line<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
) -> AppResult<Option<crate::entity::cart_items::Model>> {
    let line = CartItems::find()
        .filter(
            Condition::all()
                .add(CartItemCol::CartId.eq(cart_id))
                .add(CartItemCol::ProductId.eq(product_id)),
        )
        .one(conn)
        .await?;
    Ok(line)
}

async fn load_view<C: ConnectionTrait>(conn: &C, cart: &CartModel) -> AppResult<Cart> {
    let lines = priced_lines(conn, cart.id).await?;
    let subtotal = sum_lines(&lines)?;
    Ok(Cart {
        id: cart.id,
        user_id: cart.user_id,
        items: lines
            .into_iter()
            .map(|line| CartLine {
                product_id: line.product_id,
                name: line.name,
                unit_price: line.unit_price,
                quantity: line.quantity,
            })
            .collect(),
        subtotal,
        updated_at: cart.updated_at.with_timezone(&Utc),
    })
}

fn validate_quantity(quantity: i32) -> AppResult<()> {
    if quantity < 1 {
        return Err(AppError::Validation(
            "quantity must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

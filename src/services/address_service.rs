use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::{
    dto::addresses::{AddressList, CreateAddressRequest},
    entity::addresses::{
        ActiveModel as AddressActive, Column as AddressCol, Entity as Addresses,
        Model as AddressModel,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::Address,
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Address `address_id` if it belongs to `user_id`. Someone else's address
/// is indistinguishable from a missing one.
pub async fn find_owned<C: ConnectionTrait>(
    conn: &C,
    address_id: Uuid,
    user_id: Uuid,
) -> AppResult<Option<AddressModel>> {
    let address = Addresses::find()
        .filter(
            Condition::all()
                .add(AddressCol::Id.eq(address_id))
                .add(AddressCol::UserId.eq(user_id)),
        )
        .one(conn)
        .await?;
    Ok(address)
}

pub async fn create_address(
    state: &AppState,
    user: &AuthUser,
    payload: CreateAddressRequest,
) -> AppResult<ApiResponse<Address>> {
    let required = [
        ("addressLine1", &payload.address_line1),
        ("street", &payload.street),
        ("city", &payload.city),
        ("state", &payload.state),
        ("pinCode", &payload.pin_code),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(AppError::Validation(format!("{field} is required")));
    }

    let address = AddressActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        address_line1: Set(payload.address_line1),
        street: Set(payload.street),
        landmark: Set(payload.landmark.filter(|l| !l.trim().is_empty())),
        city: Set(payload.city),
        state: Set(payload.state),
        pin_code: Set(payload.pin_code),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    Ok(ApiResponse::success(
        "Address created",
        address_from_entity(address),
        Some(Meta::empty()),
    ))
}

pub async fn list_addresses(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<AddressList>> {
    let items = Addresses::find()
        .filter(AddressCol::UserId.eq(user.user_id))
        .order_by_asc(AddressCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(address_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Addresses",
        AddressList { items },
        Some(Meta::empty()),
    ))
}

fn address_from_entity(model: AddressModel) -> Address {
    Address {
        id: model.id,
        user_id: model.user_id,
        address_line1: model.address_line1,
        street: model.street,
        landmark: model.landmark,
        city: model.city,
        state: model.state,
        pin_code: model.pin_code,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

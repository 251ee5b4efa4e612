//! Capability checks. Services ask these questions instead of comparing
//! roles themselves.

use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, Role},
};

/// Owners see their own orders; administrators see every order.
pub fn can_view_order(requester: &AuthUser, order_owner: Uuid) -> bool {
    requester.user_id == order_owner || requester.role == Role::Admin
}

pub fn can_list_all_orders(requester: &AuthUser) -> bool {
    requester.role == Role::Admin
}

/// Fulfilment transitions (ship, deliver, cancel) are an administrative action.
/// Payment is not one of them; see `order_service::mark_paid`.
pub fn can_transition_order(requester: &AuthUser) -> bool {
    requester.role == Role::Admin
}

pub fn ensure(allowed: bool) -> AppResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> AuthUser {
        AuthUser::new(Uuid::new_v4(), Role::User)
    }

    fn admin() -> AuthUser {
        AuthUser::new(Uuid::new_v4(), Role::Admin)
    }

    #[test]
    fn owner_can_view_own_order() {
        let owner = user();
        assert!(can_view_order(&owner, owner.user_id));
    }

    #[test]
    fn stranger_cannot_view_order() {
        let stranger = user();
        assert!(!can_view_order(&stranger, Uuid::new_v4()));
        assert!(matches!(
            ensure(can_view_order(&stranger, Uuid::new_v4())),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn admin_can_view_and_list_everything() {
        let admin = admin();
        assert!(can_view_order(&admin, Uuid::new_v4()));
        assert!(can_list_all_orders(&admin));
        assert!(can_transition_order(&admin));
    }

    #[test]
    fn regular_user_cannot_list_all_or_transition() {
        let user = user();
        assert!(!can_list_all_orders(&user));
        assert!(!can_transition_order(&user));
    }

    #[test]
    fn unknown_role_is_not_privileged() {
        assert_eq!(Role::parse("superuser"), Role::User);
        assert_eq!(Role::parse("admin"), Role::Admin);
    }
}

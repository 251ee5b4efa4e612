use sea_orm::{ActiveModelTrait, ActiveValue::NotSet, ConnectionTrait, Set};
use serde_json::Value;
use uuid::Uuid;

use crate::entity::audit_logs::ActiveModel as AuditActive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    UserRegister,
    UserLogin,
    CartUpdate,
    CartRemove,
    CartClear,
    Checkout,
    PaymentIntent,
    OrderPaid,
    OrderStatusUpdate,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserRegister => "user_register",
            AuditAction::UserLogin => "user_login",
            AuditAction::CartUpdate => "cart_update",
            AuditAction::CartRemove => "cart_remove",
            AuditAction::CartClear => "cart_clear",
            AuditAction::Checkout => "checkout",
            AuditAction::PaymentIntent => "payment_intent",
            AuditAction::OrderPaid => "order_paid",
            AuditAction::OrderStatusUpdate => "order_status_update",
        }
    }

    fn resource(&self) -> &'static str {
        match self {
            AuditAction::UserRegister | AuditAction::UserLogin => "users",
            AuditAction::CartUpdate | AuditAction::CartRemove | AuditAction::CartClear => "carts",
            AuditAction::Checkout
            | AuditAction::PaymentIntent
            | AuditAction::OrderPaid
            | AuditAction::OrderStatusUpdate => "orders",
        }
    }
}

/// Append an audit record. Best effort: a failed write is logged and never
/// fails the request that triggered it.
pub async fn log_audit<C: ConnectionTrait>(
    conn: &C,
    user_id: Option<Uuid>,
    action: AuditAction,
    metadata: Value,
) {
    let entry = AuditActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        action: Set(action.as_str().to_string()),
        resource: Set(Some(action.resource().to_string())),
        metadata: Set(Some(metadata)),
        created_at: NotSet,
    };

    if let Err(err) = entry.insert(conn).await {
        tracing::warn!(error = %err, action = action.as_str(), "audit log failed");
    }
}

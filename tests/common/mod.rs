#![allow(dead_code)]

use std::sync::Arc;

use sea_orm::{ActiveModelTrait, ActiveValue::NotSet, Set};
use storefront_checkout::{
    db::{create_orm_conn, run_migrations},
    dto::addresses::CreateAddressRequest,
    entity::{products::ActiveModel as ProductActive, users::ActiveModel as UserActive},
    middleware::auth::{AuthUser, Role},
    models::Cart,
    payment::{PaymentClient, RetrySettings, mock::MockGateway},
    routes::params::Pagination,
    services::address_service,
    state::AppState,
};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test";

pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
}

/// Connects to `TEST_DATABASE_URL` (or `DATABASE_URL`) and applies migrations.
/// Returns `None` when neither is set so the caller can skip.
pub async fn setup() -> anyhow::Result<Option<TestApp>> {
    setup_with(MockGateway::new()).await
}

pub async fn setup_with(gateway: MockGateway) -> anyhow::Result<Option<TestApp>> {
    let database_url = match std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
    {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            return Ok(None);
        }
    };

    let orm = create_orm_conn(&database_url).await?;
    run_migrations(&orm).await?;

    let gateway = Arc::new(gateway);
    let payments = PaymentClient::new(
        gateway.clone(),
        "usd",
        WEBHOOK_SECRET,
        RetrySettings {
            initial_interval: std::time::Duration::from_millis(5),
            max_elapsed: std::time::Duration::from_millis(200),
        },
    );

    Ok(Some(TestApp {
        state: AppState {
            orm,
            jwt_secret: "test-secret".into(),
            payments,
        },
        gateway,
    }))
}

/// Tests share one database, so every user gets a fresh email.
pub async fn create_user(state: &AppState, role: Role) -> anyhow::Result<AuthUser> {
    let id = Uuid::new_v4();
    UserActive {
        id: Set(id),
        email: Set(format!("{}-{id}@example.com", role.as_str())),
        password_hash: Set("not-a-real-hash".into()),
        role: Set(role.as_str().to_string()),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(AuthUser::new(id, role))
}

pub async fn create_product(state: &AppState, price: i64) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    ProductActive {
        id: Set(id),
        name: Set(format!("Widget {id}")),
        description: Set(Some("A product for testing".into())),
        price: Set(price),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;
    Ok(id)
}

pub async fn create_address(state: &AppState, user: &AuthUser) -> anyhow::Result<Uuid> {
    let resp = address_service::create_address(
        state,
        user,
        CreateAddressRequest {
            address_line1: "Flat 4".into(),
            street: "Main Street".into(),
            landmark: None,
            city: "Springfield".into(),
            state: "Oregon".into(),
            pin_code: "97403".into(),
        },
    )
    .await?;
    Ok(resp.data.expect("address").id)
}

pub fn quantity_of(cart: &Cart, product_id: Uuid) -> Option<i32> {
    cart.items
        .iter()
        .find(|line| line.product_id == product_id)
        .map(|line| line.quantity)
}

pub fn page(page: i64, limit: i64) -> Pagination {
    Pagination {
        page: Some(page),
        limit: Some(limit),
    }
}

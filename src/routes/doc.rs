use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        addresses::{AddressList, CreateAddressRequest},
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        cart::{CartItemRequest, RemoveCartItemRequest},
        orders::{OrderPage, PlaceOrderRequest, UpdateOrderStatusRequest},
        payment::{ClientSecretResponse, CreateIntentRequest, WebhookAck},
        products::ProductList,
    },
    middleware::auth::Role,
    models::{Address, Cart, CartLine, Order, OrderLine, Product, User},
    order_status::OrderStatus,
    response::{ApiResponse, Meta},
    routes::{addresses, admin, auth, cart, health, orders, params, payment, products},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        products::list_products,
        products::get_product,
        addresses::create_address,
        addresses::list_addresses,
        cart::get_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_cart_item,
        cart::clear_cart,
        orders::place_order,
        orders::list_orders,
        orders::get_order,
        payment::create_intent,
        payment::webhook,
        admin::update_order_status,
    ),
    components(
        schemas(
            User,
            Role,
            Product,
            Address,
            Cart,
            CartLine,
            Order,
            OrderLine,
            OrderStatus,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            CreateAddressRequest,
            AddressList,
            CartItemRequest,
            RemoveCartItemRequest,
            PlaceOrderRequest,
            UpdateOrderStatusRequest,
            OrderPage,
            CreateIntentRequest,
            ClientSecretResponse,
            WebhookAck,
            ProductList,
            params::Pagination,
            Meta,
            ApiResponse<Cart>,
            ApiResponse<Order>,
            ApiResponse<OrderPage>,
            ApiResponse<ClientSecretResponse>,
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Catalog endpoints"),
        (name = "Addresses", description = "Shipping address endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Checkout and order history"),
        (name = "Payment", description = "Payment intents and gateway webhooks"),
        (name = "Admin", description = "Order fulfilment"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

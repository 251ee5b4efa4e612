use std::sync::Arc;

use crate::{db::OrmConn, payment::PaymentClient};

#[derive(Clone)]
pub struct AppState {
    pub orm: OrmConn,
    pub jwt_secret: Arc<str>,
    pub payments: PaymentClient,
}

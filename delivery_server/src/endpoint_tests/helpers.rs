use actix_web::{
    body::MessageBody,
    http::{header::AUTHORIZATION, StatusCode},
    test,
    test::TestRequest,
    web::ServiceConfig,
    App,
};
use chrono::Utc;
use delivery_engine::{
    db_types::{DeliveryAddress, Order, OrderStatusType, PaymentMethod, PaymentStatus, Role},
    events::EventProducers,
};
use dlv_common::Money;
use log::debug;
use serde_json::Value;

use crate::{
    auth::{TokenIssuer, TokenVerifier},
    config::AuthConfig,
    middleware::JwtMiddlewareFactory,
    server::{json_config, path_config, query_config},
};

// DO NOT re-use this secret anywhere.
pub fn get_auth_config() -> AuthConfig {
    AuthConfig::new("endpoint-tests-secret-0b7f2c91e4")
}

pub fn issue_token(role: Role, id: i64) -> String {
    TokenIssuer::new(&get_auth_config()).issue_token(role, id, None).unwrap()
}

pub fn producers() -> EventProducers {
    EventProducers::default()
}

pub async fn get_request<F>(token: &str, path: &str, configure: F) -> (StatusCode, Value)
where F: FnOnce(&mut ServiceConfig) {
    let req = with_token(TestRequest::get().uri(path), token);
    call(req, configure).await
}

pub async fn post_request<F>(token: &str, path: &str, body: Option<Value>, configure: F) -> (StatusCode, Value)
where F: FnOnce(&mut ServiceConfig) {
    let mut req = with_token(TestRequest::post().uri(path), token);
    if let Some(body) = body {
        req = req.set_json(body);
    }
    call(req, configure).await
}

fn with_token(req: TestRequest, token: &str) -> TestRequest {
    if token.is_empty() {
        req
    } else {
        req.insert_header((AUTHORIZATION, format!("Bearer {token}")))
    }
}

async fn call<F>(req: TestRequest, configure: F) -> (StatusCode, Value)
where F: FnOnce(&mut ServiceConfig) {
    let verifier = TokenVerifier::new(&get_auth_config());
    let app = App::new()
        .wrap(JwtMiddlewareFactory::new(verifier))
        .app_data(json_config())
        .app_data(path_config())
        .app_data(query_config())
        .configure(configure);
    let service = test::init_service(app).await;
    debug!("Making request");
    let (status, bytes) = match test::try_call_service(&service, req.to_request()).await {
        Ok(res) => (res.status(), test::read_body(res).await),
        Err(e) => {
            let res = e.error_response();
            (res.status(), res.into_body().try_into_bytes().unwrap_or_default())
        },
    };
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()));
    (status, body)
}

/// A card order from customer 10 at restaurant 20.
pub fn order(id: i64, status: OrderStatusType) -> Order {
    let now = Utc::now();
    Order {
        id,
        order_number: format!("DLV-20261014-{id:06}"),
        client_reference: None,
        customer_id: 10,
        restaurant_id: 20,
        courier_id: None,
        subtotal: Money::from(5_000),
        delivery_fee: Money::from(500),
        discount: Money::zero(),
        tax: Money::zero(),
        total: Money::from(5_500),
        delivery_address: DeliveryAddress {
            street: "1 Main St".into(),
            city: "Springfield".into(),
            ..Default::default()
        },
        status,
        payment_method: PaymentMethod::Card,
        payment_status: PaymentStatus::Pending,
        payment_reference: None,
        restaurant_paid_by_courier: false,
        restaurant_paid_amount: Money::zero(),
        promo_code: None,
        cancel_reason: None,
        cancelled_by: None,
        placed_at: now,
        accepted_at: None,
        preparing_at: None,
        ready_at: None,
        picked_up_at: None,
        delivered_at: None,
        cancelled_at: None,
        updated_at: now,
    }
}

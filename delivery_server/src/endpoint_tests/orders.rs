use actix_web::{http::StatusCode, web, web::ServiceConfig};
use delivery_engine::{
    db_types::{OrderStatusType, Role},
    DeliveryError,
    OrderFlowApi,
};
use serde_json::json;

use super::{
    helpers::{get_request, issue_token, order, post_request, producers},
    mocks::MockBackend,
};
use crate::routes::{AcceptOrderRoute, CapturePaymentRoute, CancelOrderRoute, MyOrdersRoute, OrderByIdRoute};

fn configure_with(backend: MockBackend) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        let api = OrderFlowApi::new(backend, producers());
        cfg.service(MyOrdersRoute::<MockBackend>::new())
            .service(OrderByIdRoute::<MockBackend>::new())
            .service(AcceptOrderRoute::<MockBackend>::new())
            .service(CancelOrderRoute::<MockBackend>::new())
            .service(CapturePaymentRoute::<MockBackend>::new())
            .app_data(web::Data::new(api));
    }
}

fn backend_with_order(status: OrderStatusType) -> MockBackend {
    let mut backend = MockBackend::new();
    backend.expect_fetch_order().returning(move |id| Ok(Some(order(id, status))));
    backend.expect_fetch_order_items().returning(|_| Ok(vec![]));
    backend
}

#[actix_web::test]
async fn fetch_order_without_a_token() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get_request("", "/orders/1", configure_with(MockBackend::new())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[actix_web::test]
async fn fetch_order_as_the_customer() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Customer, 10);
    let backend = backend_with_order(OrderStatusType::Accepted);
    let (status, body) = get_request(&token, "/orders/7", configure_with(backend)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 7);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["total"], 5_500);
}

#[actix_web::test]
async fn fetch_someone_elses_order() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Customer, 11);
    let backend = backend_with_order(OrderStatusType::Accepted);
    let (status, body) = get_request(&token, "/orders/7", configure_with(backend)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[actix_web::test]
async fn fetch_missing_order() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Operator, 1);
    let mut backend = MockBackend::new();
    backend.expect_fetch_order().returning(|_| Ok(None));
    let (status, body) = get_request(&token, "/orders/99", configure_with(backend)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[actix_web::test]
async fn restaurant_accepts_its_order() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Restaurant, 20);
    let mut backend = backend_with_order(OrderStatusType::New);
    backend
        .expect_advance_status()
        .withf(|id, from, to, _| *id == 7 && *from == OrderStatusType::New && *to == OrderStatusType::Accepted)
        .times(1)
        .returning(|id, _, to, _| Ok(order(id, to)));
    let (status, body) = post_request(&token, "/orders/7/accept", None, configure_with(backend)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");
}

#[actix_web::test]
async fn accepting_twice_is_a_conflict() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Restaurant, 20);
    let backend = backend_with_order(OrderStatusType::Accepted);
    let (status, body) = post_request(&token, "/orders/7/accept", None, configure_with(backend)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
}

#[actix_web::test]
async fn customers_cannot_accept_orders() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Customer, 10);
    let backend = backend_with_order(OrderStatusType::New);
    let (status, body) = post_request(&token, "/orders/7/accept", None, configure_with(backend)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[actix_web::test]
async fn operators_must_give_a_cancellation_reason() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Operator, 1);
    let backend = backend_with_order(OrderStatusType::Preparing);
    let (status, body) = post_request(&token, "/orders/7/cancel", None, configure_with(backend)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn only_operators_capture_payments() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Restaurant, 20);
    let body = json!({ "reference": "pay_123" });
    let (status, body) =
        post_request(&token, "/orders/7/capture", Some(body), configure_with(MockBackend::new())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[actix_web::test]
async fn restaurant_searches_are_scoped_to_the_restaurant() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Restaurant, 20);
    let mut backend = MockBackend::new();
    backend
        .expect_search_orders()
        .withf(|filter| filter.restaurant_id == Some(20) && filter.status == Some(vec![OrderStatusType::New]))
        .times(1)
        .returning(|_| Ok(vec![order(1, OrderStatusType::New), order(2, OrderStatusType::New)]));
    let (status, body) = get_request(&token, "/orders?status=new", configure_with(backend)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(|a| a.len()), Some(2));
}

#[actix_web::test]
async fn unknown_statuses_are_refused() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Operator, 1);
    let (status, body) = get_request(&token, "/orders?status=lost", configure_with(MockBackend::new())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn store_failures_are_unavailable() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Customer, 10);
    let mut backend = MockBackend::new();
    backend
        .expect_fetch_order()
        .returning(|_| Err(DeliveryError::Database { message: "disk I/O error".into(), retryable: false }));
    let (status, body) = get_request(&token, "/orders/7", configure_with(backend)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "STORE_UNAVAILABLE");
    assert!(!body["error"].as_str().unwrap_or_default().contains("disk"));
}

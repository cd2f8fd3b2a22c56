use std::time::Duration;

use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, web, App};
use chrono::Utc;
use delivery_engine::{db_types::Role, realtime::EventFabric, SettlementApi};

use super::{
    helpers::{get_auth_config, get_request, issue_token, producers},
    mocks::MockBackend,
};
use crate::{
    auth::{JwtClaims, TokenIssuer, TokenVerifier},
    routes::{health, MyBalanceRoute},
    sockets::{CustomerSocketRoute, OperationsSocketRoute},
};

fn configure(cfg: &mut web::ServiceConfig) {
    let api = SettlementApi::new(MockBackend::new(), producers());
    cfg.service(MyBalanceRoute::<MockBackend>::new()).app_data(web::Data::new(api));
}

#[actix_web::test]
async fn health_needs_no_token() {
    let _ = env_logger::try_init().ok();
    let app = test::init_service(App::new().service(health)).await;
    let res = test::call_service(&app, TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = test::read_body(res).await;
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn nonsense_tokens_are_refused() {
    let _ = env_logger::try_init().ok();
    let (status, body) = get_request("made.up.nonsense", "/my_balance", configure).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap_or_default().contains("not in the correct format"), "was: {body}");
}

#[actix_web::test]
async fn tampered_tokens_are_refused() {
    let _ = env_logger::try_init().ok();
    let mut token = issue_token(Role::Courier, 30);
    token.replace_range(token.len() - 6.., "AAAAAA");
    let (status, body) = get_request(&token, "/my_balance", configure).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[actix_web::test]
async fn expired_tokens_are_refused() {
    let _ = env_logger::try_init().ok();
    let claims = JwtClaims { sub: "30".into(), role: Role::Courier, exp: Utc::now().timestamp() - 600 };
    let token = TokenIssuer::new(&get_auth_config()).sign(&claims).unwrap();
    let (status, body) = get_request(&token, "/my_balance", configure).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap_or_default().contains("expired"), "was: {body}");
}

#[actix_web::test]
async fn the_system_role_cannot_be_claimed() {
    let _ = env_logger::try_init().ok();
    let token =
        TokenIssuer::new(&get_auth_config()).issue_token(Role::System, 0, Some(Duration::from_secs(60))).unwrap();
    let (status, body) = get_request(&token, "/my_balance", configure).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

async fn socket_status(path: &str, token: Option<String>) -> (StatusCode, String) {
    let fabric = web::Data::new(EventFabric::new(MockBackend::new()));
    let verifier = web::Data::new(TokenVerifier::new(&get_auth_config()));
    let app = App::new()
        .app_data(fabric)
        .app_data(verifier)
        .service(CustomerSocketRoute::<MockBackend>::new())
        .service(OperationsSocketRoute::<MockBackend>::new());
    let app = test::init_service(app).await;
    let uri = match token {
        Some(t) => format!("{path}?token={t}"),
        None => path.to_string(),
    };
    let (status, body) = match test::try_call_service(&app, TestRequest::get().uri(&uri).to_request()).await {
        Ok(res) => (res.status(), test::read_body(res).await),
        Err(e) => {
            let res = e.error_response();
            (res.status(), res.into_body().try_into_bytes().unwrap_or_default())
        },
    };
    (status, String::from_utf8_lossy(&body).into_owned())
}

#[actix_web::test]
async fn sockets_need_a_token() {
    let _ = env_logger::try_init().ok();
    let (status, body) = socket_status("/ws/customer", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("UNAUTHORIZED"), "was: {body}");
}

#[actix_web::test]
async fn sockets_are_scoped_to_their_namespace() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Customer, 10);
    let (status, body) = socket_status("/ws/operations", Some(token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.contains("FORBIDDEN"), "was: {body}");
}

#[actix_web::test]
async fn plain_requests_are_not_upgraded() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Customer, 10);
    let (status, body) = socket_status("/ws/customer", Some(token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("WebSocket upgrade failed"), "was: {body}");
}

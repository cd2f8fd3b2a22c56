use actix_web::{http::StatusCode, web, web::ServiceConfig};
use chrono::Utc;
use delivery_engine::{
    db_types::{Balance, CashRemittance, Party, PayoutRequest, PayoutStatus, RemittanceStatus, Role},
    DeliveryError,
    InsertEntryResult,
    RemittanceApi,
    SettlementApi,
};
use dlv_common::Money;
use serde_json::json;

use super::{
    helpers::{get_request, issue_token, post_request, producers},
    mocks::MockBackend,
};
use crate::routes::{
    AdjustmentRoute,
    BalanceRoute,
    CancelPayoutRoute,
    DeclareRemittanceRoute,
    MyBalanceRoute,
    PayoutPaidRoute,
    RemittanceByIdRoute,
    RequestPayoutRoute,
};

fn configure_with(backend: MockBackend) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        let api = SettlementApi::new(backend, producers());
        cfg.service(BalanceRoute::<MockBackend>::new())
            .service(MyBalanceRoute::<MockBackend>::new())
            .service(RequestPayoutRoute::<MockBackend>::new())
            .service(PayoutPaidRoute::<MockBackend>::new())
            .service(CancelPayoutRoute::<MockBackend>::new())
            .service(AdjustmentRoute::<MockBackend>::new())
            .app_data(web::Data::new(api));
    }
}

fn configure_remittances(backend: MockBackend) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg| {
        let api = RemittanceApi::new(backend, producers());
        cfg.service(DeclareRemittanceRoute::<MockBackend>::new())
            .service(RemittanceByIdRoute::<MockBackend>::new())
            .app_data(web::Data::new(api));
    }
}

fn payout(id: i64, party: Party, status: PayoutStatus) -> PayoutRequest {
    let now = Utc::now();
    PayoutRequest {
        id,
        party_kind: party.kind,
        party_id: party.id,
        amount: Money::from(7_200),
        payment_method: None,
        payment_account: None,
        status,
        transaction_reference: None,
        proof_reference: None,
        authorized_by: None,
        paid_at: None,
        rejection_reason: None,
        created_at: now,
        updated_at: now,
    }
}

fn remittance(id: i64, courier_id: i64) -> CashRemittance {
    CashRemittance {
        id,
        courier_id,
        declared_amount: Money::from(5_500),
        expected_amount: Money::from(5_500),
        verified_amount: None,
        discrepancy: None,
        status: RemittanceStatus::Pending,
        reviewer_notes: None,
        reviewed_by: None,
        reviewed_at: None,
        created_at: Utc::now(),
        order_ids: vec![7],
    }
}

#[actix_web::test]
async fn courier_reads_own_balance() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Courier, 30);
    let mut backend = MockBackend::new();
    backend
        .expect_fetch_balance()
        .withf(|party| *party == Party::courier(30))
        .times(1)
        .returning(|party| Ok(Balance::new(party, Money::from(1_200), Money::from(200), Money::zero())));
    let (status, body) = get_request(&token, "/my_balance", configure_with(backend)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], 1_000);
}

#[actix_web::test]
async fn operators_have_no_balance() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Operator, 1);
    let (status, body) = get_request(&token, "/my_balance", configure_with(MockBackend::new())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[actix_web::test]
async fn balances_of_other_parties_are_private() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Courier, 30);
    let (status, _) = get_request(&token, "/balance/courier/31", configure_with(MockBackend::new())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let token = issue_token(Role::Operator, 1);
    let mut backend = MockBackend::new();
    backend
        .expect_fetch_balance()
        .returning(|party| Ok(Balance::new(party, Money::from(9_000), Money::zero(), Money::from(4_000))));
    let (status, body) = get_request(&token, "/balance/restaurant/20", configure_with(backend)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], 5_000);
    assert_eq!(body["outstanding_payouts"], 4_000);
}

#[actix_web::test]
async fn unknown_party_kinds_are_refused() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Operator, 1);
    let (status, body) = get_request(&token, "/balance/landlord/1", configure_with(MockBackend::new())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn restaurant_requests_a_payout() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Restaurant, 20);
    let mut backend = MockBackend::new();
    backend
        .expect_create_payout()
        .withf(|req, floor| req.party == Party::restaurant(20) && *floor == Money::from(5_000))
        .times(1)
        .returning(|req, _| Ok(payout(3, req.party, PayoutStatus::Pending)));
    let (status, body) = post_request(&token, "/payouts", None, configure_with(backend)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 3);
    assert_eq!(body["status"], "pending");
}

#[actix_web::test]
async fn payouts_below_the_floor_are_refused() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Courier, 30);
    let mut backend = MockBackend::new();
    backend
        .expect_create_payout()
        .returning(|_, floor| Err(DeliveryError::validation(format!("800 is below the payout floor of {floor}"))));
    let (status, body) = post_request(&token, "/payouts", None, configure_with(backend)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["error"].as_str().unwrap_or_default().contains("floor"));
}

#[actix_web::test]
async fn customers_cannot_request_payouts() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Customer, 10);
    let (status, _) = post_request(&token, "/payouts", None, configure_with(MockBackend::new())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn operators_must_name_the_payee() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Operator, 1);
    let (status, body) = post_request(&token, "/payouts", Some(json!({})), configure_with(MockBackend::new())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[actix_web::test]
async fn paid_payouts_need_proof() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Operator, 1);
    let body = json!({ "transaction_ref": "tx-991" });
    let (status, body) = post_request(&token, "/payouts/3/paid", Some(body), configure_with(MockBackend::new())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "PROOF_REQUIRED");
}

#[actix_web::test]
async fn parties_only_cancel_their_own_payouts() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Courier, 30);
    let mut backend = MockBackend::new();
    backend.expect_fetch_payout().returning(|id| Ok(Some(payout(id, Party::courier(31), PayoutStatus::Pending))));
    backend.expect_close_payout().never();
    let (status, _) = post_request(&token, "/payouts/3/cancel", None, configure_with(backend)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn operators_record_adjustments() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Operator, 1);
    let mut backend = MockBackend::new();
    backend
        .expect_append_entry()
        .withf(|entry| {
            entry.amount == Money::from(-300) &&
                entry.to == Party::restaurant(20) &&
                entry.payment_reference == "adjustment:ticket-5521"
        })
        .times(1)
        .returning(|_| Ok(InsertEntryResult::Inserted(41)));
    let body = json!({
        "party_kind": "restaurant",
        "party_id": 20,
        "amount": -300,
        "reason": "damaged packaging refund",
        "reference": "ticket-5521"
    });
    let (status, body) = post_request(&token, "/adjustments", Some(body), configure_with(backend)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "Inserted": 41 }));
}

#[actix_web::test]
async fn mismatched_remittances_are_refused() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Courier, 30);
    let mut backend = MockBackend::new();
    backend.expect_declare_remittance().times(1).returning(|_, declared, _| {
        Err(DeliveryError::AmountMismatch { expected: Money::from(5_500), declared })
    });
    let body = json!({ "amount": 5_000, "order_ids": [7] });
    let (status, body) = post_request(&token, "/remittances", Some(body), configure_remittances(backend)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "AMOUNT_MISMATCH");
}

#[actix_web::test]
async fn couriers_only_see_their_own_remittances() {
    let _ = env_logger::try_init().ok();
    let token = issue_token(Role::Courier, 30);
    let mut backend = MockBackend::new();
    backend.expect_fetch_remittance().returning(|id| Ok(Some(remittance(id, 31))));
    let (status, _) = get_request(&token, "/remittances/4", configure_remittances(backend)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut backend = MockBackend::new();
    backend.expect_fetch_remittance().returning(|id| Ok(Some(remittance(id, 30))));
    let (status, body) = get_request(&token, "/remittances/4", configure_remittances(backend)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
}

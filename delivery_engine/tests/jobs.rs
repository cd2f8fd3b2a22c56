use chrono::{Duration, Utc};
use delivery_engine::{
    db_types::{Actor, Money, OrderStatusType, Party, PaymentMethod, PromoCode, PromoStatus},
    events::EventProducers,
    PromoApi,
    PromoManagement,
    SettlementJobs,
    SettlementPolicy,
};

mod support;

use support::*;

#[tokio::test]
async fn unaccepted_orders_time_out() {
    let market = Marketplace::new().await;
    let waiting = market.place(PaymentMethod::Card).await;
    let accepted = market.place(PaymentMethod::Card).await;
    market.orders.accept(Actor::restaurant(RESTAURANT), accepted.id).await.unwrap();

    // nothing is old enough yet
    let summary = market.jobs.expire_stale_orders(Utc::now(), Duration::minutes(10)).await.unwrap();
    assert_eq!(summary.processed, 0);

    let later = Utc::now() + Duration::minutes(11);
    let summary = market.jobs.expire_stale_orders(later, Duration::minutes(10)).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert!(summary.is_clean());
    let order = market.orders.order_by_id(Actor::operator(OPERATOR), waiting.id).await.unwrap().order;
    assert_eq!(order.status, OrderStatusType::Cancelled);
    assert_eq!(order.cancel_reason.as_deref(), Some("timeout"));
    assert_eq!(order.cancelled_by.as_deref(), Some("system:0"));
    let order = market.orders.order_by_id(Actor::operator(OPERATOR), accepted.id).await.unwrap().order;
    assert_eq!(order.status, OrderStatusType::Accepted);

    // the restaurant is too late to accept the auto-cancelled order
    let err = market.orders.accept(Actor::restaurant(RESTAURANT), waiting.id).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
    let order = market.orders.order_by_id(Actor::operator(OPERATOR), waiting.id).await.unwrap().order;
    assert_eq!(order.status, OrderStatusType::Cancelled);
    assert!(order.accepted_at.is_none());

    // running the pass again finds nothing to do
    let summary = market.jobs.expire_unaccepted_orders(later).await.unwrap();
    assert_eq!(summary.processed, 0);
    market.close().await;
}

#[tokio::test]
async fn weekly_rollup_pays_out_parties_above_their_floor() {
    let market = Marketplace::with_policy(low_floor_policy()).await;
    market.delivered_card_order().await;
    // a restaurant with nothing but a debit stays below the floor
    market
        .settlement
        .record_adjustment(
            Party::restaurant(RESTAURANT + 1),
            Money::from(-100),
            "chargeback".into(),
            "cb-1".into(),
            "ops".into(),
        )
        .await
        .unwrap();

    let summary = market.jobs.weekly_payout_rollup().await.unwrap();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 1);
    assert!(summary.is_clean());
    let restaurant = market.settlement.outstanding_payout(Party::restaurant(RESTAURANT)).await.unwrap().unwrap();
    assert_eq!(restaurant.amount, Money::from(4_250));
    let courier = market.settlement.outstanding_payout(Party::courier(COURIER)).await.unwrap().unwrap();
    assert_eq!(courier.amount, Money::from(400));

    // the second run sees the outstanding requests and leaves them alone
    let summary = market.jobs.weekly_payout_rollup().await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped, 3);
    assert_eq!(market.settlement.payouts_for_party(Party::courier(COURIER)).await.unwrap().len(), 1);
    market.close().await;
}

#[tokio::test]
async fn promo_codes_expire() {
    let market = Marketplace::new().await;
    let promos = PromoApi::new(market.db.clone());
    let now = Utc::now();
    promos.create_promo_code("summer26", Money::from(500), now + Duration::days(30)).await.unwrap();
    let err = promos.create_promo_code("SUMMER26", Money::from(500), now + Duration::days(30)).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    let err = promos.create_promo_code("X", Money::from(500), now + Duration::days(30)).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    market
        .db
        .insert_promo_code(PromoCode {
            code: "SPRING26".into(),
            discount: Money::from(300),
            status: PromoStatus::Active,
            expires_at: now - Duration::hours(1),
            created_at: now - Duration::days(30),
        })
        .await
        .unwrap();

    let summary = market.jobs.expire_promo_codes(now).await.unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(promos.promo_code("spring26").await.unwrap().status, PromoStatus::Expired);
    assert_eq!(promos.promo_code("SUMMER26").await.unwrap().status, PromoStatus::Active);
    let summary = market.jobs.expire_promo_codes(now).await.unwrap();
    assert_eq!(summary.processed, 0);
    market.close().await;
}

#[tokio::test]
async fn the_rollup_schedule_survives_restarts() {
    let market = Marketplace::new().await;
    let week = Duration::weeks(1);
    // never run, so it is due straight away
    assert_eq!(market.jobs.rollup_due_in(week, Utc::now()).await.unwrap(), Duration::zero());

    market.jobs.weekly_payout_rollup().await.unwrap();
    let due = market.jobs.rollup_due_in(week, Utc::now()).await.unwrap();
    assert!(due > Duration::days(6) && due <= week, "due in {due}");

    // a fresh set of jobs on the same store, as after a restart, keeps the schedule
    let restarted = SettlementJobs::new(market.db.clone(), EventProducers::default(), SettlementPolicy::default());
    let three_days_on = Utc::now() + Duration::days(3);
    let due = restarted.rollup_due_in(week, three_days_on).await.unwrap();
    assert!(due > Duration::days(3) && due <= Duration::days(4), "due in {due}");
    assert_eq!(restarted.rollup_due_in(week, Utc::now() + Duration::days(8)).await.unwrap(), Duration::zero());
    market.close().await;
}

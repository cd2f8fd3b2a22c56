use std::str::FromStr;

use cucumber::{then, when};
use delivery_engine::{
    db_types::{Actor, Money, OrderStatusType, Party, PartyKind, PaymentMethod, PaymentStatus, PayoutStatus, Role},
    DeliveryError,
};

use crate::{
    cucumber::MarketplaceWorld,
    support::{order_request, COURIER, OPERATOR},
};

fn actor(role: &str, id: i64) -> Actor {
    let role = Role::from_str(role).expect("Not a valid role");
    Actor::new(role, id)
}

fn party(kind: &str, id: i64) -> Party {
    let kind = PartyKind::from_str(kind).expect("Not a valid party kind");
    Party::new(kind, id)
}

#[when(expr = "customer {int} places a {word} order {word} at restaurant {int}")]
async fn place_order(world: &mut MarketplaceWorld, customer: i64, method: String, label: String, restaurant: i64) {
    let method = PaymentMethod::from_str(&method).expect("Not a valid payment method");
    let request = order_request(customer, restaurant, method);
    let result = world.market().orders.place_order(Actor::customer(customer), request).await;
    if let Some(placed) = world.record(result) {
        world.orders.insert(label, placed.order);
    }
}

#[when(expr = "the payment for order {word} is captured")]
async fn capture_payment(world: &mut MarketplaceWorld, label: String) {
    let id = world.order_id(&label);
    let result = world.market().orders.capture_payment(Actor::system(), id, format!("gw-{id}")).await;
    world.record(result);
}

#[when(expr = "{word} {int} tries to {word} order {word}")]
async fn transition(world: &mut MarketplaceWorld, role: String, id: i64, action: String, label: String) {
    let who = actor(&role, id);
    let order_id = world.order_id(&label);
    let orders = &world.market().orders;
    let result = match action.as_str() {
        "accept" => orders.accept(who, order_id).await,
        "prepare" => orders.start_preparing(who, order_id).await,
        "ready" => orders.mark_ready(who, order_id).await,
        "pick_up" => orders.pick_up(who, order_id).await,
        "deliver" => orders.mark_delivered(who, order_id).await,
        "cancel" => orders.cancel(who, order_id, Some("changed my mind".into())).await,
        _ => panic!("Unknown order action {action}"),
    };
    world.record(result);
}

#[when(expr = "order {word} is dispatched")]
async fn dispatch(world: &mut MarketplaceWorld, label: String) {
    let id = world.order_id(&label);
    world.market().dispatch(id).await;
}

#[when(expr = "order {word} is delivered")]
async fn deliver(world: &mut MarketplaceWorld, label: String) {
    let id = world.order_id(&label);
    world.market().deliver(id).await;
}

#[then(expr = "order {word} is {word}")]
async fn order_status(world: &mut MarketplaceWorld, label: String, status: String) {
    let expected = OrderStatusType::from_str(&status).expect("Not a valid order status");
    let id = world.order_id(&label);
    let order = world.market().orders.order_by_id(Actor::operator(OPERATOR), id).await.expect("Order not found").order;
    assert_eq!(order.status, expected);
}

#[then(expr = "the payment for order {word} is {word}")]
async fn payment_status(world: &mut MarketplaceWorld, label: String, status: String) {
    let expected = PaymentStatus::from_str(&status).expect("Not a valid payment status");
    let id = world.order_id(&label);
    let order = world.market().orders.order_by_id(Actor::operator(OPERATOR), id).await.expect("Order not found").order;
    assert_eq!(order.payment_status, expected);
}

#[then(expr = "the last action failed with {word}")]
async fn last_error(world: &mut MarketplaceWorld, code: String) {
    let err = world.last_error.as_ref().expect("The last action succeeded");
    assert_eq!(err.code(), code, "{err}");
}

#[then("the last action succeeded")]
async fn last_ok(world: &mut MarketplaceWorld) {
    if let Some(err) = &world.last_error {
        panic!("The last action failed: {err}");
    }
}

#[then(expr = "order {word} has {int} ledger entries")]
async fn ledger_entries(world: &mut MarketplaceWorld, label: String, count: usize) {
    let id = world.order_id(&label);
    let entries = world.market().settlement.ledger_for_order(id).await.expect("Error fetching ledger");
    assert_eq!(entries.len(), count);
}

#[then(expr = "the available balance of {word} {int} is {int}")]
async fn available_balance(world: &mut MarketplaceWorld, kind: String, id: i64, amount: i64) {
    let balance = world.market().settlement.get_balance(party(&kind, id)).await.expect("Error fetching balance");
    assert_eq!(balance.available, Money::from(amount));
}

#[when(expr = "{word} {int} requests a payout")]
async fn request_payout(world: &mut MarketplaceWorld, kind: String, id: i64) {
    let result = world.market().settlement.create_payout(party(&kind, id), None, None).await;
    world.record(result);
}

#[when(expr = "the payout for {word} {int} is paid with reference {word}")]
async fn pay_payout(world: &mut MarketplaceWorld, kind: String, id: i64, reference: String) {
    let settlement = &world.market().settlement;
    let payout = settlement
        .outstanding_payout(party(&kind, id))
        .await
        .expect("Error fetching payout")
        .expect("No outstanding payout");
    let result = settlement.mark_payout_paid(payout.id, Some(reference), None, "ops".into()).await;
    world.record(result);
}

#[when(expr = "the payout for {word} {int} is rejected")]
async fn reject_payout(world: &mut MarketplaceWorld, kind: String, id: i64) {
    let settlement = &world.market().settlement;
    let payout = settlement
        .outstanding_payout(party(&kind, id))
        .await
        .expect("Error fetching payout")
        .expect("No outstanding payout");
    let result = settlement.reject_payout(payout.id, "bank details invalid".into()).await;
    world.record(result);
}

#[then(expr = "{word} {int} has an outstanding payout of {int}")]
async fn outstanding_payout(world: &mut MarketplaceWorld, kind: String, id: i64, amount: i64) {
    let payout = world
        .market()
        .settlement
        .outstanding_payout(party(&kind, id))
        .await
        .expect("Error fetching payout")
        .expect("No outstanding payout");
    assert_eq!(payout.amount, Money::from(amount));
    assert_eq!(payout.status, PayoutStatus::Pending);
}

#[then(expr = "{word} {int} has no outstanding payout")]
async fn no_outstanding_payout(world: &mut MarketplaceWorld, kind: String, id: i64) {
    let payout = world.market().settlement.outstanding_payout(party(&kind, id)).await.expect("Error fetching payout");
    assert!(payout.is_none(), "Unexpected payout {payout:?}");
}

#[when(expr = "the courier remits {int} for orders {string}")]
async fn remit(world: &mut MarketplaceWorld, amount: i64, labels: String) {
    let ids = labels.split(',').map(|l| world.order_id(l.trim())).collect::<Vec<_>>();
    let result = world.market().remittances.declare_remittance(COURIER, Money::from(amount), ids).await;
    world.record(result);
}

#[when("the weekly payout rollup runs")]
async fn weekly_rollup(world: &mut MarketplaceWorld) {
    let result = world.market().jobs.weekly_payout_rollup().await;
    world.record(result);
}

#[then(expr = "the error says {string}")]
async fn error_message(world: &mut MarketplaceWorld, text: String) {
    let err: &DeliveryError = world.last_error.as_ref().expect("The last action succeeded");
    assert!(err.to_string().contains(&text), "'{err}' does not mention '{text}'");
}

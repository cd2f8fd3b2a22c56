use delivery_engine::{
    db_types::{Actor, PaymentMethod},
    events::{OrderStatusEvent, PayoutEvent},
    realtime::{ClientCommand, CommandReply, EventFabric, EventKind, Namespace, Room},
    PresenceManagement,
};

mod support;

use support::*;

#[tokio::test]
async fn connections_are_confined_to_their_namespace() {
    let market = Marketplace::new().await;
    let fabric = EventFabric::new(market.db.clone());
    let err = fabric.connect(Actor::customer(CUSTOMER), Namespace::Operations).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    let err = fabric.connect(Actor::courier(COURIER), Namespace::Customer).unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    let (customer, _rx) = fabric.connect(Actor::customer(CUSTOMER), Namespace::Customer).unwrap();
    let err = fabric.handle_command(customer, ClientCommand::JoinDashboard).await.unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    let err = fabric.handle_command(customer, ClientCommand::JoinPartyRoom).await.unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    assert_eq!(fabric.connection_count(), 1);
    market.close().await;
}

#[tokio::test]
async fn customers_only_follow_their_own_orders() {
    let market = Marketplace::new().await;
    let order = market.place(PaymentMethod::Card).await;
    let fabric = EventFabric::new(market.db.clone());
    let (mine, mut rx) = fabric.connect(Actor::customer(CUSTOMER), Namespace::Customer).unwrap();
    let (other, mut other_rx) = fabric.connect(Actor::customer(CUSTOMER + 1), Namespace::Customer).unwrap();

    let reply = fabric.handle_command(mine, ClientCommand::JoinOrder { order_id: order.id }).await.unwrap();
    assert_eq!(reply, CommandReply::Joined { room: format!("order_{}", order.id) });
    let err = fabric.join_order(other, order.id).await.unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    let err = fabric.join_order(mine, 9_999).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let accepted = market.orders.accept(Actor::restaurant(RESTAURANT), order.id).await.unwrap();
    let delivered = fabric.publish_order_status(&OrderStatusEvent::new(
        accepted,
        Some(delivery_engine::db_types::OrderStatusType::New),
        Actor::restaurant(RESTAURANT),
    ));
    assert_eq!(delivered, 1);
    let msg = rx.try_recv().unwrap();
    assert_eq!(msg.event, EventKind::OrderStatus);
    assert_eq!(msg.room, format!("order_{}", order.id));
    assert_eq!(msg.data["order"]["status"], "accepted");
    assert!(other_rx.try_recv().is_err());

    fabric.leave_order(mine, order.id).unwrap();
    assert_eq!(fabric.room_size(&Room::Order(order.id)), 0);
    market.close().await;
}

#[tokio::test]
async fn couriers_follow_orders_while_engaged() {
    let market = Marketplace::new().await;
    let order = market.place(PaymentMethod::Cash).await;
    let fabric = EventFabric::new(market.db.clone());
    let (courier, _rx) = fabric.connect(Actor::courier(COURIER), Namespace::Partner).unwrap();
    // not assigned yet
    let err = fabric.join_order(courier, order.id).await.unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    market.dispatch(order.id).await;
    fabric.join_order(courier, order.id).await.unwrap();
    market.orders.mark_delivered(Actor::courier(COURIER), order.id).await.unwrap();
    fabric.leave_order(courier, order.id).unwrap();
    // a delivered order is no longer open to the courier
    let err = fabric.join_order(courier, order.id).await.unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    market.close().await;
}

#[tokio::test]
async fn location_updates_reach_every_interested_room_once() {
    let market = Marketplace::new().await;
    let order = market.place(PaymentMethod::Card).await;
    market.dispatch(order.id).await;
    let fabric = EventFabric::new(market.db.clone());
    let (courier, _courier_rx) = fabric.connect(Actor::courier(COURIER), Namespace::Partner).unwrap();
    let (customer, mut customer_rx) = fabric.connect(Actor::customer(CUSTOMER), Namespace::Customer).unwrap();
    let (ops, mut ops_rx) = fabric.connect(Actor::operator(OPERATOR), Namespace::Operations).unwrap();
    fabric.join_order(customer, order.id).await.unwrap();
    fabric.join_dashboard(ops).unwrap();
    fabric.track_party(ops, COURIER).unwrap();
    let reply = fabric.handle_command(ops, ClientCommand::JoinActiveCouriers).await.unwrap();
    match reply {
        CommandReply::ActiveCouriers { couriers, .. } => {
            assert_eq!(couriers.iter().map(|c| c.courier_id).collect::<Vec<_>>(), vec![COURIER]);
        },
        other => panic!("Unexpected reply {other:?}"),
    }

    let reply = fabric
        .handle_command(courier, ClientCommand::UpdateLocation { latitude: 53.48, longitude: -2.24 })
        .await
        .unwrap();
    let CommandReply::Presence { presence } = reply else { panic!("Expected presence") };
    assert_eq!(presence.latitude, Some(53.48));
    assert!(presence.available);

    let msg = customer_rx.try_recv().unwrap();
    assert_eq!(msg.event, EventKind::CourierLocation);
    assert_eq!(msg.data["courier_id"], COURIER);
    // the operator is in three matching rooms but hears it once
    assert_eq!(ops_rx.try_recv().unwrap().event, EventKind::CourierLocation);
    assert!(ops_rx.try_recv().is_err());

    let err = fabric.update_location(courier, 91.0, 0.0).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    let err = fabric.update_location(ops, 1.0, 1.0).await.unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
    market.close().await;
}

#[tokio::test]
async fn a_disconnecting_courier_is_no_longer_dispatchable() {
    let market = Marketplace::new().await;
    let fabric = EventFabric::new(market.db.clone());
    let (courier, _rx) = fabric.connect(Actor::courier(COURIER), Namespace::Partner).unwrap();
    fabric.join_party_room(courier).unwrap();
    fabric.go_online(courier).await.unwrap();
    assert!(market.db.fetch_presence(COURIER).await.unwrap().unwrap().available);

    fabric.disconnect(courier).await.unwrap();
    assert!(!market.db.fetch_presence(COURIER).await.unwrap().unwrap().available);
    assert_eq!(fabric.connection_count(), 0);
    assert_eq!(fabric.room_size(&Room::Courier(COURIER)), 0);
    // idempotent, and consistent with an explicit go_offline
    fabric.disconnect(courier).await.unwrap();
    let (again, _rx) = fabric.connect(Actor::courier(COURIER), Namespace::Partner).unwrap();
    fabric.go_offline(again).await.unwrap();
    fabric.disconnect(again).await.unwrap();
    assert!(!market.db.fetch_presence(COURIER).await.unwrap().unwrap().available);
    assert!(market.db.active_couriers().await.unwrap().is_empty());
    market.close().await;
}

#[tokio::test]
async fn slow_subscribers_lose_events_instead_of_blocking() {
    let market = Marketplace::with_policy(low_floor_policy()).await;
    market.delivered_card_order().await;
    let payout = market
        .settlement
        .create_payout(delivery_engine::db_types::Party::courier(COURIER), None, None)
        .await
        .unwrap();
    let fabric = EventFabric::with_queue_size(market.db.clone(), 2);
    let (courier, mut rx) = fabric.connect(Actor::courier(COURIER), Namespace::Partner).unwrap();
    fabric.join_party_room(courier).unwrap();
    let event = PayoutEvent::new(payout);
    let delivered = (0..5).map(|_| fabric.publish_payout(&event)).sum::<usize>();
    assert_eq!(delivered, 2);
    assert_eq!(rx.try_recv().unwrap().event, EventKind::Payout);
    assert_eq!(rx.try_recv().unwrap().room, format!("courier_{COURIER}"));
    assert!(rx.try_recv().is_err());
    market.close().await;
}

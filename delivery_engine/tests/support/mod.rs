#![allow(dead_code)]

use delivery_engine::{
    db_types::{Actor, DeliveryAddress, Money, Order, PaymentMethod},
    events::EventProducers,
    order_objects::{ItemLine, PlaceOrderRequest},
    test_utils::prepare_env::{fresh_database, tear_down},
    OrderFlowApi,
    PresenceManagement,
    RemittanceApi,
    SettlementApi,
    SettlementJobs,
    SettlementPolicy,
    SqliteDatabase,
};

pub const CUSTOMER: i64 = 101;
pub const RESTAURANT: i64 = 201;
pub const COURIER: i64 = 301;
pub const OPERATOR: i64 = 1;

/// Every API, sharing one fresh database.
pub struct Marketplace {
    pub db: SqliteDatabase,
    pub orders: OrderFlowApi<SqliteDatabase>,
    pub settlement: SettlementApi<SqliteDatabase>,
    pub remittances: RemittanceApi<SqliteDatabase>,
    pub jobs: SettlementJobs<SqliteDatabase>,
}

impl Marketplace {
    pub async fn new() -> Self {
        Self::with_policy(SettlementPolicy::default()).await
    }

    pub async fn with_policy(policy: SettlementPolicy) -> Self {
        Self::with_producers(policy, EventProducers::default()).await
    }

    pub async fn with_producers(policy: SettlementPolicy, producers: EventProducers) -> Self {
        let db = fresh_database(5).await;
        let orders = OrderFlowApi::new(db.clone(), producers.clone()).with_policy(policy);
        let settlement = SettlementApi::new(db.clone(), producers.clone()).with_policy(policy);
        let remittances = RemittanceApi::new(db.clone(), producers.clone()).with_policy(policy);
        let jobs = SettlementJobs::new(db.clone(), producers, policy);
        Self { db, orders, settlement, remittances, jobs }
    }

    pub async fn close(self) {
        tear_down(self.db).await;
    }

    pub async fn place(&self, method: PaymentMethod) -> Order {
        self.orders
            .place_order(Actor::customer(CUSTOMER), order_request(CUSTOMER, RESTAURANT, method))
            .await
            .expect("Error placing order")
            .order
    }

    /// Walks an order from `new` to `delivering` with `COURIER` assigned.
    pub async fn dispatch(&self, order_id: i64) -> Order {
        let restaurant = Actor::restaurant(RESTAURANT);
        self.orders.accept(restaurant, order_id).await.expect("Error accepting order");
        self.orders.start_preparing(restaurant, order_id).await.expect("Error preparing order");
        self.orders.mark_ready(restaurant, order_id).await.expect("Error marking order ready");
        self.db.set_availability(COURIER, true).await.expect("Error setting availability");
        self.orders.assign_courier(Actor::operator(OPERATOR), order_id, COURIER).await.expect("Error assigning");
        self.orders.pick_up(Actor::courier(COURIER), order_id).await.expect("Error picking up order")
    }

    pub async fn deliver(&self, order_id: i64) -> Order {
        self.dispatch(order_id).await;
        self.orders.mark_delivered(Actor::courier(COURIER), order_id).await.expect("Error delivering order")
    }

    /// Places a card order, captures the payment and delivers it.
    pub async fn delivered_card_order(&self) -> Order {
        let order = self.place(PaymentMethod::Card).await;
        self.orders
            .capture_payment(Actor::system(), order.id, format!("gw-{}", order.id))
            .await
            .expect("Error capturing payment");
        self.deliver(order.id).await
    }

    pub async fn delivered_cash_order(&self) -> Order {
        let order = self.place(PaymentMethod::Cash).await;
        self.deliver(order.id).await
    }
}

/// Two pizzas at 25.00 with a 5.00 delivery fee. Total 55.00.
pub fn order_request(customer_id: i64, restaurant_id: i64, payment_method: PaymentMethod) -> PlaceOrderRequest {
    PlaceOrderRequest {
        customer_id,
        restaurant_id,
        items: vec![ItemLine {
            menu_item_id: 11,
            name: "Quattro Formaggi".into(),
            unit_price: Money::from(2_500),
            quantity: 2,
        }],
        delivery_address: DeliveryAddress {
            street: "4 Canal Street".into(),
            city: "Manchester".into(),
            latitude: Some(53.4775),
            longitude: Some(-2.2350),
            ..Default::default()
        },
        payment_method,
        delivery_fee: Money::from(500),
        tax: Money::zero(),
        promo_code: None,
        client_reference: None,
    }
}

/// A policy whose payout floors every single delivered order clears.
pub fn low_floor_policy() -> SettlementPolicy {
    SettlementPolicy {
        courier_payout_floor: Money::from(100),
        restaurant_payout_floor: Money::from(1_000),
        ..SettlementPolicy::default()
    }
}

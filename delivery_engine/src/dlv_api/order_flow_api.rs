use std::fmt::Debug;

use chrono::{DateTime, Utc};
use dlv_common::Money;
use log::*;

use crate::{
    db::traits::{Cancellation, InsertOrderResult, OrderManagement, PromoManagement},
    db_types::{Actor, NewOrder, NewOrderItem, Order, OrderStatusType, PaymentMethod, Role},
    dlv_api::{
        order_objects::{OrderQueryFilter, OrderWithItems, PlaceOrderRequest},
        policy::SettlementPolicy,
        retry::RetryPolicy,
        state_machine::{check_transition, is_party_to, Transition},
    },
    events::{EventProducers, OrderStatusEvent},
    DeliveryError,
};

/// `OrderFlowApi` drives orders through their lifecycle on behalf of authenticated actors.
///
/// Every transition is checked against the authorization table in
/// [`state_machine`](crate::dlv_api::state_machine) and then applied by the backend as a compare-and-set. Events are
/// published only after the backend has committed.
pub struct OrderFlowApi<B> {
    db: B,
    producers: EventProducers,
    policy: SettlementPolicy,
    retry: RetryPolicy,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi ({:?})", self.policy)
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers, policy: SettlementPolicy::default(), retry: RetryPolicy::default() }
    }

    pub fn with_policy(mut self, policy: SettlementPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    /// Without a client reference a repeated insert cannot be recognised, so the placement is attempted once.
    fn placement_retry(&self, order: &NewOrder) -> RetryPolicy {
        match order.client_reference {
            Some(_) => self.retry.clone(),
            None => RetryPolicy::no_retries(),
        }
    }
}

/// `DLV-<yyyymmdd>-<6 hex digits>`
pub fn generate_order_number(at: DateTime<Utc>) -> String {
    let suffix = rand::random::<u32>() & 0x00FF_FFFF;
    format!("DLV-{}-{suffix:06X}", at.format("%Y%m%d"))
}

fn is_blank(s: &Option<String>) -> bool {
    s.as_deref().map(str::trim).map(str::is_empty).unwrap_or(true)
}

impl<B> OrderFlowApi<B>
where B: OrderManagement + PromoManagement
{
    /// Prices and stores a new order in `new` status.
    ///
    /// The subtotal is the sum of the item lines. A promo code, when given, must be active and unexpired, and its
    /// discount is capped at the subtotal. A placement that repeats an earlier `client_reference` returns the
    /// original order instead of creating a second one.
    pub async fn place_order(&self, actor: Actor, request: PlaceOrderRequest) -> Result<OrderWithItems, DeliveryError> {
        match actor.role {
            Role::Customer if actor.id == request.customer_id => {},
            Role::Operator | Role::System => {},
            _ => {
                return Err(DeliveryError::forbidden(format!(
                    "{actor} cannot place orders for customer #{}",
                    request.customer_id
                )))
            },
        }
        validate_request(&request)?;
        let now = Utc::now();
        let items = request
            .items
            .iter()
            .map(|i| NewOrderItem::new(i.menu_item_id, i.name.trim(), i.unit_price, i.quantity))
            .collect::<Vec<_>>();
        let overflow = || DeliveryError::validation("The order amounts are too large");
        let subtotal = items
            .iter()
            .try_fold(Money::zero(), |acc, item| item.line_total().and_then(|line| acc.checked_add(line)))
            .ok_or_else(overflow)?;
        let promo_code = match request.promo_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let code = code.to_uppercase();
                let promo = self
                    .db
                    .fetch_promo_code(&code)
                    .await?
                    .ok_or_else(|| DeliveryError::validation(format!("Promo code {code} does not exist")))?;
                if !promo.is_usable_at(now) {
                    return Err(DeliveryError::validation(format!("Promo code {code} has expired")));
                }
                Some(promo)
            },
            None => None,
        };
        let discount = promo_code.as_ref().map(|p| p.discount.min(subtotal)).unwrap_or_default();
        let total = subtotal
            .checked_add(request.delivery_fee)
            .and_then(|t| t.checked_add(request.tax))
            .and_then(|t| t.checked_sub(discount))
            .ok_or_else(overflow)?;
        let order = NewOrder {
            order_number: String::new(),
            client_reference: request.client_reference.clone().filter(|r| !r.trim().is_empty()),
            customer_id: request.customer_id,
            restaurant_id: request.restaurant_id,
            items,
            subtotal,
            delivery_fee: request.delivery_fee,
            discount,
            tax: request.tax,
            total,
            delivery_address: request.delivery_address.clone(),
            payment_method: request.payment_method,
            promo_code: promo_code.map(|p| p.code),
            placed_at: now,
        };
        let result = self
            .placement_retry(&order)
            .run("place_order", || {
                let mut order = order.clone();
                order.order_number = generate_order_number(now);
                self.db.insert_order(order)
            })
            .await?;
        let placed = self.fetch_with_items(result.id()).await?;
        match result {
            InsertOrderResult::Inserted(id) => {
                info!("🔄️📦️ Order #{id} ({}) placed by {actor} for {}", placed.order.order_number, placed.order.total);
                self.producers.publish_order_status(OrderStatusEvent::new(placed.order.clone(), None, actor)).await;
            },
            InsertOrderResult::AlreadyExists(id) => {
                debug!("🔄️📦️ Placement repeated a known client reference. Returning order #{id}");
            },
        }
        Ok(placed)
    }

    pub async fn accept(&self, actor: Actor, order_id: i64) -> Result<Order, DeliveryError> {
        self.transition(actor, order_id, Transition::Accept, None).await
    }

    pub async fn start_preparing(&self, actor: Actor, order_id: i64) -> Result<Order, DeliveryError> {
        self.transition(actor, order_id, Transition::StartPreparing, None).await
    }

    pub async fn mark_ready(&self, actor: Actor, order_id: i64) -> Result<Order, DeliveryError> {
        self.transition(actor, order_id, Transition::MarkReady, None).await
    }

    /// A courier collects a ready order. An unassigned order is assigned to the courier who picks it up.
    pub async fn pick_up(&self, actor: Actor, order_id: i64) -> Result<Order, DeliveryError> {
        self.transition(actor, order_id, Transition::PickUp, None).await
    }

    /// Completes the order. The backend writes the settlement ledger entries in the same transaction.
    pub async fn mark_delivered(&self, actor: Actor, order_id: i64) -> Result<Order, DeliveryError> {
        self.transition(actor, order_id, Transition::MarkDelivered, None).await
    }

    /// Cancels the order, refunding a captured payment. Operators must give a reason.
    pub async fn cancel(&self, actor: Actor, order_id: i64, reason: Option<String>) -> Result<Order, DeliveryError> {
        self.transition(actor, order_id, Transition::Cancel, reason).await
    }

    async fn transition(
        &self,
        actor: Actor,
        order_id: i64,
        transition: Transition,
        reason: Option<String>,
    ) -> Result<Order, DeliveryError> {
        let order = self.fetch_required(order_id).await?;
        let from = check_transition(&actor, &order, transition)?;
        if transition.requires_reason(actor.role) && is_blank(&reason) {
            return Err(DeliveryError::validation("A reason code is required to force a cancellation"));
        }
        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        // transition timestamps never go backwards, even if the clock does
        let at = Utc::now().max(order.updated_at);
        let updated = self
            .retry
            .run(&format!("{transition} order #{order_id}"), || {
                self.apply_transition(actor, order_id, transition, from, reason.clone(), at)
            })
            .await?;
        info!("🔄️📦️ Order #{order_id} {from} → {} by {actor}", updated.status);
        self.producers.publish_order_status(OrderStatusEvent::new(updated.clone(), Some(from), actor)).await;
        Ok(updated)
    }

    async fn apply_transition(
        &self,
        actor: Actor,
        order_id: i64,
        transition: Transition,
        from: OrderStatusType,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError> {
        match transition {
            Transition::PickUp => self.db.pick_up_order(order_id, actor.id, at).await,
            Transition::MarkDelivered => self.db.complete_delivery(order_id, actor.id, self.policy, at).await,
            Transition::Cancel => {
                self.db.cancel_order(order_id, from, Cancellation::new(actor, reason), at).await
            },
            _ => self.db.advance_status(order_id, from, transition.target(), at).await,
        }
    }

    /// The payment gateway confirmed a card or wallet payment.
    pub async fn capture_payment(
        &self,
        actor: Actor,
        order_id: i64,
        reference: String,
    ) -> Result<Order, DeliveryError> {
        if !matches!(actor.role, Role::Operator | Role::System) {
            return Err(DeliveryError::forbidden(format!("{actor} cannot confirm payments")));
        }
        let reference = reference.trim().to_string();
        if reference.is_empty() {
            return Err(DeliveryError::validation("A payment reference is required"));
        }
        let at = Utc::now();
        let order = self
            .retry
            .run("capture_payment", || self.db.capture_payment(order_id, reference.clone(), at))
            .await?;
        info!("🔄️💰️ Payment {reference} captured for order #{order_id}");
        Ok(order)
    }

    /// Dispatches an available courier to an order that has none. Couriers may only assign themselves.
    pub async fn assign_courier(&self, actor: Actor, order_id: i64, courier_id: i64) -> Result<Order, DeliveryError> {
        match actor.role {
            Role::Operator | Role::System => {},
            Role::Courier if actor.id == courier_id => {},
            _ => return Err(DeliveryError::forbidden(format!("{actor} cannot assign courier #{courier_id}"))),
        }
        let current = self.fetch_required(order_id).await?;
        let at = Utc::now().max(current.updated_at);
        let order = self.db.assign_courier(order_id, courier_id, at).await?;
        info!("🔄️🛵️ Courier #{courier_id} assigned to order #{order_id} by {actor}");
        self.producers.publish_order_status(OrderStatusEvent::new(order.clone(), Some(order.status), actor)).await;
        Ok(order)
    }

    /// The assigned courier paid the restaurant for a cash order out of pocket. The restaurant is then not credited
    /// on delivery and the courier is reimbursed instead.
    pub async fn mark_restaurant_paid_by_courier(
        &self,
        actor: Actor,
        order_id: i64,
        amount: Money,
    ) -> Result<Order, DeliveryError> {
        let order = self.fetch_required(order_id).await?;
        if actor.role != Role::Courier || order.courier_id != Some(actor.id) {
            return Err(DeliveryError::forbidden(format!("{actor} is not the courier assigned to order #{order_id}")));
        }
        if order.payment_method != PaymentMethod::Cash {
            return Err(DeliveryError::validation(format!("Order #{order_id} is not a cash order")));
        }
        if !amount.is_positive() || amount > order.restaurant_gross() {
            return Err(DeliveryError::validation(format!(
                "The amount paid to the restaurant must be between 0.01 and {}",
                order.restaurant_gross()
            )));
        }
        let at = Utc::now().max(order.updated_at);
        let order = self.db.mark_restaurant_paid_by_courier(order_id, actor.id, amount, at).await?;
        info!("🔄️💰️ Courier #{} paid the restaurant {amount} for order #{order_id}", actor.id);
        Ok(order)
    }

    /// Fetches an order the actor is a party to.
    pub async fn order_by_id(&self, actor: Actor, order_id: i64) -> Result<OrderWithItems, DeliveryError> {
        let order = self.fetch_with_items(order_id).await?;
        if !is_party_to(&actor, &order.order, None) {
            return Err(DeliveryError::forbidden(format!("{actor} is not a party to order #{order_id}")));
        }
        Ok(order)
    }

    /// Lists orders visible to the actor. Customers, restaurants and couriers only ever see their own orders,
    /// whatever the filter says.
    pub async fn orders_for_actor(&self, actor: Actor, filter: OrderQueryFilter) -> Result<Vec<Order>, DeliveryError> {
        let filter = match actor.role {
            Role::Customer => filter.with_customer_id(actor.id),
            Role::Restaurant => filter.with_restaurant_id(actor.id),
            Role::Courier => filter.with_courier_id(actor.id),
            Role::Operator | Role::System => filter,
        };
        trace!("🔄️📦️ Order search for {actor}: {filter}");
        self.retry.run("search_orders", || self.db.search_orders(filter.clone())).await
    }

    /// `new` orders placed before `placed_before`.
    pub async fn stale_new_orders(&self, placed_before: DateTime<Utc>) -> Result<Vec<Order>, DeliveryError> {
        self.db.stale_orders(OrderStatusType::New, placed_before).await
    }

    async fn fetch_required(&self, order_id: i64) -> Result<Order, DeliveryError> {
        self.retry
            .run("fetch_order", || self.db.fetch_order(order_id))
            .await?
            .ok_or_else(|| DeliveryError::not_found(format!("Order #{order_id}")))
    }

    async fn fetch_with_items(&self, order_id: i64) -> Result<OrderWithItems, DeliveryError> {
        let order = self.fetch_required(order_id).await?;
        let items = self.db.fetch_order_items(order_id).await?;
        Ok(OrderWithItems { order, items })
    }
}

fn validate_request(request: &PlaceOrderRequest) -> Result<(), DeliveryError> {
    if request.customer_id <= 0 || request.restaurant_id <= 0 {
        return Err(DeliveryError::validation("Customer and restaurant ids must be positive"));
    }
    if request.items.is_empty() {
        return Err(DeliveryError::validation("An order needs at least one item"));
    }
    for item in &request.items {
        if item.quantity <= 0 {
            return Err(DeliveryError::validation(format!("Item {} has a non-positive quantity", item.menu_item_id)));
        }
        if item.unit_price.is_negative() {
            return Err(DeliveryError::validation(format!("Item {} has a negative price", item.menu_item_id)));
        }
        if item.name.trim().is_empty() {
            return Err(DeliveryError::validation(format!("Item {} has no name", item.menu_item_id)));
        }
    }
    if request.delivery_fee.is_negative() || request.tax.is_negative() {
        return Err(DeliveryError::validation("Delivery fee and tax cannot be negative"));
    }
    let address = &request.delivery_address;
    if address.street.trim().is_empty() || address.city.trim().is_empty() {
        return Err(DeliveryError::validation("The delivery address needs a street and a city"));
    }
    let lat_ok = address.latitude.map(|l| (-90.0..=90.0).contains(&l)).unwrap_or(true);
    let lng_ok = address.longitude.map(|l| (-180.0..=180.0).contains(&l)).unwrap_or(true);
    if !lat_ok || !lng_ok {
        return Err(DeliveryError::validation("The delivery address coordinates are out of range"));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{db_types::DeliveryAddress, dlv_api::order_objects::ItemLine};

    fn request() -> PlaceOrderRequest {
        PlaceOrderRequest {
            customer_id: 1,
            restaurant_id: 2,
            items: vec![ItemLine {
                menu_item_id: 7,
                name: "Margherita".into(),
                unit_price: Money::from(1_200),
                quantity: 2,
            }],
            delivery_address: DeliveryAddress {
                street: "12 High St".into(),
                city: "Leeds".into(),
                ..Default::default()
            },
            payment_method: PaymentMethod::Card,
            delivery_fee: Money::from(300),
            tax: Money::zero(),
            promo_code: None,
            client_reference: None,
        }
    }

    fn new_order(client_reference: Option<&str>) -> NewOrder {
        NewOrder {
            order_number: "DLV-20261014-000001".into(),
            client_reference: client_reference.map(String::from),
            customer_id: 1,
            restaurant_id: 2,
            items: vec![],
            subtotal: Money::zero(),
            delivery_fee: Money::zero(),
            discount: Money::zero(),
            tax: Money::zero(),
            total: Money::zero(),
            delivery_address: DeliveryAddress::default(),
            payment_method: PaymentMethod::Card,
            promo_code: None,
            placed_at: Utc::now(),
        }
    }

    #[test]
    fn placements_without_a_client_reference_are_not_retried() {
        let api = OrderFlowApi::new((), EventProducers::default()).with_retry_policy(RetryPolicy::new(
            5,
            std::time::Duration::from_millis(1),
            std::time::Duration::from_millis(5),
        ));
        assert_eq!(api.placement_retry(&new_order(None)).max_attempts, 1);
        assert_eq!(api.placement_retry(&new_order(Some("checkout-1"))).max_attempts, 5);
    }

    #[test]
    fn order_numbers() {
        let at = "2026-10-14T09:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let number = generate_order_number(at);
        assert!(number.starts_with("DLV-20261014-"));
        assert_eq!(number.len(), "DLV-20261014-".len() + 6);
    }

    #[test]
    fn placement_validation() {
        assert!(validate_request(&request()).is_ok());
        let mut r = request();
        r.items.clear();
        assert_eq!(validate_request(&r).unwrap_err().code(), "VALIDATION_ERROR");
        let mut r = request();
        r.items[0].quantity = 0;
        assert!(validate_request(&r).is_err());
        let mut r = request();
        r.delivery_address.city = "  ".into();
        assert!(validate_request(&r).is_err());
        let mut r = request();
        r.tax = Money::from(-1);
        assert!(validate_request(&r).is_err());
        let mut r = request();
        r.delivery_address.latitude = Some(123.0);
        assert!(validate_request(&r).is_err());
    }
}

use chrono::{DateTime, Utc};
use dlv_common::Money;

use crate::{
    db::traits::{Cancellation, InsertOrderResult},
    db_types::{NewOrder, Order, OrderItem, OrderStatusType},
    dlv_api::{order_objects::OrderQueryFilter, policy::SettlementPolicy},
    DeliveryError,
};

/// Storage and atomic status changes for orders.
///
/// Every status-changing method is a compare-and-set on the order's current status. When the stored status no longer
/// matches (another actor got there first), the method fails with [`DeliveryError::InvalidTransition`] and changes
/// nothing.
#[allow(async_fn_in_trait)]
pub trait OrderManagement {
    /// Stores a new order and its items. When the order carries a client reference that is already known, the
    /// existing order's id is returned instead.
    async fn insert_order(&self, order: NewOrder) -> Result<InsertOrderResult, DeliveryError>;

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, DeliveryError>;

    async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, DeliveryError>;

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, DeliveryError>;

    /// Moves an order from `from` to `to` and stamps the matching transition timestamp.
    async fn advance_status(
        &self,
        order_id: i64,
        from: OrderStatusType,
        to: OrderStatusType,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError>;

    /// `ready` → `delivering`. Assigns the courier if the order had none.
    async fn pick_up_order(&self, order_id: i64, courier_id: i64, at: DateTime<Utc>) -> Result<Order, DeliveryError>;

    /// `delivering` → `delivered`, plus every ledger entry and aggregate counter the delivery implies, in one
    /// transaction.
    async fn complete_delivery(
        &self,
        order_id: i64,
        courier_id: i64,
        policy: SettlementPolicy,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError>;

    /// Cancels the order and refunds a captured payment in the same transaction.
    async fn cancel_order(
        &self,
        order_id: i64,
        from: OrderStatusType,
        cancellation: Cancellation,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError>;

    async fn capture_payment(
        &self,
        order_id: i64,
        reference: String,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError>;

    async fn assign_courier(&self, order_id: i64, courier_id: i64, at: DateTime<Utc>) -> Result<Order, DeliveryError>;

    async fn mark_restaurant_paid_by_courier(
        &self,
        order_id: i64,
        courier_id: i64,
        amount: Money,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError>;

    /// Orders in `status` that were placed strictly before `placed_before`.
    async fn stale_orders(
        &self,
        status: OrderStatusType,
        placed_before: DateTime<Utc>,
    ) -> Result<Vec<Order>, DeliveryError>;
}

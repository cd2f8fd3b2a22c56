use std::fmt::Display;

use chrono::{DateTime, Utc};
use dlv_common::Money;
use serde::{Deserialize, Serialize};

use crate::db_types::{DeliveryAddress, Order, OrderItem, OrderStatusType, PaymentMethod};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// An item line on a placement request. The price is the catalog's snapshot at the time the customer checked out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemLine {
    pub menu_item_id: i64,
    pub name: String,
    pub unit_price: Money,
    pub quantity: i64,
}

/// The input to [`OrderFlowApi::place_order`](crate::OrderFlowApi::place_order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub customer_id: i64,
    pub restaurant_id: i64,
    pub items: Vec<ItemLine>,
    pub delivery_address: DeliveryAddress,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub delivery_fee: Money,
    #[serde(default)]
    pub tax: Money,
    #[serde(default)]
    pub promo_code: Option<String>,
    /// Retries of a placement that carry the same reference return the original order.
    #[serde(default)]
    pub client_reference: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderQueryFilter {
    pub customer_id: Option<i64>,
    pub restaurant_id: Option<i64>,
    pub courier_id: Option<i64>,
    pub payment_method: Option<PaymentMethod>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub status: Option<Vec<OrderStatusType>>,
}

impl OrderQueryFilter {
    pub fn with_customer_id(mut self, customer_id: i64) -> Self {
        self.customer_id = Some(customer_id);
        self
    }

    pub fn with_restaurant_id(mut self, restaurant_id: i64) -> Self {
        self.restaurant_id = Some(restaurant_id);
        self
    }

    pub fn with_courier_id(mut self, courier_id: i64) -> Self {
        self.courier_id = Some(courier_id);
        self
    }

    pub fn with_payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_status(mut self, status: OrderStatusType) -> Self {
        self.status.get_or_insert_with(Vec::new).push(status);
        self
    }

    /// Orders that have not reached a terminal status yet.
    pub fn in_progress(self) -> Self {
        use OrderStatusType::*;
        [New, Accepted, Preparing, Ready, Delivering].into_iter().fold(self, |f, s| f.with_status(s))
    }

    pub fn is_empty(&self) -> bool {
        self.customer_id.is_none() &&
            self.restaurant_id.is_none() &&
            self.courier_id.is_none() &&
            self.payment_method.is_none() &&
            self.since.is_none() &&
            self.until.is_none() &&
            self.status.is_none()
    }
}

impl Display for OrderQueryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No filters.");
        }
        if let Some(id) = self.customer_id {
            write!(f, "customer_id: {id}. ")?;
        }
        if let Some(id) = self.restaurant_id {
            write!(f, "restaurant_id: {id}. ")?;
        }
        if let Some(id) = self.courier_id {
            write!(f, "courier_id: {id}. ")?;
        }
        if let Some(method) = self.payment_method {
            write!(f, "payment_method: {method}. ")?;
        }
        if let Some(since) = &self.since {
            write!(f, "since {since}. ")?;
        }
        if let Some(until) = &self.until {
            write!(f, "until {until}. ")?;
        }
        if let Some(statuses) = &self.status {
            let statuses = statuses.iter().map(|s| s.to_string()).collect::<Vec<String>>().join(",");
            write!(f, "statuses: [{statuses}]. ")?;
        }
        Ok(())
    }
}

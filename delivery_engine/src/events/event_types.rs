use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{Actor, CashRemittance, Order, OrderStatusType, PayoutRequest};

/// An order was placed or changed status. `previous` is `None` for a newly placed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub order: Order,
    pub previous: Option<OrderStatusType>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

impl OrderStatusEvent {
    pub fn new(order: Order, previous: Option<OrderStatusType>, actor: Actor) -> Self {
        let at = order.updated_at;
        Self { order, previous, actor, at }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourierLocationEvent {
    pub courier_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub at: DateTime<Utc>,
}

/// A payout request was created or changed status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutEvent {
    pub payout: PayoutRequest,
}

impl PayoutEvent {
    pub fn new(payout: PayoutRequest) -> Self {
        Self { payout }
    }
}

/// A remittance was declared or reviewed. `alert` is set when the review flagged a discrepancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemittanceEvent {
    pub remittance: CashRemittance,
    pub alert: bool,
}

impl RemittanceEvent {
    pub fn new(remittance: CashRemittance) -> Self {
        Self { remittance, alert: false }
    }

    pub fn discrepancy_alert(remittance: CashRemittance) -> Self {
        Self { remittance, alert: true }
    }
}

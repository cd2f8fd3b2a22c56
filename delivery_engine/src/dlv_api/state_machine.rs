//! The order lifecycle as data.
//!
//! ```text
//! new → accepted → preparing → ready → delivering → delivered
//!  └───────┴──────────┴─────────┴──────────┴─→ cancelled
//! ```
//!
//! [`Transition::allowed_from`] is the authorization table: for each role, the statuses an edge may be taken from.
//! An empty list means the role may never take the edge.
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Actor, Order, OrderStatusType, Role},
    DeliveryError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Accept,
    StartPreparing,
    MarkReady,
    PickUp,
    MarkDelivered,
    Cancel,
}

impl Transition {
    pub fn target(&self) -> OrderStatusType {
        match self {
            Self::Accept => OrderStatusType::Accepted,
            Self::StartPreparing => OrderStatusType::Preparing,
            Self::MarkReady => OrderStatusType::Ready,
            Self::PickUp => OrderStatusType::Delivering,
            Self::MarkDelivered => OrderStatusType::Delivered,
            Self::Cancel => OrderStatusType::Cancelled,
        }
    }

    pub fn allowed_from(&self, role: Role) -> &'static [OrderStatusType] {
        use OrderStatusType::*;
        match (self, role) {
            (Self::Accept, Role::Restaurant) => &[New],
            (Self::StartPreparing, Role::Restaurant) => &[Accepted],
            (Self::MarkReady, Role::Restaurant) => &[Preparing],
            (Self::PickUp, Role::Courier) => &[Ready],
            (Self::MarkDelivered, Role::Courier) => &[Delivering],
            (Self::Cancel, Role::Customer) => &[New],
            (Self::Cancel, Role::Restaurant) => &[New, Accepted, Preparing],
            (Self::Cancel, Role::Operator) => &[New, Accepted, Preparing, Ready, Delivering],
            (Self::Cancel, Role::System) => &[New],
            _ => &[],
        }
    }

    /// Operators must give a reason when they force a cancellation.
    pub fn requires_reason(&self, role: Role) -> bool {
        matches!((self, role), (Self::Cancel, Role::Operator))
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Accept => "accept",
            Self::StartPreparing => "start_preparing",
            Self::MarkReady => "mark_ready",
            Self::PickUp => "pick_up",
            Self::MarkDelivered => "mark_delivered",
            Self::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

/// Whether the actor is a party to the order. Couriers own an order once assigned. An unassigned order that is ready
/// can be claimed by any courier through `pick_up`.
pub fn is_party_to(actor: &Actor, order: &Order, transition: Option<Transition>) -> bool {
    match actor.role {
        Role::Customer => order.customer_id == actor.id,
        Role::Restaurant => order.restaurant_id == actor.id,
        Role::Courier => match order.courier_id {
            Some(id) => id == actor.id,
            None => transition == Some(Transition::PickUp),
        },
        Role::Operator | Role::System => true,
    }
}

/// Checks that the actor may take `transition` on `order` right now and returns the status to compare-and-set
/// against.
///
/// Checks run in this order: ownership and role (`FORBIDDEN`), then the current status (`INVALID_TRANSITION`).
pub fn check_transition(
    actor: &Actor,
    order: &Order,
    transition: Transition,
) -> Result<OrderStatusType, DeliveryError> {
    if !is_party_to(actor, order, Some(transition)) {
        return Err(DeliveryError::forbidden(format!("{actor} is not a party to order #{}", order.id)));
    }
    let allowed = transition.allowed_from(actor.role);
    if allowed.is_empty() {
        return Err(DeliveryError::forbidden(format!("A {} cannot {transition} an order", actor.role)));
    }
    if !allowed.contains(&order.status) {
        return Err(DeliveryError::InvalidTransition(format!(
            "Order #{} is {}. A {} cannot {transition} it.",
            order.id, order.status, actor.role
        )));
    }
    Ok(order.status)
}

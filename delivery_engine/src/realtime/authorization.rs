//! Who may send which command, and which events reach which rooms.
//!
//! Both decisions are plain lookup tables. The per-order checks (is this customer's order, is this courier still
//! engaged) need the order itself and live in [`may_join_order`].
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Actor, Order, Role},
    realtime::rooms::{EventKind, RoomKind},
};

/// A request sent by a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    JoinOrder { order_id: i64 },
    LeaveOrder { order_id: i64 },
    JoinPartyRoom,
    JoinDashboard,
    TrackParty { courier_id: i64 },
    JoinActiveCouriers,
    UpdateLocation { latitude: f64, longitude: f64 },
    GoOffline,
    GoOnline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    JoinOrder,
    LeaveOrder,
    JoinPartyRoom,
    JoinDashboard,
    TrackParty,
    JoinActiveCouriers,
    UpdateLocation,
    GoOffline,
    GoOnline,
}

impl ClientCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            ClientCommand::JoinOrder { .. } => CommandKind::JoinOrder,
            ClientCommand::LeaveOrder { .. } => CommandKind::LeaveOrder,
            ClientCommand::JoinPartyRoom => CommandKind::JoinPartyRoom,
            ClientCommand::JoinDashboard => CommandKind::JoinDashboard,
            ClientCommand::TrackParty { .. } => CommandKind::TrackParty,
            ClientCommand::JoinActiveCouriers => CommandKind::JoinActiveCouriers,
            ClientCommand::UpdateLocation { .. } => CommandKind::UpdateLocation,
            ClientCommand::GoOffline => CommandKind::GoOffline,
            ClientCommand::GoOnline => CommandKind::GoOnline,
        }
    }
}

const COMMAND_TABLE: &[(Role, CommandKind)] = &[
    (Role::Customer, CommandKind::JoinOrder),
    (Role::Customer, CommandKind::LeaveOrder),
    (Role::Restaurant, CommandKind::JoinPartyRoom),
    (Role::Restaurant, CommandKind::JoinOrder),
    (Role::Restaurant, CommandKind::LeaveOrder),
    (Role::Courier, CommandKind::JoinPartyRoom),
    (Role::Courier, CommandKind::JoinOrder),
    (Role::Courier, CommandKind::LeaveOrder),
    (Role::Courier, CommandKind::UpdateLocation),
    (Role::Courier, CommandKind::GoOffline),
    (Role::Courier, CommandKind::GoOnline),
    (Role::Operator, CommandKind::JoinDashboard),
    (Role::Operator, CommandKind::TrackParty),
    (Role::Operator, CommandKind::JoinActiveCouriers),
    (Role::Operator, CommandKind::JoinOrder),
    (Role::Operator, CommandKind::LeaveOrder),
];

const DELIVERY_TABLE: &[(EventKind, RoomKind)] = &[
    (EventKind::OrderStatus, RoomKind::Order),
    (EventKind::OrderStatus, RoomKind::Party),
    (EventKind::OrderStatus, RoomKind::Dashboard),
    (EventKind::CourierLocation, RoomKind::Order),
    (EventKind::CourierLocation, RoomKind::TrackCourier),
    (EventKind::CourierLocation, RoomKind::ActiveCouriers),
    (EventKind::CourierLocation, RoomKind::Dashboard),
    (EventKind::Payout, RoomKind::Party),
    (EventKind::Payout, RoomKind::Dashboard),
    (EventKind::Remittance, RoomKind::Party),
    (EventKind::Remittance, RoomKind::Dashboard),
    (EventKind::RemittanceAlert, RoomKind::Party),
    (EventKind::RemittanceAlert, RoomKind::Dashboard),
];

pub fn command_allowed(role: Role, command: CommandKind) -> bool {
    COMMAND_TABLE.contains(&(role, command))
}

pub fn delivered_to(event: EventKind, room: RoomKind) -> bool {
    DELIVERY_TABLE.contains(&(event, room))
}

/// Whether `actor` may subscribe to the order's room right now.
pub fn may_join_order(actor: &Actor, order: &Order) -> bool {
    match actor.role {
        Role::Customer => order.customer_id == actor.id,
        Role::Restaurant => order.restaurant_id == actor.id && !order.status.is_terminal(),
        Role::Courier => order.courier_id == Some(actor.id) && !order.status.is_terminal(),
        Role::Operator => true,
        Role::System => false,
    }
}

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::db_types::{ConversionError, Role};

/// The isolated connection namespaces. A connection only ever sees rooms inside its own namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Customer,
    /// Restaurants and couriers
    Partner,
    Operations,
}

impl Namespace {
    pub fn admits(&self, role: Role) -> bool {
        matches!(
            (self, role),
            (Namespace::Customer, Role::Customer)
                | (Namespace::Partner, Role::Restaurant | Role::Courier)
                | (Namespace::Operations, Role::Operator)
        )
    }
}

impl Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Namespace::Customer => f.write_str("customer"),
            Namespace::Partner => f.write_str("partner"),
            Namespace::Operations => f.write_str("operations"),
        }
    }
}

impl FromStr for Namespace {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Self::Customer),
            "partner" => Ok(Self::Partner),
            "operations" => Ok(Self::Operations),
            _ => Err(ConversionError(format!("'{s}' is not a namespace"))),
        }
    }
}

/// A named subscription target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Order(i64),
    Restaurant(i64),
    Courier(i64),
    Dashboard,
    TrackCourier(i64),
    ActiveCouriers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Order,
    Party,
    Dashboard,
    TrackCourier,
    ActiveCouriers,
}

impl Room {
    pub fn kind(&self) -> RoomKind {
        match self {
            Room::Order(_) => RoomKind::Order,
            Room::Restaurant(_) | Room::Courier(_) => RoomKind::Party,
            Room::Dashboard => RoomKind::Dashboard,
            Room::TrackCourier(_) => RoomKind::TrackCourier,
            Room::ActiveCouriers => RoomKind::ActiveCouriers,
        }
    }

    /// The namespace a room lives in, if it is fixed. Order rooms exist in every namespace.
    pub fn namespace(&self) -> Option<Namespace> {
        match self {
            Room::Order(_) => None,
            Room::Restaurant(_) | Room::Courier(_) => Some(Namespace::Partner),
            Room::Dashboard | Room::TrackCourier(_) | Room::ActiveCouriers => Some(Namespace::Operations),
        }
    }
}

impl Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Room::Order(id) => write!(f, "order_{id}"),
            Room::Restaurant(id) => write!(f, "restaurant_{id}"),
            Room::Courier(id) => write!(f, "courier_{id}"),
            Room::Dashboard => f.write_str("dashboard"),
            Room::TrackCourier(id) => write!(f, "track_courier_{id}"),
            Room::ActiveCouriers => f.write_str("couriers_active"),
        }
    }
}

impl FromStr for Room {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = |prefix: &str| -> Result<i64, ConversionError> {
            s.strip_prefix(prefix)
                .and_then(|id| id.parse::<i64>().ok())
                .ok_or_else(|| ConversionError(format!("'{s}' is not a room")))
        };
        match s {
            "dashboard" => Ok(Room::Dashboard),
            "couriers_active" => Ok(Room::ActiveCouriers),
            s if s.starts_with("track_courier_") => id("track_courier_").map(Room::TrackCourier),
            s if s.starts_with("order_") => id("order_").map(Room::Order),
            s if s.starts_with("restaurant_") => id("restaurant_").map(Room::Restaurant),
            s if s.starts_with("courier_") => id("courier_").map(Room::Courier),
            _ => Err(ConversionError(format!("'{s}' is not a room"))),
        }
    }
}

/// The kinds of event a subscriber can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OrderStatus,
    CourierLocation,
    Payout,
    Remittance,
    RemittanceAlert,
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::OrderStatus => f.write_str("order_status"),
            EventKind::CourierLocation => f.write_str("courier_location"),
            EventKind::Payout => f.write_str("payout"),
            EventKind::Remittance => f.write_str("remittance"),
            EventKind::RemittanceAlert => f.write_str("remittance_alert"),
        }
    }
}

/// What a subscriber receives. `room` is the room through which the event reached this connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricMessage {
    pub event: EventKind,
    pub room: String,
    pub data: serde_json::Value,
}

impl FabricMessage {
    pub fn new(event: EventKind, room: &Room, data: serde_json::Value) -> Self {
        Self { event, room: room.to_string(), data }
    }
}

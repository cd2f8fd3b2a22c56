use std::{
    collections::HashSet,
    fmt::Debug,
    sync::atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use log::*;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    db::traits::{OrderManagement, PresenceManagement},
    db_types::{Actor, CourierPresence, PartyKind, Role},
    dlv_api::order_objects::OrderQueryFilter,
    events::{CourierLocationEvent, OrderStatusEvent, PayoutEvent, RemittanceEvent},
    realtime::{
        authorization::{command_allowed, delivered_to, may_join_order, ClientCommand, CommandKind},
        rooms::{EventKind, FabricMessage, Namespace, Room},
    },
    DeliveryError,
};

pub type ConnectionId = u64;

pub const DEFAULT_QUEUE_SIZE: usize = 64;

struct Connection {
    actor: Actor,
    namespace: Namespace,
    sender: mpsc::Sender<FabricMessage>,
    rooms: HashSet<Room>,
}

/// The answer to a client command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum CommandReply {
    Joined { room: String },
    Left { room: String },
    ActiveCouriers { room: String, couriers: Vec<CourierPresence> },
    Presence { presence: CourierPresence },
}

/// Room membership and fan-out for connected clients.
///
/// Delivery is at-most-once. Every connection has a bounded queue, and an event that does not fit (or whose
/// receiver has gone) is dropped for that connection only. A connection that is in several of an event's target rooms
/// receives the event once. Nothing is replayed after a reconnect.
pub struct EventFabric<B> {
    db: B,
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<Room, HashSet<ConnectionId>>,
    next_id: AtomicU64,
    queue_size: usize,
}

impl<B> Debug for EventFabric<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventFabric ({} connections, {} rooms)", self.connections.len(), self.rooms.len())
    }
}

impl<B> EventFabric<B> {
    pub fn new(db: B) -> Self {
        Self::with_queue_size(db, DEFAULT_QUEUE_SIZE)
    }

    pub fn with_queue_size(db: B, queue_size: usize) -> Self {
        Self {
            db,
            connections: DashMap::new(),
            rooms: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_size: queue_size.max(1),
        }
    }

    /// Registers an authenticated connection. The actor's role must belong to the namespace.
    pub fn connect(
        &self,
        actor: Actor,
        namespace: Namespace,
    ) -> Result<(ConnectionId, mpsc::Receiver<FabricMessage>), DeliveryError> {
        if !namespace.admits(actor.role) {
            return Err(DeliveryError::forbidden(format!("{actor} cannot connect to the {namespace} namespace")));
        }
        let (sender, receiver) = mpsc::channel(self.queue_size);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.insert(id, Connection { actor, namespace, sender, rooms: HashSet::new() });
        debug!("📡️ Connection #{id} opened for {actor} on {namespace}");
        Ok((id, receiver))
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_size(&self, room: &Room) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    pub fn rooms_for(&self, connection: ConnectionId) -> Vec<Room> {
        self.connections.get(&connection).map(|c| c.rooms.iter().copied().collect()).unwrap_or_default()
    }

    fn authorize(&self, connection: ConnectionId, command: CommandKind) -> Result<Actor, DeliveryError> {
        let actor = self
            .connections
            .get(&connection)
            .map(|c| c.actor)
            .ok_or_else(|| DeliveryError::not_found(format!("Connection #{connection}")))?;
        if !command_allowed(actor.role, command) {
            return Err(DeliveryError::forbidden(format!("{actor} may not use {command:?}")));
        }
        Ok(actor)
    }

    fn join(&self, connection: ConnectionId, room: Room) -> Result<CommandReply, DeliveryError> {
        {
            let mut conn = self
                .connections
                .get_mut(&connection)
                .ok_or_else(|| DeliveryError::not_found(format!("Connection #{connection}")))?;
            if let Some(ns) = room.namespace() {
                if ns != conn.namespace {
                    return Err(DeliveryError::forbidden(format!(
                        "{room} is not part of the {} namespace",
                        conn.namespace
                    )));
                }
            }
            conn.rooms.insert(room);
        }
        self.rooms.entry(room).or_default().insert(connection);
        trace!("📡️ Connection #{connection} joined {room}");
        Ok(CommandReply::Joined { room: room.to_string() })
    }

    fn leave(&self, connection: ConnectionId, room: Room) {
        if let Some(mut conn) = self.connections.get_mut(&connection) {
            conn.rooms.remove(&room);
        }
        if let Some(mut members) = self.rooms.get_mut(&room) {
            members.remove(&connection);
        }
        self.rooms.remove_if(&room, |_, members| members.is_empty());
    }

    pub fn leave_order(&self, connection: ConnectionId, order_id: i64) -> Result<CommandReply, DeliveryError> {
        self.authorize(connection, CommandKind::LeaveOrder)?;
        let room = Room::Order(order_id);
        self.leave(connection, room);
        Ok(CommandReply::Left { room: room.to_string() })
    }

    pub fn join_party_room(&self, connection: ConnectionId) -> Result<CommandReply, DeliveryError> {
        let actor = self.authorize(connection, CommandKind::JoinPartyRoom)?;
        let room = match actor.role {
            Role::Restaurant => Room::Restaurant(actor.id),
            Role::Courier => Room::Courier(actor.id),
            _ => return Err(DeliveryError::forbidden(format!("{actor} has no party room"))),
        };
        self.join(connection, room)
    }

    pub fn join_dashboard(&self, connection: ConnectionId) -> Result<CommandReply, DeliveryError> {
        self.authorize(connection, CommandKind::JoinDashboard)?;
        self.join(connection, Room::Dashboard)
    }

    pub fn track_party(&self, connection: ConnectionId, courier_id: i64) -> Result<CommandReply, DeliveryError> {
        self.authorize(connection, CommandKind::TrackParty)?;
        self.join(connection, Room::TrackCourier(courier_id))
    }

    //------------------------------------------   Publishing   -----------------------------------------------------
    /// Sends `data` to every member of the rooms that accept this kind of event. Returns the number of connections
    /// that received it.
    fn deliver<T: Serialize>(&self, event: EventKind, rooms: &[Room], data: &T) -> usize {
        let data = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                error!("📡️ Could not serialize a {event} event. {e}");
                return 0;
            },
        };
        let mut seen = HashSet::new();
        let mut delivered = 0;
        for room in rooms.iter().filter(|r| delivered_to(event, r.kind())) {
            let members: Vec<ConnectionId> =
                self.rooms.get(room).map(|m| m.iter().copied().collect()).unwrap_or_default();
            for id in members {
                if !seen.insert(id) {
                    continue;
                }
                let Some(conn) = self.connections.get(&id) else { continue };
                match conn.sender.try_send(FabricMessage::new(event, room, data.clone())) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        debug!("📡️ Connection #{id} is not keeping up. Dropped a {event} event")
                    },
                    Err(TrySendError::Closed(_)) => trace!("📡️ Connection #{id} has gone. Dropped a {event} event"),
                }
            }
        }
        delivered
    }

    pub fn publish_order_status(&self, event: &OrderStatusEvent) -> usize {
        let order = &event.order;
        let mut rooms = vec![Room::Order(order.id), Room::Restaurant(order.restaurant_id), Room::Dashboard];
        if let Some(courier_id) = order.courier_id {
            rooms.push(Room::Courier(courier_id));
        }
        self.deliver(EventKind::OrderStatus, &rooms, event)
    }

    pub fn publish_payout(&self, event: &PayoutEvent) -> usize {
        let party = event.payout.party();
        let mut rooms = vec![Room::Dashboard];
        match party.kind {
            PartyKind::Restaurant => rooms.push(Room::Restaurant(party.id)),
            PartyKind::Delivery => rooms.push(Room::Courier(party.id)),
            _ => {},
        }
        self.deliver(EventKind::Payout, &rooms, event)
    }

    pub fn publish_remittance(&self, event: &RemittanceEvent) -> usize {
        let kind = if event.alert { EventKind::RemittanceAlert } else { EventKind::Remittance };
        let rooms = [Room::Courier(event.remittance.courier_id), Room::Dashboard];
        self.deliver(kind, &rooms, event)
    }
}

impl<B> EventFabric<B>
where B: OrderManagement + PresenceManagement
{
    /// Runs a client command on behalf of the connection.
    pub async fn handle_command(
        &self,
        connection: ConnectionId,
        command: ClientCommand,
    ) -> Result<CommandReply, DeliveryError> {
        match command {
            ClientCommand::JoinOrder { order_id } => self.join_order(connection, order_id).await,
            ClientCommand::LeaveOrder { order_id } => self.leave_order(connection, order_id),
            ClientCommand::JoinPartyRoom => self.join_party_room(connection),
            ClientCommand::JoinDashboard => self.join_dashboard(connection),
            ClientCommand::TrackParty { courier_id } => self.track_party(connection, courier_id),
            ClientCommand::JoinActiveCouriers => self.join_active_couriers(connection).await,
            ClientCommand::UpdateLocation { latitude, longitude } => {
                self.update_location(connection, latitude, longitude).await
            },
            ClientCommand::GoOffline => self.go_offline(connection).await,
            ClientCommand::GoOnline => self.go_online(connection).await,
        }
    }

    /// Membership is only granted once the order has been checked against the actor.
    pub async fn join_order(&self, connection: ConnectionId, order_id: i64) -> Result<CommandReply, DeliveryError> {
        let actor = self.authorize(connection, CommandKind::JoinOrder)?;
        let order =
            self.db.fetch_order(order_id).await?.ok_or_else(|| DeliveryError::not_found(format!("Order #{order_id}")))?;
        if !may_join_order(&actor, &order) {
            return Err(DeliveryError::forbidden(format!("{actor} may not follow order #{order_id}")));
        }
        self.join(connection, Room::Order(order_id))
    }

    /// Joins the live courier feed and returns the current snapshot, rebuilt from the presence table.
    pub async fn join_active_couriers(&self, connection: ConnectionId) -> Result<CommandReply, DeliveryError> {
        self.authorize(connection, CommandKind::JoinActiveCouriers)?;
        let couriers = self.db.active_couriers().await?;
        let room = Room::ActiveCouriers;
        self.join(connection, room)?;
        Ok(CommandReply::ActiveCouriers { room: room.to_string(), couriers })
    }

    pub async fn update_location(
        &self,
        connection: ConnectionId,
        latitude: f64,
        longitude: f64,
    ) -> Result<CommandReply, DeliveryError> {
        let actor = self.authorize(connection, CommandKind::UpdateLocation)?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(DeliveryError::validation(format!("({latitude}, {longitude}) is not a valid position")));
        }
        let presence = self.db.update_location(actor.id, latitude, longitude).await?;
        let event = CourierLocationEvent { courier_id: actor.id, latitude, longitude, at: presence.updated_at };
        self.publish_location(&event).await?;
        Ok(CommandReply::Presence { presence })
    }

    /// Location events go to every order the courier is engaged in, plus the operations rooms.
    pub async fn publish_location(&self, event: &CourierLocationEvent) -> Result<usize, DeliveryError> {
        let filter = OrderQueryFilter::default().with_courier_id(event.courier_id).in_progress();
        let engaged = self.db.search_orders(filter).await?;
        let mut rooms: Vec<Room> = engaged.iter().map(|o| Room::Order(o.id)).collect();
        rooms.extend([Room::TrackCourier(event.courier_id), Room::ActiveCouriers, Room::Dashboard]);
        Ok(self.deliver(EventKind::CourierLocation, &rooms, event))
    }

    pub async fn go_offline(&self, connection: ConnectionId) -> Result<CommandReply, DeliveryError> {
        let actor = self.authorize(connection, CommandKind::GoOffline)?;
        let presence = self.db.set_availability(actor.id, false).await?;
        info!("📡️ Courier #{} is offline", actor.id);
        Ok(CommandReply::Presence { presence })
    }

    pub async fn go_online(&self, connection: ConnectionId) -> Result<CommandReply, DeliveryError> {
        let actor = self.authorize(connection, CommandKind::GoOnline)?;
        let presence = self.db.set_availability(actor.id, true).await?;
        info!("📡️ Courier #{} is online", actor.id);
        Ok(CommandReply::Presence { presence })
    }

    /// Drops the connection from every room. A courier is marked unavailable for dispatch. Calling this for a
    /// connection that has already gone does nothing.
    pub async fn disconnect(&self, connection: ConnectionId) -> Result<(), DeliveryError> {
        let Some((_, conn)) = self.connections.remove(&connection) else {
            return Ok(());
        };
        for room in &conn.rooms {
            if let Some(mut members) = self.rooms.get_mut(room) {
                members.remove(&connection);
            }
            self.rooms.remove_if(room, |_, members| members.is_empty());
        }
        debug!("📡️ Connection #{connection} for {} closed", conn.actor);
        if conn.actor.role == Role::Courier {
            self.db.set_availability(conn.actor.id, false).await?;
            info!("📡️ Courier #{} disconnected and is unavailable for dispatch", conn.actor.id);
        }
        Ok(())
    }
}

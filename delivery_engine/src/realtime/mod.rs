//! Real-time event fabric.
//!
//! Clients connect to one of three [`Namespace`]s with a verified identity, then subscribe to rooms with
//! [`ClientCommand`]s. The transport (WebSocket framing, token checks) lives in the server. This module owns room
//! membership, authorization and fan-out.
pub mod authorization;
pub mod fabric;
pub mod rooms;

pub use authorization::{ClientCommand, CommandKind};
pub use fabric::{CommandReply, ConnectionId, EventFabric};
pub use rooms::{EventKind, FabricMessage, Namespace, Room, RoomKind};

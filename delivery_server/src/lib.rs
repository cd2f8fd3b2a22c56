//! # Delivery server
//! This crate hosts the HTTP and WebSocket front end of the delivery marketplace engine. It is responsible for:
//! * Verifying access tokens and mapping them to engine actors.
//! * Exposing the order lifecycle, balances, payouts and cash remittances as a JSON API.
//! * Carrying the real-time fabric over WebSockets.
//! * Running the periodic settlement passes.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/api/...`: The authenticated JSON API. See [routes](routes/index.html).
//! * `/ws/customer`, `/ws/partner` and `/ws/operations`: WebSocket endpoints for each real-time namespace.

pub mod auth;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod sockets;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;

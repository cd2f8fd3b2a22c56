//! The engine's public operations.
//!
//! Each API struct wraps a backend `B` that implements the traits in [`crate::db::traits`], plus the event
//! producers it publishes to once a mutation has committed.
//!
//! * [`order_flow_api::OrderFlowApi`] drives orders through the lifecycle state machine.
//! * [`settlement_api::SettlementApi`] derives balances and handles payouts and adjustments.
//! * [`remittance_api::RemittanceApi`] handles courier cash declarations.
//! * [`jobs_api::SettlementJobs`] holds the scheduled passes.
pub mod errors;
pub mod jobs_api;
pub mod order_flow_api;
pub mod order_objects;
pub mod policy;
pub mod promo_api;
pub mod remittance_api;
pub mod retry;
pub mod settlement_api;
pub mod state_machine;

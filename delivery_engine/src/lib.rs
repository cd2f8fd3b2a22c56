//! Delivery Engine
//!
//! The delivery engine runs a food-delivery marketplace's order lifecycle and the money that follows it: a
//! role-checked order state machine, an append-only ledger with derived balances, payouts and courier cash
//! remittances, plus a real-time fabric that keeps every party's view of an order live.
//!
//! The library is divided into these sections:
//! 1. Database management and control ([`mod@db`]). SQLite is the supported backend. The backend traits define the
//!    atomic operations the engine relies on. The data types stored in the database live in [`db_types`].
//! 2. The public API ([`mod@dlv_api`]). `OrderFlowApi`, `SettlementApi`, `RemittanceApi` and `PromoApi` are generic
//!    over the backend traits. `SettlementJobs` holds the scheduled passes.
//! 3. Post-commit events ([`events`]) and the real-time fabric they feed ([`realtime`]).
mod db;

pub mod db_types;
pub mod dlv_api;
pub mod events;
pub mod realtime;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use db::sqlite::{SqliteDatabase, SqliteDatabaseError};
pub use db::traits::{
    Cancellation,
    InsertEntryResult,
    InsertOrderResult,
    LedgerManagement,
    OrderManagement,
    PresenceManagement,
    PromoManagement,
    RemittanceManagement,
    SettlementManagement,
};
pub use dlv_api::{
    errors::DeliveryError,
    jobs_api::{JobSummary, SettlementJobs},
    order_flow_api::OrderFlowApi,
    order_objects,
    policy::SettlementPolicy,
    promo_api::PromoApi,
    remittance_api::RemittanceApi,
    retry::RetryPolicy,
    settlement_api::SettlementApi,
};

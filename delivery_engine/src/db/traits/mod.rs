//! #  Database management and control.
//!
//! This module defines the contracts that delivery engine database *backends* must honour. The public APIs in
//! [`crate::dlv_api`] are generic over these traits, so any backend (or a mock) that implements them can drive the
//! engine.
//!
//! * [`OrderManagement`] stores orders and performs every order status change as a compare-and-set, together with the
//!   ledger writes that the change implies.
//! * [`LedgerManagement`] appends ledger entries under their idempotency key and derives balances from them.
//! * [`SettlementManagement`] owns payout requests.
//! * [`RemittanceManagement`] owns courier cash remittances.
//! * [`PresenceManagement`] tracks courier availability and location.
//! * [`PromoManagement`] stores promotional codes.
//!
//! Backends signal failures with [`DeliveryError`](crate::DeliveryError). Business-rule failures that can only be
//! detected atomically (an outstanding payout, an already remitted order) are raised by the backend inside its
//! transaction.
mod ledger_management;
mod order_management;
mod presence_management;
mod promo_management;
mod remittance_management;
mod settlement_management;

mod data_objects;

pub use data_objects::{Cancellation, InsertEntryResult, InsertOrderResult};
pub use ledger_management::LedgerManagement;
pub use order_management::OrderManagement;
pub use presence_management::PresenceManagement;
pub use promo_management::PromoManagement;
pub use remittance_management::RemittanceManagement;
pub use settlement_management::SettlementManagement;

use dlv_common::Money;
use thiserror::Error;

use crate::db_types::{OrderStatusType, Party, PayoutStatus};

#[derive(Debug, Error)]
pub enum SqliteDatabaseError {
    #[error("Database connection error: {0}")]
    DriverError(#[from] sqlx::Error),
    #[error("Database query error: {0}")]
    QueryError(String),
    #[error("Order #{0} does not exist")]
    OrderNotFound(i64),
    #[error("Payout request #{0} does not exist")]
    PayoutNotFound(i64),
    #[error("Cash remittance #{0} does not exist")]
    RemittanceNotFound(i64),
    #[error("Order #{order_id} is {actual}, not {expected}")]
    StaleStatus { order_id: i64, expected: OrderStatusType, actual: OrderStatusType },
    #[error("Order #{0} is cancelled and accepts no further financial entries")]
    OrderClosed(i64),
    #[error("Courier #{0} is not available for dispatch")]
    CourierUnavailable(i64),
    #[error("Order #{0} cannot be assigned: {1}")]
    AssignmentConflict(i64, String),
    #[error("{0} already has an outstanding payout request")]
    PayoutOutstanding(Party),
    #[error("{party} has {available} available, below the payout floor of {floor}")]
    BelowPayoutFloor { party: Party, available: Money, floor: Money },
    #[error("Payout request #{id} is {status}")]
    PayoutStateConflict { id: i64, status: PayoutStatus },
    #[error("Invalid remittance. {0}")]
    InvalidRemittance(String),
    #[error("Orders {0:?} are already covered by a remittance")]
    AlreadyRemitted(Vec<i64>),
    #[error("Declared amount {declared} does not match the expected amount {expected}")]
    AmountMismatch { expected: Money, declared: Money },
    #[error("Cash remittance #{0} has already been reviewed")]
    RemittanceAlreadyReviewed(i64),
    #[error("Payment cannot be processed. {0}")]
    PaymentStateConflict(String),
    #[error("Order number {0} is already taken")]
    OrderNumberTaken(String),
    #[error("Client reference {0} was already used for a different order")]
    ClientReferenceReused(String),
    #[error("Promo code {0} already exists")]
    PromoCodeExists(String),
}

impl SqliteDatabaseError {
    /// Busy or locked databases, pool exhaustion and I/O failures go away on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::DriverError(e) => is_transient_driver_error(e),
            // a fresh order number will do
            Self::OrderNumberTaken(_) => true,
            _ => false,
        }
    }
}

pub(crate) fn is_transient_driver_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .and_then(|c| c.parse::<i64>().ok())
            // SQLITE_BUSY and SQLITE_LOCKED, including their extended codes
            .map(|code| matches!(code & 0xff, 5 | 6))
            .unwrap_or(false),
        _ => false,
    }
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

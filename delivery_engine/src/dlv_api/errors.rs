use dlv_common::Money;
use thiserror::Error;

use crate::db_types::Party;
#[cfg(feature = "sqlite")]
use crate::db::sqlite::SqliteDatabaseError;

/// The engine's error taxonomy. Every variant maps onto one of the public error codes through [`DeliveryError::code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Invalid request. {0}")]
    Validation(String),
    #[error("Invalid transition. {0}")]
    InvalidTransition(String),
    #[error("Forbidden. {0}")]
    Forbidden(String),
    #[error("{0} was not found")]
    NotFound(String),
    #[error("Declared amount {declared} does not match the expected amount {expected}")]
    AmountMismatch { expected: Money, declared: Money },
    #[error("Orders {0:?} are already covered by a previous remittance")]
    AlreadyRemitted(Vec<i64>),
    #[error("A transaction reference and a proof reference are both required to mark a payout as paid")]
    ProofRequired,
    #[error("{0} already has an outstanding payout request")]
    PayoutOutstanding(Party),
    #[error("Database error. {message}")]
    Database { message: String, retryable: bool },
}

impl DeliveryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            Self::AlreadyRemitted(_) => "ALREADY_REMITTED",
            Self::ProofRequired => "PROOF_REQUIRED",
            Self::PayoutOutstanding(_) => "VALIDATION_ERROR",
            Self::Database { .. } => "STORE_UNAVAILABLE",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database { retryable: true, .. })
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }
}

#[cfg(feature = "sqlite")]
impl From<SqliteDatabaseError> for DeliveryError {
    fn from(e: SqliteDatabaseError) -> Self {
        use SqliteDatabaseError::*;
        let retryable = e.is_transient();
        match e {
            OrderNotFound(id) => Self::NotFound(format!("Order #{id}")),
            PayoutNotFound(id) => Self::NotFound(format!("Payout request #{id}")),
            RemittanceNotFound(id) => Self::NotFound(format!("Cash remittance #{id}")),
            e @ (StaleStatus { .. } | OrderClosed(_) | AssignmentConflict(..) | PayoutStateConflict { .. }) => {
                Self::InvalidTransition(e.to_string())
            },
            e @ RemittanceAlreadyReviewed(_) => Self::InvalidTransition(e.to_string()),
            e @ (CourierUnavailable(_)
            | BelowPayoutFloor { .. }
            | InvalidRemittance(_)
            | PaymentStateConflict(_)
            | ClientReferenceReused(_)
            | PromoCodeExists(_)) => Self::Validation(e.to_string()),
            PayoutOutstanding(party) => Self::PayoutOutstanding(party),
            AlreadyRemitted(ids) => Self::AlreadyRemitted(ids),
            AmountMismatch { expected, declared } => Self::AmountMismatch { expected, declared },
            e @ (DriverError(_) | QueryError(_) | OrderNumberTaken(_)) => {
                Self::Database { message: e.to_string(), retryable }
            },
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for DeliveryError {
    fn from(e: sqlx::Error) -> Self {
        SqliteDatabaseError::from(e).into()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(DeliveryError::validation("x").code(), "VALIDATION_ERROR");
        assert_eq!(DeliveryError::PayoutOutstanding(Party::courier(1)).code(), "VALIDATION_ERROR");
        assert_eq!(DeliveryError::ProofRequired.code(), "PROOF_REQUIRED");
        let db = DeliveryError::Database { message: "busy".into(), retryable: true };
        assert_eq!(db.code(), "STORE_UNAVAILABLE");
        assert!(db.is_retryable());
        assert!(!DeliveryError::InvalidTransition("stale".into()).is_retryable());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn backend_errors_map_onto_the_taxonomy() {
        let e: DeliveryError = SqliteDatabaseError::AlreadyRemitted(vec![4, 5]).into();
        assert_eq!(e, DeliveryError::AlreadyRemitted(vec![4, 5]));
        let e: DeliveryError = SqliteDatabaseError::OrderNotFound(9).into();
        assert_eq!(e.code(), "NOT_FOUND");
        let e: DeliveryError = SqliteDatabaseError::DriverError(sqlx::Error::PoolTimedOut).into();
        assert!(e.is_retryable());
        let e: DeliveryError = SqliteDatabaseError::DriverError(sqlx::Error::RowNotFound).into();
        assert!(!e.is_retryable());
    }
}

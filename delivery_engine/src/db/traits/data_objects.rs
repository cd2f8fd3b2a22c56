use serde::{Deserialize, Serialize};

use crate::db_types::Actor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOrderResult {
    Inserted(i64),
    AlreadyExists(i64),
}

impl InsertOrderResult {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::AlreadyExists(id) => *id,
        }
    }
}

/// The outcome of appending a ledger entry. A duplicate idempotency key is not an error: the id of the entry that
/// already holds the key is returned instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertEntryResult {
    Inserted(i64),
    AlreadyExists(i64),
}

impl InsertEntryResult {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::AlreadyExists(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub cancelled_by: Actor,
    pub reason: Option<String>,
}

impl Cancellation {
    pub fn new(cancelled_by: Actor, reason: Option<String>) -> Self {
        Self { cancelled_by, reason }
    }
}

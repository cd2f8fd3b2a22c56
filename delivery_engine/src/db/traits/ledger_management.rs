use crate::{
    db::traits::InsertEntryResult,
    db_types::{Balance, LedgerEntry, NewLedgerEntry, Party, PartyStats},
    DeliveryError,
};

/// The append-only ledger.
#[allow(async_fn_in_trait)]
pub trait LedgerManagement {
    /// Appends an entry unless one with the same `payment_reference` already exists. Uniqueness is enforced by the
    /// store, so concurrent retries of the same logical event produce at most one entry.
    async fn append_entry(&self, entry: NewLedgerEntry) -> Result<InsertEntryResult, DeliveryError>;

    /// Derives a party's balance from completed entries and outstanding payout requests. This is a pure read.
    async fn fetch_balance(&self, party: Party) -> Result<Balance, DeliveryError>;

    async fn entries_for_party(&self, party: Party) -> Result<Vec<LedgerEntry>, DeliveryError>;

    async fn entries_for_order(&self, order_id: i64) -> Result<Vec<LedgerEntry>, DeliveryError>;

    /// Restaurants and couriers that appear in at least one ledger entry.
    async fn payable_parties(&self) -> Result<Vec<Party>, DeliveryError>;

    async fn party_stats(&self, party: Party) -> Result<Option<PartyStats>, DeliveryError>;
}

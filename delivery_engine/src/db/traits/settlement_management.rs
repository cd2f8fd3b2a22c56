use chrono::{DateTime, Utc};
use dlv_common::Money;

use crate::{
    db_types::{NewPayoutRequest, Party, PayoutProof, PayoutRequest, PayoutStatus},
    DeliveryError,
};

#[allow(async_fn_in_trait)]
pub trait SettlementManagement {
    /// Creates a pending request for the party's entire available balance, computed in the same transaction as the
    /// insert. Fails if the balance is below `floor` or the party already has an outstanding request.
    async fn create_payout(&self, request: NewPayoutRequest, floor: Money) -> Result<PayoutRequest, DeliveryError>;

    async fn fetch_payout(&self, payout_id: i64) -> Result<Option<PayoutRequest>, DeliveryError>;

    async fn outstanding_payout(&self, party: Party) -> Result<Option<PayoutRequest>, DeliveryError>;

    async fn payouts_for_party(&self, party: Party) -> Result<Vec<PayoutRequest>, DeliveryError>;

    /// `pending` → `processing`
    async fn start_processing(&self, payout_id: i64) -> Result<PayoutRequest, DeliveryError>;

    /// Moves an outstanding request to `rejected` or `cancelled`.
    async fn close_payout(
        &self,
        payout_id: i64,
        status: PayoutStatus,
        reason: Option<String>,
    ) -> Result<PayoutRequest, DeliveryError>;

    /// Stores the proof, marks the request paid and writes its `payout` ledger entry if it is missing, all in one
    /// transaction. Calling this on a request that is already paid only repairs a missing ledger entry.
    async fn mark_payout_paid(&self, payout_id: i64, proof: PayoutProof) -> Result<PayoutRequest, DeliveryError>;

    /// Writes the missing ledger entry for every paid request that lacks one and returns the repaired request ids.
    async fn reconcile_paid_payouts(&self) -> Result<Vec<i64>, DeliveryError>;

    /// When the named scheduled pass last completed, if ever.
    async fn last_job_run(&self, job: &str) -> Result<Option<DateTime<Utc>>, DeliveryError>;

    async fn record_job_run(&self, job: &str, at: DateTime<Utc>) -> Result<(), DeliveryError>;
}

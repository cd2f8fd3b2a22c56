use std::fmt::Debug;

use dlv_common::Money;
use log::*;

use crate::{
    db::traits::{InsertEntryResult, LedgerManagement, SettlementManagement},
    db_types::{
        Balance,
        LedgerEntry,
        NewLedgerEntry,
        NewPayoutRequest,
        Party,
        PartyKind,
        PartyStats,
        PayoutProof,
        PayoutRequest,
        PayoutStatus,
        TransactionType,
    },
    dlv_api::{policy::SettlementPolicy, retry::RetryPolicy},
    events::{EventProducers, PayoutEvent},
    DeliveryError,
};

/// Balances, payouts and manual ledger adjustments.
///
/// Balances are always derived from the ledger through the backend's single balance routine. Nothing here caches or
/// stores a balance.
pub struct SettlementApi<B> {
    db: B,
    producers: EventProducers,
    policy: SettlementPolicy,
    retry: RetryPolicy,
}

impl<B> Debug for SettlementApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementApi ({:?})", self.policy)
    }
}

impl<B> SettlementApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers, policy: SettlementPolicy::default(), retry: RetryPolicy::default() }
    }

    pub fn with_policy(mut self, policy: SettlementPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }
}

/// Trims a proof field, treating blank values as missing.
fn proof_field(value: Option<String>) -> Result<String, DeliveryError> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).ok_or(DeliveryError::ProofRequired)
}

impl<B> SettlementApi<B>
where B: LedgerManagement + SettlementManagement
{
    pub async fn get_balance(&self, party: Party) -> Result<Balance, DeliveryError> {
        self.retry.run("get_balance", || self.db.fetch_balance(party)).await
    }

    /// Recomputes the balance from the full ledger history. This is a pure read, so calling it twice without an
    /// intervening ledger write returns the same value.
    pub async fn refresh_balance(&self, party: Party) -> Result<Balance, DeliveryError> {
        let balance = self.get_balance(party).await?;
        info!(
            "🔄️💰️ Balance for {party}: credits {} - debits {} - outstanding payouts {} = {} available",
            balance.credits, balance.debits, balance.outstanding_payouts, balance.available
        );
        Ok(balance)
    }

    /// Requests a payout of the party's entire available balance.
    ///
    /// Fails with a validation error when the balance is below the party's floor or a payout is already
    /// outstanding. The balance check and the insert happen atomically in the backend.
    pub async fn create_payout(
        &self,
        party: Party,
        payment_method: Option<String>,
        payment_account: Option<String>,
    ) -> Result<PayoutRequest, DeliveryError> {
        let floor = self
            .policy
            .payout_floor(&party)
            .ok_or_else(|| DeliveryError::validation(format!("{party} cannot receive payouts")))?;
        let request = NewPayoutRequest {
            party,
            payment_method: payment_method.filter(|m| !m.trim().is_empty()),
            payment_account: payment_account.filter(|a| !a.trim().is_empty()),
        };
        let payout = self.retry.run("create_payout", || self.db.create_payout(request.clone(), floor)).await?;
        info!("🔄️💸️ Payout request #{} of {} created for {party}", payout.id, payout.amount);
        self.producers.publish_payout(PayoutEvent::new(payout.clone())).await;
        Ok(payout)
    }

    pub async fn start_processing(&self, payout_id: i64) -> Result<PayoutRequest, DeliveryError> {
        let payout = self.db.start_processing(payout_id).await?;
        debug!("🔄️💸️ Payout request #{payout_id} is being processed");
        self.producers.publish_payout(PayoutEvent::new(payout.clone())).await;
        Ok(payout)
    }

    /// Marks the payout as paid. Both references are mandatory. On success the payout's ledger entry exists, whether
    /// this call wrote it or an earlier one did.
    pub async fn mark_payout_paid(
        &self,
        payout_id: i64,
        transaction_reference: Option<String>,
        proof_reference: Option<String>,
        authorized_by: String,
    ) -> Result<PayoutRequest, DeliveryError> {
        let transaction_reference = proof_field(transaction_reference)?;
        let proof_reference = proof_field(proof_reference)?;
        let authorized_by = authorized_by.trim().to_string();
        if authorized_by.is_empty() {
            return Err(DeliveryError::validation("The authorizing operator must be recorded"));
        }
        let proof = PayoutProof { transaction_reference, proof_reference, authorized_by };
        let payout = self.retry.run("mark_payout_paid", || self.db.mark_payout_paid(payout_id, proof.clone())).await?;
        info!("🔄️💸️ Payout request #{payout_id} of {} marked as paid by {}", payout.amount, proof.authorized_by);
        self.producers.publish_payout(PayoutEvent::new(payout.clone())).await;
        Ok(payout)
    }

    pub async fn reject_payout(&self, payout_id: i64, reason: String) -> Result<PayoutRequest, DeliveryError> {
        let reason = reason.trim().to_string();
        if reason.is_empty() {
            return Err(DeliveryError::validation("A rejection reason is required"));
        }
        let payout = self.db.close_payout(payout_id, PayoutStatus::Rejected, Some(reason)).await?;
        info!("🔄️💸️ Payout request #{payout_id} rejected");
        self.producers.publish_payout(PayoutEvent::new(payout.clone())).await;
        Ok(payout)
    }

    pub async fn cancel_payout(&self, payout_id: i64) -> Result<PayoutRequest, DeliveryError> {
        let payout = self.db.close_payout(payout_id, PayoutStatus::Cancelled, None).await?;
        info!("🔄️💸️ Payout request #{payout_id} cancelled");
        self.producers.publish_payout(PayoutEvent::new(payout.clone())).await;
        Ok(payout)
    }

    /// Writes the missing ledger entry for every paid payout that lacks one. Returns the ids of the repaired payouts.
    pub async fn reconcile_payouts(&self) -> Result<Vec<i64>, DeliveryError> {
        let repaired = self.retry.run("reconcile_payouts", || self.db.reconcile_paid_payouts()).await?;
        if repaired.is_empty() {
            debug!("🔄️💸️ Every paid payout has its ledger entry");
        } else {
            warn!("🔄️💸️ Repaired {} paid payouts that had no ledger entry: {repaired:?}", repaired.len());
        }
        Ok(repaired)
    }

    /// Records an explicit operator correction. A positive amount credits the party and a negative amount debits it.
    /// `reference` is the idempotency key, so resubmitting the same adjustment writes nothing.
    pub async fn record_adjustment(
        &self,
        party: Party,
        amount: Money,
        reason: String,
        reference: String,
        authorized_by: String,
    ) -> Result<InsertEntryResult, DeliveryError> {
        if matches!(party.kind, PartyKind::Platform | PartyKind::None) {
            return Err(DeliveryError::validation(format!("Adjustments cannot target {party}")));
        }
        if amount == Money::zero() {
            return Err(DeliveryError::validation("An adjustment must move a non-zero amount"));
        }
        let (reason, reference, authorized_by) =
            (reason.trim().to_string(), reference.trim().to_string(), authorized_by.trim().to_string());
        if reason.is_empty() || reference.is_empty() || authorized_by.is_empty() {
            return Err(DeliveryError::validation("Adjustments need a reason, a reference and an authorizing operator"));
        }
        let entry = NewLedgerEntry::new(
            TransactionType::Adjustment,
            amount,
            Party::platform(),
            party,
            format!("adjustment:{reference}"),
        )
        .with_description(format!("{reason} (authorized by {authorized_by})"));
        let result = self.retry.run("record_adjustment", || self.db.append_entry(entry.clone())).await?;
        match result {
            InsertEntryResult::Inserted(id) => info!("🔄️💰️ Adjustment #{id} of {amount} recorded for {party}"),
            InsertEntryResult::AlreadyExists(id) => debug!("🔄️💰️ Adjustment {reference} already recorded as #{id}"),
        }
        Ok(result)
    }

    pub async fn ledger_for_party(&self, party: Party) -> Result<Vec<LedgerEntry>, DeliveryError> {
        self.retry.run("ledger_for_party", || self.db.entries_for_party(party)).await
    }

    pub async fn ledger_for_order(&self, order_id: i64) -> Result<Vec<LedgerEntry>, DeliveryError> {
        self.retry.run("ledger_for_order", || self.db.entries_for_order(order_id)).await
    }

    pub async fn payouts_for_party(&self, party: Party) -> Result<Vec<PayoutRequest>, DeliveryError> {
        self.db.payouts_for_party(party).await
    }

    pub async fn payout_by_id(&self, payout_id: i64) -> Result<PayoutRequest, DeliveryError> {
        self.db
            .fetch_payout(payout_id)
            .await?
            .ok_or_else(|| DeliveryError::not_found(format!("Payout request #{payout_id}")))
    }

    pub async fn party_stats(&self, party: Party) -> Result<Option<PartyStats>, DeliveryError> {
        self.db.party_stats(party).await
    }

    /// Restaurants and couriers with any ledger activity.
    pub async fn payable_parties(&self) -> Result<Vec<Party>, DeliveryError> {
        self.db.payable_parties().await
    }

    pub async fn outstanding_payout(&self, party: Party) -> Result<Option<PayoutRequest>, DeliveryError> {
        self.db.outstanding_payout(party).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn blank_proof_is_missing_proof() {
        assert_eq!(proof_field(None), Err(DeliveryError::ProofRequired));
        assert_eq!(proof_field(Some("   ".into())), Err(DeliveryError::ProofRequired));
        assert_eq!(proof_field(Some(" TX-9 ".into())), Ok("TX-9".to_string()));
    }
}

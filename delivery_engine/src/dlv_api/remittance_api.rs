use std::fmt::Debug;

use dlv_common::Money;
use log::*;

use crate::{
    db::traits::RemittanceManagement,
    db_types::{CashRemittance, Order, RemittanceReview, RemittanceStatus},
    dlv_api::policy::SettlementPolicy,
    events::{EventProducers, RemittanceEvent},
    DeliveryError,
};

/// Courier cash declarations and their review by operations.
///
/// Reviews never touch the ledger. A flagged discrepancy raises an alert, and any correction is a separate
/// adjustment through [`SettlementApi::record_adjustment`](crate::SettlementApi::record_adjustment).
pub struct RemittanceApi<B> {
    db: B,
    producers: EventProducers,
    policy: SettlementPolicy,
}

impl<B> Debug for RemittanceApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RemittanceApi (tolerance {})", self.policy.remittance_tolerance)
    }
}

impl<B> RemittanceApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers, policy: SettlementPolicy::default() }
    }

    pub fn with_policy(mut self, policy: SettlementPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl<B> RemittanceApi<B>
where B: RemittanceManagement
{
    /// Records that a courier is handing over `amount` in cash for `order_ids`.
    ///
    /// The declaration must match the order totals exactly. Orders already covered by an earlier remittance are
    /// rejected with `ALREADY_REMITTED`.
    pub async fn declare_remittance(
        &self,
        courier_id: i64,
        amount: Money,
        order_ids: Vec<i64>,
    ) -> Result<CashRemittance, DeliveryError> {
        if amount.is_negative() {
            return Err(DeliveryError::validation("A declared amount cannot be negative"));
        }
        let remittance = self.db.declare_remittance(courier_id, amount, order_ids).await?;
        info!(
            "🔄️💵️ Courier #{courier_id} declared {amount} for orders {:?} as remittance #{}",
            remittance.order_ids, remittance.id
        );
        self.producers.publish_remittance(RemittanceEvent::new(remittance.clone())).await;
        Ok(remittance)
    }

    /// Records the operator's count of the cash. A discrepancy beyond the tolerance flags the remittance and raises a
    /// `remittance_alert` for operations.
    pub async fn review_remittance(
        &self,
        remittance_id: i64,
        verified_amount: Money,
        notes: Option<String>,
        reviewer: String,
    ) -> Result<CashRemittance, DeliveryError> {
        if verified_amount.is_negative() {
            return Err(DeliveryError::validation("A verified amount cannot be negative"));
        }
        let reviewer = reviewer.trim().to_string();
        if reviewer.is_empty() {
            return Err(DeliveryError::validation("The reviewer must be recorded"));
        }
        let review = RemittanceReview { verified_amount, notes, reviewer };
        let remittance = self.db.review_remittance(remittance_id, review, self.policy.remittance_tolerance).await?;
        let event = if remittance.status == RemittanceStatus::Flagged {
            warn!(
                "🔄️💵️ Remittance #{remittance_id} from courier #{} is off by {}. Flagged for follow-up.",
                remittance.courier_id,
                remittance.discrepancy.unwrap_or_default()
            );
            RemittanceEvent::discrepancy_alert(remittance.clone())
        } else {
            info!("🔄️💵️ Remittance #{remittance_id} verified");
            RemittanceEvent::new(remittance.clone())
        };
        self.producers.publish_remittance(event).await;
        Ok(remittance)
    }

    pub async fn remittance_by_id(&self, remittance_id: i64) -> Result<CashRemittance, DeliveryError> {
        self.db
            .fetch_remittance(remittance_id)
            .await?
            .ok_or_else(|| DeliveryError::not_found(format!("Cash remittance #{remittance_id}")))
    }

    pub async fn cash_orders_pending_remittance(&self, courier_id: i64) -> Result<Vec<Order>, DeliveryError> {
        self.db.cash_orders_pending_remittance(courier_id).await
    }
}

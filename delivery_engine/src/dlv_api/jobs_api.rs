use std::fmt::{Debug, Display};

use chrono::{DateTime, Duration, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    db::traits::{LedgerManagement, OrderManagement, PromoManagement, SettlementManagement},
    db_types::Actor,
    dlv_api::{
        order_flow_api::OrderFlowApi,
        policy::SettlementPolicy,
        promo_api::PromoApi,
        retry::RetryPolicy,
        settlement_api::SettlementApi,
    },
    events::EventProducers,
    DeliveryError,
};

pub const TIMEOUT_REASON: &str = "timeout";
pub const WEEKLY_ROLLUP: &str = "weekly_payout_rollup";

/// What a single pass did. Items that were already resolved count as skipped, not failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job: String,
    pub processed: usize,
    pub skipped: usize,
    pub failed: Vec<String>,
}

impl JobSummary {
    pub fn new<S: Into<String>>(job: S) -> Self {
        Self { job: job.into(), ..Default::default() }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn fail<S: Display>(&mut self, item: S, err: &DeliveryError) {
        warn!("🕰️ {}: {item} failed. {err}", self.job);
        self.failed.push(item.to_string());
    }
}

impl Display for JobSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} processed, {} skipped, {} failed", self.job, self.processed, self.skipped, self.failed.len())
    }
}

/// The periodic settlement passes.
///
/// Every pass is stateless and safe to run again. It re-reads the store, acts through the same engine operations a
/// manual caller would use, and keeps going past individual failures.
pub struct SettlementJobs<B> {
    db: B,
    orders: OrderFlowApi<B>,
    settlement: SettlementApi<B>,
    promos: PromoApi<B>,
    policy: SettlementPolicy,
}

impl<B> Debug for SettlementJobs<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementJobs ({:?})", self.policy)
    }
}

impl<B> SettlementJobs<B>
where B: Clone + OrderManagement + PromoManagement + LedgerManagement + SettlementManagement
{
    pub fn new(db: B, producers: EventProducers, policy: SettlementPolicy) -> Self {
        let orders = OrderFlowApi::new(db.clone(), producers.clone()).with_policy(policy);
        let settlement = SettlementApi::new(db.clone(), producers).with_policy(policy);
        let promos = PromoApi::new(db.clone());
        Self { db, orders, settlement, promos, policy }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.orders = self.orders.with_retry_policy(retry.clone());
        self.settlement = self.settlement.with_retry_policy(retry);
        self
    }

    /// Cancels every `new` order placed more than `timeout` before `now`, through the normal cancel path.
    pub async fn expire_stale_orders(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<JobSummary, DeliveryError> {
        let mut summary = JobSummary::new("expire_stale_orders");
        let stale = self.orders.stale_new_orders(now - timeout).await?;
        trace!("🕰️ {} orders have been waiting longer than {timeout}", stale.len());
        for order in stale {
            match self.orders.cancel(Actor::system(), order.id, Some(TIMEOUT_REASON.to_string())).await {
                Ok(_) => {
                    info!("🕰️ Order #{} was never accepted and has been cancelled", order.id);
                    summary.processed += 1;
                },
                // accepted or cancelled while this pass was running
                Err(DeliveryError::InvalidTransition(_)) => summary.skipped += 1,
                Err(e) => summary.fail(format!("order #{}", order.id), &e),
            }
        }
        Ok(summary)
    }

    /// Uses the timeout from the settlement policy.
    pub async fn expire_unaccepted_orders(&self, now: DateTime<Utc>) -> Result<JobSummary, DeliveryError> {
        self.expire_stale_orders(now, self.policy.unaccepted_order_timeout()).await
    }

    /// Creates a payout request for every restaurant and courier whose balance has reached its floor and who has no
    /// payout outstanding.
    pub async fn weekly_payout_rollup(&self) -> Result<JobSummary, DeliveryError> {
        let mut summary = JobSummary::new(WEEKLY_ROLLUP);
        for party in self.settlement.payable_parties().await? {
            let Some(floor) = self.policy.payout_floor(&party) else {
                summary.skipped += 1;
                continue;
            };
            let balance = match self.settlement.get_balance(party).await {
                Ok(b) => b,
                Err(e) => {
                    summary.fail(party, &e);
                    continue;
                },
            };
            if balance.available < floor || !balance.available.is_positive() {
                trace!("🕰️ {party} has {} available, below the {floor} floor", balance.available);
                summary.skipped += 1;
                continue;
            }
            if balance.outstanding_payouts.is_positive() {
                trace!("🕰️ {party} already has a payout outstanding");
                summary.skipped += 1;
                continue;
            }
            match self.settlement.create_payout(party, None, None).await {
                Ok(payout) => {
                    debug!("🕰️ Weekly payout #{} of {} created for {party}", payout.id, payout.amount);
                    summary.processed += 1;
                },
                // a manual request got there first, or the balance moved under us
                Err(DeliveryError::PayoutOutstanding(_)) | Err(DeliveryError::Validation(_)) => summary.skipped += 1,
                Err(e) => summary.fail(party, &e),
            }
        }
        self.db.record_job_run(WEEKLY_ROLLUP, Utc::now()).await?;
        Ok(summary)
    }

    /// Time left until the rollup is next due, counted from its last recorded run. Zero when it has never run or is
    /// overdue.
    pub async fn rollup_due_in(&self, period: Duration, now: DateTime<Utc>) -> Result<Duration, DeliveryError> {
        let due = match self.db.last_job_run(WEEKLY_ROLLUP).await? {
            Some(last) => (last + period - now).max(Duration::zero()),
            None => Duration::zero(),
        };
        Ok(due)
    }

    pub async fn expire_promo_codes(&self, now: DateTime<Utc>) -> Result<JobSummary, DeliveryError> {
        let mut summary = JobSummary::new("expire_promo_codes");
        let expired = self.promos.expire_promo_codes(now).await?;
        if !expired.is_empty() {
            info!("🕰️ Promo codes expired: {}", expired.join(", "));
        }
        summary.processed = expired.len();
        Ok(summary)
    }

    /// Repairs paid payouts that are missing their ledger entry.
    pub async fn reconcile_payouts(&self) -> Result<JobSummary, DeliveryError> {
        let mut summary = JobSummary::new("reconcile_payouts");
        summary.processed = self.settlement.reconcile_payouts().await?.len();
        Ok(summary)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn summaries() {
        let mut summary = JobSummary::new("test");
        assert!(summary.is_clean());
        summary.processed = 2;
        summary.fail("order #4", &DeliveryError::not_found("Order #4"));
        assert!(!summary.is_clean());
        assert_eq!(summary.to_string(), "test: 2 processed, 0 skipped, 1 failed");
        assert_eq!(summary.failed, vec!["order #4".to_string()]);
    }
}

use dlv_common::Money;

use crate::{
    db_types::{CashRemittance, Order, RemittanceReview},
    DeliveryError,
};

#[allow(async_fn_in_trait)]
pub trait RemittanceManagement {
    /// Validates and records a courier's cash declaration atomically. The checks run in this order: every order must
    /// be a delivered cash order assigned to the courier, no order may already be remitted, and the declared amount
    /// must equal the sum of the order totals.
    async fn declare_remittance(
        &self,
        courier_id: i64,
        declared: Money,
        order_ids: Vec<i64>,
    ) -> Result<CashRemittance, DeliveryError>;

    /// Records the operator's count. The remittance is `flagged` when the discrepancy exceeds `tolerance`. The
    /// ledger is not touched.
    async fn review_remittance(
        &self,
        remittance_id: i64,
        review: RemittanceReview,
        tolerance: Money,
    ) -> Result<CashRemittance, DeliveryError>;

    async fn fetch_remittance(&self, remittance_id: i64) -> Result<Option<CashRemittance>, DeliveryError>;

    async fn cash_orders_pending_remittance(&self, courier_id: i64) -> Result<Vec<Order>, DeliveryError>;
}

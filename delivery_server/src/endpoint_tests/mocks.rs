use chrono::{DateTime, Utc};
use delivery_engine::{
    db_types::{
        Balance,
        CashRemittance,
        CourierPresence,
        LedgerEntry,
        NewLedgerEntry,
        NewOrder,
        NewPayoutRequest,
        Order,
        OrderItem,
        OrderStatusType,
        Party,
        PartyStats,
        PayoutProof,
        PayoutRequest,
        PayoutStatus,
        PromoCode,
        RemittanceReview,
    },
    order_objects::OrderQueryFilter,
    Cancellation,
    DeliveryError,
    InsertEntryResult,
    InsertOrderResult,
    LedgerManagement,
    OrderManagement,
    PresenceManagement,
    PromoManagement,
    RemittanceManagement,
    SettlementManagement,
    SettlementPolicy,
};
use dlv_common::Money;
use mockall::mock;

mock! {
    pub Backend {}
    impl OrderManagement for Backend {
        async fn insert_order(&self, order: NewOrder) -> Result<InsertOrderResult, DeliveryError>;
        async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, DeliveryError>;
        async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, DeliveryError>;
        async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, DeliveryError>;
        async fn advance_status(&self, order_id: i64, from: OrderStatusType, to: OrderStatusType, at: DateTime<Utc>) -> Result<Order, DeliveryError>;
        async fn pick_up_order(&self, order_id: i64, courier_id: i64, at: DateTime<Utc>) -> Result<Order, DeliveryError>;
        async fn complete_delivery(&self, order_id: i64, courier_id: i64, policy: SettlementPolicy, at: DateTime<Utc>) -> Result<Order, DeliveryError>;
        async fn cancel_order(&self, order_id: i64, from: OrderStatusType, cancellation: Cancellation, at: DateTime<Utc>) -> Result<Order, DeliveryError>;
        async fn capture_payment(&self, order_id: i64, reference: String, at: DateTime<Utc>) -> Result<Order, DeliveryError>;
        async fn assign_courier(&self, order_id: i64, courier_id: i64, at: DateTime<Utc>) -> Result<Order, DeliveryError>;
        async fn mark_restaurant_paid_by_courier(&self, order_id: i64, courier_id: i64, amount: Money, at: DateTime<Utc>) -> Result<Order, DeliveryError>;
        async fn stale_orders(&self, status: OrderStatusType, placed_before: DateTime<Utc>) -> Result<Vec<Order>, DeliveryError>;
    }
    impl PromoManagement for Backend {
        async fn insert_promo_code(&self, promo: PromoCode) -> Result<PromoCode, DeliveryError>;
        async fn fetch_promo_code(&self, code: &str) -> Result<Option<PromoCode>, DeliveryError>;
        async fn expire_promo_codes(&self, now: DateTime<Utc>) -> Result<Vec<String>, DeliveryError>;
    }
    impl LedgerManagement for Backend {
        async fn append_entry(&self, entry: NewLedgerEntry) -> Result<InsertEntryResult, DeliveryError>;
        async fn fetch_balance(&self, party: Party) -> Result<Balance, DeliveryError>;
        async fn entries_for_party(&self, party: Party) -> Result<Vec<LedgerEntry>, DeliveryError>;
        async fn entries_for_order(&self, order_id: i64) -> Result<Vec<LedgerEntry>, DeliveryError>;
        async fn payable_parties(&self) -> Result<Vec<Party>, DeliveryError>;
        async fn party_stats(&self, party: Party) -> Result<Option<PartyStats>, DeliveryError>;
    }
    impl SettlementManagement for Backend {
        async fn create_payout(&self, request: NewPayoutRequest, floor: Money) -> Result<PayoutRequest, DeliveryError>;
        async fn fetch_payout(&self, payout_id: i64) -> Result<Option<PayoutRequest>, DeliveryError>;
        async fn outstanding_payout(&self, party: Party) -> Result<Option<PayoutRequest>, DeliveryError>;
        async fn payouts_for_party(&self, party: Party) -> Result<Vec<PayoutRequest>, DeliveryError>;
        async fn start_processing(&self, payout_id: i64) -> Result<PayoutRequest, DeliveryError>;
        async fn close_payout(&self, payout_id: i64, status: PayoutStatus, reason: Option<String>) -> Result<PayoutRequest, DeliveryError>;
        async fn mark_payout_paid(&self, payout_id: i64, proof: PayoutProof) -> Result<PayoutRequest, DeliveryError>;
        async fn reconcile_paid_payouts(&self) -> Result<Vec<i64>, DeliveryError>;
        async fn last_job_run(&self, job: &str) -> Result<Option<DateTime<Utc>>, DeliveryError>;
        async fn record_job_run(&self, job: &str, at: DateTime<Utc>) -> Result<(), DeliveryError>;
    }
    impl RemittanceManagement for Backend {
        async fn declare_remittance(&self, courier_id: i64, declared: Money, order_ids: Vec<i64>) -> Result<CashRemittance, DeliveryError>;
        async fn review_remittance(&self, remittance_id: i64, review: RemittanceReview, tolerance: Money) -> Result<CashRemittance, DeliveryError>;
        async fn fetch_remittance(&self, remittance_id: i64) -> Result<Option<CashRemittance>, DeliveryError>;
        async fn cash_orders_pending_remittance(&self, courier_id: i64) -> Result<Vec<Order>, DeliveryError>;
    }
    impl PresenceManagement for Backend {
        async fn set_availability(&self, courier_id: i64, available: bool) -> Result<CourierPresence, DeliveryError>;
        async fn update_location(&self, courier_id: i64, latitude: f64, longitude: f64) -> Result<CourierPresence, DeliveryError>;
        async fn fetch_presence(&self, courier_id: i64) -> Result<Option<CourierPresence>, DeliveryError>;
        async fn active_couriers(&self) -> Result<Vec<CourierPresence>, DeliveryError>;
    }
}

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use dlv_common::Money;
use log::*;
use sqlx::{migrate, Sqlite, SqliteConnection, SqlitePool, Transaction};

use super::{db_url, ledger, new_pool, orders, payouts, presence, promos, remittances, SqliteDatabaseError};
use crate::{
    db::traits::{
        Cancellation,
        InsertEntryResult,
        InsertOrderResult,
        LedgerManagement,
        OrderManagement,
        PresenceManagement,
        PromoManagement,
        RemittanceManagement,
        SettlementManagement,
    },
    db_types::{
        payout_key,
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
        PaymentMethod,
        PaymentStatus,
        PayoutProof,
        PayoutRequest,
        PayoutStatus,
        PromoCode,
        RemittanceReview,
        TransactionType,
    },
    dlv_api::{order_objects::OrderQueryFilter, policy::SettlementPolicy},
    DeliveryError,
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object using the URL in `DLV_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, SqliteDatabaseError> {
        let pool = new_pool(url, max_connections).await?;
        trace!("🗃️ Connection pool for {url} created");
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Brings the schema up to date with the embedded migrations.
    pub async fn run_migrations(&self) -> Result<(), SqliteDatabaseError> {
        migrate!("./src/db/sqlite/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| SqliteDatabaseError::QueryError(format!("Migrations failed. {e}")))?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Starts a transaction that holds the SQLite write lock from its first statement.
    ///
    /// Every read-then-write path goes through here, so its reads cannot be invalidated by a concurrent writer before
    /// it commits.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, SqliteDatabaseError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE write_lock SET touched_at = $1 WHERE id = 1").bind(Utc::now()).execute(&mut *tx).await?;
        Ok(tx)
    }
}

/// Writes every ledger entry a delivered order implies. Each entry carries an `order:<id>:<purpose>` key, so running
/// this twice for the same order writes nothing the second time.
async fn settle_delivered_order(
    order: &Order,
    courier_id: i64,
    policy: &SettlementPolicy,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<InsertEntryResult>, SqliteDatabaseError> {
    let restaurant = Party::restaurant(order.restaurant_id);
    let courier = Party::courier(courier_id);
    let gross = order.restaurant_gross();
    let number = order.order_number.as_str();
    let mut entries = Vec::with_capacity(4);
    if !order.restaurant_paid_by_courier {
        entries.push(
            NewLedgerEntry::for_order(
                order.id,
                "restaurant_payment",
                TransactionType::OrderPayment,
                gross,
                Party::platform(),
                restaurant,
            )
            .with_description(format!("Restaurant share of {number}")),
        );
    }
    entries.push(
        NewLedgerEntry::for_order(
            order.id,
            "commission",
            TransactionType::Commission,
            gross.share_bps(policy.commission_bps),
            restaurant,
            Party::platform(),
        )
        .with_description(format!("Platform commission on {number}")),
    );
    entries.push(
        NewLedgerEntry::for_order(
            order.id,
            "delivery_fee",
            TransactionType::DeliveryFee,
            order.delivery_fee.share_bps(policy.courier_fee_share_bps),
            Party::platform(),
            courier,
        )
        .with_description(format!("Courier share of the delivery fee on {number}")),
    );
    if order.restaurant_paid_by_courier && order.restaurant_paid_amount.is_positive() {
        entries.push(
            NewLedgerEntry::for_order(
                order.id,
                "courier_reimbursement",
                TransactionType::Adjustment,
                order.restaurant_paid_amount,
                Party::platform(),
                courier,
            )
            .with_description(format!("Reimbursement for paying the restaurant directly on {number}")),
        );
    }
    let mut results = Vec::with_capacity(entries.len());
    for entry in entries {
        results.push(ledger::idempotent_insert(entry, at, conn).await?);
    }
    Ok(results)
}

impl OrderManagement for SqliteDatabase {
    async fn insert_order(&self, order: NewOrder) -> Result<InsertOrderResult, DeliveryError> {
        let mut tx = self.begin_write().await?;
        if orders::order_number_exists(&order.order_number, &mut tx).await? {
            return Err(SqliteDatabaseError::OrderNumberTaken(order.order_number).into());
        }
        let number = order.order_number.clone();
        let result = orders::idempotent_insert(order, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order {number} saved: {result:?}");
        Ok(result)
    }

    async fn fetch_order(&self, order_id: i64) -> Result<Option<Order>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order(order_id, &mut conn).await?)
    }

    async fn fetch_order_items(&self, order_id: i64) -> Result<Vec<OrderItem>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_items(order_id, &mut conn).await?)
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_orders(query, &mut conn).await?)
    }

    async fn advance_status(
        &self,
        order_id: i64,
        from: OrderStatusType,
        to: OrderStatusType,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError> {
        let mut tx = self.begin_write().await?;
        let order = orders::update_order_status(order_id, from, to, at, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn pick_up_order(&self, order_id: i64, courier_id: i64, at: DateTime<Utc>) -> Result<Order, DeliveryError> {
        let mut tx = self.begin_write().await?;
        let order = orders::pick_up_order(order_id, courier_id, at, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn complete_delivery(
        &self,
        order_id: i64,
        courier_id: i64,
        policy: SettlementPolicy,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError> {
        let mut tx = self.begin_write().await?;
        let current =
            orders::fetch_order(order_id, &mut tx).await?.ok_or(SqliteDatabaseError::OrderNotFound(order_id))?;
        if current.courier_id != Some(courier_id) {
            return Err(SqliteDatabaseError::AssignmentConflict(
                order_id,
                format!("courier #{courier_id} is not assigned"),
            )
            .into());
        }
        let mut order =
            orders::update_order_status(order_id, OrderStatusType::Delivering, OrderStatusType::Delivered, at, &mut tx)
                .await?;
        let results = settle_delivered_order(&order, courier_id, &policy, at, &mut tx).await?;
        if order.payment_method == PaymentMethod::Cash {
            order = orders::set_payment_status(order_id, PaymentStatus::Captured, None, at, &mut tx).await?;
        }
        ledger::record_delivery_stats(Party::restaurant(order.restaurant_id), order.restaurant_gross(), at, &mut tx)
            .await?;
        ledger::record_delivery_stats(Party::courier(courier_id), order.delivery_fee, at, &mut tx).await?;
        tx.commit().await?;
        let written = results.iter().filter(|r| r.is_new()).count();
        debug!("🗃️ Order #{order_id} delivered. {written} ledger entries written");
        Ok(order)
    }

    async fn cancel_order(
        &self,
        order_id: i64,
        from: OrderStatusType,
        cancellation: Cancellation,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError> {
        let mut tx = self.begin_write().await?;
        let mut order = orders::cancel_order(order_id, from, &cancellation, at, &mut tx).await?;
        if order.payment_status == PaymentStatus::Captured {
            let refund = NewLedgerEntry::for_order(
                order_id,
                "refund",
                TransactionType::Refund,
                order.total,
                Party::platform(),
                Party::customer(order.customer_id),
            )
            .with_description(format!("Refund for cancelled order {}", order.order_number));
            ledger::idempotent_insert(refund, at, &mut tx).await?;
            order = orders::set_payment_status(order_id, PaymentStatus::Refunded, None, at, &mut tx).await?;
            debug!("🗃️ Captured payment for order #{order_id} refunded");
        }
        tx.commit().await?;
        Ok(order)
    }

    async fn capture_payment(
        &self,
        order_id: i64,
        reference: String,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError> {
        let mut tx = self.begin_write().await?;
        let order = orders::fetch_order(order_id, &mut tx).await?.ok_or(SqliteDatabaseError::OrderNotFound(order_id))?;
        if order.payment_method == PaymentMethod::Cash {
            return Err(SqliteDatabaseError::PaymentStateConflict(format!(
                "order #{order_id} is paid in cash on delivery"
            ))
            .into());
        }
        match order.payment_status {
            PaymentStatus::Pending | PaymentStatus::Failed => {},
            PaymentStatus::Captured => {
                debug!("🗃️ Payment for order #{order_id} is already captured");
                return Ok(order);
            },
            PaymentStatus::Refunded => {
                return Err(SqliteDatabaseError::PaymentStateConflict(format!(
                    "order #{order_id} has been refunded"
                ))
                .into())
            },
        }
        let entry = NewLedgerEntry::for_order(
            order_id,
            "capture",
            TransactionType::OrderPayment,
            order.total,
            Party::customer(order.customer_id),
            Party::platform(),
        )
        .with_description(format!("Payment {reference} for {}", order.order_number));
        ledger::idempotent_insert(entry, at, &mut tx).await?;
        let order = orders::set_payment_status(order_id, PaymentStatus::Captured, Some(&reference), at, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn assign_courier(&self, order_id: i64, courier_id: i64, at: DateTime<Utc>) -> Result<Order, DeliveryError> {
        let mut tx = self.begin_write().await?;
        if !presence::is_available(courier_id, &mut tx).await? {
            return Err(SqliteDatabaseError::CourierUnavailable(courier_id).into());
        }
        let order = orders::assign_courier(order_id, courier_id, at, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn mark_restaurant_paid_by_courier(
        &self,
        order_id: i64,
        courier_id: i64,
        amount: Money,
        at: DateTime<Utc>,
    ) -> Result<Order, DeliveryError> {
        let mut tx = self.begin_write().await?;
        let order = orders::mark_restaurant_paid(order_id, courier_id, amount, at, &mut tx).await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn stale_orders(
        &self,
        status: OrderStatusType,
        placed_before: DateTime<Utc>,
    ) -> Result<Vec<Order>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::stale_orders(status, placed_before, &mut conn).await?)
    }
}

impl LedgerManagement for SqliteDatabase {
    async fn append_entry(&self, entry: NewLedgerEntry) -> Result<InsertEntryResult, DeliveryError> {
        let mut tx = self.begin_write().await?;
        let result = ledger::idempotent_insert(entry, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn fetch_balance(&self, party: Party) -> Result<Balance, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ledger::balance_for(party, &mut conn).await?)
    }

    async fn entries_for_party(&self, party: Party) -> Result<Vec<LedgerEntry>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ledger::entries_for_party(party, &mut conn).await?)
    }

    async fn entries_for_order(&self, order_id: i64) -> Result<Vec<LedgerEntry>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ledger::entries_for_order(order_id, &mut conn).await?)
    }

    async fn payable_parties(&self) -> Result<Vec<Party>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ledger::payable_parties(&mut conn).await?)
    }

    async fn party_stats(&self, party: Party) -> Result<Option<PartyStats>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(ledger::party_stats(party, &mut conn).await?)
    }
}

impl SettlementManagement for SqliteDatabase {
    async fn create_payout(&self, request: NewPayoutRequest, floor: Money) -> Result<PayoutRequest, DeliveryError> {
        let party = request.party;
        let mut tx = self.begin_write().await?;
        if payouts::outstanding_payout(party, &mut tx).await?.is_some() {
            return Err(SqliteDatabaseError::PayoutOutstanding(party).into());
        }
        let balance = ledger::balance_for(party, &mut tx).await?;
        if balance.available < floor || !balance.available.is_positive() {
            return Err(SqliteDatabaseError::BelowPayoutFloor { party, available: balance.available, floor }.into());
        }
        let payout = payouts::insert_payout(request, balance.available, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        info!("🗃️ Payout request #{} for {} created for {party}", payout.id, payout.amount);
        Ok(payout)
    }

    async fn fetch_payout(&self, payout_id: i64) -> Result<Option<PayoutRequest>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payouts::fetch_payout(payout_id, &mut conn).await?)
    }

    async fn outstanding_payout(&self, party: Party) -> Result<Option<PayoutRequest>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payouts::outstanding_payout(party, &mut conn).await?)
    }

    async fn payouts_for_party(&self, party: Party) -> Result<Vec<PayoutRequest>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payouts::payouts_for_party(party, &mut conn).await?)
    }

    async fn start_processing(&self, payout_id: i64) -> Result<PayoutRequest, DeliveryError> {
        let mut tx = self.begin_write().await?;
        let payout = payouts::start_processing(payout_id, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(payout)
    }

    async fn close_payout(
        &self,
        payout_id: i64,
        status: PayoutStatus,
        reason: Option<String>,
    ) -> Result<PayoutRequest, DeliveryError> {
        if !matches!(status, PayoutStatus::Rejected | PayoutStatus::Cancelled) {
            return Err(DeliveryError::validation(format!("A payout request cannot be closed as {status}")));
        }
        let mut tx = self.begin_write().await?;
        let payout = payouts::close_payout(payout_id, status, reason.as_deref(), Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(payout)
    }

    async fn mark_payout_paid(&self, payout_id: i64, proof: PayoutProof) -> Result<PayoutRequest, DeliveryError> {
        let now = Utc::now();
        let mut tx = self.begin_write().await?;
        let current =
            payouts::fetch_payout(payout_id, &mut tx).await?.ok_or(SqliteDatabaseError::PayoutNotFound(payout_id))?;
        let payout = if current.status == PayoutStatus::Paid {
            debug!("🗃️ Payout request #{payout_id} is already paid");
            current
        } else {
            payouts::mark_paid(payout_id, &proof, now, &mut tx).await?
        };
        let result = ledger::idempotent_insert(payout_entry(&payout), now, &mut tx).await?;
        tx.commit().await?;
        if result.is_new() {
            info!("🗃️ Payout request #{payout_id} of {} paid and recorded in the ledger", payout.amount);
        }
        Ok(payout)
    }

    async fn reconcile_paid_payouts(&self) -> Result<Vec<i64>, DeliveryError> {
        let now = Utc::now();
        let mut tx = self.begin_write().await?;
        let missing = payouts::paid_without_ledger_entry(&mut tx).await?;
        let mut repaired = Vec::with_capacity(missing.len());
        for payout in missing {
            if ledger::idempotent_insert(payout_entry(&payout), now, &mut tx).await?.is_new() {
                warn!("🗃️ Paid payout request #{} had no ledger entry. The entry has been written.", payout.id);
                repaired.push(payout.id);
            }
        }
        tx.commit().await?;
        Ok(repaired)
    }

    async fn last_job_run(&self, job: &str) -> Result<Option<DateTime<Utc>>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payouts::last_job_run(job, &mut conn).await?)
    }

    async fn record_job_run(&self, job: &str, at: DateTime<Utc>) -> Result<(), DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payouts::record_job_run(job, at, &mut conn).await?)
    }
}

/// The ledger entry that records a paid payout leaving the marketplace.
fn payout_entry(payout: &PayoutRequest) -> NewLedgerEntry {
    NewLedgerEntry::new(TransactionType::Payout, payout.amount, payout.party(), Party::none(), payout_key(payout.id))
        .with_payout(payout.id)
        .with_description(format!(
            "Payout {}",
            payout.transaction_reference.as_deref().unwrap_or("without transaction reference")
        ))
}

impl RemittanceManagement for SqliteDatabase {
    async fn declare_remittance(
        &self,
        courier_id: i64,
        declared: Money,
        order_ids: Vec<i64>,
    ) -> Result<CashRemittance, DeliveryError> {
        let mut tx = self.begin_write().await?;
        let remittance = remittances::declare_remittance(courier_id, declared, order_ids, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(remittance)
    }

    async fn review_remittance(
        &self,
        remittance_id: i64,
        review: RemittanceReview,
        tolerance: Money,
    ) -> Result<CashRemittance, DeliveryError> {
        let mut tx = self.begin_write().await?;
        let remittance = remittances::review_remittance(remittance_id, &review, tolerance, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        Ok(remittance)
    }

    async fn fetch_remittance(&self, remittance_id: i64) -> Result<Option<CashRemittance>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(remittances::fetch_remittance(remittance_id, &mut conn).await?)
    }

    async fn cash_orders_pending_remittance(&self, courier_id: i64) -> Result<Vec<Order>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::cash_orders_pending_remittance(courier_id, &mut conn).await?)
    }
}

impl PresenceManagement for SqliteDatabase {
    async fn set_availability(&self, courier_id: i64, available: bool) -> Result<CourierPresence, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(presence::set_availability(courier_id, available, Utc::now(), &mut conn).await?)
    }

    async fn update_location(
        &self,
        courier_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> Result<CourierPresence, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(presence::update_location(courier_id, latitude, longitude, Utc::now(), &mut conn).await?)
    }

    async fn fetch_presence(&self, courier_id: i64) -> Result<Option<CourierPresence>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(presence::fetch_presence(courier_id, &mut conn).await?)
    }

    async fn active_couriers(&self) -> Result<Vec<CourierPresence>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(presence::active_couriers(&mut conn).await?)
    }
}

impl PromoManagement for SqliteDatabase {
    async fn insert_promo_code(&self, promo: PromoCode) -> Result<PromoCode, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(promos::insert_promo_code(promo, &mut conn).await?)
    }

    async fn fetch_promo_code(&self, code: &str) -> Result<Option<PromoCode>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(promos::fetch_promo_code(code, &mut conn).await?)
    }

    async fn expire_promo_codes(&self, now: DateTime<Utc>) -> Result<Vec<String>, DeliveryError> {
        let mut conn = self.pool.acquire().await?;
        Ok(promos::expire_promo_codes(now, &mut conn).await?)
    }
}

use chrono::{DateTime, Utc};
use dlv_common::Money;
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db::{
        sqlite::{orders, SqliteDatabaseError},
        traits::InsertEntryResult,
    },
    db_types::{
        Balance,
        LedgerEntry,
        NewLedgerEntry,
        OrderStatusType,
        Party,
        PartyKind,
        PartyStats,
        TransactionType,
    },
};

/// Appends the entry unless its idempotency key is already taken.
///
/// The key is guarded by the UNIQUE constraint on `payment_reference`, so two concurrent appends of the same key
/// yield one row. Non-refund entries against a cancelled order are refused. The `ledger_closed_after_cancellation`
/// trigger enforces the same rule inside the database.
pub async fn idempotent_insert(
    entry: NewLedgerEntry,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<InsertEntryResult, SqliteDatabaseError> {
    if let Some(order_id) = entry.order_id {
        if entry.transaction_type != TransactionType::Refund {
            let order = orders::fetch_order(order_id, conn).await?.ok_or(SqliteDatabaseError::OrderNotFound(order_id))?;
            if order.status == OrderStatusType::Cancelled {
                return Err(SqliteDatabaseError::OrderClosed(order_id));
            }
        }
    }
    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO ledger_entries (
            order_id,
            transaction_type,
            amount,
            from_kind,
            from_id,
            to_kind,
            to_id,
            status,
            payment_reference,
            payout_id,
            description,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12)
        ON CONFLICT (payment_reference) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(entry.order_id)
    .bind(entry.transaction_type)
    .bind(entry.amount)
    .bind(entry.from.kind)
    .bind(entry.from.id)
    .bind(entry.to.kind)
    .bind(entry.to.id)
    .bind(entry.status)
    .bind(&entry.payment_reference)
    .bind(entry.payout_id)
    .bind(&entry.description)
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;
    match inserted {
        Some((id,)) => {
            trace!(
                "🗃️ Ledger entry #{id} [{}] {} {} → {}",
                entry.payment_reference,
                entry.transaction_type,
                entry.amount,
                entry.to
            );
            Ok(InsertEntryResult::Inserted(id))
        },
        None => {
            let (id,): (i64,) = sqlx::query_as("SELECT id FROM ledger_entries WHERE payment_reference = $1")
                .bind(&entry.payment_reference)
                .fetch_one(conn)
                .await?;
            debug!("🗃️ Ledger entry [{}] already exists as #{id}. Nothing written.", entry.payment_reference);
            Ok(InsertEntryResult::AlreadyExists(id))
        },
    }
}

pub async fn entry_exists(payment_reference: &str, conn: &mut SqliteConnection) -> Result<bool, SqliteDatabaseError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM ledger_entries WHERE payment_reference = $1")
        .bind(payment_reference)
        .fetch_optional(conn)
        .await?;
    Ok(row.is_some())
}

/// The one balance routine. Payout creation, balance refreshes and the weekly rollup all read balances through here.
///
/// * credits: completed entries to the party, except restaurant `order_payment` credits on orders the courier paid
///   the restaurant for directly.
/// * debits: completed entries from the party. Paid payouts appear here through their `payout` entry.
/// * outstanding: pending and processing payout requests.
pub async fn balance_for(party: Party, conn: &mut SqliteConnection) -> Result<Balance, SqliteDatabaseError> {
    let (credits, debits, outstanding): (i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            (SELECT COALESCE(SUM(l.amount), 0)
                FROM ledger_entries l LEFT JOIN orders o ON o.id = l.order_id
                WHERE l.status = 'completed'
                    AND l.to_kind = $1 AND l.to_id = $2
                    AND NOT (
                        l.to_kind = 'restaurant'
                        AND l.transaction_type = 'order_payment'
                        AND COALESCE(o.restaurant_paid_by_courier, 0) = 1
                    )
            ) AS credits,
            (SELECT COALESCE(SUM(amount), 0)
                FROM ledger_entries
                WHERE status = 'completed' AND from_kind = $1 AND from_id = $2
            ) AS debits,
            (SELECT COALESCE(SUM(amount), 0)
                FROM payout_requests
                WHERE party_kind = $1 AND party_id = $2 AND status IN ('pending', 'processing')
            ) AS outstanding
        "#,
    )
    .bind(party.kind)
    .bind(party.id)
    .fetch_one(conn)
    .await?;
    Ok(Balance::new(party, Money::from(credits), Money::from(debits), Money::from(outstanding)))
}

pub async fn entries_for_party(
    party: Party,
    conn: &mut SqliteConnection,
) -> Result<Vec<LedgerEntry>, SqliteDatabaseError> {
    let entries = sqlx::query_as::<_, LedgerEntry>(
        r#"
        SELECT * FROM ledger_entries
        WHERE (to_kind = $1 AND to_id = $2) OR (from_kind = $1 AND from_id = $2)
        ORDER BY id
        "#,
    )
    .bind(party.kind)
    .bind(party.id)
    .fetch_all(conn)
    .await?;
    Ok(entries)
}

pub async fn entries_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<LedgerEntry>, SqliteDatabaseError> {
    let entries = sqlx::query_as::<_, LedgerEntry>("SELECT * FROM ledger_entries WHERE order_id = $1 ORDER BY id")
        .bind(order_id)
        .fetch_all(conn)
        .await?;
    Ok(entries)
}

/// Restaurants and couriers that appear on either side of any ledger entry.
pub async fn payable_parties(conn: &mut SqliteConnection) -> Result<Vec<Party>, SqliteDatabaseError> {
    let rows: Vec<(PartyKind, i64)> = sqlx::query_as(
        r#"
        SELECT kind, id FROM (
            SELECT to_kind AS kind, to_id AS id FROM ledger_entries
            UNION
            SELECT from_kind AS kind, from_id AS id FROM ledger_entries
        )
        WHERE kind IN ('restaurant', 'delivery')
        ORDER BY kind, id
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(kind, id)| Party::new(kind, id)).collect())
}

pub async fn record_delivery_stats(
    party: Party,
    gross_amount: Money,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), SqliteDatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO party_stats (party_kind, party_id, delivered_orders, gross_amount, updated_at)
        VALUES ($1, $2, 1, $3, $4)
        ON CONFLICT (party_kind, party_id) DO UPDATE SET
            delivered_orders = delivered_orders + 1,
            gross_amount = gross_amount + excluded.gross_amount,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(party.kind)
    .bind(party.id)
    .bind(gross_amount)
    .bind(at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn party_stats(party: Party, conn: &mut SqliteConnection) -> Result<Option<PartyStats>, SqliteDatabaseError> {
    let stats = sqlx::query_as::<_, PartyStats>(
        "SELECT party_kind, party_id, delivered_orders, gross_amount FROM party_stats WHERE party_kind = $1 AND \
         party_id = $2",
    )
    .bind(party.kind)
    .bind(party.id)
    .fetch_optional(conn)
    .await?;
    Ok(stats)
}

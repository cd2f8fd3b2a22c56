use chrono::{DateTime, Utc};
use dlv_common::Money;
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db::sqlite::{is_unique_violation, SqliteDatabaseError},
    db_types::{NewPayoutRequest, Party, PayoutProof, PayoutRequest, PayoutStatus},
};

/// Inserts a pending payout request. The partial unique index `payout_requests_one_outstanding` turns a second
/// outstanding request for the same party into [`SqliteDatabaseError::PayoutOutstanding`].
pub async fn insert_payout(
    request: NewPayoutRequest,
    amount: Money,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PayoutRequest, SqliteDatabaseError> {
    let result = sqlx::query_as::<_, PayoutRequest>(
        r#"
        INSERT INTO payout_requests (
            party_kind,
            party_id,
            amount,
            payment_method,
            payment_account,
            status,
            created_at,
            updated_at
        ) VALUES ($1, $2, $3, $4, $5, 'pending', $6, $6)
        RETURNING *
        "#,
    )
    .bind(request.party.kind)
    .bind(request.party.id)
    .bind(amount)
    .bind(&request.payment_method)
    .bind(&request.payment_account)
    .bind(at)
    .fetch_one(conn)
    .await;
    match result {
        Ok(payout) => {
            trace!("🗃️ Payout request #{} for {} created", payout.id, payout.amount);
            Ok(payout)
        },
        Err(e) if is_unique_violation(&e) => Err(SqliteDatabaseError::PayoutOutstanding(request.party)),
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_payout(
    payout_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<PayoutRequest>, SqliteDatabaseError> {
    let payout = sqlx::query_as::<_, PayoutRequest>("SELECT * FROM payout_requests WHERE id = $1")
        .bind(payout_id)
        .fetch_optional(conn)
        .await?;
    Ok(payout)
}

pub async fn outstanding_payout(
    party: Party,
    conn: &mut SqliteConnection,
) -> Result<Option<PayoutRequest>, SqliteDatabaseError> {
    let payout = sqlx::query_as::<_, PayoutRequest>(
        "SELECT * FROM payout_requests WHERE party_kind = $1 AND party_id = $2 AND status IN ('pending', 'processing')",
    )
    .bind(party.kind)
    .bind(party.id)
    .fetch_optional(conn)
    .await?;
    Ok(payout)
}

pub async fn payouts_for_party(
    party: Party,
    conn: &mut SqliteConnection,
) -> Result<Vec<PayoutRequest>, SqliteDatabaseError> {
    let payouts = sqlx::query_as::<_, PayoutRequest>(
        "SELECT * FROM payout_requests WHERE party_kind = $1 AND party_id = $2 ORDER BY id",
    )
    .bind(party.kind)
    .bind(party.id)
    .fetch_all(conn)
    .await?;
    Ok(payouts)
}

async fn state_conflict(payout_id: i64, conn: &mut SqliteConnection) -> SqliteDatabaseError {
    match fetch_payout(payout_id, conn).await {
        Ok(Some(p)) => SqliteDatabaseError::PayoutStateConflict { id: payout_id, status: p.status },
        Ok(None) => SqliteDatabaseError::PayoutNotFound(payout_id),
        Err(e) => e,
    }
}

pub(crate) async fn start_processing(
    payout_id: i64,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PayoutRequest, SqliteDatabaseError> {
    let payout = sqlx::query_as::<_, PayoutRequest>(
        "UPDATE payout_requests SET status = 'processing', updated_at = $1 WHERE id = $2 AND status = 'pending' \
         RETURNING *",
    )
    .bind(at)
    .bind(payout_id)
    .fetch_optional(&mut *conn)
    .await?;
    match payout {
        Some(p) => Ok(p),
        None => Err(state_conflict(payout_id, conn).await),
    }
}

/// Moves an outstanding request to `rejected` or `cancelled`.
pub(crate) async fn close_payout(
    payout_id: i64,
    status: PayoutStatus,
    reason: Option<&str>,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PayoutRequest, SqliteDatabaseError> {
    let payout = sqlx::query_as::<_, PayoutRequest>(
        r#"
        UPDATE payout_requests SET status = $1, rejection_reason = $2, updated_at = $3
        WHERE id = $4 AND status IN ('pending', 'processing')
        RETURNING *
        "#,
    )
    .bind(status)
    .bind(reason)
    .bind(at)
    .bind(payout_id)
    .fetch_optional(&mut *conn)
    .await?;
    match payout {
        Some(p) => Ok(p),
        None => Err(state_conflict(payout_id, conn).await),
    }
}

pub(crate) async fn mark_paid(
    payout_id: i64,
    proof: &PayoutProof,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<PayoutRequest, SqliteDatabaseError> {
    let payout = sqlx::query_as::<_, PayoutRequest>(
        r#"
        UPDATE payout_requests SET
            status = 'paid',
            transaction_reference = $1,
            proof_reference = $2,
            authorized_by = $3,
            paid_at = $4,
            updated_at = $4
        WHERE id = $5 AND status IN ('pending', 'processing')
        RETURNING *
        "#,
    )
    .bind(&proof.transaction_reference)
    .bind(&proof.proof_reference)
    .bind(&proof.authorized_by)
    .bind(at)
    .bind(payout_id)
    .fetch_optional(&mut *conn)
    .await?;
    match payout {
        Some(p) => Ok(p),
        None => Err(state_conflict(payout_id, conn).await),
    }
}

/// Paid requests whose `payout:<id>` ledger entry is missing.
pub async fn paid_without_ledger_entry(conn: &mut SqliteConnection) -> Result<Vec<PayoutRequest>, SqliteDatabaseError> {
    let payouts = sqlx::query_as::<_, PayoutRequest>(
        r#"
        SELECT * FROM payout_requests p
        WHERE p.status = 'paid'
            AND NOT EXISTS (SELECT 1 FROM ledger_entries l WHERE l.payment_reference = 'payout:' || p.id)
        ORDER BY p.id
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(payouts)
}

pub async fn last_job_run(
    job: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<DateTime<Utc>>, SqliteDatabaseError> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as("SELECT last_run_at FROM job_runs WHERE job = $1")
        .bind(job)
        .fetch_optional(conn)
        .await?;
    Ok(row.map(|(at,)| at))
}

pub async fn record_job_run(
    job: &str,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), SqliteDatabaseError> {
    sqlx::query(
        "INSERT INTO job_runs (job, last_run_at) VALUES ($1, $2) ON CONFLICT (job) DO UPDATE SET last_run_at = \
         excluded.last_run_at",
    )
    .bind(job)
    .bind(at)
    .execute(conn)
    .await?;
    trace!("🗃️ Job {job} last ran at {at}");
    Ok(())
}

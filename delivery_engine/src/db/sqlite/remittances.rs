use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dlv_common::Money;
use log::trace;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db::sqlite::{is_unique_violation, orders, SqliteDatabaseError},
    db_types::{CashRemittance, OrderStatusType, PaymentMethod, RemittanceReview, RemittanceStatus},
};

/// Validates a declaration and inserts it with its order links. Not atomic; run inside a write transaction.
pub async fn declare_remittance(
    courier_id: i64,
    declared: Money,
    order_ids: Vec<i64>,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<CashRemittance, SqliteDatabaseError> {
    if order_ids.is_empty() {
        return Err(SqliteDatabaseError::InvalidRemittance("at least one order is required".into()));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = order_ids.iter().find(|id| !seen.insert(**id)) {
        return Err(SqliteDatabaseError::InvalidRemittance(format!("order #{dup} is listed twice")));
    }
    let mut expected = Money::zero();
    for &order_id in &order_ids {
        let order = orders::fetch_order(order_id, conn)
            .await?
            .ok_or_else(|| SqliteDatabaseError::InvalidRemittance(format!("order #{order_id} does not exist")))?;
        if order.payment_method != PaymentMethod::Cash {
            return Err(SqliteDatabaseError::InvalidRemittance(format!("order #{order_id} is not a cash order")));
        }
        if order.status != OrderStatusType::Delivered {
            return Err(SqliteDatabaseError::InvalidRemittance(format!("order #{order_id} is {}", order.status)));
        }
        if order.courier_id != Some(courier_id) {
            return Err(SqliteDatabaseError::InvalidRemittance(format!(
                "order #{order_id} was not delivered by courier #{courier_id}"
            )));
        }
        expected += order.total;
    }
    let remitted = already_remitted(&order_ids, conn).await?;
    if !remitted.is_empty() {
        return Err(SqliteDatabaseError::AlreadyRemitted(remitted));
    }
    if declared != expected {
        return Err(SqliteDatabaseError::AmountMismatch { expected, declared });
    }
    let mut remittance = sqlx::query_as::<_, CashRemittance>(
        r#"
        INSERT INTO cash_remittances (courier_id, declared_amount, expected_amount, status, created_at)
        VALUES ($1, $2, $3, 'pending', $4)
        RETURNING *
        "#,
    )
    .bind(courier_id)
    .bind(declared)
    .bind(expected)
    .bind(at)
    .fetch_one(&mut *conn)
    .await?;
    for &order_id in &order_ids {
        let result = sqlx::query("INSERT INTO remittance_orders (remittance_id, order_id) VALUES ($1, $2)")
            .bind(remittance.id)
            .bind(order_id)
            .execute(&mut *conn)
            .await;
        match result {
            Err(e) if is_unique_violation(&e) => return Err(SqliteDatabaseError::AlreadyRemitted(vec![order_id])),
            r => r?,
        };
    }
    trace!("🗃️ Cash remittance #{} of {declared} for {} orders recorded", remittance.id, order_ids.len());
    remittance.order_ids = order_ids;
    Ok(remittance)
}

/// The subset of `order_ids` that an earlier remittance already covers, in ascending order.
pub async fn already_remitted(order_ids: &[i64], conn: &mut SqliteConnection) -> Result<Vec<i64>, SqliteDatabaseError> {
    if order_ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new("SELECT order_id FROM remittance_orders WHERE order_id IN (");
    let mut list = builder.separated(", ");
    for id in order_ids {
        list.push_bind(*id);
    }
    list.push_unseparated(") ORDER BY order_id");
    let rows: Vec<(i64,)> = builder.build_query_as().fetch_all(conn).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn fetch_remittance(
    remittance_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<CashRemittance>, SqliteDatabaseError> {
    let remittance = sqlx::query_as::<_, CashRemittance>("SELECT * FROM cash_remittances WHERE id = $1")
        .bind(remittance_id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(mut remittance) = remittance else {
        return Ok(None);
    };
    let ids: Vec<(i64,)> =
        sqlx::query_as("SELECT order_id FROM remittance_orders WHERE remittance_id = $1 ORDER BY order_id")
            .bind(remittance_id)
            .fetch_all(conn)
            .await?;
    remittance.order_ids = ids.into_iter().map(|(id,)| id).collect();
    Ok(Some(remittance))
}

/// Records the verified amount of a pending remittance. A discrepancy larger than `tolerance` in either direction
/// flags the remittance.
pub(crate) async fn review_remittance(
    remittance_id: i64,
    review: &RemittanceReview,
    tolerance: Money,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<CashRemittance, SqliteDatabaseError> {
    let current =
        fetch_remittance(remittance_id, conn).await?.ok_or(SqliteDatabaseError::RemittanceNotFound(remittance_id))?;
    if current.status != RemittanceStatus::Pending {
        return Err(SqliteDatabaseError::RemittanceAlreadyReviewed(remittance_id));
    }
    let discrepancy = review.verified_amount - current.declared_amount;
    let status = if discrepancy.abs() > tolerance { RemittanceStatus::Flagged } else { RemittanceStatus::Verified };
    let updated = sqlx::query_as::<_, CashRemittance>(
        r#"
        UPDATE cash_remittances SET
            verified_amount = $1,
            discrepancy = $2,
            status = $3,
            reviewer_notes = $4,
            reviewed_by = $5,
            reviewed_at = $6
        WHERE id = $7 AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(review.verified_amount)
    .bind(discrepancy)
    .bind(status)
    .bind(&review.notes)
    .bind(&review.reviewer)
    .bind(at)
    .bind(remittance_id)
    .fetch_optional(&mut *conn)
    .await?;
    let mut updated = updated.ok_or(SqliteDatabaseError::RemittanceAlreadyReviewed(remittance_id))?;
    updated.order_ids = current.order_ids;
    Ok(updated)
}

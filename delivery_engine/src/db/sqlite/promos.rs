use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db::sqlite::{is_unique_violation, SqliteDatabaseError},
    db_types::PromoCode,
};

pub async fn insert_promo_code(
    promo: PromoCode,
    conn: &mut SqliteConnection,
) -> Result<PromoCode, SqliteDatabaseError> {
    let result = sqlx::query_as::<_, PromoCode>(
        "INSERT INTO promo_codes (code, discount, status, expires_at, created_at) VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(&promo.code)
    .bind(promo.discount)
    .bind(promo.status)
    .bind(promo.expires_at)
    .bind(promo.created_at)
    .fetch_one(conn)
    .await;
    match result {
        Err(e) if is_unique_violation(&e) => Err(SqliteDatabaseError::PromoCodeExists(promo.code)),
        r => Ok(r?),
    }
}

pub async fn fetch_promo_code(
    code: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<PromoCode>, SqliteDatabaseError> {
    let promo = sqlx::query_as::<_, PromoCode>("SELECT * FROM promo_codes WHERE code = $1")
        .bind(code)
        .fetch_optional(conn)
        .await?;
    Ok(promo)
}

pub async fn expire_promo_codes(
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<String>, SqliteDatabaseError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "UPDATE promo_codes SET status = 'expired' WHERE status = 'active' AND julianday(expires_at) <= julianday($1) \
         RETURNING code",
    )
    .bind(now)
    .fetch_all(conn)
    .await?;
    let mut codes: Vec<String> = rows.into_iter().map(|(c,)| c).collect();
    codes.sort();
    Ok(codes)
}

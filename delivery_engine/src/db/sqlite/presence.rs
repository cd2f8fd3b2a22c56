use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{db::sqlite::SqliteDatabaseError, db_types::CourierPresence};

pub async fn set_availability(
    courier_id: i64,
    available: bool,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<CourierPresence, SqliteDatabaseError> {
    let presence = sqlx::query_as::<_, CourierPresence>(
        r#"
        INSERT INTO courier_presence (courier_id, available, updated_at) VALUES ($1, $2, $3)
        ON CONFLICT (courier_id) DO UPDATE SET available = excluded.available, updated_at = excluded.updated_at
        RETURNING *
        "#,
    )
    .bind(courier_id)
    .bind(available)
    .bind(at)
    .fetch_one(conn)
    .await?;
    Ok(presence)
}

/// Stores the last known position. Availability is left as it was. A courier seen for the first time starts out
/// unavailable.
pub async fn update_location(
    courier_id: i64,
    latitude: f64,
    longitude: f64,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<CourierPresence, SqliteDatabaseError> {
    let presence = sqlx::query_as::<_, CourierPresence>(
        r#"
        INSERT INTO courier_presence (courier_id, available, latitude, longitude, updated_at) VALUES ($1, 0, $2, $3, $4)
        ON CONFLICT (courier_id) DO UPDATE SET
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            updated_at = excluded.updated_at
        RETURNING *
        "#,
    )
    .bind(courier_id)
    .bind(latitude)
    .bind(longitude)
    .bind(at)
    .fetch_one(conn)
    .await?;
    Ok(presence)
}

pub async fn fetch_presence(
    courier_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<CourierPresence>, SqliteDatabaseError> {
    let presence = sqlx::query_as::<_, CourierPresence>("SELECT * FROM courier_presence WHERE courier_id = $1")
        .bind(courier_id)
        .fetch_optional(conn)
        .await?;
    Ok(presence)
}

pub async fn is_available(courier_id: i64, conn: &mut SqliteConnection) -> Result<bool, SqliteDatabaseError> {
    Ok(fetch_presence(courier_id, conn).await?.map(|p| p.available).unwrap_or(false))
}

pub async fn active_couriers(conn: &mut SqliteConnection) -> Result<Vec<CourierPresence>, SqliteDatabaseError> {
    let couriers =
        sqlx::query_as::<_, CourierPresence>("SELECT * FROM courier_presence WHERE available = 1 ORDER BY courier_id")
            .fetch_all(conn)
            .await?;
    Ok(couriers)
}

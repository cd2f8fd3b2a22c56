//! SQLite backend for the delivery engine.
//!
//! The free functions in the submodules each take a `&mut SqliteConnection` and are *not* atomic on their own.
//! [`SqliteDatabase`] composes them inside transactions to implement the backend traits.
pub mod db;
mod errors;

pub mod ledger;
pub mod orders;
pub mod payouts;
pub mod presence;
pub mod promos;
pub mod remittances;

use std::{env, str::FromStr, time::Duration};

pub use db::SqliteDatabase;
pub use errors::SqliteDatabaseError;
pub(crate) use errors::{is_transient_driver_error, is_unique_violation};
use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};

const SQLITE_DB_URL: &str = "sqlite://data/delivery.db";

pub fn db_url() -> String {
    let result = env::var("DLV_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ DLV_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqliteDatabaseError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10))
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

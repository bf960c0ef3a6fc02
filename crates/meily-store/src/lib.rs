//! SQLite persistence for the Meily bot (sqlx).
//!
//! Implements the core's `RecordStore`, `AudienceProvider` and `StateStore` ports.

pub mod records;
pub mod state;

use meily_core::{Error, Result};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite, SqlitePool};
use tracing::info;

pub use records::SqliteRecords;
pub use state::SqliteStateStore;

pub(crate) fn storage(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}

/// Open (creating if needed) the database at `database_url` and apply migrations.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        info!(database_url, "creating database");
        Sqlite::create_database(database_url).await.map_err(storage)?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(storage)?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(storage)
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // One connection that never recycles, so the in-memory database lives for the test.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}

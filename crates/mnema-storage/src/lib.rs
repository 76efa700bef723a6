pub mod error;
mod models;
pub mod repository;

pub use error::{Result, SetupError};
pub use repository::SqliteStorage;

use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::str::FromStr;

/// Initialize the study database with migrations.
pub async fn init_db(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_path)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(options).await?;

    // Run migrations (from migrations/ directory at crate root)
    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!(path = db_path, "study DB initialized");
    Ok(pool)
}

/// In-memory database for tests.
pub async fn init_test_db() -> Result<SqlitePool> {
    init_db("sqlite::memory:").await
}

//! Shared setup for repository tests: in-memory SQLite with migrations applied.

use airbridge::crypto::CryptoKey;
use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;

/// Single-connection pool so every query sees the same in-memory database.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await?;

    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![42u8; 32]).expect("32-byte key")
}

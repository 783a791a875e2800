//! Tenant-registered external databases: DSN building, connectivity checks and the
//! shared pool registry.

pub mod dsn;
pub mod pool;

use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use thiserror::Error;
use uuid::Uuid;

pub use dsn::{DatabaseTarget, DsnError};
pub use pool::{ConnectionPoolManager, PoolError, PoolFactory, SeaOrmPoolFactory};

/// A stored database descriptor with its secrets opened.
#[derive(Debug, Clone)]
pub struct TenantDatabase {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub engine: String,
    pub target: DatabaseTarget,
    pub created_at: DateTime<Utc>,
}

impl TenantDatabase {
    /// Registry key for this database's pool.
    pub fn pool_key(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("query failed: {0}")]
    Query(String),
}

/// Opens a throwaway single-connection pool against `dsn` and runs `SELECT 1`.
pub async fn test_connection(dsn: &str, timeout: Duration) -> Result<(), ConnectivityError> {
    let probe = async {
        let mut opt = ConnectOptions::new(dsn.to_string());
        opt.max_connections(1)
            .min_connections(0)
            .connect_timeout(timeout)
            .acquire_timeout(timeout)
            .sqlx_logging(false);

        let db = Database::connect(opt)
            .await
            .map_err(|e| ConnectivityError::Connect(e.to_string()))?;
        let outcome = ping(&db).await;
        if let Err(err) = db.close().await {
            tracing::debug!(error = %err, "Error closing probe connection");
        }
        outcome
    };

    tokio::time::timeout(timeout, probe)
        .await
        .map_err(|_| ConnectivityError::Timeout(timeout))?
}

/// `SELECT 1` through an existing pool.
pub async fn ping(db: &DatabaseConnection) -> Result<(), ConnectivityError> {
    db.query_one(Statement::from_string(
        db.get_database_backend(),
        "SELECT 1".to_string(),
    ))
    .await
    .map(|_| ())
    .map_err(|e| ConnectivityError::Query(e.to_string()))
}

//! Repository for tenant-registered database descriptors.

use anyhow::{Result, anyhow};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{CryptoKey, SealedField, open, seal};
use crate::models::tenant_database_connection::{self, Entity as TenantDatabaseConnections};
use crate::tenant_db::{DatabaseTarget, TenantDatabase};

/// Input for [`TenantDatabaseRepository::create`].
#[derive(Debug, Clone)]
pub struct NewTenantDatabase {
    pub tenant_id: Uuid,
    pub name: String,
    pub engine: String,
    pub target: DatabaseTarget,
}

#[derive(Debug, Clone)]
pub struct TenantDatabaseRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl TenantDatabaseRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    pub async fn create(&self, new: NewTenantDatabase) -> Result<TenantDatabase> {
        let id = Uuid::new_v4();
        let tenant_id = new.tenant_id;
        let target = &new.target;

        let password = if target.password.is_empty() {
            None
        } else {
            Some(
                seal(&self.crypto_key, tenant_id, SealedField::DatabasePassword, &target.password)
                    .map_err(|e| anyhow!("failed to seal password: {}", e))?,
            )
        };
        let connection_url = target
            .connection_url
            .as_deref()
            .map(|url| seal(&self.crypto_key, tenant_id, SealedField::DatabaseUrl, url))
            .transpose()
            .map_err(|e| anyhow!("failed to seal connection url: {}", e))?;

        let active = tenant_database_connection::ActiveModel {
            id: Set(id),
            tenant_id: Set(tenant_id),
            name: Set(new.name.clone()),
            engine: Set(new.engine.to_lowercase()),
            host: Set(target.host.clone()),
            port: Set(target.port.map(i32::from)),
            database_name: Set(target.database.clone()),
            username: Set(target.username.clone()),
            password_ciphertext: Set(password),
            connection_url_ciphertext: Set(connection_url),
            use_ssl: Set(target.use_ssl),
            created_at: Set(Utc::now().into()),
        };
        active.insert(&*self.db).await?;

        // Read back by id to return the opened view.
        self.find(tenant_id, id)
            .await?
            .ok_or_else(|| anyhow!("tenant database {} not persisted", id))
    }

    /// Lookup scoped to the owning tenant.
    pub async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<TenantDatabase>> {
        let model = TenantDatabaseConnections::find_by_id(id)
            .filter(tenant_database_connection::Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?;
        model.map(|m| self.from_model(m)).transpose()
    }

    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<TenantDatabase>> {
        TenantDatabaseConnections::find()
            .filter(tenant_database_connection::Column::TenantId.eq(tenant_id))
            .order_by_asc(tenant_database_connection::Column::CreatedAt)
            .order_by_asc(tenant_database_connection::Column::Id)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|m| self.from_model(m))
            .collect()
    }

    pub async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<bool> {
        let result = TenantDatabaseConnections::delete_many()
            .filter(tenant_database_connection::Column::Id.eq(id))
            .filter(tenant_database_connection::Column::TenantId.eq(tenant_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    fn from_model(&self, model: tenant_database_connection::Model) -> Result<TenantDatabase> {
        let tenant_id = model.tenant_id;
        let password = model
            .password_ciphertext
            .as_deref()
            .map(|bytes| open(&self.crypto_key, tenant_id, SealedField::DatabasePassword, bytes))
            .transpose()
            .map_err(|e| anyhow!("failed to open password for database {}: {}", model.id, e))?
            .unwrap_or_default();
        let connection_url = model
            .connection_url_ciphertext
            .as_deref()
            .map(|bytes| open(&self.crypto_key, tenant_id, SealedField::DatabaseUrl, bytes))
            .transpose()
            .map_err(|e| anyhow!("failed to open url for database {}: {}", model.id, e))?;

        let port = model
            .port
            .map(u16::try_from)
            .transpose()
            .map_err(|_| anyhow!("stored port out of range for database {}", model.id))?;

        Ok(TenantDatabase {
            id: model.id,
            tenant_id,
            name: model.name,
            engine: model.engine,
            target: DatabaseTarget {
                host: model.host,
                port,
                database: model.database_name,
                username: model.username,
                password,
                use_ssl: model.use_ssl,
                connection_url,
            },
            created_at: model.created_at.with_timezone(&Utc),
        })
    }
}

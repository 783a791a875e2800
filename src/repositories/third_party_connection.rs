//! Credential store for tenant provider connections.
//!
//! Writes are a single `INSERT .. ON CONFLICT (tenant_id) DO UPDATE` that sets both
//! column groups, so switching auth mode clears the other mode's fields in the same
//! statement.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::crypto::{CryptoKey, SealedField, open, seal};
use crate::models::credential::{
    AuthMode, ConnectionAuth, OAuthCredentials, ThirdPartyConnection,
};
use crate::models::third_party_connection::{self, Entity as ThirdPartyConnections};

/// Persistence boundary used by the OAuth flow and the request dispatcher.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or fully replace the tenant's connection.
    async fn upsert(&self, connection: &ThirdPartyConnection) -> Result<()>;

    async fn get(&self, tenant_id: Uuid) -> Result<Option<ThirdPartyConnection>>;

    /// Remove the local record. The provider grant is left untouched.
    async fn delete(&self, tenant_id: Uuid) -> Result<bool>;
}

/// SeaORM-backed [`CredentialStore`] with secrets sealed at rest.
#[derive(Debug, Clone)]
pub struct ThirdPartyConnectionRepository {
    db: Arc<DatabaseConnection>,
    crypto_key: CryptoKey,
}

impl ThirdPartyConnectionRepository {
    pub fn new(db: Arc<DatabaseConnection>, crypto_key: CryptoKey) -> Self {
        Self { db, crypto_key }
    }

    fn to_active_model(
        &self,
        connection: &ThirdPartyConnection,
    ) -> Result<third_party_connection::ActiveModel> {
        let tenant_id = connection.tenant_id;
        let sealed = |field, value: &str| {
            seal(&self.crypto_key, tenant_id, field, value)
                .map_err(|e| anyhow!("failed to seal {:?}: {}", field, e))
        };

        let mut active = third_party_connection::ActiveModel {
            id: Set(connection.id),
            tenant_id: Set(tenant_id),
            auth_mode: Set(connection.mode().as_str().to_string()),
            external_resource_id: Set(connection.external_resource_id.clone()),
            created_at: Set(connection.created_at.into()),
            updated_at: Set(Utc::now().into()),
            provider_account_id: Set(None),
            access_token_ciphertext: Set(None),
            refresh_token_ciphertext: Set(None),
            scope: Set(None),
            token_type: Set(None),
            expires_at: Set(None),
            api_key_ciphertext: Set(None),
        };

        match &connection.auth {
            ConnectionAuth::OAuth(creds) => {
                active.provider_account_id = Set(creds.provider_account_id.clone());
                active.access_token_ciphertext =
                    Set(Some(sealed(SealedField::AccessToken, &creds.access_token)?));
                active.refresh_token_ciphertext = Set(creds
                    .refresh_token
                    .as_deref()
                    .map(|token| sealed(SealedField::RefreshToken, token))
                    .transpose()?);
                active.scope = Set(creds.scope.clone());
                active.token_type = Set(creds.token_type.clone());
                active.expires_at = Set(creds.expires_at.map(Into::into));
            }
            ConnectionAuth::ApiKey { api_key } => {
                active.api_key_ciphertext = Set(Some(sealed(SealedField::ApiKey, api_key)?));
            }
        }

        Ok(active)
    }

    fn from_model(&self, model: third_party_connection::Model) -> Result<ThirdPartyConnection> {
        let tenant_id = model.tenant_id;
        let opened = |field, bytes: &[u8]| {
            open(&self.crypto_key, tenant_id, field, bytes).map_err(|e| {
                tracing::error!(tenant_id = %tenant_id, field = ?field, "Credential decryption failed");
                anyhow!("failed to open {:?}: {}", field, e)
            })
        };

        let mode = AuthMode::parse(&model.auth_mode)
            .ok_or_else(|| anyhow!("unknown auth mode '{}'", model.auth_mode))?;

        let auth = match mode {
            AuthMode::OAuth => {
                let access_token = model
                    .access_token_ciphertext
                    .as_deref()
                    .ok_or_else(|| anyhow!("oauth connection for tenant {} has no access token", tenant_id))
                    .and_then(|bytes| opened(SealedField::AccessToken, bytes))?;
                let refresh_token = model
                    .refresh_token_ciphertext
                    .as_deref()
                    .map(|bytes| opened(SealedField::RefreshToken, bytes))
                    .transpose()?;
                ConnectionAuth::OAuth(OAuthCredentials {
                    provider_account_id: model.provider_account_id,
                    access_token,
                    refresh_token,
                    scope: model.scope,
                    token_type: model.token_type,
                    expires_at: model.expires_at.map(|ts| ts.with_timezone(&Utc)),
                })
            }
            AuthMode::ApiKey => {
                let api_key = model
                    .api_key_ciphertext
                    .as_deref()
                    .ok_or_else(|| anyhow!("api key connection for tenant {} has no key", tenant_id))
                    .and_then(|bytes| opened(SealedField::ApiKey, bytes))?;
                ConnectionAuth::ApiKey { api_key }
            }
        };

        Ok(ThirdPartyConnection {
            id: model.id,
            tenant_id,
            external_resource_id: model.external_resource_id,
            created_at: model.created_at.with_timezone(&Utc),
            auth,
        })
    }
}

#[async_trait]
impl CredentialStore for ThirdPartyConnectionRepository {
    async fn upsert(&self, connection: &ThirdPartyConnection) -> Result<()> {
        use third_party_connection::Column;

        let active = self.to_active_model(connection)?;

        // id and created_at stay as first written
        ThirdPartyConnections::insert(active)
            .on_conflict(
                OnConflict::column(Column::TenantId)
                    .update_columns([
                        Column::AuthMode,
                        Column::ProviderAccountId,
                        Column::AccessTokenCiphertext,
                        Column::RefreshTokenCiphertext,
                        Column::Scope,
                        Column::TokenType,
                        Column::ExpiresAt,
                        Column::ApiKeyCiphertext,
                        Column::ExternalResourceId,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await
            .with_context(|| format!("failed to upsert connection for tenant {}", connection.tenant_id))?;

        tracing::debug!(
            tenant_id = %connection.tenant_id,
            auth_mode = %connection.mode(),
            "Stored third-party connection"
        );
        Ok(())
    }

    async fn get(&self, tenant_id: Uuid) -> Result<Option<ThirdPartyConnection>> {
        let model = ThirdPartyConnections::find()
            .filter(third_party_connection::Column::TenantId.eq(tenant_id))
            .one(&*self.db)
            .await?;

        model.map(|m| self.from_model(m)).transpose()
    }

    async fn delete(&self, tenant_id: Uuid) -> Result<bool> {
        let result = ThirdPartyConnections::delete_many()
            .filter(third_party_connection::Column::TenantId.eq(tenant_id))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

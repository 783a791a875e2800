//! Airtable integration: OAuth connect flow, token refresh and authenticated calls.

pub mod client;
pub mod oauth;
pub mod pkce;
pub mod refresh;
pub mod state;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::AppConfig;

pub use client::AirtableClient;
pub use oauth::AirtableOAuth;
pub use pkce::PkceError;
pub use refresh::TokenRefresher;
pub use state::{StateCodec, StateError, StatePayload};

/// Scopes requested on every authorize redirect.
pub const SCOPES: &[&str] = &[
    "data.records:read",
    "data.records:write",
    "schema.bases:read",
    "schema.bases:write",
    "webhook:manage",
];

/// Longest upstream body echoed back in an error.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Error)]
pub enum AirtableError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Pkce(#[from] PkceError),
    #[error("token exchange failed: {0}")]
    TokenExchangeFailed(String),
    #[error("no accessible base for this grant")]
    NoAccessibleResource,
    #[error("connection has no refresh token")]
    MissingRefreshToken,
    #[error("token refresh failed with status {status}: {body}")]
    RefreshFailed { status: u16, body: String },
    #[error("Airtable returned status {status}: {body}")]
    UpstreamError { status: u16, body: String },
    #[error("invalid response from Airtable: {0}")]
    InvalidUpstreamResponse(String),
    #[error("Airtable rejected the API key")]
    InvalidApiKey,
    #[error("no Airtable connection for tenant")]
    NotFound,
    #[error("Airtable OAuth client is not configured")]
    NotConfigured,
    #[error("request to Airtable failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Endpoints and client credentials, resolved once at startup.
#[derive(Clone)]
pub struct AirtableSettings {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
    pub redirect_uri: String,
}

impl std::fmt::Debug for AirtableSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirtableSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("api_base", &self.api_base)
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

impl AirtableSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            client_id: config.airtable.client_id.clone().unwrap_or_default(),
            client_secret: config.airtable.client_secret.clone().unwrap_or_default(),
            authorize_url: config.airtable.authorize_url.clone(),
            token_url: config.airtable.token_url.clone(),
            api_base: config.airtable.api_base.trim_end_matches('/').to_string(),
            redirect_uri: config.airtable_callback_uri(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

/// Shared HTTP client with the upstream deadline applied to every request.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, AirtableError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("airbridge/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Token endpoint response for both grant types.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Base {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasesResponse {
    #[serde(default)]
    pub bases: Vec<Base>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TableField {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_field_id: Option<String>,
    #[serde(default)]
    pub fields: Vec<TableField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TablesResponse {
    #[serde(default)]
    pub tables: Vec<Table>,
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::AirtableSettings;
    use crate::models::ThirdPartyConnection;
    use crate::repositories::CredentialStore;

    /// In-memory store for exercising the flow without a database.
    #[derive(Default)]
    pub struct MemoryStore {
        rows: Mutex<HashMap<Uuid, ThirdPartyConnection>>,
        pub upserts: std::sync::atomic::AtomicUsize,
    }

    impl MemoryStore {
        pub fn with(connection: ThirdPartyConnection) -> Self {
            let store = Self::default();
            store
                .rows
                .lock()
                .unwrap()
                .insert(connection.tenant_id, connection);
            store
        }

        pub fn snapshot(&self, tenant_id: Uuid) -> Option<ThirdPartyConnection> {
            self.rows.lock().unwrap().get(&tenant_id).cloned()
        }
    }

    #[async_trait]
    impl CredentialStore for MemoryStore {
        async fn upsert(&self, connection: &ThirdPartyConnection) -> anyhow::Result<()> {
            self.upserts
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut rows = self.rows.lock().unwrap();
            let mut stored = connection.clone();
            if let Some(existing) = rows.get(&connection.tenant_id) {
                stored.id = existing.id;
                stored.created_at = existing.created_at;
            }
            rows.insert(connection.tenant_id, stored);
            Ok(())
        }

        async fn get(&self, tenant_id: Uuid) -> anyhow::Result<Option<ThirdPartyConnection>> {
            Ok(self.rows.lock().unwrap().get(&tenant_id).cloned())
        }

        async fn delete(&self, tenant_id: Uuid) -> anyhow::Result<bool> {
            Ok(self.rows.lock().unwrap().remove(&tenant_id).is_some())
        }
    }

    pub fn settings(server_uri: &str) -> AirtableSettings {
        AirtableSettings {
            client_id: "client-123".to_string(),
            client_secret: "secret-456".to_string(),
            authorize_url: format!("{server_uri}/oauth2/v1/authorize"),
            token_url: format!("{server_uri}/oauth2/v1/token"),
            api_base: server_uri.to_string(),
            redirect_uri: "http://localhost:8080/api/v1/airtable/oauth/callback".to_string(),
        }
    }
}

//! Authenticated calls to the Airtable REST API on behalf of a tenant.

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::refresh::TokenRefresher;
use super::{AirtableError, Base, BasesResponse, Table, TablesResponse, truncate_body};
use crate::models::{ConnectionAuth, ThirdPartyConnection};
use crate::repositories::CredentialStore;

/// Sends one JSON request with a bearer token and decodes a 200 response.
pub(crate) async fn send_bearer<T: DeserializeOwned>(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    token: &str,
    body: Option<&Value>,
) -> Result<T, AirtableError> {
    let mut request = http
        .request(method, url)
        .bearer_auth(token)
        .header(CONTENT_TYPE, "application/json");
    if let Some(body) = body {
        request = request.json(body);
    }

    let response = request.send().await?;
    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(AirtableError::UpstreamError {
            status: status.as_u16(),
            body: truncate_body(body),
        });
    }

    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| AirtableError::InvalidUpstreamResponse(e.to_string()))
}

#[derive(Clone)]
pub struct AirtableClient {
    http: reqwest::Client,
    api_base: String,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<TokenRefresher>,
}

impl AirtableClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<TokenRefresher>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            store,
            refresher,
        }
    }

    /// Calls `path` (relative to the API base) as `connection`, refreshing an
    /// expired OAuth token first. The refreshed record replaces `connection` so later
    /// calls reuse it. A failed refresh aborts the call.
    #[instrument(skip(self, connection, body), fields(tenant_id = %connection.tenant_id))]
    pub async fn call<T: DeserializeOwned>(
        &self,
        connection: &mut ThirdPartyConnection,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, AirtableError> {
        if connection.needs_refresh_at(Utc::now()) {
            debug!("Access token expired, refreshing before call");
            *connection = self.refresher.ensure_fresh(connection).await?;
        }

        let url = format!("{}{}", self.api_base, path);
        send_bearer(&self.http, method, &url, connection.auth.bearer_token(), body).await
    }

    /// Loads the tenant's connection; `NotFound` when none is stored.
    pub async fn connection(&self, tenant_id: Uuid) -> Result<ThirdPartyConnection, AirtableError> {
        self.store
            .get(tenant_id)
            .await?
            .ok_or(AirtableError::NotFound)
    }

    pub async fn list_bases(
        &self,
        connection: &mut ThirdPartyConnection,
    ) -> Result<Vec<Base>, AirtableError> {
        let listing: BasesResponse = self
            .call(connection, Method::GET, "/v0/meta/bases", None)
            .await?;
        Ok(listing.bases)
    }

    pub async fn list_tables(
        &self,
        connection: &mut ThirdPartyConnection,
        base_id: &str,
    ) -> Result<Vec<Table>, AirtableError> {
        let path = format!("/v0/meta/bases/{}/tables", urlencoding::encode(base_id));
        let listing: TablesResponse = self.call(connection, Method::GET, &path, None).await?;
        Ok(listing.tables)
    }

    /// Verifies a personal access token against `base_id`, then stores it as the
    /// tenant's connection, replacing any OAuth grant.
    #[instrument(skip(self, api_key), fields(tenant_id = %tenant_id, base_id = %base_id))]
    pub async fn connect_api_key(
        &self,
        tenant_id: Uuid,
        api_key: &str,
        base_id: &str,
    ) -> Result<ThirdPartyConnection, AirtableError> {
        let url = format!(
            "{}/v0/meta/bases/{}/tables",
            self.api_base,
            urlencoding::encode(base_id)
        );
        send_bearer::<TablesResponse>(&self.http, Method::GET, &url, api_key, None)
            .await
            .map_err(|err| match err {
                AirtableError::UpstreamError { .. } | AirtableError::InvalidUpstreamResponse(_) => {
                    AirtableError::InvalidApiKey
                }
                other => other,
            })?;

        let connection = ThirdPartyConnection::new(
            tenant_id,
            base_id.to_string(),
            ConnectionAuth::ApiKey {
                api_key: api_key.to_string(),
            },
        );
        self.store.upsert(&connection).await?;
        info!("Airtable connected via API key");

        Ok(self.store.get(tenant_id).await?.unwrap_or(connection))
    }

    /// Removes the local record only; the grant stays valid at Airtable.
    pub async fn disconnect(&self, tenant_id: Uuid) -> Result<(), AirtableError> {
        if self.store.delete(tenant_id).await? {
            info!(tenant_id = %tenant_id, "Removed Airtable connection");
            Ok(())
        } else {
            Err(AirtableError::NotFound)
        }
    }
}

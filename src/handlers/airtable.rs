//! # Airtable Handlers
//!
//! OAuth connect/callback, API-key connect, disconnect and table listing.

use axum::{
    extract::{Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{Json, Redirect},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::airtable::Table;
use crate::auth::{Tenant, TenantHeader};
use crate::error::{ApiError, validation_error};
use crate::models::{AuthMode, ThirdPartyConnection};
use crate::server::AppState;

pub const REMOVAL_MESSAGE: &str = "Integration removed from our system. For complete removal, please also revoke access in your Airtable account";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthorizeUrlResponse {
    /// Airtable consent URL to send the user to
    pub url: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by Airtable when the user declines consent
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApiKeyConnectRequest {
    /// Airtable personal access token
    pub api_key: Option<String>,
    /// Base the token is scoped to
    pub base_id: Option<String>,
}

/// Secret-free view of a tenant's Airtable connection.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AirtableConnectionInfo {
    pub mode: AuthMode,
    pub base_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub connected_at: DateTime<Utc>,
}

impl From<&ThirdPartyConnection> for AirtableConnectionInfo {
    fn from(connection: &ThirdPartyConnection) -> Self {
        let oauth = connection.oauth();
        Self {
            mode: connection.mode(),
            base_id: connection.external_resource_id.clone(),
            scope: oauth.and_then(|c| c.scope.clone()),
            expires_at: oauth.and_then(|c| c.expires_at),
            connected_at: connection.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TablesResponse {
    pub base_id: String,
    pub tables: Vec<Table>,
}

/// Start the Airtable OAuth flow
#[utoipa::path(
    get,
    path = "/api/v1/airtable/oauth/connect",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Consent URL", body = AuthorizeUrlResponse),
        (status = 401, description = "Missing or invalid operator token", body = ApiError),
        (status = 503, description = "OAuth client not configured", body = ApiError)
    ),
    tag = "airtable"
)]
pub async fn start_oauth(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
) -> Result<Json<AuthorizeUrlResponse>, ApiError> {
    let url = state.oauth.authorize_url(tenant_id)?;
    tracing::info!(tenant_id = %tenant_id, "Issued Airtable authorize URL");
    Ok(Json(AuthorizeUrlResponse {
        url: url.to_string(),
    }))
}

/// OAuth redirect target
///
/// The signed `state` identifies the tenant, so this route needs no operator token.
#[utoipa::path(
    get,
    path = "/api/v1/airtable/oauth/callback",
    params(CallbackQuery),
    responses(
        (status = 303, description = "Connected; redirect to the connections page"),
        (status = 400, description = "Missing, tampered or expired parameters", body = ApiError),
        (status = 502, description = "Airtable rejected the exchange", body = ApiError)
    ),
    tag = "airtable"
)]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Redirect, ApiError> {
    let (Some(code), Some(oauth_state)) = (
        query.code.filter(|c| !c.is_empty()),
        query.state.filter(|s| !s.is_empty()),
    ) else {
        let mut error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "missing_code_or_state",
            "Both code and state are required",
        );
        if let Some(provider_error) = query.error {
            error = error.with_details(serde_json::json!({ "error": provider_error }));
        }
        return Err(error);
    };

    state.oauth.handle_callback(&oauth_state, &code).await?;
    Ok(Redirect::to(&state.config.post_connect_redirect()))
}

/// Connect with a personal access token
#[utoipa::path(
    post,
    path = "/api/v1/airtable/apikey/connect",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    request_body = ApiKeyConnectRequest,
    responses(
        (status = 200, description = "Stored", body = AirtableConnectionInfo),
        (status = 400, description = "api_key or base_id missing", body = ApiError),
        (status = 401, description = "Airtable rejected the key", body = ApiError)
    ),
    tag = "airtable"
)]
pub async fn connect_api_key(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    payload: Result<Json<ApiKeyConnectRequest>, JsonRejection>,
) -> Result<Json<AirtableConnectionInfo>, ApiError> {
    let Json(request) = payload?;

    let api_key = request.api_key.map(|k| k.trim().to_string()).unwrap_or_default();
    let base_id = request.base_id.map(|b| b.trim().to_string()).unwrap_or_default();
    let mut missing = serde_json::Map::new();
    if api_key.is_empty() {
        missing.insert("api_key".into(), "required".into());
    }
    if base_id.is_empty() {
        missing.insert("base_id".into(), "required".into());
    }
    if !missing.is_empty() {
        return Err(validation_error("Validation failed", missing.into()));
    }

    let connection = state
        .airtable
        .connect_api_key(tenant_id, &api_key, &base_id)
        .await?;
    Ok(Json(AirtableConnectionInfo::from(&connection)))
}

/// Remove the stored Airtable connection
#[utoipa::path(
    delete,
    path = "/api/v1/airtable",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Removed locally", body = MessageResponse),
        (status = 404, description = "No connection", body = ApiError)
    ),
    tag = "airtable"
)]
pub async fn disconnect(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
) -> Result<Json<MessageResponse>, ApiError> {
    state.airtable.disconnect(tenant_id).await?;
    Ok(Json(MessageResponse {
        message: REMOVAL_MESSAGE.to_string(),
    }))
}

/// List tables of the connected base
#[utoipa::path(
    get,
    path = "/api/v1/airtable/tables",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Tables of the selected base", body = TablesResponse),
        (status = 404, description = "No connection", body = ApiError),
        (status = 502, description = "Airtable error", body = ApiError)
    ),
    tag = "airtable"
)]
pub async fn list_tables(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
) -> Result<Json<TablesResponse>, ApiError> {
    let mut connection = state.airtable.connection(tenant_id).await?;
    let base_id = connection.external_resource_id.clone();
    let tables = state.airtable.list_tables(&mut connection, &base_id).await?;

    Ok(Json(TablesResponse { base_id, tables }))
}

//! # Connections Overview
//!
//! One call summarizing everything a tenant has connected, without secrets.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::airtable::AirtableConnectionInfo;
use super::databases::DatabaseInfo;
use crate::auth::{Tenant, TenantHeader};
use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionsResponse {
    /// Absent when Airtable is not connected
    pub airtable: Option<AirtableConnectionInfo>,
    pub databases: Vec<DatabaseInfo>,
}

/// List the tenant's connections
#[utoipa::path(
    get,
    path = "/api/v1/connections",
    security(("bearer_auth" = [])),
    params(TenantHeader),
    responses(
        (status = 200, description = "Connections for the tenant", body = ConnectionsResponse),
        (status = 401, description = "Missing or invalid operator token", body = ApiError)
    ),
    tag = "connections"
)]
pub async fn list_connections(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
) -> Result<Json<ConnectionsResponse>, ApiError> {
    let airtable = match state.airtable.connection(tenant_id).await {
        Ok(connection) => Some(AirtableConnectionInfo::from(&connection)),
        Err(crate::airtable::AirtableError::NotFound) => None,
        Err(err) => return Err(err.into()),
    };
    let databases = state
        .databases
        .list(tenant_id)
        .await?
        .iter()
        .map(DatabaseInfo::from)
        .collect();

    Ok(Json(ConnectionsResponse {
        airtable,
        databases,
    }))
}

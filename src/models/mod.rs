//! # Data Models
//!
//! SeaORM entities plus the in-memory credential types the services work with.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod credential;
pub mod tenant_database_connection;
pub mod third_party_connection;

pub use credential::{AuthMode, ConnectionAuth, OAuthCredentials, ThirdPartyConnection};
pub use tenant_database_connection::Entity as TenantDatabaseConnection;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "airbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

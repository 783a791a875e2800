//! In-memory form of a tenant's third-party connection.
//!
//! The two authentication modes are a sum type; code that needs a token matches on
//! [`ConnectionAuth`] instead of probing nullable fields.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Safety margin subtracted from a token's reported expiry.
pub const EXPIRY_SKEW_SECONDS: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[serde(rename = "oauth")]
    OAuth,
    ApiKey,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::OAuth => "oauth",
            AuthMode::ApiKey => "api_key",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "oauth" => Some(AuthMode::OAuth),
            "api_key" => Some(AuthMode::ApiKey),
            _ => None,
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub provider_account_id: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    /// `None` means the provider did not report a lifetime; never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthCredentials {
    /// `now >= expires_at - skew`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at - Duration::seconds(EXPIRY_SKEW_SECONDS),
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Refresh token, treating an empty string as absent.
    pub fn usable_refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("provider_account_id", &self.provider_account_id)
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionAuth {
    OAuth(OAuthCredentials),
    ApiKey { api_key: String },
}

impl ConnectionAuth {
    pub fn mode(&self) -> AuthMode {
        match self {
            ConnectionAuth::OAuth(_) => AuthMode::OAuth,
            ConnectionAuth::ApiKey { .. } => AuthMode::ApiKey,
        }
    }

    /// Token sent as `Authorization: Bearer` for the active mode.
    pub fn bearer_token(&self) -> &str {
        match self {
            ConnectionAuth::OAuth(creds) => &creds.access_token,
            ConnectionAuth::ApiKey { api_key } => api_key,
        }
    }
}

impl fmt::Debug for ConnectionAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionAuth::OAuth(creds) => f.debug_tuple("OAuth").field(creds).finish(),
            ConnectionAuth::ApiKey { .. } => f
                .debug_struct("ApiKey")
                .field("api_key", &"[REDACTED]")
                .finish(),
        }
    }
}

/// A tenant's single provider connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThirdPartyConnection {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Selected base
    pub external_resource_id: String,
    pub created_at: DateTime<Utc>,
    pub auth: ConnectionAuth,
}

impl ThirdPartyConnection {
    pub fn new(tenant_id: Uuid, external_resource_id: String, auth: ConnectionAuth) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            external_resource_id,
            created_at: Utc::now(),
            auth,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.auth.mode()
    }

    pub fn oauth(&self) -> Option<&OAuthCredentials> {
        match &self.auth {
            ConnectionAuth::OAuth(creds) => Some(creds),
            ConnectionAuth::ApiKey { .. } => None,
        }
    }

    /// True only for OAuth connections past the skewed expiry.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.oauth().is_some_and(|creds| creds.is_expired_at(now))
    }
}

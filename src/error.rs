//! # Error Handling
//!
//! Every handler error is rendered as `application/problem+json` through [`ApiError`].
//! Domain errors convert with `?`; the mapping to status and code lives here.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::airtable::AirtableError;
use crate::telemetry;
use crate::tenant_db::{ConnectivityError, DsnError, PoolError};

const PROVIDER: &str = "airtable";
const MAX_SNIPPET_CHARS: usize = 200;

/// Problem body returned for every failed request.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Stable, SCREAMING_SNAKE_CASE error code
    pub code: Box<str>,
    pub message: Box<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlates with the `x-trace-id` response header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: telemetry::current_trace_id().map(String::into_boxed_str),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

/// Upstream failure metadata carried in `details`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProviderError {
    pub provider: String,
    pub status: u16,
    /// Truncated upstream body
    pub body_snippet: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );
        if let Some(trace_id) = &self.trace_id
            && let Ok(value) = HeaderValue::from_str(trace_id)
        {
            headers.insert(telemetry::TRACE_ID_HEADER, value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);
        Self::internal()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        match error {
            sea_orm::DbErr::RecordNotFound(record) => {
                Self::not_found(format!("Record not found: {}", record))
            }
            sea_orm::DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::internal()
            }
        }
    }
}

impl From<AirtableError> for ApiError {
    fn from(error: AirtableError) -> Self {
        match error {
            AirtableError::State(err) => {
                Self::new(StatusCode::BAD_REQUEST, "INVALID_STATE", err.to_string())
            }
            AirtableError::NoAccessibleResource => Self::new(
                StatusCode::BAD_REQUEST,
                "NO_ACCESSIBLE_RESOURCE",
                "The grant does not include any Airtable base",
            ),
            AirtableError::MissingRefreshToken => Self::new(
                StatusCode::CONFLICT,
                "REAUTH_REQUIRED",
                "The Airtable token expired and cannot be refreshed; reconnect the integration",
            ),
            AirtableError::InvalidApiKey => Self::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_API_KEY",
                "Airtable rejected the API key for this base",
            ),
            AirtableError::NotFound => Self::not_found("No Airtable connection for this tenant"),
            AirtableError::NotConfigured => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Airtable OAuth is not configured",
            ),
            AirtableError::RefreshFailed { status, body }
            | AirtableError::UpstreamError { status, body } => {
                provider_error(PROVIDER, status, Some(body))
            }
            AirtableError::TokenExchangeFailed(detail)
            | AirtableError::InvalidUpstreamResponse(detail) => {
                tracing::warn!(error = %detail, "Airtable exchange failed");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "PROVIDER_ERROR",
                    format!("Provider {} returned an unusable response", PROVIDER),
                )
            }
            AirtableError::Network(err) => {
                tracing::warn!(error = %err, timeout = err.is_timeout(), "Airtable request failed");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "PROVIDER_ERROR",
                    format!("Provider {} is unreachable", PROVIDER),
                )
            }
            AirtableError::Store(err) => err.into(),
            other @ (AirtableError::Pkce(_) | AirtableError::Url(_)) => {
                tracing::error!(error = %other, "Airtable flow error");
                Self::internal()
            }
        }
    }
}

impl From<DsnError> for ApiError {
    fn from(error: DsnError) -> Self {
        validation_error(&error.to_string(), json!({ "connection": error.to_string() }))
    }
}

impl From<PoolError> for ApiError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::InvalidDsn(detail) => Self::new(
                StatusCode::BAD_REQUEST,
                "INVALID_DSN",
                format!("invalid DSN: {}", detail),
            ),
            PoolError::Create(detail) => {
                tracing::warn!(error = %detail, "Tenant pool creation failed");
                database_unreachable()
            }
        }
    }
}

impl From<ConnectivityError> for ApiError {
    fn from(error: ConnectivityError) -> Self {
        tracing::warn!(error = %error, "Tenant database check failed");
        database_unreachable().with_details(json!({ "reason": error.to_string() }))
    }
}

fn database_unreachable() -> ApiError {
    ApiError::new(
        StatusCode::BAD_GATEWAY,
        "DATABASE_UNREACHABLE",
        "Could not reach the tenant database",
    )
}

/// 502 `PROVIDER_ERROR` with the upstream status and a truncated body in `details`.
pub fn provider_error(provider: &str, status: u16, body: Option<String>) -> ApiError {
    let details = ProviderError {
        provider: provider.to_string(),
        status,
        body_snippet: body.map(|b| {
            if b.chars().count() > MAX_SNIPPET_CHARS {
                let truncated: String = b.chars().take(MAX_SNIPPET_CHARS).collect();
                format!("{}...", truncated)
            } else {
                b
            }
        }),
    };

    ApiError::new(
        StatusCode::BAD_GATEWAY,
        "PROVIDER_ERROR",
        format!("Provider {} returned error status {}", provider, status),
    )
    .with_details(json!(details))
}

pub fn unauthorized(message: Option<&str>) -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "UNAUTHORIZED",
        message.unwrap_or("Authentication required"),
    )
}

pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}

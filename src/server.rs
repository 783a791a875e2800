//! # Server Configuration
//!
//! Shared state, router assembly and the serve loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::airtable::{
    self, AirtableClient, AirtableOAuth, AirtableSettings, StateCodec, TokenRefresher,
};
use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::repositories::{CredentialStore, TenantDatabaseRepository, ThirdPartyConnectionRepository};
use crate::telemetry::trace_context_middleware;
use crate::tenant_db::{ConnectionPoolManager, SeaOrmPoolFactory};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub oauth: Arc<AirtableOAuth>,
    pub airtable: AirtableClient,
    pub databases: TenantDatabaseRepository,
    pub pools: Arc<ConnectionPoolManager>,
}

impl AppState {
    /// Wires repositories and services from validated configuration.
    pub fn new(config: AppConfig, db: DatabaseConnection) -> Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("AIRBRIDGE_CRYPTO_KEY is required")?;
        let crypto_key = CryptoKey::new(key_bytes).context("invalid crypto key")?;
        let state_codec = StateCodec::new(config.airtable.state_secret.as_deref().unwrap_or_default())
            .context("invalid OAuth state secret")?;
        let http = airtable::http_client(config.upstream_timeout())
            .context("failed to build HTTP client")?;

        let shared_db = Arc::new(db.clone());
        let store: Arc<dyn CredentialStore> = Arc::new(ThirdPartyConnectionRepository::new(
            Arc::clone(&shared_db),
            crypto_key.clone(),
        ));

        let settings = AirtableSettings::from_config(&config);
        let api_base = settings.api_base.clone();
        let oauth = Arc::new(AirtableOAuth::new(
            http.clone(),
            settings,
            state_codec,
            Arc::clone(&store),
        ));
        let refresher = Arc::new(TokenRefresher::new(Arc::clone(&oauth), Arc::clone(&store)));
        let airtable = AirtableClient::new(http, api_base, store, refresher);

        let pools = Arc::new(ConnectionPoolManager::new(
            SeaOrmPoolFactory,
            config.tenant_pool.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            databases: TenantDatabaseRepository::new(shared_db, crypto_key),
            db,
            oauth,
            airtable,
            pools,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let tenant_routes = Router::new()
        .route(
            "/api/v1/airtable/oauth/connect",
            get(handlers::airtable::start_oauth),
        )
        .route(
            "/api/v1/airtable/apikey/connect",
            post(handlers::airtable::connect_api_key),
        )
        .route("/api/v1/airtable", delete(handlers::airtable::disconnect))
        .route("/api/v1/airtable/tables", get(handlers::airtable::list_tables))
        .route(
            "/api/v1/connections",
            get(handlers::connections::list_connections),
        )
        .route(
            "/api/v1/databases/connect",
            post(handlers::databases::connect_database),
        )
        .route(
            "/api/v1/databases/{id}/ping",
            get(handlers::databases::ping_database),
        )
        .route(
            "/api/v1/databases/{id}",
            delete(handlers::databases::delete_database),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route(
            "/api/v1/airtable/oauth/callback",
            get(handlers::airtable::oauth_callback),
        )
        .merge(tenant_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
}

/// Serves until SIGINT/SIGTERM, then drains connections and closes tenant pools.
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> Result<()> {
    let addr = config.bind_addr().context("invalid API_BIND_ADDR")?;
    let profile = config.profile.clone();

    let state = AppState::new(config, db)?;
    let pools = Arc::clone(&state.pools);
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, %profile, "Server listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("server error")?;

    pools.close_all().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::readyz,
        crate::handlers::airtable::start_oauth,
        crate::handlers::airtable::oauth_callback,
        crate::handlers::airtable::connect_api_key,
        crate::handlers::airtable::disconnect,
        crate::handlers::airtable::list_tables,
        crate::handlers::connections::list_connections,
        crate::handlers::databases::connect_database,
        crate::handlers::databases::ping_database,
        crate::handlers::databases::delete_database,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::AuthMode,
            crate::error::ApiError,
            crate::error::ProviderError,
            crate::handlers::HealthResponse,
            crate::handlers::airtable::AuthorizeUrlResponse,
            crate::handlers::airtable::ApiKeyConnectRequest,
            crate::handlers::airtable::AirtableConnectionInfo,
            crate::handlers::airtable::MessageResponse,
            crate::handlers::airtable::TablesResponse,
            crate::airtable::Table,
            crate::airtable::TableField,
            crate::handlers::connections::ConnectionsResponse,
            crate::handlers::databases::ConnectDatabaseRequest,
            crate::handlers::databases::DatabaseInfo,
            crate::handlers::databases::PingResponse,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Airbridge API",
        description = "Tenant connections to Airtable and external Postgres databases",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

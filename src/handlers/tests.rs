//! Router-level tests: real middleware stack, in-memory SQLite, Airtable stubbed with wiremock.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::{AirtableConfig, AppConfig};
use crate::server::{AppState, create_app};

const TOKEN: &str = "operator-token";
const APP_BASE: &str = "http://app.test";

async fn test_state(server: &MockServer) -> AppState {
    // One connection: every sqlite::memory: connection is its own database.
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await.unwrap();
    Migrator::up(&db, None).await.unwrap();

    let config = AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec![TOKEN.to_string()],
        crypto_key: Some(vec![7u8; 32]),
        app_base_url: APP_BASE.to_string(),
        airtable: AirtableConfig {
            client_id: Some("client-123".to_string()),
            client_secret: Some("secret-456".to_string()),
            state_secret: Some("state-secret".to_string()),
            authorize_url: format!("{}/oauth2/v1/authorize", server.uri()),
            token_url: format!("{}/oauth2/v1/token", server.uri()),
            api_base: server.uri(),
        },
        ..Default::default()
    };

    AppState::new(config, db).unwrap()
}

fn get(uri: &str, tenant: Option<Uuid>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(tenant) = tenant {
        builder = builder
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
            .header("X-Tenant-Id", tenant.to_string());
    }
    builder.body(Body::empty()).unwrap()
}

fn send(verb: &str, uri: &str, tenant: Uuid, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(verb)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header("X-Tenant-Id", tenant.to_string());
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn public_routes_respond() {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server).await);

    let response = call(&app, get("/", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["service"], "airbridge");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let response = call(&app, get("/healthz", None)).await;
    assert_eq!(json_body(response).await["status"], "ok");

    let response = call(&app, get("/readyz", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ready");

    let response = call(&app, get("/openapi.json", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = json_body(response).await;
    assert!(doc["paths"].get("/api/v1/databases/{id}/ping").is_some());
}

#[tokio::test]
async fn tenant_routes_require_operator_token() {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server).await);

    let response = call(&app, get("/api/v1/connections", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/problem+json"
    );
    assert!(response.headers().contains_key("x-trace-id"));
}

#[tokio::test]
async fn callback_without_code_is_rejected() {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server).await);

    let response = call(
        &app,
        get("/api/v1/airtable/oauth/callback?state=abc&error=access_denied", None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "missing_code_or_state");
    assert_eq!(body["details"]["error"], "access_denied");
}

#[tokio::test]
async fn callback_with_tampered_state_never_reaches_airtable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let app = create_app(test_state(&server).await);

    let response = call(
        &app,
        get("/api/v1/airtable/oauth/callback?code=c&state=Zm9v.YmFy", None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "INVALID_STATE");
}

#[tokio::test]
async fn oauth_connect_then_callback_stores_connection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/v1/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "abc",
            "refresh_token": "ref",
            "token_type": "Bearer",
            "scope": "data.records:read schema.bases:read",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v0/meta/bases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bases": [{ "id": "appSales", "name": "Sales", "permissionLevel": "create" }]
        })))
        .mount(&server)
        .await;

    let app = create_app(test_state(&server).await);
    let tenant = Uuid::new_v4();

    let response = call(&app, get("/api/v1/airtable/oauth/connect", Some(tenant))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let consent = url::Url::parse(json_body(response).await["url"].as_str().unwrap()).unwrap();
    let state = consent
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();

    let response = call(
        &app,
        get(
            &format!(
                "/api/v1/airtable/oauth/callback?code=auth-code&state={}",
                urlencoding::encode(&state)
            ),
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("{APP_BASE}/connections").as_str()
    );

    let response = call(&app, get("/api/v1/connections", Some(tenant))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["airtable"]["mode"], "oauth");
    assert_eq!(body["airtable"]["base_id"], "appSales");
    assert!(body["airtable"].get("access_token").is_none());
    assert_eq!(body["databases"], json!([]));

    // Other tenants see nothing
    let response = call(&app, get("/api/v1/connections", Some(Uuid::new_v4()))).await;
    assert_eq!(json_body(response).await["airtable"], Value::Null);
}

#[tokio::test]
async fn api_key_connect_validates_fields() {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server).await);

    let response = call(
        &app,
        send(
            "POST",
            "/api/v1/airtable/apikey/connect",
            Uuid::new_v4(),
            Some(json!({ "api_key": "pat123" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert!(body["details"].get("base_id").is_some());
    assert!(body["details"].get("api_key").is_none());
}

#[tokio::test]
async fn api_key_connect_then_disconnect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v0/meta/bases/appOps/tables"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tables": [] })))
        .mount(&server)
        .await;
    let app = create_app(test_state(&server).await);
    let tenant = Uuid::new_v4();

    let response = call(
        &app,
        send(
            "POST",
            "/api/v1/airtable/apikey/connect",
            tenant,
            Some(json!({ "api_key": "pat123", "base_id": "appOps" })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["mode"], "api_key");
    assert_eq!(body["base_id"], "appOps");

    let response = call(&app, send("DELETE", "/api/v1/airtable", tenant, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["message"],
        crate::handlers::airtable::REMOVAL_MESSAGE
    );

    let response = call(&app, send("DELETE", "/api/v1/airtable", tenant, None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn database_connect_rejects_unsupported_engine() {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server).await);

    let response = call(
        &app,
        send(
            "POST",
            "/api/v1/databases/connect",
            Uuid::new_v4(),
            Some(json!({
                "name": "warehouse",
                "engine": "mysql",
                "host": "db",
                "database_name": "sales",
                "username": "app"
            })),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_database_is_not_found() {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server).await);
    let tenant = Uuid::new_v4();
    let id = Uuid::new_v4();

    let response = call(&app, get(&format!("/api/v1/databases/{id}/ping"), Some(tenant))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = call(
        &app,
        send("DELETE", &format!("/api/v1/databases/{id}"), tenant, None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let server = MockServer::start().await;
    let app = create_app(test_state(&server).await);

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/databases/connect")
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header("X-Tenant-Id", Uuid::new_v4().to_string())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = call(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "VALIDATION_FAILED");
}

//! OAuth 2.0 authorization-code flow with PKCE against Airtable.
//!
//! `authorize_url` hands the browser a signed state that carries the tenant and the
//! PKCE verifier, so the callback needs no server-side session. A connection is
//! only written once the token exchange and the base probe have both succeeded.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use reqwest::Method;
use reqwest::header::ACCEPT;
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::client::send_bearer;
use super::pkce::{self, CHALLENGE_METHOD};
use super::state::{DEFAULT_STATE_TTL, StateCodec};
use super::{AirtableError, AirtableSettings, BasesResponse, SCOPES, TokenResponse, truncate_body};
use crate::models::{ConnectionAuth, OAuthCredentials, ThirdPartyConnection};
use crate::repositories::CredentialStore;

pub struct AirtableOAuth {
    http: reqwest::Client,
    settings: AirtableSettings,
    state: StateCodec,
    store: Arc<dyn CredentialStore>,
}

impl AirtableOAuth {
    pub fn new(
        http: reqwest::Client,
        settings: AirtableSettings,
        state: StateCodec,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            http,
            settings,
            state,
            store,
        }
    }

    pub fn settings(&self) -> &AirtableSettings {
        &self.settings
    }

    /// Builds the consent redirect for `tenant_id`. No I/O.
    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    pub fn authorize_url(&self, tenant_id: Uuid) -> Result<Url, AirtableError> {
        if !self.settings.is_configured() {
            return Err(AirtableError::NotConfigured);
        }

        let verifier = pkce::new_verifier()?;
        let challenge = pkce::challenge(&verifier);
        let state = self.state.sign(tenant_id, &verifier, DEFAULT_STATE_TTL);

        let mut url = Url::parse(&self.settings.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", &challenge)
            .append_pair("code_challenge_method", CHALLENGE_METHOD);

        Ok(url)
    }

    /// Verifies `state`, exchanges `code`, selects the first base and stores the
    /// connection.
    #[instrument(skip_all)]
    pub async fn handle_callback(
        &self,
        state: &str,
        code: &str,
    ) -> Result<ThirdPartyConnection, AirtableError> {
        let outcome = self.complete_callback(state, code).await;

        let label = match &outcome {
            Ok(_) => "connected",
            Err(AirtableError::State(_)) => "invalid_state",
            Err(AirtableError::NoAccessibleResource) => "no_resource",
            Err(_) => "failed",
        };
        counter!("airbridge_oauth_callbacks_total", "outcome" => label).increment(1);

        if let Err(err) = &outcome {
            warn!(outcome = label, error = %err, "OAuth callback failed");
        }
        outcome
    }

    async fn complete_callback(
        &self,
        state: &str,
        code: &str,
    ) -> Result<ThirdPartyConnection, AirtableError> {
        let payload = self.state.verify(state)?;
        let tenant_id = payload.tenant_id;

        let tokens = self.exchange_code(code, &payload.pkce_verifier).await?;
        let base_id = self.first_base(&tokens.access_token).await?;

        let credentials = credentials_from(tokens, None, Utc::now());
        let connection =
            ThirdPartyConnection::new(tenant_id, base_id, ConnectionAuth::OAuth(credentials));
        self.store.upsert(&connection).await?;

        info!(
            tenant_id = %tenant_id,
            base_id = %connection.external_resource_id,
            "Airtable connected via OAuth"
        );

        // Re-read so a reconnect reports the row's original id.
        Ok(self.store.get(tenant_id).await?.unwrap_or(connection))
    }

    /// Authorization-code grant with the PKCE verifier.
    pub async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
    ) -> Result<TokenResponse, AirtableError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("code_verifier", verifier),
        ];

        let response = self
            .http
            .post(&self.settings.token_url)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AirtableError::TokenExchangeFailed(format!(
                "status {}: {}",
                status.as_u16(),
                truncate_body(body)
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AirtableError::TokenExchangeFailed(format!("invalid token response: {e}")))
    }

    async fn first_base(&self, access_token: &str) -> Result<String, AirtableError> {
        let url = format!("{}/v0/meta/bases", self.settings.api_base);
        let listing: BasesResponse =
            send_bearer(&self.http, Method::GET, &url, access_token, None).await?;

        listing
            .bases
            .into_iter()
            .map(|base| base.id)
            .find(|id| !id.trim().is_empty())
            .ok_or(AirtableError::NoAccessibleResource)
    }

    /// Refresh-token grant; persists and returns the updated connection.
    #[instrument(skip_all, fields(tenant_id = %connection.tenant_id))]
    pub async fn refresh(
        &self,
        connection: &ThirdPartyConnection,
    ) -> Result<ThirdPartyConnection, AirtableError> {
        let previous = connection
            .oauth()
            .ok_or(AirtableError::MissingRefreshToken)?;
        let refresh_token = previous
            .usable_refresh_token()
            .ok_or(AirtableError::MissingRefreshToken)?;

        let outcome = self.request_refresh(refresh_token).await;
        let label = if outcome.is_ok() { "success" } else { "failure" };
        counter!("airbridge_token_refresh_total", "outcome" => label).increment(1);
        let tokens = outcome?;

        let refreshed = ThirdPartyConnection {
            auth: ConnectionAuth::OAuth(credentials_from(tokens, Some(previous), Utc::now())),
            ..connection.clone()
        };
        self.store.upsert(&refreshed).await?;

        info!("Refreshed Airtable access token");
        Ok(refreshed)
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenResponse, AirtableError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http
            .post(&self.settings.token_url)
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .header(ACCEPT, "application/json")
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AirtableError::RefreshFailed {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AirtableError::InvalidUpstreamResponse(e.to_string()))
    }
}

/// Maps a token response onto stored credentials, carrying forward anything the
/// provider omitted on refresh.
fn credentials_from(
    tokens: TokenResponse,
    previous: Option<&OAuthCredentials>,
    now: DateTime<Utc>,
) -> OAuthCredentials {
    let expires_at = tokens
        .expires_in
        .filter(|secs| *secs > 0)
        .map(|secs| now + Duration::seconds(secs));

    OAuthCredentials {
        provider_account_id: tokens
            .account_id
            .or_else(|| previous.and_then(|p| p.provider_account_id.clone())),
        access_token: tokens.access_token,
        refresh_token: tokens
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous.and_then(|p| p.refresh_token.clone())),
        scope: tokens
            .scope
            .or_else(|| previous.and_then(|p| p.scope.clone())),
        token_type: tokens
            .token_type
            .or_else(|| previous.and_then(|p| p.token_type.clone())),
        expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::StateError;
    use crate::airtable::testing::{MemoryStore, settings};
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BASIC_AUTH: &str = "Basic Y2xpZW50LTEyMzpzZWNyZXQtNDU2";

    fn oauth(server: &MockServer, store: Arc<MemoryStore>) -> AirtableOAuth {
        AirtableOAuth::new(
            reqwest::Client::new(),
            settings(&server.uri()),
            StateCodec::new("test-state-secret").unwrap(),
            store,
        )
    }

    fn oauth_connection(tenant_id: Uuid, refresh_token: Option<&str>) -> ThirdPartyConnection {
        let mut connection = ThirdPartyConnection::new(
            tenant_id,
            "appExisting".to_string(),
            ConnectionAuth::OAuth(OAuthCredentials {
                provider_account_id: Some("usr1".to_string()),
                access_token: "stale".to_string(),
                refresh_token: refresh_token.map(str::to_string),
                scope: Some("data.records:read".to_string()),
                token_type: Some("Bearer".to_string()),
                expires_at: Some(Utc::now() - Duration::minutes(1)),
            }),
        );
        connection.created_at = Utc::now() - Duration::days(3);
        connection
    }

    fn query(url: &Url) -> HashMap<String, String> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    async fn mount_bases(server: &MockServer, token: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/v0/meta/bases"))
            .and(header("authorization", format!("Bearer {token}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn authorize_url_carries_pkce_and_signed_state() {
        let server = MockServer::start().await;
        let oauth = oauth(&server, Arc::new(MemoryStore::default()));
        let tenant_id = Uuid::new_v4();

        let url = oauth.authorize_url(tenant_id).unwrap();
        let params = query(&url);

        assert_eq!(url.path(), "/oauth2/v1/authorize");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(
            params["redirect_uri"],
            "http://localhost:8080/api/v1/airtable/oauth/callback"
        );
        assert_eq!(
            params["scope"],
            "data.records:read data.records:write schema.bases:read schema.bases:write webhook:manage"
        );
        assert_eq!(params["code_challenge_method"], "S256");

        let payload = oauth.state.verify(&params["state"]).unwrap();
        assert_eq!(payload.tenant_id, tenant_id);
        assert_eq!(
            pkce::challenge(&payload.pkce_verifier),
            params["code_challenge"]
        );
    }

    #[tokio::test]
    async fn authorize_url_requires_client_credentials() {
        let server = MockServer::start().await;
        let mut oauth = oauth(&server, Arc::new(MemoryStore::default()));
        oauth.settings.client_secret.clear();

        assert!(matches!(
            oauth.authorize_url(Uuid::new_v4()),
            Err(AirtableError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn tampered_state_is_rejected_before_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::default());
        let oauth = oauth(&server, Arc::clone(&store));
        let url = oauth.authorize_url(Uuid::new_v4()).unwrap();
        let mut state = query(&url)["state"].clone();
        let last = state.pop().unwrap();
        state.push(if last == 'A' { 'B' } else { 'A' });

        let err = oauth.handle_callback(&state, "code").await.unwrap_err();
        assert!(matches!(
            err,
            AirtableError::State(StateError::InvalidSignature)
        ));
        assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn callback_exchanges_code_and_stores_connection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .and(header("authorization", BASIC_AUTH))
            .and(header("accept", "application/json"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "refresh_token": "ref-1",
                "token_type": "Bearer",
                "expires_in": 3600,
                "scope": "data.records:read",
                "account_id": "usr42"
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_bases(
            &server,
            "abc",
            serde_json::json!({"bases": [{"id": "appFirst", "name": "CRM"}, {"id": "appSecond"}]}),
        )
        .await;

        let store = Arc::new(MemoryStore::default());
        let oauth = oauth(&server, Arc::clone(&store));
        let tenant_id = Uuid::new_v4();
        let url = oauth.authorize_url(tenant_id).unwrap();
        let state = query(&url)["state"].clone();

        let before = Utc::now();
        let connection = oauth.handle_callback(&state, "auth-code").await.unwrap();

        assert_eq!(connection.tenant_id, tenant_id);
        assert_eq!(connection.external_resource_id, "appFirst");
        let stored = store.snapshot(tenant_id).unwrap();
        let creds = stored.oauth().unwrap();
        assert_eq!(creds.access_token, "abc");
        assert_eq!(creds.refresh_token.as_deref(), Some("ref-1"));
        assert_eq!(creds.provider_account_id.as_deref(), Some("usr42"));
        let expires_at = creds.expires_at.unwrap();
        assert!(expires_at >= before + Duration::seconds(3600));
        assert!(expires_at <= Utc::now() + Duration::seconds(3600));
    }

    #[tokio::test]
    async fn missing_expires_in_means_no_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "abc",
                "expires_in": 0
            })))
            .mount(&server)
            .await;
        mount_bases(&server, "abc", serde_json::json!({"bases": [{"id": "app1"}]})).await;

        let store = Arc::new(MemoryStore::default());
        let oauth = oauth(&server, Arc::clone(&store));
        let state = query(&oauth.authorize_url(Uuid::new_v4()).unwrap())["state"].clone();

        let connection = oauth.handle_callback(&state, "c").await.unwrap();
        assert_eq!(connection.oauth().unwrap().expires_at, None);
    }

    #[tokio::test]
    async fn zero_bases_persists_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "abc", "expires_in": 3600})),
            )
            .mount(&server)
            .await;
        mount_bases(&server, "abc", serde_json::json!({"bases": []})).await;

        let store = Arc::new(MemoryStore::default());
        let oauth = oauth(&server, Arc::clone(&store));
        let tenant_id = Uuid::new_v4();
        let state = query(&oauth.authorize_url(tenant_id).unwrap())["state"].clone();

        let err = oauth.handle_callback(&state, "c").await.unwrap_err();
        assert!(matches!(err, AirtableError::NoAccessibleResource));
        assert!(store.snapshot(tenant_id).is_none());
    }

    #[tokio::test]
    async fn rejected_code_is_token_exchange_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::default());
        let oauth = oauth(&server, Arc::clone(&store));
        let state = query(&oauth.authorize_url(Uuid::new_v4()).unwrap())["state"].clone();

        let err = oauth.handle_callback(&state, "bad").await.unwrap_err();
        match err {
            AirtableError::TokenExchangeFailed(message) => {
                assert!(message.contains("400"));
                assert!(message.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.upserts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let oauth = oauth(&server, Arc::new(MemoryStore::default()));
        for token in [None, Some("")] {
            let connection = oauth_connection(Uuid::new_v4(), token);
            assert!(matches!(
                oauth.refresh(&connection).await,
                Err(AirtableError::MissingRefreshToken)
            ));
        }
    }

    #[tokio::test]
    async fn refresh_uses_basic_auth_without_client_id_in_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .and(header("authorization", BASIC_AUTH))
            .and(header("accept", "application/json"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=ref-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tenant_id = Uuid::new_v4();
        let original = oauth_connection(tenant_id, Some("ref-old"));
        let store = Arc::new(MemoryStore::with(original.clone()));
        let oauth = oauth(&server, Arc::clone(&store));

        let refreshed = oauth.refresh(&original).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(!body.contains("client_id"));

        assert_eq!(refreshed.id, original.id);
        assert_eq!(refreshed.created_at, original.created_at);
        assert_eq!(refreshed.external_resource_id, "appExisting");
        let creds = refreshed.oauth().unwrap();
        assert_eq!(creds.access_token, "fresh");
        // omitted by the provider, so carried forward
        assert_eq!(creds.refresh_token.as_deref(), Some("ref-old"));
        assert_eq!(creds.provider_account_id.as_deref(), Some("usr1"));
        assert!(!creds.is_expired());

        let stored = store.snapshot(tenant_id).unwrap();
        assert_eq!(stored.oauth().unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn refresh_rejection_reports_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"error\":\"invalid_grant\"}"))
            .mount(&server)
            .await;

        let tenant_id = Uuid::new_v4();
        let original = oauth_connection(tenant_id, Some("ref-old"));
        let store = Arc::new(MemoryStore::with(original.clone()));
        let oauth = oauth(&server, Arc::clone(&store));

        match oauth.refresh(&original).await {
            Err(AirtableError::RefreshFailed { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(
            store.snapshot(tenant_id).unwrap().oauth().unwrap().access_token,
            "stale"
        );
    }
}

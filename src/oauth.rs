//! OAuth2 credential lifecycle
//!
//! [`CredentialManager`] performs the authorization-code and refresh-token
//! exchanges against the provider token endpoint and hands out access
//! tokens that are guaranteed not to expire within the refresh margin.
//! Refresh is demand-driven; there is no background timer.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use reqwest::Client as HttpClient;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OAuthConfig;
use crate::credentials::{CredentialSet, CredentialStore, token_preview};
use crate::errors::{AppError, AppResult};

/// Read-only mail and calendar scopes requested at authorization time
pub const SCOPES: &str = "mail-r cal-r";
/// Tokens expiring within this margin are refreshed before being handed out
pub const REFRESH_MARGIN_MINUTES: i64 = 5;

const AUTHORIZE_PATH: &str = "oauth2/request_auth";
const TOKEN_PATH: &str = "oauth2/get_token";

/// Token endpoint success body
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
}

/// Token endpoint error body
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

/// Credential summary safe to return to callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    /// Whether a credential set exists in memory or on disk
    pub authenticated: bool,
    /// Access token expiry (RFC 3339) if known
    pub expires_at: Option<String>,
    /// Token type if known
    pub token_type: Option<String>,
}

/// Which grant a token request performs; selects the failure variant
#[derive(Debug, Clone, Copy)]
enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    fn error(self, msg: String) -> AppError {
        match self {
            Self::AuthorizationCode => AppError::TokenExchange(msg),
            Self::RefreshToken => AppError::TokenRefresh(msg),
        }
    }
}

#[derive(Debug)]
struct RefreshFailure {
    generation: u64,
    message: String,
}

#[derive(Debug, Default)]
struct CredentialState {
    current: Option<CredentialSet>,
    /// Lifetime granted by the provider for `current`; unknown after a load
    issued_lifetime: Option<Duration>,
    last_refresh_failure: Option<RefreshFailure>,
}

impl CredentialState {
    /// Refresh margin for the current set
    ///
    /// Tokens issued with a lifetime shorter than twice the margin use half
    /// their lifetime instead, so a fresh short-lived token is handed out
    /// rather than exchanged again immediately.
    fn margin(&self) -> Duration {
        let margin = refresh_margin();
        match self.issued_lifetime {
            Some(lifetime) => margin.min(lifetime / 2),
            None => margin,
        }
    }

    fn replace(&mut self, set: &CredentialSet) {
        self.issued_lifetime = Some(Duration::milliseconds(
            set.expires_at_epoch_millis - Utc::now().timestamp_millis(),
        ));
        self.current = Some(set.clone());
        self.last_refresh_failure = None;
    }
}

/// OAuth2 credential manager
///
/// Owns the single credential set for one account. All state sits behind a
/// mutex that is held across the refresh exchange, so concurrent callers that
/// observe an expiring token share one exchange.
#[derive(Debug)]
pub struct CredentialManager {
    config: OAuthConfig,
    store: CredentialStore,
    http: HttpClient,
    state: Mutex<CredentialState>,
    refresh_generation: AtomicU64,
}

impl CredentialManager {
    /// Create a manager; the credential file is not read until first use
    pub fn new(config: OAuthConfig, http: HttpClient) -> Self {
        let store = CredentialStore::new(config.token_dir.clone());
        Self {
            config,
            store,
            http,
            state: Mutex::new(CredentialState::default()),
            refresh_generation: AtomicU64::new(0),
        }
    }

    /// Build the provider authorization URL
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the configured base URL cannot be joined.
    pub fn authorization_url(&self, state: Option<&str>) -> AppResult<Url> {
        let mut url = self.endpoint(AUTHORIZE_PATH)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", SCOPES);
            if let Some(state) = state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url)
    }

    /// Exchange a single-use authorization code for a new credential set
    ///
    /// On success the set replaces any in-memory credentials and is persisted.
    ///
    /// # Errors
    ///
    /// - `TokenExchange` if the provider rejects the code or omits fields
    /// - `Internal` if the credential file cannot be written
    pub async fn exchange_code(&self, code: &str) -> AppResult<CredentialSet> {
        let secret = self.config.client_secret.expose_secret();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", secret),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
        ];
        let response = self.request_token(Grant::AuthorizationCode, &form).await?;
        let set = credential_set_from(Grant::AuthorizationCode, response, None)?;

        let mut state = self.state.lock().await;
        self.store.save(&set).await?;
        state.replace(&set);
        info!(
            access_token = %token_preview(&set.access_token),
            expires_at = set.expires_at_epoch_millis,
            "authorization code exchanged"
        );
        Ok(set)
    }

    /// Return an access token valid for at least the refresh margin
    ///
    /// Loads the persisted set on first use and refreshes it synchronously
    /// when it expires within [`REFRESH_MARGIN_MINUTES`]. A set the provider
    /// issued with a shorter lifetime uses half that lifetime as its margin.
    ///
    /// # Errors
    ///
    /// - `NoCredentials` if nothing is cached or stored
    /// - `TokenRefresh` if a needed refresh fails (not retried)
    pub async fn get_valid_access_token(&self) -> AppResult<String> {
        let observed_generation = self.refresh_generation.load(Ordering::Acquire);
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;

        let margin = state.margin();
        let current = state.current.as_ref().ok_or_else(no_credentials)?;
        if !current.expires_within(margin, Utc::now()) {
            return Ok(current.access_token.clone());
        }

        // Another caller's exchange failed while we were waiting on the lock
        if let Some(failure) = &state.last_refresh_failure
            && failure.generation > observed_generation
        {
            return Err(AppError::TokenRefresh(failure.message.clone()));
        }

        debug!("access token within refresh margin; refreshing");
        let refreshed = self.refresh_locked(&mut state).await?;
        Ok(refreshed.access_token)
    }

    /// Force a refresh-token exchange
    ///
    /// Retains the previous refresh token when the provider omits a new one.
    /// On failure the previous credential set is left untouched.
    ///
    /// # Errors
    ///
    /// - `NoCredentials` if nothing is cached or stored
    /// - `TokenRefresh` if the exchange fails
    pub async fn refresh_access_token(&self) -> AppResult<CredentialSet> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state).await?;
        self.refresh_locked(&mut state).await
    }

    /// Drop in-memory credentials and delete the credential file
    ///
    /// # Errors
    ///
    /// Returns `Internal` if an existing file cannot be removed.
    pub async fn clear_credentials(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        *state = CredentialState::default();
        self.store.delete().await?;
        info!("credentials cleared");
        Ok(())
    }

    /// Report whether credentials exist and when they expire
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the credential file cannot be read.
    pub async fn status(&self) -> AppResult<CredentialStatus> {
        let mut state = self.state.lock().await;
        match self.ensure_loaded(&mut state).await {
            Ok(()) | Err(AppError::NoCredentials(_)) => {}
            Err(e) => return Err(e),
        }
        Ok(match state.current.as_ref() {
            Some(set) => CredentialStatus {
                authenticated: true,
                expires_at: set.expires_at().map(|t| t.to_rfc3339()),
                token_type: Some(set.token_type.clone()),
            },
            None => CredentialStatus {
                authenticated: false,
                expires_at: None,
                token_type: None,
            },
        })
    }

    /// Whether a credential set is cached or stored on disk
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the credential file cannot be read.
    pub async fn has_credentials(&self) -> AppResult<bool> {
        Ok(self.status().await?.authenticated)
    }

    async fn ensure_loaded(&self, state: &mut CredentialState) -> AppResult<()> {
        if state.current.is_none() {
            state.current = self.store.load().await?;
            if state.current.is_some() {
                debug!("credentials loaded from disk");
            }
        }
        Ok(())
    }

    async fn refresh_locked(&self, state: &mut CredentialState) -> AppResult<CredentialSet> {
        let result = self.perform_refresh(state).await;
        let generation = self.refresh_generation.fetch_add(1, Ordering::AcqRel) + 1;
        match &result {
            Ok(set) => {
                state.replace(set);
                info!(
                    access_token = %token_preview(&set.access_token),
                    expires_at = set.expires_at_epoch_millis,
                    "access token refreshed"
                );
            }
            Err(e) => {
                warn!(error = %e, "access token refresh failed");
                state.last_refresh_failure = Some(RefreshFailure {
                    generation,
                    message: match e {
                        AppError::TokenRefresh(msg) => msg.clone(),
                        other => other.to_string(),
                    },
                });
            }
        }
        result
    }

    async fn perform_refresh(&self, state: &CredentialState) -> AppResult<CredentialSet> {
        let previous = state.current.as_ref().ok_or_else(no_credentials)?;
        if previous.refresh_token.is_empty() {
            return Err(AppError::TokenRefresh(
                "no refresh token available; re-authorization required".to_owned(),
            ));
        }

        let secret = self.config.client_secret.expose_secret();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", secret),
            ("refresh_token", previous.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let response = self.request_token(Grant::RefreshToken, &form).await?;
        let set = credential_set_from(
            Grant::RefreshToken,
            response,
            Some(previous.refresh_token.as_str()),
        )?;
        self.store
            .save(&set)
            .await
            .map_err(|e| AppError::TokenRefresh(format!("refreshed credentials not persisted: {e}")))?;
        Ok(set)
    }

    async fn request_token(&self, grant: Grant, form: &[(&str, &str)]) -> AppResult<TokenResponse> {
        let url = self.endpoint(TOKEN_PATH)?;
        let response = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| grant.error(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| grant.error(format!("failed reading token response: {e}")))?;

        if !status.is_success() {
            return Err(grant.error(describe_token_error(status.as_u16(), &body)));
        }

        serde_json::from_str::<TokenResponse>(&body)
            .map_err(|e| grant.error(format!("malformed token response: {e}")))
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| AppError::InvalidInput(format!("invalid OAuth base URL: {e}")))
    }
}

fn refresh_margin() -> Duration {
    Duration::minutes(REFRESH_MARGIN_MINUTES)
}

fn no_credentials() -> AppError {
    AppError::NoCredentials("authorize the account first".to_owned())
}

/// Render a provider error body as `"<error>: <description>"`
fn describe_token_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(TokenErrorResponse {
            error: Some(error),
            error_description: Some(description),
        }) => format!("{error}: {description}"),
        Ok(TokenErrorResponse {
            error: Some(error),
            error_description: None,
        }) => error,
        _ => format!("token endpoint returned HTTP {status}"),
    }
}

/// Build a full credential set from a token response
///
/// `previous_refresh` is kept when the response carries no refresh token.
fn credential_set_from(
    grant: Grant,
    response: TokenResponse,
    previous_refresh: Option<&str>,
) -> AppResult<CredentialSet> {
    let access_token = response
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| grant.error("token response missing access_token".to_owned()))?;
    let expires_in = response
        .expires_in
        .filter(|secs| *secs > 0)
        .ok_or_else(|| grant.error("token response missing expires_in".to_owned()))?;
    let refresh_token = response
        .refresh_token
        .filter(|t| !t.is_empty())
        .or_else(|| previous_refresh.map(str::to_owned))
        .ok_or_else(|| grant.error("token response missing refresh_token".to_owned()))?;

    Ok(CredentialSet {
        access_token,
        refresh_token,
        expires_at_epoch_millis: (Utc::now() + Duration::seconds(expires_in)).timestamp_millis(),
        token_type: response.token_type.unwrap_or_else(|| "Bearer".to_owned()),
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use secrecy::SecretString;
    use serde_json::json;
    use url::Url;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{CredentialManager, SCOPES};
    use crate::config::OAuthConfig;
    use crate::credentials::{CredentialSet, CredentialStore};
    use crate::errors::AppError;

    fn manager(base: &str, token_dir: &Path) -> CredentialManager {
        let config = OAuthConfig {
            client_id: "client-123".to_owned(),
            client_secret: SecretString::new("shh".to_owned().into()),
            redirect_uri: "https://localhost/callback".to_owned(),
            base_url: Url::parse(&format!("{base}/")).expect("base url"),
            token_dir: token_dir.to_path_buf(),
        };
        CredentialManager::new(config, reqwest::Client::new())
    }

    fn stored(access: &str, expires_in: Duration) -> CredentialSet {
        CredentialSet {
            access_token: access.to_owned(),
            refresh_token: "refresh-original".to_owned(),
            expires_at_epoch_millis: (Utc::now() + expires_in).timestamp_millis(),
            token_type: "bearer".to_owned(),
        }
    }

    #[test]
    fn authorization_url_carries_required_parameters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager("https://api.login.example.com", dir.path());
        let url = manager
            .authorization_url(Some("xyz"))
            .expect("authorization url");

        assert_eq!(url.path(), "/oauth2/request_auth");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("client_id".to_owned(), "client-123".to_owned())));
        assert!(pairs.contains(&(
            "redirect_uri".to_owned(),
            "https://localhost/callback".to_owned()
        )));
        assert!(pairs.contains(&("response_type".to_owned(), "code".to_owned())));
        assert!(pairs.contains(&("scope".to_owned(), SCOPES.to_owned())));
        assert!(pairs.contains(&("state".to_owned(), "xyz".to_owned())));
    }

    #[test]
    fn authorization_url_omits_absent_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager("https://api.login.example.com", dir.path());
        let url = manager.authorization_url(None).expect("authorization url");
        assert!(url.query_pairs().all(|(k, _)| k != "state"));
    }

    #[tokio::test]
    async fn exchange_code_persists_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/get_token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=good-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access-token-abcdefgh",
                "refresh_token": "new-refresh",
                "expires_in": 3600,
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(&server.uri(), dir.path());
        let set = manager.exchange_code("good-code").await.expect("exchange");
        assert_eq!(set.access_token, "new-access-token-abcdefgh");
        assert_eq!(set.refresh_token, "new-refresh");
        assert!(set.expires_at_epoch_millis > Utc::now().timestamp_millis());

        let on_disk = CredentialStore::new(dir.path())
            .load()
            .await
            .expect("load")
            .expect("persisted");
        assert_eq!(on_disk, set);
    }

    #[tokio::test]
    async fn reused_code_fails_with_token_exchange_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/get_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "authorization code has already been used"
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(&server.uri(), dir.path());
        let err = manager.exchange_code("used-code").await.expect_err("must fail");
        match err {
            AppError::TokenExchange(msg) => {
                assert!(msg.contains("invalid_grant"));
                assert!(msg.contains("already been used"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(CredentialStore::new(dir.path()).load().await.expect("load").is_none());
    }

    #[tokio::test]
    async fn exchange_without_access_token_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/get_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "refresh_token": "r",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager(&server.uri(), dir.path());
        let err = manager.exchange_code("code").await.expect_err("must fail");
        assert!(matches!(err, AppError::TokenExchange(_)));
    }

    #[tokio::test]
    async fn missing_credentials_report_no_credentials() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = manager("https://api.login.example.com", dir.path());
        let err = manager
            .get_valid_access_token()
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::NoCredentials(_)));
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        CredentialStore::new(dir.path())
            .save(&stored("still-fresh", Duration::hours(1)))
            .await
            .expect("seed");

        let manager = manager(&server.uri(), dir.path());
        let token = manager.get_valid_access_token().await.expect("token");
        assert_eq!(token, "still-fresh");
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_once_and_keeps_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/get_token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-original"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "refreshed-access",
                "expires_in": 3600,
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        CredentialStore::new(dir.path())
            .save(&stored("about-to-expire", Duration::minutes(4)))
            .await
            .expect("seed");

        let manager = manager(&server.uri(), dir.path());
        for _ in 0..3 {
            let token = manager.get_valid_access_token().await.expect("token");
            assert_eq!(token, "refreshed-access");
        }

        let on_disk = CredentialStore::new(dir.path())
            .load()
            .await
            .expect("load")
            .expect("persisted");
        assert_eq!(on_disk.refresh_token, "refresh-original");
        assert!(!on_disk.expires_within(Duration::minutes(5), Utc::now()));
    }

    #[tokio::test]
    async fn short_lived_token_is_not_refreshed_again_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/get_token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "short-lived",
                "expires_in": 60,
                "token_type": "bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        CredentialStore::new(dir.path())
            .save(&stored("expired", Duration::minutes(-1)))
            .await
            .expect("seed");

        let manager = manager(&server.uri(), dir.path());
        for _ in 0..3 {
            let token = manager.get_valid_access_token().await.expect("token");
            assert_eq!(token, "short-lived");
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/get_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "access_token": "shared-access",
                        "refresh_token": "rotated-refresh",
                        "expires_in": 3600,
                        "token_type": "bearer"
                    }))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        CredentialStore::new(dir.path())
            .save(&stored("expired", Duration::minutes(-10)))
            .await
            .expect("seed");

        let manager = Arc::new(manager(&server.uri(), dir.path()));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_valid_access_token().await })
            })
            .collect();

        for task in tasks {
            let token = task.await.expect("join").expect("token");
            assert_eq!(token, "shared-access");
        }
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_set_and_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/get_token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "refresh token revoked"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let original = stored("expired", Duration::minutes(-1));
        CredentialStore::new(dir.path())
            .save(&original)
            .await
            .expect("seed");

        let manager = manager(&server.uri(), dir.path());
        let err = manager
            .get_valid_access_token()
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::TokenRefresh(ref msg) if msg.contains("invalid_grant")));

        let on_disk = CredentialStore::new(dir.path())
            .load()
            .await
            .expect("load")
            .expect("still present");
        assert_eq!(on_disk, original);
    }

    #[tokio::test]
    async fn empty_refresh_token_fails_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let mut set = stored("expired", Duration::minutes(-1));
        set.refresh_token.clear();
        CredentialStore::new(dir.path())
            .save(&set)
            .await
            .expect("seed");

        let manager = manager(&server.uri(), dir.path());
        let err = manager
            .refresh_access_token()
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::TokenRefresh(_)));
    }

    #[tokio::test]
    async fn clear_credentials_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        CredentialStore::new(dir.path())
            .save(&stored("fresh", Duration::hours(1)))
            .await
            .expect("seed");

        let manager = manager("https://api.login.example.com", dir.path());
        assert!(manager.has_credentials().await.expect("status"));

        manager.clear_credentials().await.expect("first clear");
        manager.clear_credentials().await.expect("second clear");
        assert!(!manager.has_credentials().await.expect("status"));
        assert!(matches!(
            manager.get_valid_access_token().await,
            Err(AppError::NoCredentials(_))
        ));
    }
}

//! API client for the school-management REST backend.
//!
//! `ApiClient` attaches the current bearer token to every request. When a
//! request comes back 401 it renews the token once through the refresh
//! endpoint and replays the request; if that is impossible the stored
//! credentials are dropped and the auth state flips to `LoggedOut`.

use std::sync::Arc;

use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::auth::{AuthState, Session, TokenPair};
use crate::config::ClientConfig;

use super::request::{ApiRequest, ApiResponse, Attempt, Query};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "/auth/login";

const REFRESH_PATH: &str = "/auth/refresh";

const USER_AGENT: &str = concat!("edudesk/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// API client for the school-management backend.
/// Clone is cheap - clones share the connection pool, session and auth state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    base_url: String,
    session: Session,
    /// Serializes refresh calls so concurrent 401s renew the token once
    refresh_lock: Mutex<()>,
    auth_state: watch::Sender<AuthState>,
}

impl ApiClient {
    /// Create a new API client around an already loaded session
    pub fn new(config: &ClientConfig, session: Session) -> Result<Self, ApiError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ApiError::InvalidRequest("Base URL must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        let initial_state = if session.is_authenticated() {
            AuthState::LoggedIn
        } else {
            AuthState::LoggedOut
        };
        let (auth_state, _) = watch::channel(initial_state);

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url,
                session,
                refresh_lock: Mutex::new(()),
                auth_state,
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Subscribe to login / logout transitions
    pub fn auth_state(&self) -> watch::Receiver<AuthState> {
        self.inner.auth_state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.is_authenticated()
    }

    // ===== Authentication =====

    /// Log in with username and password, storing the returned token pair
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let response = self
            .inner
            .client
            .post(self.url_for(LOGIN_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let tokens: TokenPair = Self::check_response(response).await?.json()?;
        self.store_tokens(tokens);
        info!(username = username, "Login successful");
        Ok(())
    }

    /// Drop the stored credentials
    pub fn logout(&self) {
        if let Err(e) = self.inner.session.clear() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        self.set_auth_state(AuthState::LoggedOut);
        info!("Logged out");
    }

    fn store_tokens(&self, tokens: TokenPair) {
        if let Err(e) = self.inner.session.update(tokens) {
            warn!(error = %e, "Failed to persist tokens");
        }
        self.set_auth_state(AuthState::LoggedIn);
    }

    fn force_logout(&self) {
        if let Err(e) = self.inner.session.clear() {
            warn!(error = %e, "Failed to clear stored tokens");
        }
        self.set_auth_state(AuthState::LoggedOut);
        warn!("Authentication could not be recovered, credentials cleared");
    }

    fn set_auth_state(&self, state: AuthState) {
        self.inner.auth_state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Renew the token pair through the refresh endpoint.
    ///
    /// `failed_token` is the access token the caller's request was rejected
    /// with. If the stored token differs by the time the lock is held, another
    /// request already refreshed and the caller can simply replay.
    async fn refresh_tokens(&self, failed_token: Option<&str>) -> Result<(), ApiError> {
        let _guard = self.inner.refresh_lock.lock().await;

        let current = self.inner.session.access_token();
        if current.is_some() && current.as_deref() != failed_token {
            debug!("Token already refreshed by a concurrent request");
            return Ok(());
        }

        let Some(refresh_token) = self.inner.session.refresh_token() else {
            debug!("No refresh token stored");
            return Err(ApiError::Unauthorized);
        };

        let response = self
            .inner
            .client
            .post(self.url_for(REFRESH_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&RefreshRequest {
                refresh_token: &refresh_token,
            })
            .send()
            .await?;

        let mut tokens: TokenPair = Self::check_response(response).await?.json()?;
        if tokens.refresh_token.is_none() {
            // Server rotated only the access token
            tokens.refresh_token = Some(refresh_token);
        }
        self.store_tokens(tokens);
        info!("Access token refreshed");
        Ok(())
    }

    // ===== Transport =====

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.inner.base_url, path)
        } else {
            format!("{}/{}", self.inner.base_url, path)
        }
    }

    fn auth_headers(token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidRequest(format!("Invalid token for header: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<ApiResponse, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let cache_control = response
            .headers()
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = response.bytes().await?;
        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| ApiError::InvalidResponse(format!("Body is not valid JSON: {}", e)))?
        };

        Ok(ApiResponse {
            status,
            cache_control,
            body,
        })
    }

    async fn send_once(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse, ApiError> {
        let url = self.url_for(request.path());

        let mut builder = self
            .inner
            .client
            .request(request.method().clone(), &url)
            .header(header::ACCEPT, "application/json")
            .headers(Self::auth_headers(token)?);
        if !request.query().is_empty() {
            builder = builder.query(request.query().as_map());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        debug!(method = %request.method(), url = %url, "Sending request");
        let response = builder.send().await?;
        Self::check_response(response).await
    }

    /// Perform a request, renewing the token and replaying once on a 401.
    ///
    /// Errors other than the first 401 are returned unchanged. When renewal
    /// is impossible the caller receives the original 401 error.
    pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut attempt = Attempt::new(request);

        loop {
            let token = self.inner.session.access_token();
            match self.send_once(attempt.request(), token.as_deref()).await {
                Err(err) if err.is_unauthorized() && attempt.can_refresh() => {
                    attempt = attempt.after_refresh();
                    debug!(path = request.path(), "Unauthorized, attempting token refresh");

                    if let Err(refresh_err) = self.refresh_tokens(token.as_deref()).await {
                        warn!(path = request.path(), error = %refresh_err, "Token refresh failed");
                        self.force_logout();
                        return Err(err);
                    }
                }
                result => return result,
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: Option<&Query>) -> Result<T, ApiError> {
        let mut request = ApiRequest::get(path);
        if let Some(query) = query {
            request = request.with_query(query.clone());
        }
        self.request(&request).await?.json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let request = ApiRequest::post(path).with_json(body)?;
        self.request(&request).await?.json()
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let request = ApiRequest::put(path).with_json(body)?;
        self.request(&request).await?.json()
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let request = ApiRequest::patch(path).with_json(body)?;
        self.request(&request).await?.json()
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(&ApiRequest::delete(path)).await?.json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;

    fn client(base_url: &str) -> ApiClient {
        ApiClient::new(&ClientConfig::new(base_url), Session::new(MemoryTokenStore::new())).unwrap()
    }

    #[test]
    fn test_url_for_joins_paths() {
        let api = client("https://school.example/api/");
        assert_eq!(api.base_url(), "https://school.example/api");
        assert_eq!(api.url_for("/students"), "https://school.example/api/students");
        assert_eq!(api.url_for("students"), "https://school.example/api/students");
        assert_eq!(api.url_for("https://files.example/x"), "https://files.example/x");
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let result = ApiClient::new(&ClientConfig::new("  "), Session::new(MemoryTokenStore::new()));
        assert!(matches!(result, Err(ApiError::InvalidRequest(_))));
    }

    #[test]
    fn test_auth_headers() {
        let headers = ApiClient::auth_headers(Some("abc")).unwrap();
        assert_eq!(headers.get(header::AUTHORIZATION).unwrap(), "Bearer abc");

        assert!(ApiClient::auth_headers(None).unwrap().is_empty());
        assert!(ApiClient::auth_headers(Some("bad\ntoken")).is_err());
    }

    #[test]
    fn test_initial_auth_state_follows_session() {
        let api = client("http://localhost");
        assert_eq!(*api.auth_state().borrow(), AuthState::LoggedOut);

        let session = Session::load(MemoryTokenStore::with_tokens(TokenPair::new("a", "r"))).unwrap();
        let api = ApiClient::new(&ClientConfig::new("http://localhost"), session).unwrap();
        assert_eq!(*api.auth_state().borrow(), AuthState::LoggedIn);
        assert!(api.is_authenticated());
    }

    #[test]
    fn test_logout_clears_session() {
        let session = Session::load(MemoryTokenStore::with_tokens(TokenPair::new("a", "r"))).unwrap();
        let api = ApiClient::new(&ClientConfig::new("http://localhost"), session).unwrap();
        let state = api.auth_state();

        api.logout();
        assert!(!api.is_authenticated());
        assert_eq!(*state.borrow(), AuthState::LoggedOut);
    }
}

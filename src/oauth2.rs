//! OAuth2 authorization-code grant with PKCE, refresh and expiry handling.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::call::Call;
use crate::client::Config;
use crate::error::{RestError, Result};
use crate::pkce::PkceCodeChallenge;
use crate::proxy::{CallHook, Proxy};
use crate::signer::percent_encode;

/// Client registration of an OAuth2 service
#[derive(Clone, Default)]
pub struct OAuth2Settings {
    /// Authorization endpoint the user is sent to
    pub auth_url: String,
    /// Token endpoint for code exchange and refresh
    pub token_url: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub client_secret: String,
}

impl OAuth2Settings {
    /// Settings in endpoint, redirect, client id, client secret order
    pub fn new(
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        redirect_uri: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        OAuth2Settings {
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            redirect_uri: redirect_uri.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl std::fmt::Debug for OAuth2Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Settings")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("redirect_uri", &self.redirect_uri)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Tokens held by an OAuth2 proxy
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2TokenState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// When the access token stops being accepted
    pub expiration_date: Option<DateTime<Utc>>,
}

impl OAuth2TokenState {
    /// Expired once `now` is past the expiration date; tokens without one never expire
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiration_date, Some(exp) if now > exp)
    }

    /// Status of the access token at `now`
    pub fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        if self.access_token.is_none() {
            TokenStatus::Unauthenticated
        } else if self.is_expired_at(now) {
            TokenStatus::Expired
        } else {
            TokenStatus::Authenticated
        }
    }

    /// True when a refresh token is held
    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }
}

impl std::fmt::Debug for OAuth2TokenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2TokenState")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expiration_date", &self.expiration_date)
            .finish()
    }
}

/// Whether a proxy can send authenticated calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    Unauthenticated,
    Authenticated,
    Expired,
}

/// Shared token state.
///
/// Readers get snapshots; fetch and refresh swap the whole state at once.
/// Concurrent refreshes are not coordinated: the last one to finish wins.
#[derive(Debug, Default)]
pub struct TokenStore {
    state: RwLock<OAuth2TokenState>,
}

impl TokenStore {
    /// Store holding `state`
    pub fn new(state: OAuth2TokenState) -> Self {
        TokenStore {
            state: RwLock::new(state),
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> OAuth2TokenState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Swap in a whole new state
    pub fn replace(&self, state: OAuth2TokenState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn update<F: FnOnce(&mut OAuth2TokenState)>(&self, f: F) {
        f(&mut self.state.write().unwrap_or_else(|e| e.into_inner()));
    }

    /// Access token expiry against the current time
    pub fn is_expired(&self) -> bool {
        self.snapshot().is_expired_at(Utc::now())
    }

    /// Token status against the current time
    pub fn status(&self) -> TokenStatus {
        self.snapshot().status_at(Utc::now())
    }
}

/// Build the authorization endpoint URL.
///
/// Parameters are always emitted in the same order; `scope` and `state` only when given.
pub fn authorization_url(
    settings: &OAuth2Settings,
    challenge: &PkceCodeChallenge,
    scope: Option<&str>,
    state: Option<&str>,
) -> String {
    let mut pairs: Vec<(&str, &str)> = vec![
        ("response_type", "code"),
        ("client_id", settings.client_id.as_str()),
        ("redirect_uri", settings.redirect_uri.as_str()),
        ("code_challenge", challenge.challenge()),
        ("code_challenge_method", challenge.method()),
    ];
    if let Some(scope) = scope {
        pairs.push(("scope", scope));
    }
    if let Some(state) = state {
        pairs.push(("state", state));
    }

    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if settings.auth_url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", settings.auth_url, separator, query)
}

/// Form fields of the authorization-code grant
pub fn authorization_code_params(settings: &OAuth2Settings, code: &str, verifier: &str) -> Vec<(String, String)> {
    vec![
        ("client_id".to_string(), settings.client_id.clone()),
        ("client_secret".to_string(), settings.client_secret.clone()),
        ("grant_type".to_string(), "authorization_code".to_string()),
        ("code".to_string(), code.to_string()),
        ("redirect_uri".to_string(), settings.redirect_uri.clone()),
        ("code_verifier".to_string(), verifier.to_string()),
    ]
}

/// Form fields of the refresh-token grant
pub fn refresh_params(settings: &OAuth2Settings, refresh_token: &str) -> Vec<(String, String)> {
    vec![
        ("client_id".to_string(), settings.client_id.clone()),
        ("refresh_token".to_string(), refresh_token.to_string()),
        ("redirect_uri".to_string(), settings.redirect_uri.clone()),
        ("grant_type".to_string(), "refresh_token".to_string()),
    ]
}

#[derive(Deserialize)]
struct TokenEndpointBody {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    created_at: Option<i64>,
}

/// Parse a token endpoint JSON body received at `now`.
///
/// The expiration is `created_at + expires_in` when the server sends a
/// creation time, `now + expires_in` otherwise, and unset without `expires_in`.
pub fn parse_token_response(body: &[u8], now: DateTime<Utc>) -> Result<OAuth2TokenState> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(RestError::EmptyPayload);
    }

    let parsed: TokenEndpointBody = serde_json::from_slice(body)
        .map_err(|e| RestError::InvalidResponse(format!("token response is not valid JSON: {}", e)))?;
    let access_token = parsed
        .access_token
        .ok_or_else(|| RestError::InvalidResponse("access_token not found in token response".to_string()))?;

    let expiration_date = match parsed.expires_in {
        Some(expires_in) => {
            let base = match parsed.created_at {
                Some(created_at) => DateTime::from_timestamp(created_at, 0)
                    .ok_or_else(|| RestError::InvalidResponse(format!("invalid created_at {}", created_at)))?,
                None => now,
            };
            let lifetime = TimeDelta::try_seconds(expires_in)
                .ok_or_else(|| RestError::InvalidResponse(format!("invalid expires_in {}", expires_in)))?;
            Some(
                base.checked_add_signed(lifetime)
                    .ok_or_else(|| RestError::InvalidResponse(format!("invalid expires_in {}", expires_in)))?,
            )
        }
        None => None,
    };

    Ok(OAuth2TokenState {
        access_token: Some(access_token),
        refresh_token: parsed.refresh_token,
        expiration_date,
    })
}

/// Call hook attaching the bearer token, refusing to send with an expired one
pub struct OAuth2Hook {
    store: Arc<TokenStore>,
}

impl CallHook for OAuth2Hook {
    fn prepare(&self, call: &mut Call) -> Result<()> {
        let state = self.store.snapshot();
        if state.is_expired_at(Utc::now()) {
            return Err(RestError::AccessTokenExpired);
        }
        if let Some(token) = state.access_token {
            call.add_header("Authorization", format!("Bearer {}", token));
        }
        Ok(())
    }
}

/// Proxy whose calls carry an OAuth2 bearer token
#[derive(Debug, Clone)]
pub struct OAuth2Proxy {
    proxy: Proxy,
    token_endpoint: Proxy,
    settings: Arc<OAuth2Settings>,
    store: Arc<TokenStore>,
}

impl std::fmt::Debug for OAuth2Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Hook").field("status", &self.store.status()).finish()
    }
}

impl OAuth2Proxy {
    /// Create an unauthenticated proxy; the token endpoint shares the
    /// timeouts and user agent of `config`
    pub fn new(config: Config, settings: OAuth2Settings) -> Self {
        let store = Arc::new(TokenStore::default());
        let token_config = Config {
            url_format: settings.token_url.clone(),
            binding_required: false,
            ..config.clone()
        };
        OAuth2Proxy {
            proxy: Proxy::with_hook(config, Arc::new(OAuth2Hook { store: store.clone() })),
            token_endpoint: Proxy::new(token_config),
            settings: Arc::new(settings),
            store,
        }
    }

    /// Start from previously persisted tokens
    pub fn with_tokens(self, state: OAuth2TokenState) -> Self {
        self.store.replace(state);
        self
    }

    /// Proxy for authenticated calls
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// New call carrying the bearer token
    pub fn new_call(&self) -> Call {
        self.proxy.new_call()
    }

    /// Client registration
    pub fn settings(&self) -> &OAuth2Settings {
        &self.settings
    }

    /// Snapshot of all tokens, e.g. for persisting
    pub fn token_state(&self) -> OAuth2TokenState {
        self.store.snapshot()
    }

    /// Current access token
    pub fn access_token(&self) -> Option<String> {
        self.store.snapshot().access_token
    }

    /// Replace the access token
    pub fn set_access_token(&self, token: Option<String>) {
        self.store.update(|s| s.access_token = token);
    }

    /// Current refresh token
    pub fn refresh_token(&self) -> Option<String> {
        self.store.snapshot().refresh_token
    }

    /// Replace the refresh token
    pub fn set_refresh_token(&self, token: Option<String>) {
        self.store.update(|s| s.refresh_token = token);
    }

    /// When the access token expires, if known
    pub fn expiration_date(&self) -> Option<DateTime<Utc>> {
        self.store.snapshot().expiration_date
    }

    /// Replace the expiration date
    pub fn set_expiration_date(&self, date: Option<DateTime<Utc>>) {
        self.store.update(|s| s.expiration_date = date);
    }

    /// True once the expiration date has passed
    pub fn is_expired(&self) -> bool {
        self.store.is_expired()
    }

    /// Current token status
    pub fn status(&self) -> TokenStatus {
        self.store.status()
    }

    /// Authorization URL for `challenge`, with a fresh random `state` when
    /// `with_state` is set. The caller checks the returned state on redirect.
    pub fn build_authorization_url(
        &self,
        challenge: &PkceCodeChallenge,
        scope: Option<&str>,
        with_state: bool,
    ) -> (String, Option<String>) {
        let state = with_state.then(|| uuid::Uuid::new_v4().simple().to_string());
        let url = authorization_url(&self.settings, challenge, scope, state.as_deref());
        (url, state)
    }

    fn token_call(&self, fields: Vec<(String, String)>) -> Call {
        let mut call = self.token_endpoint.new_call();
        call.set_method(Method::POST);
        call.add_params(fields);
        call
    }

    /// Store the outcome of a grant; `keep_refresh` retains the current
    /// refresh token when the server did not issue a new one
    fn apply_grant(&self, payload: &[u8], keep_refresh: Option<String>) -> Result<OAuth2TokenState> {
        let mut state = parse_token_response(payload, Utc::now())?;
        if state.refresh_token.is_none() {
            state.refresh_token = keep_refresh;
        }
        if self.proxy.debug().oauth {
            tracing::debug!(
                target: "restproxy::oauth",
                expiration = ?state.expiration_date,
                refresh = state.has_refresh_token(),
                "stored OAuth2 tokens"
            );
        }
        self.store.replace(state.clone());
        Ok(state)
    }

    fn refresh_fields(&self) -> Result<(String, Vec<(String, String)>)> {
        let refresh_token = self.store.snapshot().refresh_token.ok_or(RestError::NoRefreshToken)?;
        let fields = refresh_params(&self.settings, &refresh_token);
        Ok((refresh_token, fields))
    }

    /// Exchange an authorization code and its PKCE verifier for tokens
    #[cfg(feature = "blocking")]
    pub fn fetch_access_token(&self, code: &str, verifier: &str) -> Result<OAuth2TokenState> {
        let mut call = self.token_call(authorization_code_params(&self.settings, code, verifier));
        let response = call.invoke()?;
        self.apply_grant(&response.payload, None)
    }

    /// Obtain a new access token with the stored refresh token.
    /// Fails with [`RestError::NoRefreshToken`] before any request when there is none.
    #[cfg(feature = "blocking")]
    pub fn refresh_access_token(&self) -> Result<OAuth2TokenState> {
        let (refresh_token, fields) = self.refresh_fields()?;
        let mut call = self.token_call(fields);
        let response = call.invoke()?;
        self.apply_grant(&response.payload, Some(refresh_token))
    }

    /// Async [`OAuth2Proxy::fetch_access_token`]
    #[cfg(feature = "async")]
    pub async fn fetch_access_token_async(&self, code: &str, verifier: &str) -> Result<OAuth2TokenState> {
        let mut call = self.token_call(authorization_code_params(&self.settings, code, verifier));
        let response = call.invoke_async(&tokio_util::sync::CancellationToken::new()).await?;
        self.apply_grant(&response.payload, None)
    }

    /// Async [`OAuth2Proxy::refresh_access_token`]
    #[cfg(feature = "async")]
    pub async fn refresh_access_token_async(&self) -> Result<OAuth2TokenState> {
        let (refresh_token, fields) = self.refresh_fields()?;
        let mut call = self.token_call(fields);
        let response = call.invoke_async(&tokio_util::sync::CancellationToken::new()).await?;
        self.apply_grant(&response.payload, Some(refresh_token))
    }
}

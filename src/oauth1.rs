//! OAuth 1.0a: request signing and the request-token / access-token steps.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use reqwest::Method;
use url::form_urlencoded;

use crate::call::Call;
use crate::client::Config;
use crate::error::{RestError, Result};
use crate::proxy::{CallHook, Proxy};
use crate::signer::{self, percent_encode, SignatureMethod};

/// Represents `oauth_callback`.
pub const OAUTH_CALLBACK_KEY: &str = "oauth_callback";
/// Represents `oauth_nonce`.
pub const OAUTH_NONCE_KEY: &str = "oauth_nonce";
/// Represents `oauth_timestamp`.
pub const OAUTH_TIMESTAMP_KEY: &str = "oauth_timestamp";
/// Represents `oauth_verifier`.
pub const OAUTH_VERIFIER_KEY: &str = "oauth_verifier";
/// Represents `oauth_version`.
pub const OAUTH_VERSION_KEY: &str = "oauth_version";
pub const OAUTH_SIGNATURE_KEY: &str = "oauth_signature";

const OAUTH_KEY_PREFIX: &str = "oauth_";
const OAUTH_SIGNATURE_METHOD_KEY: &str = "oauth_signature_method";
const OAUTH_CONSUMER_KEY: &str = "oauth_consumer_key";
const OAUTH_TOKEN_KEY: &str = "oauth_token";
const OAUTH_TOKEN_SECRET_KEY: &str = "oauth_token_secret";
const OAUTH_CALLBACK_CONFIRMED_KEY: &str = "oauth_callback_confirmed";

const REDACTED: &str = "<redacted>";

/// Short form of a token for logs: the first four characters only
fn redact(token: &str) -> String {
    match token.char_indices().nth(4) {
        Some((end, _)) if token.chars().count() > 8 => format!("{}...", &token[..end]),
        _ => REDACTED.to_string(),
    }
}

/// `realm` is an RFC 2617 quoted-string, not a percent-encoded value
fn quote_realm(realm: &str) -> String {
    realm.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Consumer and token credentials
#[derive(Clone, Default)]
pub struct OAuth1Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub token: Option<String>,
    pub token_secret: Option<String>,
    pub method: SignatureMethod,
}

impl OAuth1Credentials {
    /// Consumer credentials without a token, signed with HMAC-SHA1
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        OAuth1Credentials {
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            ..OAuth1Credentials::default()
        }
    }

    /// Set the token and its secret
    pub fn with_token(mut self, token: impl Into<String>, token_secret: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self.token_secret = Some(token_secret.into());
        self
    }

    /// Set the signature method
    pub fn with_method(mut self, method: SignatureMethod) -> Self {
        self.method = method;
        self
    }
}

// Implement Debug manually to avoid exposing the secrets
impl std::fmt::Debug for OAuth1Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth1Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("token", &self.token.as_deref().map(redact))
            .field("token_secret", &self.token_secret.as_ref().map(|_| "<redacted>"))
            .field("method", &self.method)
            .finish()
    }
}

/// Where the OAuth protocol parameters travel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SignaturePlacement {
    /// As ordinary request parameters (query string or body)
    #[default]
    Params,
    /// In an `Authorization: OAuth ...` header
    Header { realm: Option<String> },
}

/// Parsed token endpoint response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenResponse {
    pub oauth_token: String,
    pub oauth_token_secret: String,
    /// Other fields of the response
    pub remain: HashMap<String, String>,
}

/// Parse an `application/x-www-form-urlencoded` token response
pub fn read_oauth_token(body: &[u8]) -> Result<TokenResponse> {
    let mut fields: HashMap<String, String> = form_urlencoded::parse(body).into_owned().collect();

    let oauth_token = fields.remove(OAUTH_TOKEN_KEY);
    let oauth_token_secret = fields.remove(OAUTH_TOKEN_SECRET_KEY);
    match (oauth_token, oauth_token_secret) {
        (Some(oauth_token), Some(oauth_token_secret)) => Ok(TokenResponse {
            oauth_token,
            oauth_token_secret,
            remain: fields,
        }),
        (None, _) => Err(RestError::InvalidResponse(format!(
            "{} not found in token response",
            OAUTH_TOKEN_KEY
        ))),
        (_, None) => Err(RestError::InvalidResponse(format!(
            "{} not found in token response",
            OAUTH_TOKEN_SECRET_KEY
        ))),
    }
}

/// Call hook adding the OAuth control parameters and `oauth_signature`
pub struct OAuth1Signer {
    credentials: RwLock<OAuth1Credentials>,
    placement: SignaturePlacement,
    signature_host: Option<String>,
    oauth10a: AtomicBool,
    debug: bool,
}

impl OAuth1Signer {
    /// Signer placing the OAuth parameters with the request parameters
    pub fn new(credentials: OAuth1Credentials) -> Self {
        OAuth1Signer {
            credentials: RwLock::new(credentials),
            placement: SignaturePlacement::default(),
            signature_host: None,
            oauth10a: AtomicBool::new(false),
            debug: false,
        }
    }

    /// Choose where the OAuth parameters travel
    pub fn with_placement(mut self, placement: SignaturePlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Sign as if the request went to this host (`name` or `name:port`)
    pub fn with_signature_host(mut self, host: impl Into<String>) -> Self {
        self.signature_host = Some(host.into());
        self
    }

    /// Snapshot of the current credentials
    pub fn credentials(&self) -> OAuth1Credentials {
        self.credentials.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the token and its secret
    pub fn set_token(&self, token: Option<String>, token_secret: Option<String>) {
        let mut credentials = self.credentials.write().unwrap_or_else(|e| e.into_inner());
        credentials.token = token;
        credentials.token_secret = token_secret;
    }

    fn sign_call(&self, call: &mut Call) -> Result<()> {
        let credentials = self.credentials();
        if credentials.consumer_secret.is_empty() {
            return Err(RestError::Signing("consumer secret is not set".to_string()));
        }

        let params = call.params_mut();
        params.add_string(OAUTH_VERSION_KEY, "1.0");
        if params.get(OAUTH_TIMESTAMP_KEY).is_none() {
            params.add_string(OAUTH_TIMESTAMP_KEY, Utc::now().timestamp().to_string());
        }
        if params.get(OAUTH_NONCE_KEY).is_none() {
            params.add_string(OAUTH_NONCE_KEY, rand::random::<u32>().to_string());
        }
        params.add_string(OAUTH_CONSUMER_KEY, credentials.consumer_key.clone());
        params.add_string(OAUTH_SIGNATURE_METHOD_KEY, credentials.method.as_str());
        if let Some(ref token) = credentials.token {
            params.add_string(OAUTH_TOKEN_KEY, token.clone());
        }

        let url = call.resolve_url()?;
        let (base_url, query) = signer::normalize_url(&url, self.signature_host.as_deref())?;

        // multipart bodies are not part of the base string
        let all_strings = call.params().are_strings();
        let mut signed: Vec<(&str, &str)> = call
            .params()
            .string_pairs()
            .into_iter()
            .filter(|(k, _)| all_strings || k.starts_with(OAUTH_KEY_PREFIX))
            .collect();
        signed.extend(query.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let base = signer::signature_base_string(call.method().as_str(), &base_url, signed.iter().copied());
        let signature = signer::sign(
            credentials.method,
            &base,
            &credentials.consumer_secret,
            credentials.token_secret.as_deref(),
        )?;

        if self.debug {
            let masked = signed
                .iter()
                .map(|&(k, v)| if k == OAUTH_TOKEN_KEY { (k, REDACTED) } else { (k, v) });
            let shown = signer::signature_base_string(call.method().as_str(), &base_url, masked);
            tracing::debug!(target: "restproxy::oauth", base_string = %shown, "signed OAuth1 call");
        }

        call.add_param(OAUTH_SIGNATURE_KEY, signature);

        if let SignaturePlacement::Header { ref realm } = self.placement {
            let oauth = call
                .params_mut()
                .drain_where(|p| p.is_string() && p.name().starts_with(OAUTH_KEY_PREFIX));
            let mut fields: Vec<String> = Vec::new();
            if let Some(realm) = realm {
                fields.push(format!("realm=\"{}\"", quote_realm(realm)));
            }
            for param in &oauth {
                fields.push(format!(
                    "{}=\"{}\"",
                    percent_encode(param.name()),
                    percent_encode(param.as_str().unwrap_or_default())
                ));
            }
            call.add_header("Authorization", format!("OAuth {}", fields.join(", ")));
        }

        Ok(())
    }
}

impl CallHook for OAuth1Signer {
    fn prepare(&self, call: &mut Call) -> Result<()> {
        self.sign_call(call)
    }
}

/// Proxy whose calls are signed with OAuth 1.0a
#[derive(Debug, Clone)]
pub struct OAuth1Proxy {
    proxy: Proxy,
    signer: Arc<OAuth1Signer>,
}

impl std::fmt::Debug for OAuth1Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth1Signer")
            .field("credentials", &self.credentials())
            .field("placement", &self.placement)
            .field("signature_host", &self.signature_host)
            .finish()
    }
}

impl OAuth1Proxy {
    /// Create a proxy signing with the consumer credentials only
    pub fn new(config: Config, consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        OAuth1Proxy::with_signer(config, OAuth1Signer::new(OAuth1Credentials::new(consumer_key, consumer_secret)))
    }

    /// Create a proxy from a configured signer
    pub fn with_signer(config: Config, mut signer: OAuth1Signer) -> Self {
        signer.debug = config.debug.oauth;
        let signer = Arc::new(signer);
        let proxy = Proxy::with_hook(config, signer.clone());
        OAuth1Proxy { proxy, signer }
    }

    /// Underlying proxy
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// New call signed by this proxy
    pub fn new_call(&self) -> Call {
        self.proxy.new_call()
    }

    /// Snapshot of the signer credentials
    pub fn credentials(&self) -> OAuth1Credentials {
        self.signer.credentials()
    }

    /// Current token, if any
    pub fn token(&self) -> Option<String> {
        self.signer.credentials().token
    }

    /// Current token secret, if any
    pub fn token_secret(&self) -> Option<String> {
        self.signer.credentials().token_secret
    }

    /// Set the token and secret used for signing
    pub fn set_token(&self, token: impl Into<String>, token_secret: impl Into<String>) {
        self.signer.set_token(Some(token.into()), Some(token_secret.into()));
    }

    /// True once the server confirmed the callback (OAuth 1.0a)
    pub fn is_oauth10a(&self) -> bool {
        self.signer.oauth10a.load(Ordering::Relaxed)
    }

    /// URL the user visits to authorize the current request token
    pub fn authorization_url(&self, endpoint: &str) -> Result<String> {
        let token = self
            .token()
            .ok_or_else(|| RestError::Signing("no request token has been obtained".to_string()))?;
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        Ok(format!("{}{}{}={}", endpoint, separator, OAUTH_TOKEN_KEY, percent_encode(&token)))
    }

    fn request_token_call(&self, function: &str, callback: Option<&str>) -> Call {
        let mut call = self.new_call();
        call.set_method(Method::POST);
        call.set_function(function);
        if let Some(callback) = callback {
            call.add_param(OAUTH_CALLBACK_KEY, callback);
        }
        call
    }

    fn access_token_call(&self, function: &str, verifier: Option<&str>) -> Call {
        let mut call = self.new_call();
        call.set_method(Method::POST);
        call.set_function(function);
        if let Some(verifier) = verifier {
            call.add_param(OAUTH_VERIFIER_KEY, verifier);
        }
        call
    }

    /// Store the token from a token endpoint response
    fn apply_token_response(&self, body: &[u8]) -> Result<TokenResponse> {
        let response = read_oauth_token(body)?;
        if response.remain.get(OAUTH_CALLBACK_CONFIRMED_KEY).map(String::as_str) == Some("true") {
            self.signer.oauth10a.store(true, Ordering::Relaxed);
        }
        self.signer.set_token(
            Some(response.oauth_token.clone()),
            Some(response.oauth_token_secret.clone()),
        );
        if self.signer.debug {
            tracing::debug!(
                target: "restproxy::oauth",
                token = %redact(&response.oauth_token),
                "stored OAuth1 token"
            );
        }
        Ok(response)
    }

    /// Step 1: obtain a request token from `function`
    #[cfg(feature = "blocking")]
    pub fn request_token(&self, function: &str, callback: Option<&str>) -> Result<TokenResponse> {
        let mut call = self.request_token_call(function, callback);
        let response = call.invoke()?;
        self.apply_token_response(&response.payload)
    }

    /// Step 2: exchange the authorized request token (and verifier) for an access token
    #[cfg(feature = "blocking")]
    pub fn access_token(&self, function: &str, verifier: Option<&str>) -> Result<TokenResponse> {
        let mut call = self.access_token_call(function, verifier);
        let response = call.invoke()?;
        self.apply_token_response(&response.payload)
    }

    /// Async [`OAuth1Proxy::request_token`]
    #[cfg(feature = "async")]
    pub async fn request_token_async(&self, function: &str, callback: Option<&str>) -> Result<TokenResponse> {
        let mut call = self.request_token_call(function, callback);
        let response = call.invoke_async(&tokio_util::sync::CancellationToken::new()).await?;
        self.apply_token_response(&response.payload)
    }

    /// Async [`OAuth1Proxy::access_token`]
    #[cfg(feature = "async")]
    pub async fn access_token_async(&self, function: &str, verifier: Option<&str>) -> Result<TokenResponse> {
        let mut call = self.access_token_call(function, verifier);
        let response = call.invoke_async(&tokio_util::sync::CancellationToken::new()).await?;
        self.apply_token_response(&response.payload)
    }
}

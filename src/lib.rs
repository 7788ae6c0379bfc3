//! # restproxy - REST client proxies with OAuth1 and OAuth2 signing
//!
//! Build calls against a configured REST endpoint, sign them with OAuth 1.0a
//! or attach OAuth2 bearer tokens, and send them synchronously or on tokio.
//!
//! ## Features
//!
//! - Proxies with URL templates bound at runtime (`https://%s.example.com/`)
//! - Form, query or multipart encoding chosen from the call parameters
//! - OAuth 1.0a HMAC-SHA1 / PLAINTEXT signing and the request/access token steps
//! - OAuth2 authorization code grant with PKCE, refresh and expiry checks
//! - Blocking calls, async calls with cancellation, streamed downloads and
//!   uploads with progress
//! - JSON path access and a simple XML node tree on responses
//!
//! ## Basic Usage
//!
//! ```no_run
//! use restproxy::{Config, Proxy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let proxy = Proxy::new(Config::new("https://api.example.com/v1"));
//!
//!     let mut call = proxy.new_call();
//!     call.set_function("users");
//!     call.add_param("id", "123");
//!
//!     let response = call.invoke()?;
//!     println!("name: {:?}", response.get_string("user/name"));
//!     Ok(())
//! }
//! ```
//!
//! ## OAuth2
//!
//! ```no_run
//! use restproxy::{Config, OAuth2Proxy, OAuth2Settings, PkceCodeChallenge};
//!
//! let proxy = OAuth2Proxy::new(
//!     Config::new("https://api.example.com/"),
//!     OAuth2Settings::new(
//!         "https://auth.example.com/authorize",
//!         "https://auth.example.com/token",
//!         "https://app.example.com/callback",
//!         "client-id",
//!         "client-secret",
//!     ),
//! );
//!
//! let pkce = PkceCodeChallenge::new_random();
//! let (url, state) = proxy.build_authorization_url(&pkce, Some("read"), true);
//! // send the user to `url`, check `state` on redirect, then:
//! proxy.fetch_access_token("code-from-redirect", pkce.verifier())?;
//!
//! let mut call = proxy.new_call();
//! call.set_function("me");
//! call.invoke()?;
//! # Ok::<(), restproxy::RestError>(())
//! ```
//!
//! ## OAuth1
//!
//! ```no_run
//! use restproxy::{Config, OAuth1Proxy};
//!
//! let proxy = OAuth1Proxy::new(Config::new("https://api.example.com/"), "consumer-key", "consumer-secret");
//! proxy.request_token("oauth/request_token", Some("https://app.example.com/callback"))?;
//! let authorize = proxy.authorization_url("https://api.example.com/oauth/authorize")?;
//! // after the user approved `authorize`:
//! proxy.access_token("oauth/access_token", Some("verifier"))?;
//! # Ok::<(), restproxy::RestError>(())
//! ```

pub mod call;
pub mod client;
pub mod error;
pub mod oauth1;
pub mod oauth2;
pub mod params;
pub mod pkce;
pub mod proxy;
pub mod response;
pub mod serializer;
pub mod signer;
pub mod transport;
pub mod xml;

// Re-export main types for convenience
#[cfg(feature = "async")]
pub use call::CallHandle;
pub use call::{Call, CallState, PreparedRequest, UploadProgressFn};
pub use client::{Config, DebugFlags};
pub use error::{RestError, Result, TransportErrorKind};
pub use oauth1::{OAuth1Credentials, OAuth1Proxy, OAuth1Signer, SignaturePlacement, TokenResponse};
pub use oauth2::{OAuth2Proxy, OAuth2Settings, OAuth2TokenState, TokenStatus, TokenStore};
pub use params::{Param, ParamValue, Params};
pub use pkce::PkceCodeChallenge;
pub use proxy::{CallHook, Proxy};
pub use response::Response;
pub use serializer::Payload;
pub use signer::SignatureMethod;
pub use xml::XmlNode;

pub use reqwest::Method;
#[cfg(feature = "async")]
pub use tokio_util::sync::CancellationToken;

//! OAuth 1.0 signature computation (RFC 5849 section 3.4).
//!
//! These functions are pure: the caller supplies every control parameter
//! (`oauth_nonce`, `oauth_timestamp`, ...) and gets back the exact base string
//! and signature a server will recompute.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use url::Url;

use crate::error::{RestError, Result};

/// Everything except the RFC 3986 unreserved characters gets encoded.
pub const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Signature method advertised in `oauth_signature_method`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureMethod {
    #[default]
    HmacSha1,
    Plaintext,
}

impl SignatureMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureMethod::HmacSha1 => "HMAC-SHA1",
            SignatureMethod::Plaintext => "PLAINTEXT",
        }
    }
}

/// Percent-encode a string per RFC 3986 (`&`, `=`, `+`, space... all encoded)
pub fn percent_encode(s: &str) -> String {
    utf8_percent_encode(s, UNRESERVED).to_string()
}

/// Normalize a request URL for the base string.
///
/// Scheme and host are lowercased and default ports dropped by the URL
/// parser. Query and fragment are stripped; query pairs are returned so they
/// can be signed as parameters. `signature_host` replaces the host, and
/// the port too when written as `host:port`.
pub fn normalize_url(url: &str, signature_host: Option<&str>) -> Result<(String, Vec<(String, String)>)> {
    let mut parsed = Url::parse(url)?;

    let query: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    parsed.set_query(None);
    parsed.set_fragment(None);

    if let Some(host) = signature_host {
        let (name, port) = split_host_port(host);
        parsed.set_host(Some(name))?;
        if let Some(port) = port {
            parsed
                .set_port(Some(port))
                .map_err(|_| RestError::Signing(format!("cannot set port on {}", parsed)))?;
        }
    }

    Ok((parsed.to_string(), query))
}

/// Split `host:port`; `[v6]:port` is accepted, a bare IPv6 address is not split
fn split_host_port(host: &str) -> (&str, Option<u16>) {
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') || name.ends_with(']') => match port.parse() {
            Ok(port) => (name, Some(port)),
            Err(_) => (host, None),
        },
        _ => (host, None),
    }
}

/// Encode, sort and join parameters as `name=value&name=value`.
///
/// Sorting happens on the encoded names, ties broken by encoded value, both
/// compared byte-wise.
pub fn encoded_params<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build `METHOD&encoded(url)&encoded(params)`
pub fn signature_base_string<'a, I>(method: &str, url: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    format!(
        "{}&{}&{}",
        method.to_ascii_uppercase(),
        percent_encode(url),
        percent_encode(&encoded_params(params))
    )
}

/// Compute the `oauth_signature` value for a base string
pub fn sign(
    method: SignatureMethod,
    base_string: &str,
    consumer_secret: &str,
    token_secret: Option<&str>,
) -> Result<String> {
    if consumer_secret.is_empty() {
        return Err(RestError::Signing("consumer secret is not set".to_string()));
    }
    let token_secret = token_secret.unwrap_or("");

    match method {
        SignatureMethod::HmacSha1 => {
            let key = format!(
                "{}&{}",
                percent_encode(consumer_secret),
                percent_encode(token_secret)
            );
            let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes())
                .map_err(|e| RestError::Signing(e.to_string()))?;
            mac.update(base_string.as_bytes());
            Ok(STANDARD.encode(mac.finalize().into_bytes()))
        }
        SignatureMethod::Plaintext => Ok(format!("{}&{}", consumer_secret, token_secret)),
    }
}

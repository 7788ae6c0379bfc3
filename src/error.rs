use thiserror::Error;

/// Stable classification of transport failures reported by the HTTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection could not be established (DNS, refused, TLS handshake)
    Connect,
    /// Request or connect timeout elapsed
    Timeout,
    /// Redirect policy failure
    Redirect,
    /// Error while sending the request
    Request,
    /// Error while reading or writing a body
    Body,
    /// Response could not be decoded
    Decode,
    /// Anything else, including client construction failures
    Other,
}

impl TransportErrorKind {
    /// Classify a reqwest error
    pub fn of(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_redirect() {
            TransportErrorKind::Redirect
        } else if err.is_body() {
            TransportErrorKind::Body
        } else if err.is_decode() {
            TransportErrorKind::Decode
        } else if err.is_request() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        }
    }
}

/// Main error type for proxy and call operations
#[derive(Debug, Error)]
pub enum RestError {
    /// Signature could not be computed (missing consumer secret)
    #[error("signing failed: {0}")]
    Signing(String),

    /// Token endpoint response lacked required fields or could not be parsed
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Token endpoint returned no body at all
    #[error("empty response payload")]
    EmptyPayload,

    #[error("no refresh token available")]
    NoRefreshToken,

    #[error("access token has expired")]
    AccessTokenExpired,

    /// Connection, resolution, TLS or IO failure from the HTTP client
    #[error("transport error ({kind:?}): {source}")]
    Transport {
        kind: TransportErrorKind,
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx HTTP status
    #[error("HTTP error {status} {reason}")]
    Http {
        status: u16,
        reason: String,
        body: String,
    },

    #[error("call cancelled")]
    Cancelled,

    /// Proxy URL template was not (or wrongly) bound
    #[error("binding error: {0}")]
    Binding(String),

    /// A call instance was invoked more than once
    #[error("call has already been invoked")]
    CallReused,

    /// Request building error
    #[error("failed to build request: {0}")]
    RequestBuild(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// XML parsing error
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for RestError {
    fn from(source: reqwest::Error) -> Self {
        RestError::Transport {
            kind: TransportErrorKind::of(&source),
            source,
        }
    }
}

impl RestError {
    /// Create a new HTTP status error
    pub fn http(status: u16, reason: impl Into<String>, body: impl Into<String>) -> Self {
        RestError::Http {
            status,
            reason: reason.into(),
            body: body.into(),
        }
    }

    /// Get the HTTP status code if this is a status error
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Get the transport sub-kind if this is a transport error
    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            RestError::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RestError::Cancelled)
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, RestError::Transport { .. })
    }
}

/// Result type for proxy and call operations
pub type Result<T> = std::result::Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_status() {
        let error = RestError::http(404, "Not Found", "missing");
        assert_eq!(error.status_code(), Some(404));
        assert_eq!(error.to_string(), "HTTP error 404 Not Found");
        assert!(!error.is_transport());
    }

    #[test]
    fn test_non_http_error_has_no_status() {
        assert_eq!(RestError::NoRefreshToken.status_code(), None);
        assert_eq!(RestError::AccessTokenExpired.transport_kind(), None);
        assert!(RestError::Cancelled.is_cancelled());
    }
}

//! Single-use HTTP exchanges built from a [`Proxy`].
//!
//! A call moves through `Unprepared -> Prepared -> InFlight` and ends in
//! `Completed`, `Failed` or `Cancelled`. Preparation (the proxy hook and
//! serialization) never touches the network, so signing and validation errors
//! are returned before anything is sent.

use std::sync::Arc;
#[cfg(any(feature = "blocking", feature = "async"))]
use std::time::Instant;

use reqwest::Method;
#[cfg(feature = "async")]
use tokio::task::JoinHandle;
#[cfg(feature = "async")]
use tokio_util::sync::CancellationToken;

use crate::error::{RestError, Result};
use crate::params::{Param, Params};
use crate::proxy::Proxy;
use crate::response::Response;
use crate::serializer::{self, Payload};
use crate::xml::XmlNode;

const CONTENT_TYPE: &str = "Content-Type";

/// URL without its query string, which may carry tokens
#[cfg(any(feature = "blocking", feature = "async"))]
fn without_query(url: &str) -> &str {
    url.split_once('?').map_or(url, |(path, _)| path)
}

/// Upload progress callback, receives `(bytes_sent, bytes_total)`
pub type UploadProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Lifecycle of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Unprepared,
    Prepared,
    InFlight,
    Completed,
    Failed,
    Cancelled,
}

/// Transport-neutral request produced by preparing a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: Method,
    /// Final URL, including the query string for body-less methods
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub payload: Option<Payload>,
}

impl PreparedRequest {
    /// Get a header value (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One request/response exchange against a proxy
#[derive(Debug)]
pub struct Call {
    proxy: Proxy,
    method: Method,
    function: Option<String>,
    headers: Vec<(String, String)>,
    params: Params,
    state: CallState,
    prepared: Option<PreparedRequest>,
    response: Option<Response>,
}

impl Call {
    pub(crate) fn new(proxy: Proxy) -> Self {
        Call {
            proxy,
            method: Method::GET,
            function: None,
            headers: Vec::new(),
            params: Params::new(),
            state: CallState::Unprepared,
            prepared: None,
            response: None,
        }
    }

    /// Proxy this call was created from
    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Set the HTTP method (`GET` by default)
    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// HTTP method
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Set the REST path appended to the proxy URL
    pub fn set_function(&mut self, function: impl Into<String>) {
        self.function = Some(function.into());
    }

    /// REST path, if set
    pub fn function(&self) -> Option<&str> {
        self.function.as_deref()
    }

    /// Add a request header, replacing one with the same name
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(existing) => *existing = (name, value),
            None => self.headers.push((name, value)),
        }
    }

    /// Get a request header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Remove a request header (case-insensitive)
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Request headers in insertion order
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Add a string parameter; an existing parameter of that name is replaced
    pub fn add_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.add_string(name, value);
    }

    /// Add any parameter (string or binary), replacing by name
    pub fn add_param_full(&mut self, param: Param) {
        self.params.add(param);
    }

    /// Add several string parameters at once
    pub fn add_params<I, K, V>(&mut self, params: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in params {
            self.params.add_string(name, value);
        }
    }

    /// Get a parameter by name
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    /// Remove a parameter, returning it
    pub fn remove_param(&mut self, name: &str) -> Option<Param> {
        self.params.remove(name)
    }

    /// All parameters in order
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Mutable access to the parameters, used by hooks
    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    /// Current lifecycle state
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Proxy URL joined with the function path
    pub fn resolve_url(&self) -> Result<String> {
        Ok(serializer::join_url(&self.proxy.url()?, self.function.as_deref()))
    }

    /// Final request URL, available once the call is prepared
    pub fn url(&self) -> Option<&str> {
        self.prepared.as_ref().map(|p| p.url.as_str())
    }

    /// Received response, once completed or failed with a status
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// HTTP status of the received response
    pub fn status_code(&self) -> Option<u16> {
        self.response.as_ref().map(|r| r.status)
    }

    /// Reason phrase of the received response, see [`Response::reason`]
    pub fn status_message(&self) -> Option<&str> {
        self.response.as_ref().map(|r| r.reason.as_str())
    }

    /// Get a response header (case-insensitive)
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response.as_ref().and_then(|r| r.header(name))
    }

    /// Raw response body
    pub fn payload(&self) -> Option<&[u8]> {
        self.response.as_ref().map(|r| r.payload.as_ref())
    }

    /// Parse the received payload as XML, tracing the parser when the
    /// proxy has XML debugging enabled
    pub fn xml(&self) -> Result<XmlNode> {
        let response = self
            .response
            .as_ref()
            .ok_or_else(|| RestError::InvalidResponse("call has no response".to_string()))?;
        let text = std::str::from_utf8(&response.payload)
            .map_err(|e| RestError::InvalidResponse(format!("XML payload is not UTF-8: {}", e)))?;
        XmlNode::parse_traced(text, self.proxy.debug().xml)
    }

    /// Run the proxy hook and serialize the call without sending it.
    ///
    /// Preparing twice returns the same request; preparing a call that has
    /// already been sent fails with [`RestError::CallReused`].
    pub fn prepare(&mut self) -> Result<&PreparedRequest> {
        match self.state {
            CallState::Unprepared => {}
            CallState::Prepared if self.prepared.is_some() => {
                return self.prepared.as_ref().ok_or(RestError::CallReused);
            }
            CallState::Prepared => {}
            state => {
                tracing::warn!(target: "restproxy::call", ?state, "call has already been invoked");
                return Err(RestError::CallReused);
            }
        }

        match self.build_request() {
            Ok(request) => {
                self.state = CallState::Prepared;
                Ok(&*self.prepared.insert(request))
            }
            Err(err) => {
                self.state = CallState::Failed;
                Err(err)
            }
        }
    }

    fn build_request(&mut self) -> Result<PreparedRequest> {
        let hook = self.proxy.hook();
        if let Some(ref hook) = hook {
            hook.prepare(self)?;
        }
        let custom = match hook {
            Some(ref hook) => hook.serialize(self)?,
            None => None,
        };

        let base = self.resolve_url()?;
        let (url, payload) = match custom {
            Some(payload) => (base, Some(payload)),
            None => serializer::serialize(&self.method, &base, &self.params)?,
        };

        // the payload decides the body type; caller and hook values are dropped
        let mut headers = self.headers.clone();
        if let Some(ref payload) = payload {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case(CONTENT_TYPE));
            headers.push((CONTENT_TYPE.to_string(), payload.content_type.clone()));
        }

        Ok(PreparedRequest {
            method: self.method.clone(),
            url,
            headers,
            payload,
        })
    }

    /// Prepare if needed and move to `InFlight`
    #[cfg(any(feature = "blocking", feature = "async"))]
    fn begin(&mut self) -> Result<PreparedRequest> {
        let request = self.prepare()?.clone();
        self.state = CallState::InFlight;
        Ok(request)
    }

    /// Record the transport outcome and map the status to success or error
    #[cfg(any(feature = "blocking", feature = "async"))]
    fn finish(&mut self, request: &PreparedRequest, started: Instant, result: Result<Response>) -> Result<&Response> {
        if self.proxy.debug().calls {
            match result {
                Ok(ref response) => tracing::debug!(
                    target: "restproxy::call",
                    method = %request.method,
                    url = without_query(&request.url),
                    status = response.status,
                    elapsed = ?started.elapsed(),
                    "call completed"
                ),
                Err(ref err) => tracing::debug!(
                    target: "restproxy::call",
                    method = %request.method,
                    url = without_query(&request.url),
                    error = %err,
                    "call failed"
                ),
            }
        }

        match result {
            Ok(response) => {
                let status = response.error_for_status();
                let response = self.response.insert(response);
                match status {
                    Ok(()) => {
                        self.state = CallState::Completed;
                        Ok(&*response)
                    }
                    Err(err) => {
                        self.state = CallState::Failed;
                        Err(err)
                    }
                }
            }
            Err(RestError::Cancelled) => {
                self.state = CallState::Cancelled;
                Err(RestError::Cancelled)
            }
            Err(err) => {
                self.state = CallState::Failed;
                Err(err)
            }
        }
    }

    /// Send the call, blocking the current thread until the response is read.
    ///
    /// Must not be called from within an async runtime.
    #[cfg(feature = "blocking")]
    pub fn invoke(&mut self) -> Result<&Response> {
        let request = self.begin()?;
        let started = Instant::now();
        let result = self
            .proxy
            .blocking_client()
            .and_then(|client| crate::transport::send_blocking(&client, &request));
        self.finish(&request, started, result)
    }

    /// Send the call asynchronously. Cancelling `cancel` aborts the request
    /// and the call ends in `Cancelled`.
    #[cfg(feature = "async")]
    pub async fn invoke_async(&mut self, cancel: &CancellationToken) -> Result<&Response> {
        let request = self.begin()?;
        let started = Instant::now();
        let timeout = self.proxy.config().timeout;
        let result = match self.proxy.async_client() {
            Ok(client) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RestError::Cancelled),
                result = crate::transport::send_async(&client, &request, timeout) => result,
            },
            Err(err) => Err(err),
        };
        self.finish(&request, started, result)
    }

    /// Send the call and stream the response body to `on_chunk` without
    /// accumulating it; the stored response has an empty payload.
    #[cfg(feature = "async")]
    pub async fn invoke_continuous<F>(&mut self, cancel: &CancellationToken, on_chunk: F) -> Result<&Response>
    where
        F: FnMut(&[u8]) + Send,
    {
        let request = self.begin()?;
        let started = Instant::now();
        let result = match self.proxy.async_client() {
            Ok(client) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RestError::Cancelled),
                result = crate::transport::send_streaming(&client, &request, on_chunk) => result,
            },
            Err(err) => Err(err),
        };
        self.finish(&request, started, result)
    }

    /// Send the call reporting upload progress for every body chunk written
    #[cfg(feature = "async")]
    pub async fn invoke_upload(&mut self, cancel: &CancellationToken, progress: UploadProgressFn) -> Result<&Response> {
        let request = self.begin()?;
        let started = Instant::now();
        let timeout = self.proxy.config().upload_timeout;
        let result = match self.proxy.async_client() {
            Ok(client) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RestError::Cancelled),
                result = crate::transport::send_upload(&client, &request, timeout, progress) => result,
            },
            Err(err) => Err(err),
        };
        self.finish(&request, started, result)
    }

    /// Run the call on the tokio runtime and hand it back to `callback`.
    ///
    /// The callback fires exactly once: with the outcome, or with
    /// [`RestError::Cancelled`] if the handle (or `owner`) is cancelled first.
    /// Passing an owner token ties the call to the owner's lifetime: keep
    /// `owner.clone().drop_guard()` in the owning object and the call is
    /// cancelled when it is dropped.
    #[cfg(feature = "async")]
    pub fn spawn<F>(mut self, owner: Option<&CancellationToken>, callback: F) -> CallHandle
    where
        F: FnOnce(Call, Result<()>) + Send + 'static,
    {
        let token = owner.map(CancellationToken::child_token).unwrap_or_default();
        let task_token = token.clone();
        let join = tokio::spawn(async move {
            let result = self.invoke_async(&task_token).await.map(|_| ());
            callback(self, result);
        });
        CallHandle { token, join }
    }
}

/// Handle to a spawned call
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct CallHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

#[cfg(feature = "async")]
impl CallHandle {
    /// Cancel the in-flight request; the callback still fires
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token cancelling this call
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// True once the callback has run
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait until the callback has run
    pub async fn join(self) -> Result<()> {
        match self.join.await {
            Ok(()) => Ok(()),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(RestError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Config;
    use crate::proxy::CallHook;

    struct JsonBody;

    impl CallHook for JsonBody {
        fn prepare(&self, call: &mut Call) -> Result<()> {
            call.add_header("X-Service", "json");
            Ok(())
        }

        fn serialize(&self, call: &mut Call) -> Result<Option<Payload>> {
            let method = call.function().unwrap_or_default().to_string();
            let args: serde_json::Map<String, serde_json::Value> = call
                .params()
                .string_pairs()
                .into_iter()
                .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
                .collect();
            call.set_function("rpc");
            Ok(Some(Payload::json(&serde_json::json!({ "method": method, "args": args }))?))
        }
    }

    #[test]
    fn test_prepare_get_query() {
        let proxy = Proxy::new(Config::new("https://api.example.com/v1"));
        let mut call = proxy.new_call();
        call.set_function("users");
        call.add_param("id", "1");
        call.add_param("id", "2");
        call.add_header("Accept", "application/json");

        let request = call.prepare().unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url, "https://api.example.com/v1/users?id=2");
        assert_eq!(request.header("accept"), Some("application/json"));
        assert!(request.payload.is_none());
        assert_eq!(call.state(), CallState::Prepared);
        assert_eq!(call.url(), Some("https://api.example.com/v1/users?id=2"));
    }

    #[test]
    fn test_prepare_twice_returns_same_request() {
        let proxy = Proxy::new(Config::new("https://api.example.com/"));
        let mut call = proxy.new_call();
        call.set_method(Method::POST);
        call.add_param("a", "b");
        let first = call.prepare().unwrap().clone();
        let second = call.prepare().unwrap().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unbound_proxy_fails_before_io() {
        let proxy = Proxy::new(Config::new("https://%s.example.com/"));
        let mut call = proxy.new_call();
        assert!(matches!(call.prepare().unwrap_err(), RestError::Binding(_)));
        assert_eq!(call.state(), CallState::Failed);
        assert!(matches!(call.prepare().unwrap_err(), RestError::CallReused));
    }

    #[test]
    fn test_custom_serializer_rewrites_function() {
        let proxy = Proxy::with_hook(Config::new("https://api.example.com"), Arc::new(JsonBody));
        let mut call = proxy.new_call();
        call.set_method(Method::POST);
        call.set_function("users.get");
        call.add_param("id", "7");

        let request = call.prepare().unwrap();
        assert_eq!(request.url, "https://api.example.com/rpc");
        assert_eq!(request.header("X-Service"), Some("json"));
        let payload = request.payload.as_ref().unwrap();
        assert_eq!(payload.content_type, "application/json");
        let body: serde_json::Value = serde_json::from_slice(&payload.body).unwrap();
        assert_eq!(body["method"], "users.get");
        assert_eq!(body["args"]["id"], "7");
    }

    struct JsonHeader;

    impl CallHook for JsonHeader {
        fn prepare(&self, call: &mut Call) -> Result<()> {
            call.add_header("content-type", "application/json");
            Ok(())
        }
    }

    #[test]
    fn test_payload_content_type_wins() {
        let proxy = Proxy::with_hook(Config::new("https://api.example.com/"), Arc::new(JsonHeader));
        let mut call = proxy.new_call();
        call.set_method(Method::POST);
        call.add_header("Content-Type", "text/plain");
        call.add_param("a", "b");

        let request = call.prepare().unwrap();
        let content_types: Vec<&str> = request
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(content_types, vec!["application/x-www-form-urlencoded"]);
        assert_eq!(call.header("content-type"), Some("application/json"));
    }

    #[test]
    fn test_content_type_kept_without_payload() {
        let proxy = Proxy::new(Config::new("https://api.example.com/"));
        let mut call = proxy.new_call();
        call.add_header("Content-Type", "text/plain");
        let request = call.prepare().unwrap();
        assert!(request.payload.is_none());
        assert_eq!(request.header("content-type"), Some("text/plain"));
    }

    #[cfg(any(feature = "blocking", feature = "async"))]
    #[test]
    fn test_without_query() {
        assert_eq!(
            without_query("https://api.example.com/photos?oauth_token=secret&size=1"),
            "https://api.example.com/photos"
        );
        assert_eq!(without_query("https://api.example.com/"), "https://api.example.com/");
    }

    #[test]
    fn test_header_replace_and_remove() {
        let proxy = Proxy::new(Config::new("https://api.example.com/"));
        let mut call = proxy.new_call();
        call.add_header("X-A", "1");
        call.add_header("x-a", "2");
        assert_eq!(call.headers().len(), 1);
        assert_eq!(call.header("X-A"), Some("2"));
        call.remove_header("X-a");
        assert!(call.header("x-a").is_none());
    }
}

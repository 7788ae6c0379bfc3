use std::sync::{Arc, RwLock};
#[cfg(any(feature = "blocking", feature = "async"))]
use std::sync::OnceLock;

use crate::call::Call;
use crate::client::{Config, DebugFlags};
use crate::error::{RestError, Result};
use crate::serializer::{bind_url, Payload};

/// Per-service hook run on every call before it is serialized.
///
/// The authentication schemes (OAuth1 signing, OAuth2 bearer tokens) are
/// implementations of this trait, selected when the proxy is built.
pub trait CallHook: Send + Sync {
    /// Inspect and mutate the call (params, headers) or reject it.
    fn prepare(&self, call: &mut Call) -> Result<()>;

    /// Replace the default parameter serialization.
    ///
    /// Returning `Ok(None)` keeps the form/multipart encoding. A custom body
    /// may also rewrite the call's function path before the URL is resolved.
    fn serialize(&self, _call: &mut Call) -> Result<Option<Payload>> {
        Ok(None)
    }
}

struct ProxyInner {
    config: Config,
    bound_url: RwLock<Option<String>>,
    hook: Option<Arc<dyn CallHook>>,
    #[cfg(feature = "blocking")]
    blocking_client: OnceLock<reqwest::blocking::Client>,
    #[cfg(feature = "async")]
    async_client: OnceLock<reqwest::Client>,
}

/// A configured endpoint and the factory for its calls.
///
/// Cloning is cheap and clones share the binding and HTTP clients.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    /// Create a proxy without any authentication hook
    pub fn new(config: Config) -> Self {
        Proxy::build(config, None)
    }

    /// Create a proxy whose calls all go through `hook`
    pub fn with_hook(config: Config, hook: Arc<dyn CallHook>) -> Self {
        Proxy::build(config, Some(hook))
    }

    fn build(config: Config, hook: Option<Arc<dyn CallHook>>) -> Self {
        Proxy {
            inner: Arc::new(ProxyInner {
                config,
                bound_url: RwLock::new(None),
                hook,
                #[cfg(feature = "blocking")]
                blocking_client: OnceLock::new(),
                #[cfg(feature = "async")]
                async_client: OnceLock::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn debug(&self) -> DebugFlags {
        self.inner.config.debug
    }

    /// True when calls need [`Proxy::bind`] first
    pub fn binding_required(&self) -> bool {
        self.inner.config.binding_required || self.inner.config.placeholder_count() > 0
    }

    /// Fill the URL template placeholders. May be called again to rebind.
    pub fn bind(&self, args: &[&str]) -> Result<()> {
        let url = bind_url(&self.inner.config.url_format, args)?;
        let mut bound = self.inner.bound_url.write().unwrap_or_else(|e| e.into_inner());
        *bound = Some(url);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.inner
            .bound_url
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Base URL of the proxy, failing if a required binding is missing
    pub fn url(&self) -> Result<String> {
        let bound = self.inner.bound_url.read().unwrap_or_else(|e| e.into_inner());
        match bound.as_ref() {
            Some(url) => Ok(url.clone()),
            None if self.binding_required() => Err(RestError::Binding(format!(
                "proxy URL {} has not been bound",
                self.inner.config.url_format
            ))),
            None => Ok(self.inner.config.url_format.clone()),
        }
    }

    /// Create a new single-use call against this proxy
    pub fn new_call(&self) -> Call {
        Call::new(self.clone())
    }

    pub(crate) fn hook(&self) -> Option<Arc<dyn CallHook>> {
        self.inner.hook.clone()
    }

    /// The blocking client is built on first use so that proxies can be
    /// created and dropped inside an async runtime.
    #[cfg(feature = "blocking")]
    pub(crate) fn blocking_client(&self) -> Result<reqwest::blocking::Client> {
        if let Some(client) = self.inner.blocking_client.get() {
            return Ok(client.clone());
        }
        let client = crate::client::create_blocking_client(&self.inner.config)?;
        Ok(self.inner.blocking_client.get_or_init(|| client).clone())
    }

    #[cfg(feature = "async")]
    pub(crate) fn async_client(&self) -> Result<reqwest::Client> {
        if let Some(client) = self.inner.async_client.get() {
            return Ok(client.clone());
        }
        let client = crate::client::create_async_client(&self.inner.config)?;
        Ok(self.inner.async_client.get_or_init(|| client).clone())
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("config", &self.inner.config)
            .field("bound", &self.is_bound())
            .field("hook", &self.inner.hook.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_proxy_url() {
        let proxy = Proxy::new(Config::new("https://api.example.com/"));
        assert!(!proxy.binding_required());
        assert_eq!(proxy.url().unwrap(), "https://api.example.com/");
    }

    #[test]
    fn test_binding() {
        let proxy = Proxy::new(Config::new("https://%s.example.com/"));
        assert!(proxy.binding_required());
        assert!(matches!(proxy.url().unwrap_err(), RestError::Binding(_)));

        proxy.bind(&["eu"]).unwrap();
        assert!(proxy.is_bound());
        assert_eq!(proxy.url().unwrap(), "https://eu.example.com/");

        // clones share the binding
        let clone = proxy.clone();
        clone.bind(&["us"]).unwrap();
        assert_eq!(proxy.url().unwrap(), "https://us.example.com/");

        assert!(proxy.bind(&["a", "b"]).is_err());
    }

    #[test]
    fn test_explicit_binding_required() {
        let proxy = Proxy::new(Config::new("https://api.example.com/").with_binding_required(true));
        assert!(proxy.url().is_err());
        proxy.bind(&[]).unwrap();
        assert_eq!(proxy.url().unwrap(), "https://api.example.com/");
    }
}

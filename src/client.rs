use std::time::Duration;

use crate::error::Result;

/// Logging categories, replacing process-wide debug switches.
///
/// Pass it through [`Config::with_debug`]; nothing in the crate reads the
/// environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    /// Trace every call: URL, status, timing
    pub calls: bool,
    /// Trace OAuth signing and token exchanges
    pub oauth: bool,
    /// Trace XML response parsing
    pub xml: bool,
}

impl DebugFlags {
    pub fn all() -> Self {
        DebugFlags {
            calls: true,
            oauth: true,
            xml: true,
        }
    }

    /// Parse a comma separated list such as `"calls,oauth"` or `"all"`.
    /// Unknown names are ignored.
    pub fn parse(list: &str) -> Self {
        let mut flags = DebugFlags::default();
        for name in list.split(',').map(str::trim) {
            match name {
                "all" => return DebugFlags::all(),
                "calls" | "proxy" => flags.calls = true,
                "oauth" => flags.oauth = true,
                "xml" | "xml-parser" => flags.xml = true,
                _ => {}
            }
        }
        flags
    }
}

/// Configuration of a proxy endpoint
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL, possibly holding `%s` placeholders filled by binding
    pub url_format: String,
    /// Calls fail until the proxy is bound, even without placeholders
    pub binding_required: bool,
    /// User-Agent header sent with every call
    pub user_agent: Option<String>,
    /// Total request timeout
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Total request timeout for uploads
    pub upload_timeout: Duration,
    /// Reject invalid TLS certificates
    pub ssl_strict: bool,
    pub debug: DebugFlags,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            url_format: String::new(),
            binding_required: false,
            user_agent: None,
            timeout: Duration::from_secs(300), // 5 minutes
            connect_timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(3600), // 1 hour
            ssl_strict: true,
            debug: DebugFlags::default(),
        }
    }
}

impl Config {
    /// Create a new configuration for the given base URL (or URL template)
    pub fn new(url_format: impl Into<String>) -> Self {
        Config {
            url_format: url_format.into(),
            ..Config::default()
        }
    }

    pub fn with_binding_required(mut self, required: bool) -> Self {
        self.binding_required = required;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn with_ssl_strict(mut self, strict: bool) -> Self {
        self.ssl_strict = strict;
        self
    }

    /// Set debug categories
    pub fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }

    /// Number of `%s` placeholders in the URL template
    pub fn placeholder_count(&self) -> usize {
        self.url_format.matches("%s").count()
    }
}

/// Create the blocking HTTP client for a proxy
/// with pooling and timeouts taken from the configuration
#[cfg(feature = "blocking")]
pub fn create_blocking_client(config: &Config) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::ClientBuilder::new()
        .pool_max_idle_per_host(50)
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .danger_accept_invalid_certs(!config.ssl_strict);
    if let Some(ref ua) = config.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    Ok(builder.build()?)
}

/// Create the async HTTP client for a proxy.
///
/// Async requests carry their own per-request timeout, so only the connect
/// timeout is set here; uploads use the longer upload timeout.
#[cfg(feature = "async")]
pub fn create_async_client(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(50)
        .connect_timeout(config.connect_timeout)
        .danger_accept_invalid_certs(!config.ssl_strict);
    if let Some(ref ua) = config.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    Ok(builder.build()?)
}

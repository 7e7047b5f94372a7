//! Handler configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tunnel_core::{CredentialsPolicy, Fetch, Headers, HttpRequestEnvelope, DEFAULT_TOOL_NAME};
use url::Url;

use crate::client::ReqwestFetch;
use crate::error::{ProxyError, Result};

pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub type DeriveHeaders = Arc<dyn Fn(&HttpRequestEnvelope) -> Headers + Send + Sync>;

/// Headers added to every outbound request before the caller's own.
#[derive(Clone)]
pub enum HeaderSource {
    Static(Headers),
    /// Computed per request from the incoming envelope.
    Derived(DeriveHeaders),
}

impl HeaderSource {
    pub fn derived<F>(derive: F) -> Self
    where
        F: Fn(&HttpRequestEnvelope) -> Headers + Send + Sync + 'static,
    {
        HeaderSource::Derived(Arc::new(derive))
    }

    pub fn resolve(&self, envelope: &HttpRequestEnvelope) -> Headers {
        match self {
            HeaderSource::Static(headers) => headers.clone(),
            HeaderSource::Derived(derive) => derive(envelope),
        }
    }
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderSource::Static(headers) => f.debug_tuple("Static").field(headers).finish(),
            HeaderSource::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

#[derive(Clone)]
pub struct ProxyConfig {
    /// Name the handler answers to when registered as a procedure.
    pub tool_name: String,
    /// Relative envelope URLs resolve against this; without it they are
    /// rejected.
    pub base_url: Option<Url>,
    /// `None` allows any origin. An empty list allows none.
    pub allowed_origins: Option<Vec<String>>,
    /// Path prefixes that may be proxied. An empty list allows none.
    pub allowed_paths: Vec<String>,
    pub headers: Option<HeaderSource>,
    /// Names stripped in addition to the built-in forbidden set. The
    /// built-in set is always applied.
    pub extra_forbidden_headers: Vec<String>,
    pub max_body_size: usize,
    /// Used when the envelope carries no `timeoutMs`.
    pub default_timeout: Duration,
    /// Used when the envelope carries no `credentials`.
    pub credentials: CredentialsPolicy,
    pub client: Arc<dyn Fetch>,
    pub verbose: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            tool_name: DEFAULT_TOOL_NAME.to_string(),
            base_url: None,
            allowed_origins: None,
            allowed_paths: vec!["/".to_string()],
            headers: None,
            extra_forbidden_headers: Vec::new(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            default_timeout: DEFAULT_TIMEOUT,
            credentials: CredentialsPolicy::SameOrigin,
            client: Arc::new(ReqwestFetch::new()),
            verbose: false,
        }
    }
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("tool_name", &self.tool_name)
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("allowed_origins", &self.allowed_origins)
            .field("allowed_paths", &self.allowed_paths)
            .field("headers", &self.headers)
            .field("extra_forbidden_headers", &self.extra_forbidden_headers)
            .field("max_body_size", &self.max_body_size)
            .field("default_timeout", &self.default_timeout)
            .field("credentials", &self.credentials)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl ProxyConfig {
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        let url = Url::parse(base_url).map_err(|e| ProxyError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        self.base_url = Some(url);
        Ok(self)
    }

    pub fn with_allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_origins = Some(origins.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_allowed_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_headers(mut self, headers: HeaderSource) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_extra_forbidden_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_forbidden_headers = names
            .into_iter()
            .map(|name| name.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_max_body_size(mut self, limit: usize) -> Self {
        self.max_body_size = limit;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialsPolicy) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_client(mut self, client: Arc<dyn Fetch>) -> Self {
        self.client = client;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

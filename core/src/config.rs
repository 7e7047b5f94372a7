//! Interceptor configuration.
//!
//! # Design
//! Every option has a default, so `TunnelConfig::default()` is a working
//! configuration: tunnel everything under `/` to `http_request`, fall back to
//! native HTTP when the host does not expose the procedure, no timeout.

use std::time::Duration;

use url::Url;

use crate::error::{Result, TunnelError};
use crate::policy::InterceptPolicy;
use crate::rpc::DEFAULT_TOOL_NAME;

/// Origin the sandboxed caller runs under when none is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost/";

#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Name of the remote HTTP procedure.
    pub tool_name: String,
    pub policy: InterceptPolicy,
    /// Go native (with a warning) instead of failing when tunnelling is
    /// wanted but the procedure is unavailable.
    pub fallback_to_native: bool,
    /// Applied when the caller sets no timeout of its own.
    pub default_timeout: Option<Duration>,
    /// Whether `install_*` helpers publish the interceptor process-wide.
    pub install_global: bool,
    /// Emits debug-level diagnostics for codec degradations.
    pub verbose: bool,
    /// URL relative requests resolve against; its origin is "same origin".
    pub base_url: Url,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            tool_name: DEFAULT_TOOL_NAME.to_string(),
            policy: InterceptPolicy::default(),
            fallback_to_native: true,
            default_timeout: None,
            install_global: true,
            verbose: false,
            base_url: default_base_url(),
        }
    }
}

/// [`DEFAULT_BASE_URL`] is a constant absolute URL, so parsing it cannot fail.
fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("DEFAULT_BASE_URL is a valid absolute URL")
}

impl TunnelConfig {
    pub fn with_tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    pub fn with_policy(mut self, policy: InterceptPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback_to_native = fallback;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    pub fn with_install_global(mut self, install: bool) -> Self {
        self.install_global = install;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = Url::parse(base_url).map_err(|e| TunnelError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TunnelConfig::default();
        assert_eq!(config.tool_name, "http_request");
        assert_eq!(config.policy.paths, vec!["/".to_string()]);
        assert!(!config.policy.allow_absolute_urls);
        assert!(config.fallback_to_native);
        assert!(config.default_timeout.is_none());
        assert_eq!(config.base_url.as_str(), DEFAULT_BASE_URL);
    }

    #[test]
    fn default_base_url_parses() {
        let url = Url::parse(DEFAULT_BASE_URL).unwrap();
        assert_eq!(url.origin().ascii_serialization(), "http://localhost");
        assert_eq!(default_base_url(), url);
    }

    #[test]
    fn zero_timeout_means_none() {
        let config = TunnelConfig::default().with_default_timeout(Duration::ZERO);
        assert!(config.default_timeout.is_none());
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = TunnelConfig::default().with_base_url("not a url").unwrap_err();
        assert!(matches!(err, TunnelError::InvalidUrl { .. }));
    }
}

//! Per-request decision: tunnel through the procedure or go native.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::error::{Result, TunnelError};
use crate::http::HttpMethod;

/// Caller-supplied decision function; overrides every built-in check.
pub type InterceptPredicate = Arc<dyn Fn(&InterceptTarget) -> bool + Send + Sync>;

/// Caller-supplied capability probe.
pub type CapabilityProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// A request URL resolved against the caller's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptTarget {
    pub url: Url,
    pub method: HttpMethod,
    pub cross_origin: bool,
}

impl InterceptTarget {
    /// Normalized path, always with a leading slash.
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// The URL placed in the envelope: path and query for same-origin
    /// targets, the full URL (minus fragment) for cross-origin ones.
    pub fn envelope_url(&self) -> String {
        if self.cross_origin {
            let mut url = self.url.clone();
            url.set_fragment(None);
            return url.to_string();
        }
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }
}

/// Resolves `raw` (absolute or relative) against `base`.
pub fn resolve_target(base: &Url, raw: &str, method: HttpMethod) -> Result<InterceptTarget> {
    let url = base.join(raw.trim()).map_err(|e| TunnelError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    let cross_origin = url.origin() != base.origin();
    Ok(InterceptTarget {
        url,
        method,
        cross_origin,
    })
}

/// Ensures a configured prefix starts with `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Prefix match of a normalized path. An empty prefix list matches nothing.
pub fn path_matches<S: AsRef<str>>(path: &str, prefixes: &[S]) -> bool {
    prefixes
        .iter()
        .any(|prefix| path.starts_with(&normalize_prefix(prefix.as_ref())))
}

/// Which requests get tunnelled.
#[derive(Clone)]
pub struct InterceptPolicy {
    /// Path prefixes to intercept; empty means intercept nothing.
    pub paths: Vec<String>,
    /// Whether cross-origin targets may be intercepted.
    pub allow_absolute_urls: bool,
    pub predicate: Option<InterceptPredicate>,
    /// Replaces the transport's own capability probe when set.
    pub capability_probe: Option<CapabilityProbe>,
}

impl Default for InterceptPolicy {
    fn default() -> Self {
        Self {
            paths: vec!["/".to_string()],
            allow_absolute_urls: false,
            predicate: None,
            capability_probe: None,
        }
    }
}

impl fmt::Debug for InterceptPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptPolicy")
            .field("paths", &self.paths)
            .field("allow_absolute_urls", &self.allow_absolute_urls)
            .field("predicate", &self.predicate.is_some())
            .field("capability_probe", &self.capability_probe.is_some())
            .finish()
    }
}

impl InterceptPolicy {
    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_absolute_urls(mut self, allow: bool) -> Self {
        self.allow_absolute_urls = allow;
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&InterceptTarget) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_capability_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.capability_probe = Some(Arc::new(probe));
        self
    }

    /// Whether the tunnelling capability is present, preferring the
    /// configured probe over the transport's.
    pub fn capability_available<F>(&self, transport_probe: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        match &self.capability_probe {
            Some(probe) => probe(),
            None => transport_probe(),
        }
    }

    /// Decides whether `target` is tunnelled.
    ///
    /// A configured predicate is authoritative. Otherwise the capability must
    /// be present, cross-origin targets need `allow_absolute_urls`, and the
    /// path must start with one of `paths`.
    pub fn should_intercept<F>(&self, target: &InterceptTarget, transport_probe: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        if let Some(predicate) = &self.predicate {
            return predicate(target);
        }
        if !self.capability_available(transport_probe) {
            return false;
        }
        if target.cross_origin && !self.allow_absolute_urls {
            return false;
        }
        path_matches(target.path(), &self.paths)
    }
}

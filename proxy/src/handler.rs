//! Reverse-proxy handler: serves request envelopes with real HTTP.
//!
//! # Design
//! `handle` is a straight pipeline. Validation runs before any I/O and in a
//! fixed order (URL, origin, path, body size), so a rejected envelope never
//! reaches the network. Header policy is applied after merging, which makes
//! the forbidden-header strip unconditional: no configured or caller-supplied
//! header can reintroduce a stripped name.

use std::time::Duration;

use serde_json::Value;
use tunnel_core::abort::{merge_signals, race, settle_error, AbortSignal, TimeoutSignal};
use tunnel_core::codec::{decode_body, encode_response_body, estimate_size, BodyShape};
use tunnel_core::envelope::build_response_envelope;
use tunnel_core::fetch::apply_default_content_type;
use tunnel_core::headers::is_forbidden_header;
use tunnel_core::policy::path_matches;
use tunnel_core::{
    Body, BodyType, Headers, HttpMethod, HttpRequest, HttpRequestEnvelope, HttpResponseEnvelope, ToolResult,
};
use url::Url;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};

#[derive(Debug, Clone, Default)]
pub struct HttpProxyHandler {
    config: ProxyConfig,
}

impl HttpProxyHandler {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn tool_name(&self) -> &str {
        &self.config.tool_name
    }

    /// Serves one request envelope.
    ///
    /// `arguments` is the raw procedure argument; `signal` is the caller's
    /// cancellation token, merged with the envelope's timeout.
    pub async fn handle(&self, arguments: Value, signal: Option<AbortSignal>) -> Result<HttpResponseEnvelope> {
        let envelope: HttpRequestEnvelope =
            serde_json::from_value(arguments).map_err(|e| ProxyError::InvalidEnvelope(e.to_string()))?;
        if envelope.url.trim().is_empty() {
            return Err(ProxyError::InvalidEnvelope("envelope has no url".to_string()));
        }

        let target = self.resolve(&envelope.url)?;
        self.check_origin(&target)?;
        self.check_path(&target)?;
        let method = envelope.method();
        self.check_size(&envelope, &method)?;

        let mut headers = self.outbound_headers(&envelope);
        let body = if method.allows_body() {
            decode_body(
                envelope.body.as_ref(),
                envelope.body_type,
                BodyShape::Native,
                headers.content_type(),
                self.config.verbose,
            )?
        } else {
            None
        };
        apply_default_content_type(&mut headers, body.as_ref());

        let timeout = envelope
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_timeout);
        let timeout = (!timeout.is_zero()).then(|| TimeoutSignal::start(timeout));
        let merged = merge_signals(signal.as_ref(), timeout.as_ref().map(TimeoutSignal::signal));

        let mut request = HttpRequest::new(method.clone(), target.to_string())
            .redirect(envelope.redirect.unwrap_or_default())
            .cache(envelope.cache.unwrap_or_default())
            .credentials(envelope.credentials.unwrap_or(self.config.credentials));
        request.headers = headers;
        request.body = body;
        request.signal = merged.signal.clone();

        tracing::debug!(method = %method, url = %target, "proxying request");
        let outcome = self.execute(request, merged.signal.as_ref()).await;
        merged.cleanup.run();

        let envelope = outcome.map_err(|err| settle_error(err, merged.signal.as_ref(), timeout.as_ref()))?;
        tracing::debug!(url = %target, status = envelope.status, "proxied request completed");
        Ok(envelope)
    }

    /// Serves an envelope and wraps the outcome as a procedure result.
    pub async fn call_tool(&self, arguments: Value, signal: Option<AbortSignal>) -> ToolResult {
        let envelope = match self.handle(arguments, signal).await {
            Ok(envelope) => envelope,
            Err(err) => {
                if err.is_policy_rejection() {
                    tracing::warn!(error = %err, "proxy request rejected");
                }
                return ToolResult::error(err.to_string());
            }
        };
        match serde_json::to_value(&envelope) {
            Ok(value) => ToolResult::structured(value),
            Err(e) => ToolResult::error(format!("failed to serialize response envelope: {e}")),
        }
    }

    fn resolve(&self, raw: &str) -> Result<Url> {
        let raw = raw.trim();
        let invalid = |reason: String| ProxyError::InvalidUrl {
            url: raw.to_string(),
            reason,
        };
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.config.base_url {
                Some(base) => base.join(raw).map_err(|e| invalid(e.to_string()))?,
                None => return Err(invalid("relative URL and no base URL is configured".to_string())),
            },
            Err(e) => return Err(invalid(e.to_string())),
        };
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
        }
        Ok(url)
    }

    fn check_origin(&self, target: &Url) -> Result<()> {
        let Some(allowed) = &self.config.allowed_origins else {
            return Ok(());
        };
        let origin = target.origin().ascii_serialization();
        if allowed.iter().any(|entry| normalize_origin(entry) == origin) {
            return Ok(());
        }
        Err(ProxyError::OriginNotAllowed { origin })
    }

    fn check_path(&self, target: &Url) -> Result<()> {
        if path_matches(target.path(), &self.config.allowed_paths) {
            return Ok(());
        }
        Err(ProxyError::PathNotAllowed {
            path: target.path().to_string(),
        })
    }

    /// Only a body that will actually be sent counts; GET and HEAD send none.
    fn check_size(&self, envelope: &HttpRequestEnvelope, method: &HttpMethod) -> Result<()> {
        if !method.allows_body() {
            return Ok(());
        }
        let size = estimate_size(envelope.body.as_ref(), envelope.body_type);
        if size > self.config.max_body_size {
            return Err(ProxyError::BodyTooLarge {
                size,
                limit: self.config.max_body_size,
            });
        }
        Ok(())
    }

    /// Base headers overlaid with the caller's, then stripped.
    fn outbound_headers(&self, envelope: &HttpRequestEnvelope) -> Headers {
        let mut headers = self
            .config
            .headers
            .as_ref()
            .map(|source| source.resolve(envelope))
            .unwrap_or_default();
        headers.merge(&Headers::from(&envelope.headers));

        let extra = &self.config.extra_forbidden_headers;
        let stripped = headers.remove_where(|name| is_forbidden_header(name) || extra.iter().any(|x| x == name));
        if !stripped.is_empty() {
            tracing::warn!(headers = ?stripped, "stripped forbidden request headers");
        }
        if envelope.body_type == BodyType::FormData {
            headers.remove("content-type");
            headers.remove("content-length");
        }
        headers
    }

    async fn execute(&self, request: HttpRequest, signal: Option<&AbortSignal>) -> tunnel_core::Result<HttpResponseEnvelope> {
        let response = race(signal, self.config.client.fetch(request)).await?;

        let status = response.status;
        let status_text = response.status_text.clone();
        let headers = response.headers.clone();
        let url = response.url.clone();
        let redirected = response.redirected;
        let content_type = headers.content_type().map(str::to_string);
        let bytes = race(signal, read_body(response.body)).await?;

        let body = encode_response_body(status, content_type.as_deref(), bytes, self.config.verbose);
        Ok(build_response_envelope(
            status,
            (!status_text.is_empty()).then_some(status_text),
            &headers,
            body,
            url,
            redirected,
        ))
    }
}

async fn read_body(body: Option<Body>) -> tunnel_core::Result<Vec<u8>> {
    match body {
        Some(body) => body.into_bytes().await,
        None => Ok(Vec::new()),
    }
}

/// `https://Example.com:443/` and `https://example.com` compare equal.
fn normalize_origin(entry: &str) -> String {
    match Url::parse(entry.trim()) {
        Ok(url) => url.origin().ascii_serialization(),
        Err(_) => entry.trim().trim_end_matches('/').to_ascii_lowercase(),
    }
}

//! Simple-call interceptor: a `Fetch` that tunnels matching requests.
//!
//! # Design
//! `TunnelFetch` wraps a native `Fetch` and implements the same trait, so
//! callers cannot tell which route a request took. The route is decided per
//! call: inactive adapter or policy miss goes native, everything else is
//! encoded into an envelope and sent through the remote procedure.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::abort::{merge_signals, race, settle_error, AbortSignal, TimeoutSignal};
use crate::adapter::AdapterHandle;
use crate::body::Body;
use crate::codec::{decode_body, encode_body, BodyShape};
use crate::config::TunnelConfig;
use crate::envelope::{build_request_envelope, parse_tool_result, HttpResponseEnvelope, RequestParts};
use crate::error::{Result, TunnelError};
use crate::headers::Headers;
use crate::http::{Fetch, HttpRequest, HttpResponse};
use crate::policy::{resolve_target, InterceptTarget};
use crate::rpc::{RpcClient, ToolCall, ToolResult};

/// Invokes the procedure, racing it against `signal`.
pub(crate) async fn invoke(
    rpc: &dyn RpcClient,
    call: ToolCall,
    signal: Option<AbortSignal>,
) -> Result<ToolResult> {
    race(signal.as_ref(), rpc.call_tool(call, signal.clone())).await
}

/// Sets the content type a native client would have chosen for `body`.
pub fn apply_default_content_type(headers: &mut Headers, body: Option<&Body>) {
    if headers.contains("content-type") {
        return;
    }
    if let Some(content_type) = body.and_then(Body::default_content_type) {
        headers.set("content-type", &content_type);
    }
}

/// Rebuilds a native response from a response envelope.
pub fn response_from_envelope(
    envelope: HttpResponseEnvelope,
    target: &InterceptTarget,
    verbose: bool,
) -> Result<HttpResponse> {
    let headers = Headers::from(&envelope.headers);
    let body = decode_body(
        envelope.body.as_ref(),
        envelope.body_type,
        BodyShape::Native,
        headers.content_type(),
        verbose,
    )?;
    let url = if envelope.url.is_empty() {
        target.url.to_string()
    } else {
        target
            .url
            .join(&envelope.url)
            .map(|url| url.to_string())
            .unwrap_or(envelope.url)
    };
    Ok(HttpResponse {
        status: envelope.status,
        status_text: envelope.status_text.unwrap_or_default(),
        headers,
        url,
        redirected: envelope.redirected,
        body,
    })
}

/// Tunnelling replacement for a native [`Fetch`].
pub struct TunnelFetch {
    native: Arc<dyn Fetch>,
    rpc: Arc<dyn RpcClient>,
    config: Arc<TunnelConfig>,
    handle: AdapterHandle,
}

impl TunnelFetch {
    pub fn new(native: Arc<dyn Fetch>, rpc: Arc<dyn RpcClient>, config: TunnelConfig) -> Self {
        Self::with_handle(native, rpc, config, AdapterHandle::new())
    }

    /// Builds an interceptor controlled by an existing handle.
    pub fn with_handle(
        native: Arc<dyn Fetch>,
        rpc: Arc<dyn RpcClient>,
        config: TunnelConfig,
        handle: AdapterHandle,
    ) -> Self {
        Self {
            native,
            rpc,
            config: Arc::new(config),
            handle,
        }
    }

    pub fn handle(&self) -> AdapterHandle {
        self.handle.clone()
    }

    pub fn native(&self) -> Arc<dyn Fetch> {
        self.native.clone()
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    fn capability_available(&self) -> bool {
        self.config
            .policy
            .capability_available(|| self.rpc.is_tool_available(&self.config.tool_name))
    }

    async fn tunnel(&self, request: HttpRequest, target: InterceptTarget) -> Result<HttpResponse> {
        let call_id = Uuid::new_v4();
        let verbose = self.config.verbose;
        let HttpRequest {
            method,
            mut headers,
            body,
            redirect,
            cache,
            credentials,
            signal,
            ..
        } = request;

        let body = body.filter(|_| method.allows_body());
        apply_default_content_type(&mut headers, body.as_ref());
        let encoded = encode_body(body, headers.content_type(), verbose).await?;

        let timeout_ms = self
            .config
            .default_timeout
            .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        let envelope = build_request_envelope(RequestParts {
            method: method.clone(),
            url: target.envelope_url(),
            headers,
            body: encoded,
            redirect: Some(redirect),
            cache: Some(cache),
            credentials: Some(credentials),
            timeout_ms,
        });
        let arguments = serde_json::to_value(&envelope)
            .map_err(|e| TunnelError::Codec(format!("failed to serialize request envelope: {e}")))?;

        tracing::debug!(
            %call_id,
            tool = %self.config.tool_name,
            method = %method,
            url = %envelope.url,
            body_type = envelope.body_type.as_str(),
            "tunnelling request"
        );

        let timeout = self.config.default_timeout.map(TimeoutSignal::start);
        let merged = merge_signals(signal.as_ref(), timeout.as_ref().map(TimeoutSignal::signal));
        let call = ToolCall {
            name: self.config.tool_name.clone(),
            arguments,
        };
        let outcome = invoke(self.rpc.as_ref(), call, merged.signal.clone()).await;
        merged.cleanup.run();

        let result = outcome.map_err(|err| settle_error(err, merged.signal.as_ref(), timeout.as_ref()))?;
        let envelope = parse_tool_result(result)?;
        tracing::debug!(%call_id, status = envelope.status, "tunnelled request completed");
        response_from_envelope(envelope, &target, verbose)
    }
}

#[async_trait]
impl Fetch for TunnelFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        if !self.handle.is_active() {
            return self.native.fetch(request).await;
        }
        if let Some(reason) = request.signal.as_ref().and_then(AbortSignal::reason) {
            return Err(TunnelError::from_abort(reason));
        }

        let target = resolve_target(&self.config.base_url, &request.url, request.method.clone())?;
        let wants_tunnel = self
            .config
            .policy
            .should_intercept(&target, || self.rpc.is_tool_available(&self.config.tool_name));
        if !wants_tunnel {
            return self.native.fetch(request).await;
        }

        if !self.capability_available() {
            if self.config.fallback_to_native {
                tracing::warn!(
                    tool = %self.config.tool_name,
                    url = %target.url,
                    "remote HTTP procedure unavailable; falling back to native fetch"
                );
                return self.native.fetch(request).await;
            }
            return Err(TunnelError::CapabilityUnavailable {
                tool: self.config.tool_name.clone(),
            });
        }

        self.tunnel(request, target).await
    }
}

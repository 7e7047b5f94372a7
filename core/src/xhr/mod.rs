//! Stateful-call interceptor: an event-driven request object.
//!
//! # Design
//! `TunnelXhr` owns its whole lifecycle as explicit state behind one mutex:
//! ready state, send flag, request settings and the received response.
//! Every operation checks [`state::transition`] before touching anything,
//! so an invalid call fails without side effects.
//!
//! The route (tunnel or native) is fixed by `open()`. Both routes end in a
//! response envelope, so headers, body decoding and events are produced by
//! the same code whichever way the request went.
//!
//! Each `open()` and `abort()` bumps a generation counter. Work spawned by
//! `send()` carries the generation it started under and drops its results
//! once that generation is stale. Listeners are always invoked after the
//! state lock is released.

mod events;
mod response;
mod state;

pub use events::{XhrEvent, XhrEventKind, XhrListener, XhrListenerId};
pub use response::{ResponseType, XhrResponse};
pub use state::ReadyState;

use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::abort::{merge_signals, race, settle_error, AbortController, AbortReason, AbortSignal, TimeoutSignal};
use crate::adapter::AdapterHandle;
use crate::body::Body;
use crate::codec::{encode_body, encode_response_body};
use crate::config::TunnelConfig;
use crate::envelope::{
    build_request_envelope, build_response_envelope, parse_tool_result, HttpResponseEnvelope, RequestParts,
};
use crate::error::{Result, TunnelError};
use crate::fetch::{apply_default_content_type, invoke};
use crate::headers::{is_forbidden_header, Headers};
use crate::http::{CredentialsPolicy, Fetch, HttpMethod, HttpRequest};
use crate::policy::{resolve_target, InterceptTarget};
use crate::rpc::{RpcClient, ToolCall};
use events::Listeners;
use response::decode_response;
use state::{credentials_mutable, response_settings_mutable, transition, Op};

pub(crate) struct XhrContext {
    native: Arc<dyn Fetch>,
    rpc: Arc<dyn RpcClient>,
    config: Arc<TunnelConfig>,
    handle: AdapterHandle,
}

/// Creates request objects that share one transport, config and handle.
#[derive(Clone)]
pub struct XhrFactory {
    ctx: Arc<XhrContext>,
}

impl XhrFactory {
    pub fn new(native: Arc<dyn Fetch>, rpc: Arc<dyn RpcClient>, config: TunnelConfig) -> Self {
        Self::with_handle(native, rpc, config, AdapterHandle::new())
    }

    pub fn with_handle(
        native: Arc<dyn Fetch>,
        rpc: Arc<dyn RpcClient>,
        config: TunnelConfig,
        handle: AdapterHandle,
    ) -> Self {
        Self {
            ctx: Arc::new(XhrContext {
                native,
                rpc,
                config: Arc::new(config),
                handle,
            }),
        }
    }

    pub fn handle(&self) -> AdapterHandle {
        self.ctx.handle.clone()
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.ctx.config
    }

    pub(crate) fn downgrade(&self) -> Weak<XhrContext> {
        Arc::downgrade(&self.ctx)
    }

    pub(crate) fn is(&self, other: &Weak<XhrContext>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.ctx), other.as_ptr())
    }

    pub fn create(&self) -> TunnelXhr {
        TunnelXhr {
            inner: Arc::new(Inner {
                ctx: self.ctx.clone(),
                state: Mutex::new(XhrState::default()),
                listeners: Listeners::default(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Native,
    Tunnel,
}

#[derive(Default)]
struct XhrState {
    ready_state: ReadyState,
    sent: bool,
    generation: u64,
    route: Option<Route>,
    method: HttpMethod,
    target: Option<InterceptTarget>,
    asynchronous: bool,
    request_headers: Headers,
    basic_auth: Option<String>,
    timeout: Duration,
    with_credentials: bool,
    response_type: ResponseType,
    mime_override: Option<String>,
    controller: Option<AbortController>,
    status: u16,
    status_text: String,
    response_url: String,
    response_headers: Headers,
    response: Option<XhrResponse>,
}

impl XhrState {
    fn clear_response(&mut self) {
        self.status = 0;
        self.status_text.clear();
        self.response_url.clear();
        self.response_headers = Headers::new();
        self.response = None;
    }
}

struct Inner {
    ctx: Arc<XhrContext>,
    state: Mutex<XhrState>,
    listeners: Listeners,
}

/// Everything `send()` captures for the exchange.
struct Exchange {
    route: Route,
    method: HttpMethod,
    target: InterceptTarget,
    headers: Headers,
    basic_auth: Option<String>,
    body: Option<Body>,
    timeout: Option<Duration>,
    credentials: CredentialsPolicy,
    signal: AbortSignal,
}

/// A request object with the native event-driven surface.
///
/// Asynchronous sends spawn onto the ambient tokio runtime.
#[derive(Clone)]
pub struct TunnelXhr {
    inner: Arc<Inner>,
}

impl TunnelXhr {
    pub fn open(&self, method: &str, url: &str) -> Result<()> {
        self.open_with(method, url, true, None, None)
    }

    /// Initializes a request. The native-vs-tunnel decision is taken here
    /// and holds until the next `open`.
    pub fn open_with(
        &self,
        method: &str,
        url: &str,
        asynchronous: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        let ctx = &self.inner.ctx;
        let method = HttpMethod::parse(method);
        let target = resolve_target(&ctx.config.base_url, url, method.clone())?;
        let route = self.decide_route(&target)?;
        if route == Route::Tunnel && !asynchronous {
            return Err(TunnelError::SyncUnsupported);
        }

        let basic_auth = match (route, user) {
            (Route::Native, Some(user)) => {
                let credentials = format!("{user}:{}", password.unwrap_or_default());
                Some(format!("Basic {}", STANDARD.encode(credentials)))
            }
            (Route::Tunnel, Some(_)) => {
                tracing::warn!(url = %target.url, "dropping credentials passed to open() for a tunnelled request");
                None
            }
            (_, None) => None,
        };

        let (previous, generation, stale) = {
            let mut state = self.inner.state.lock();
            let previous = state.ready_state;
            let stale = state.controller.take();
            state.generation += 1;
            state.ready_state = transition(previous, state.sent, Op::Open).unwrap_or(ReadyState::Opened);
            state.sent = false;
            state.route = Some(route);
            state.method = method;
            state.target = Some(target);
            state.asynchronous = asynchronous;
            state.request_headers = Headers::new();
            state.basic_auth = basic_auth;
            state.clear_response();
            (previous, state.generation, stale)
        };
        if let Some(controller) = stale {
            controller.abort();
        }
        if previous != ReadyState::Opened {
            self.emit(generation, XhrEventKind::ReadyStateChange, Progress::none());
        }
        Ok(())
    }

    fn decide_route(&self, target: &InterceptTarget) -> Result<Route> {
        let ctx = &self.inner.ctx;
        if !ctx.handle.is_active() {
            return Ok(Route::Native);
        }
        let probe = || ctx.rpc.is_tool_available(&ctx.config.tool_name);
        if !ctx.config.policy.should_intercept(target, probe) {
            return Ok(Route::Native);
        }
        if ctx.config.policy.capability_available(probe) {
            return Ok(Route::Tunnel);
        }
        if ctx.config.fallback_to_native {
            tracing::warn!(
                tool = %ctx.config.tool_name,
                url = %target.url,
                "remote HTTP procedure unavailable; request object falls back to native"
            );
            return Ok(Route::Native);
        }
        Err(TunnelError::CapabilityUnavailable {
            tool: ctx.config.tool_name.clone(),
        })
    }

    /// Adds a request header. Forbidden names are dropped with a warning.
    pub fn set_request_header(&self, name: &str, value: &str) -> Result<()> {
        let mut state = self.inner.state.lock();
        if transition(state.ready_state, state.sent, Op::SetRequestHeader).is_none() {
            return Err(TunnelError::InvalidState(
                "setRequestHeader() requires an opened, unsent request".to_string(),
            ));
        }
        if is_forbidden_header(name) {
            drop(state);
            tracing::warn!(header = %name.to_ascii_lowercase(), "dropping forbidden request header");
            return Ok(());
        }
        state.request_headers.append(name, value);
        Ok(())
    }

    /// Starts the request.
    ///
    /// Asynchronous requests return as soon as `loadstart` has fired; the
    /// outcome arrives through events. Synchronous (native-only) requests
    /// complete before this returns and report failure as an error.
    pub async fn send(&self, body: Option<Body>) -> Result<()> {
        let (generation, asynchronous, exchange) = {
            let mut state = self.inner.state.lock();
            if transition(state.ready_state, state.sent, Op::Send).is_none() {
                return Err(TunnelError::InvalidState(
                    "send() requires an opened request that has not been sent".to_string(),
                ));
            }
            let (Some(route), Some(target)) = (state.route, state.target.clone()) else {
                return Err(TunnelError::InvalidState("request has not been opened".to_string()));
            };
            state.sent = true;
            let controller = AbortController::new();
            state.controller = Some(controller.clone());
            let exchange = Exchange {
                route,
                method: state.method.clone(),
                target,
                headers: state.request_headers.clone(),
                basic_auth: state.basic_auth.clone(),
                body: body.filter(|_| state.method.allows_body()),
                timeout: Some(state.timeout).filter(|t| !t.is_zero()),
                credentials: if state.with_credentials {
                    CredentialsPolicy::Include
                } else {
                    CredentialsPolicy::SameOrigin
                },
                signal: controller.signal(),
            };
            (state.generation, state.asynchronous, exchange)
        };

        self.emit(generation, XhrEventKind::LoadStart, Progress::none());

        if asynchronous {
            let xhr = self.clone();
            tokio::spawn(async move {
                // Failures are reported through events.
                let _ = xhr.run(generation, exchange).await;
            });
            Ok(())
        } else {
            self.run(generation, exchange).await
        }
    }

    async fn run(&self, generation: u64, exchange: Exchange) -> Result<()> {
        let ctx = self.inner.ctx.clone();
        let timeout = exchange
            .timeout
            .or(ctx.config.default_timeout)
            .map(TimeoutSignal::start);
        let merged = merge_signals(Some(&exchange.signal), timeout.as_ref().map(TimeoutSignal::signal));
        let timeout_ms = exchange
            .timeout
            .or(ctx.config.default_timeout)
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));

        let outcome = match exchange.route {
            Route::Tunnel => tunnel_exchange(&ctx, exchange, timeout_ms, merged.signal.clone()).await,
            Route::Native => native_exchange(&ctx, exchange, merged.signal.clone()).await,
        };
        merged.cleanup.run();

        match outcome {
            Ok(envelope) => {
                self.complete(generation, envelope);
                Ok(())
            }
            Err(err) => {
                let err = settle_error(err, merged.signal.as_ref(), timeout.as_ref());
                self.fail(generation, &err);
                Err(err)
            }
        }
    }

    /// Drives HEADERS_RECEIVED, LOADING and DONE from a response envelope.
    fn complete(&self, generation: u64, envelope: HttpResponseEnvelope) {
        let headers = Headers::from(&envelope.headers);
        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return;
            }
            let Some(next) = transition(state.ready_state, state.sent, Op::ReceiveHeaders) else {
                return;
            };
            state.ready_state = next;
            state.status = envelope.status;
            state.status_text = envelope.status_text.clone().unwrap_or_default();
            state.response_url = resolve_response_url(state.target.as_ref(), &envelope.url);
            state.response_headers = headers.clone();
        }
        if !self.emit(generation, XhrEventKind::ReadyStateChange, Progress::none()) {
            return;
        }

        let (response_type, mime_override) = {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return;
            }
            let Some(next) = transition(state.ready_state, state.sent, Op::ReceiveBody) else {
                return;
            };
            state.ready_state = next;
            (state.response_type, state.mime_override.clone())
        };
        if !self.emit(generation, XhrEventKind::ReadyStateChange, Progress::none()) {
            return;
        }

        let content_type = mime_override.or_else(|| headers.content_type().map(str::to_string));
        let decoded = decode_response(
            envelope.body.as_ref(),
            envelope.body_type,
            response_type,
            content_type.as_deref(),
            self.inner.ctx.config.verbose,
        );
        let (response, loaded) = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                self.fail(generation, &err);
                return;
            }
        };
        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return;
            }
            state.response = Some(response);
        }
        if !self.emit(generation, XhrEventKind::Progress, Progress::complete(loaded)) {
            return;
        }

        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return;
            }
            let Some(next) = transition(state.ready_state, state.sent, Op::Finish) else {
                return;
            };
            state.ready_state = next;
            state.sent = false;
            state.controller = None;
        }
        let _ = self.emit(generation, XhrEventKind::ReadyStateChange, Progress::none())
            && self.emit(generation, XhrEventKind::Load, Progress::complete(loaded))
            && self.emit(generation, XhrEventKind::LoadEnd, Progress::complete(loaded));
    }

    /// Moves straight to DONE with status 0 and fires `timeout` or `error`.
    fn fail(&self, generation: u64, err: &TunnelError) {
        {
            let mut state = self.inner.state.lock();
            if state.generation != generation {
                return;
            }
            let Some(next) = transition(state.ready_state, state.sent, Op::Fail) else {
                return;
            };
            state.ready_state = next;
            state.sent = false;
            state.controller = None;
            state.clear_response();
        }
        tracing::debug!(error = %err, "request object failed");
        let kind = match err {
            TunnelError::TimedOut => XhrEventKind::Timeout,
            _ => XhrEventKind::Error,
        };
        let _ = self.emit(generation, XhrEventKind::ReadyStateChange, Progress::none())
            && self.emit(generation, kind, Progress::none())
            && self.emit(generation, XhrEventKind::LoadEnd, Progress::none());
    }

    /// Cancels an in-flight request. A no-op when nothing is in flight.
    pub fn abort(&self) {
        let (generation, controller) = {
            let mut state = self.inner.state.lock();
            let Some(next) = transition(state.ready_state, state.sent, Op::Abort) else {
                return;
            };
            state.generation += 1;
            state.ready_state = next;
            state.sent = false;
            state.clear_response();
            (state.generation, state.controller.take())
        };
        if let Some(controller) = controller {
            controller.abort_with(AbortReason::Aborted);
        }
        let _ = self.emit(generation, XhrEventKind::ReadyStateChange, Progress::none())
            && self.emit(generation, XhrEventKind::Abort, Progress::none())
            && self.emit(generation, XhrEventKind::LoadEnd, Progress::none());

        let mut state = self.inner.state.lock();
        if state.generation == generation && state.ready_state == ReadyState::Done {
            state.ready_state = ReadyState::Unsent;
        }
    }

    /// Dispatches `kind` if `generation` is still current; returns whether
    /// it is.
    fn emit(&self, generation: u64, kind: XhrEventKind, progress: Progress) -> bool {
        let ready_state = {
            let state = self.inner.state.lock();
            if state.generation != generation {
                return false;
            }
            state.ready_state
        };
        let event = XhrEvent {
            kind,
            ready_state,
            loaded: progress.loaded,
            total: progress.total,
            length_computable: progress.length_computable,
        };
        self.inner.listeners.dispatch(&event);
        true
    }

    pub fn add_event_listener<F>(&self, kind: XhrEventKind, listener: F) -> XhrListenerId
    where
        F: Fn(&XhrEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(kind, Arc::new(listener))
    }

    pub fn remove_event_listener(&self, id: XhrListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.lock().ready_state
    }

    /// Whether the current request goes through the remote procedure.
    pub fn is_intercepted(&self) -> bool {
        self.inner.state.lock().route == Some(Route::Tunnel)
    }

    pub fn status(&self) -> u16 {
        self.inner.state.lock().status
    }

    pub fn status_text(&self) -> String {
        self.inner.state.lock().status_text.clone()
    }

    pub fn response_url(&self) -> String {
        self.inner.state.lock().response_url.clone()
    }

    pub fn get_response_header(&self, name: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .response_headers
            .get(name)
            .map(str::to_string)
    }

    /// All response headers as `name: value\r\n` lines sorted by name.
    pub fn get_all_response_headers(&self) -> String {
        let state = self.inner.state.lock();
        state
            .response_headers
            .to_map()
            .iter()
            .map(|(name, value)| format!("{name}: {value}\r\n"))
            .collect()
    }

    /// The decoded response in the shape selected by `response_type`.
    ///
    /// Text shapes read as an empty string until the body arrives; other
    /// shapes read as `Null` until DONE.
    pub fn response(&self) -> XhrResponse {
        let state = self.inner.state.lock();
        match (&state.response, state.response_type.is_text()) {
            (Some(response), true) => response.clone(),
            (Some(response), false) if state.ready_state == ReadyState::Done => response.clone(),
            (None, true) => XhrResponse::Text(String::new()),
            _ => XhrResponse::Null,
        }
    }

    /// The response as text; an invalid-state error for non-text types.
    pub fn response_text(&self) -> Result<String> {
        let state = self.inner.state.lock();
        if !state.response_type.is_text() {
            return Err(TunnelError::InvalidState(
                "responseText is only available when responseType is \"\" or \"text\"".to_string(),
            ));
        }
        Ok(state
            .response
            .as_ref()
            .and_then(XhrResponse::as_text)
            .unwrap_or_default()
            .to_string())
    }

    /// Documents are never parsed.
    pub fn response_xml(&self) -> Option<String> {
        None
    }

    pub fn timeout(&self) -> Duration {
        self.inner.state.lock().timeout
    }

    /// Zero disables the per-request timeout.
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.state.lock().timeout = timeout;
    }

    pub fn with_credentials(&self) -> bool {
        self.inner.state.lock().with_credentials
    }

    pub fn set_with_credentials(&self, with_credentials: bool) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !credentials_mutable(state.ready_state, state.sent) {
            return Err(TunnelError::InvalidState(
                "withCredentials can only change before send()".to_string(),
            ));
        }
        state.with_credentials = with_credentials;
        Ok(())
    }

    pub fn response_type(&self) -> ResponseType {
        self.inner.state.lock().response_type
    }

    pub fn set_response_type(&self, response_type: ResponseType) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !response_settings_mutable(state.ready_state) {
            return Err(TunnelError::InvalidState(
                "responseType cannot change once the response is loading".to_string(),
            ));
        }
        if state.ready_state != ReadyState::Unsent && !state.asynchronous {
            return Err(TunnelError::InvalidState(
                "responseType cannot be set on a synchronous request".to_string(),
            ));
        }
        state.response_type = response_type;
        Ok(())
    }

    /// Replaces the response content type used for decoding.
    pub fn override_mime_type(&self, mime: &str) -> Result<()> {
        let mut state = self.inner.state.lock();
        if !response_settings_mutable(state.ready_state) {
            return Err(TunnelError::InvalidState(
                "overrideMimeType() must be called before the response loads".to_string(),
            ));
        }
        state.mime_override = Some(mime.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Progress {
    loaded: u64,
    total: u64,
    length_computable: bool,
}

impl Progress {
    fn none() -> Self {
        Self {
            loaded: 0,
            total: 0,
            length_computable: false,
        }
    }

    fn complete(size: u64) -> Self {
        Self {
            loaded: size,
            total: size,
            length_computable: true,
        }
    }
}

fn resolve_response_url(target: Option<&InterceptTarget>, envelope_url: &str) -> String {
    let Some(target) = target else {
        return envelope_url.to_string();
    };
    if envelope_url.is_empty() {
        return target.url.to_string();
    }
    target
        .url
        .join(envelope_url)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| envelope_url.to_string())
}

async fn tunnel_exchange(
    ctx: &XhrContext,
    exchange: Exchange,
    timeout_ms: Option<u64>,
    signal: Option<AbortSignal>,
) -> Result<HttpResponseEnvelope> {
    let call_id = Uuid::new_v4();
    let Exchange {
        method,
        target,
        mut headers,
        body,
        credentials,
        ..
    } = exchange;

    apply_default_content_type(&mut headers, body.as_ref());
    let encoded = encode_body(body, headers.content_type(), ctx.config.verbose).await?;
    let envelope = build_request_envelope(RequestParts {
        method: method.clone(),
        url: target.envelope_url(),
        headers,
        body: encoded,
        credentials: Some(credentials),
        timeout_ms,
        ..RequestParts::default()
    });
    let arguments = serde_json::to_value(&envelope)
        .map_err(|e| TunnelError::Codec(format!("failed to serialize request envelope: {e}")))?;

    tracing::debug!(
        %call_id,
        tool = %ctx.config.tool_name,
        method = %method,
        url = %envelope.url,
        "tunnelling request object"
    );
    let call = ToolCall {
        name: ctx.config.tool_name.clone(),
        arguments,
    };
    let result = invoke(ctx.rpc.as_ref(), call, signal).await?;
    let envelope = parse_tool_result(result)?;
    tracing::debug!(%call_id, status = envelope.status, "tunnelled request object completed");
    Ok(envelope)
}

async fn native_exchange(
    ctx: &XhrContext,
    exchange: Exchange,
    signal: Option<AbortSignal>,
) -> Result<HttpResponseEnvelope> {
    let Exchange {
        method,
        target,
        mut headers,
        basic_auth,
        body,
        credentials,
        ..
    } = exchange;
    if let Some(authorization) = basic_auth {
        headers.set("authorization", &authorization);
    }
    let mut request = HttpRequest::new(method, target.url.to_string()).credentials(credentials);
    request.headers = headers;
    request.body = body;
    request.signal = signal.clone();

    let response = race(signal.as_ref(), ctx.native.fetch(request)).await?;

    let status = response.status;
    let status_text = response.status_text.clone();
    let headers = response.headers.clone();
    let url = response.url.clone();
    let redirected = response.redirected;
    let content_type = headers.content_type().map(str::to_string);
    let bytes = response.bytes().await?;
    let body = encode_response_body(status, content_type.as_deref(), bytes, ctx.config.verbose);
    Ok(build_response_envelope(
        status,
        Some(status_text),
        &headers,
        body,
        url,
        redirected,
    ))
}

//! Test doubles for the two injected seams.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tunnel_core::{
    AbortSignal, Body, Fetch, Headers, HttpRequest, HttpResponse, ReadyState, Result, RpcClient, ToolCall,
    ToolResult, TunnelXhr, XhrEventKind,
};

type Responder = Box<dyn Fn(&ToolCall) -> Result<ToolResult> + Send + Sync>;

/// Scripted RPC transport that records every call.
pub struct StubRpc {
    available: AtomicBool,
    pending: bool,
    responder: Responder,
    calls: Mutex<Vec<ToolCall>>,
}

impl StubRpc {
    pub fn responding<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&ToolCall) -> Result<ToolResult> + Send + Sync + 'static,
    {
        Arc::new(Self {
            available: AtomicBool::new(true),
            pending: false,
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Always answers with `envelope` as structured content.
    pub fn returning(envelope: Value) -> Arc<Self> {
        Self::responding(move |_| Ok(ToolResult::structured(envelope.clone())))
    }

    /// Never answers; only cancellation ends a call.
    pub fn pending() -> Arc<Self> {
        Arc::new(Self {
            available: AtomicBool::new(true),
            pending: true,
            responder: Box::new(|_| Ok(ToolResult::default())),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        let rpc = Self::returning(json!({"status": 200}));
        rpc.set_available(false);
        rpc
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().clone()
    }

    pub fn last_arguments(&self) -> Value {
        self.calls
            .lock()
            .last()
            .map(|call| call.arguments.clone())
            .unwrap_or(Value::Null)
    }
}

#[async_trait]
impl RpcClient for StubRpc {
    async fn call_tool(&self, call: ToolCall, signal: Option<AbortSignal>) -> Result<ToolResult> {
        self.calls.lock().push(call.clone());
        if self.pending {
            match signal {
                Some(signal) => signal.cancelled().await,
                None => std::future::pending::<()>().await,
            }
            return Ok(ToolResult::error("cancelled"));
        }
        (self.responder)(&call)
    }

    fn is_tool_available(&self, _name: &str) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// What the native fetch saw.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
}

/// Native fetch answering `200 text/plain "native"`.
#[derive(Default)]
pub struct StubFetch {
    seen: Mutex<Vec<SeenRequest>>,
}

impl StubFetch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Fetch for StubFetch {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.seen.lock().push(SeenRequest {
            method: request.method.to_string(),
            url: request.url.clone(),
            headers: request.headers.clone(),
        });
        let mut response = HttpResponse::new(200);
        response.status_text = "OK".to_string();
        response.headers.set("content-type", "text/plain");
        response.url = request.url;
        response.body = Some(Body::Text("native".to_string()));
        Ok(response)
    }
}

/// Records `(event, readyState)` pairs and signals on `loadend`.
pub struct EventLog {
    pub events: Arc<Mutex<Vec<(XhrEventKind, ReadyState)>>>,
    pub done: Arc<Notify>,
}

impl EventLog {
    pub fn attach(xhr: &TunnelXhr) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let done = Arc::new(Notify::new());
        for kind in XhrEventKind::ALL {
            let events = events.clone();
            let done = done.clone();
            xhr.add_event_listener(kind, move |event| {
                events.lock().push((event.kind, event.ready_state));
                if event.kind == XhrEventKind::LoadEnd {
                    done.notify_one();
                }
            });
        }
        Self { events, done }
    }

    pub async fn finished(&self) {
        self.done.notified().await;
    }

    pub fn kinds(&self) -> Vec<XhrEventKind> {
        self.events.lock().iter().map(|(kind, _)| *kind).collect()
    }

    pub fn ready_states(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter(|(kind, _)| *kind == XhrEventKind::ReadyStateChange)
            .map(|(_, state)| state.as_u8())
            .collect()
    }

    pub fn count(&self, kind: XhrEventKind) -> usize {
        self.events.lock().iter().filter(|(k, _)| *k == kind).count()
    }
}

/// The response envelope from the items example.
pub fn created_item_envelope() -> Value {
    json!({
        "status": 201,
        "statusText": "Created",
        "headers": {"content-type": "application/json"},
        "bodyType": "json",
        "body": {"item": {"id": 3, "name": "X"}}
    })
}

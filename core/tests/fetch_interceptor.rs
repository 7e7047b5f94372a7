//! `TunnelFetch` against scripted transports.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{created_item_envelope, StubFetch, StubRpc};
use serde_json::json;
use tunnel_core::{
    AbortController, Body, Fetch, HttpRequest, InterceptPolicy, ToolResult, TunnelConfig, TunnelError, TunnelFetch,
};

fn interceptor(rpc: Arc<StubRpc>, native: Arc<StubFetch>, config: TunnelConfig) -> TunnelFetch {
    TunnelFetch::new(native, rpc, config)
}

fn api_only() -> TunnelConfig {
    TunnelConfig::default().with_policy(InterceptPolicy::default().with_paths(["/api"]))
}

#[tokio::test]
async fn post_json_is_tunnelled_and_rebuilt() {
    let rpc = StubRpc::returning(created_item_envelope());
    let native = StubFetch::new();
    let fetch = interceptor(rpc.clone(), native.clone(), api_only());

    let response = fetch
        .fetch(HttpRequest::post("/api/items").json(json!({"name": "X"})))
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert!(response.ok());
    assert_eq!(response.status_text, "Created");
    assert_eq!(response.headers.get("Content-Type"), Some("application/json"));
    assert_eq!(response.json().await.unwrap(), json!({"item": {"id": 3, "name": "X"}}));

    let calls = rpc.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "http_request");
    let args = &calls[0].arguments;
    assert_eq!(args["method"], "POST");
    assert_eq!(args["url"], "/api/items");
    assert_eq!(args["bodyType"], "json");
    assert_eq!(args["body"], json!({"name": "X"}));
    assert_eq!(args["headers"]["content-type"], "application/json");
    assert!(native.seen().is_empty());
}

#[tokio::test]
async fn get_keeps_query_and_drops_body() {
    let rpc = StubRpc::returning(json!({"status": 200, "bodyType": "text", "body": "ok"}));
    let fetch = interceptor(rpc.clone(), StubFetch::new(), api_only());

    let mut request = HttpRequest::get("/api/search?q=rust&page=2#top");
    request.body = Some(Body::from("ignored"));
    let response = fetch.fetch(request).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "ok");

    let args = rpc.last_arguments();
    assert_eq!(args["url"], "/api/search?q=rust&page=2");
    assert_eq!(args["bodyType"], "none");
    assert!(args.get("body").is_none());
}

#[tokio::test]
async fn policy_miss_goes_native() {
    let rpc = StubRpc::returning(created_item_envelope());
    let native = StubFetch::new();
    let fetch = interceptor(rpc.clone(), native.clone(), api_only());

    let response = fetch.fetch(HttpRequest::get("/public/index.html")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "native");
    assert!(rpc.calls().is_empty());
    assert_eq!(native.seen()[0].url, "/public/index.html");
}

#[tokio::test]
async fn missing_capability_goes_native_without_predicate() {
    let rpc = StubRpc::unavailable();
    let native = StubFetch::new();
    let fetch = interceptor(rpc.clone(), native.clone(), api_only().with_fallback(false));

    let response = fetch.fetch(HttpRequest::get("/api/items")).await.unwrap();
    assert_eq!(response.status, 200);
    assert!(rpc.calls().is_empty());
    assert_eq!(native.seen().len(), 1);
}

#[tokio::test]
async fn predicate_forces_interception_and_fallback_decides() {
    let policy = InterceptPolicy::default().with_predicate(|target| target.path().starts_with("/forced"));

    let native = StubFetch::new();
    let fetch = interceptor(
        StubRpc::unavailable(),
        native.clone(),
        TunnelConfig::default().with_policy(policy.clone()),
    );
    fetch.fetch(HttpRequest::get("/forced/1")).await.unwrap();
    assert_eq!(native.seen().len(), 1);

    let strict = interceptor(
        StubRpc::unavailable(),
        StubFetch::new(),
        TunnelConfig::default().with_policy(policy).with_fallback(false),
    );
    let err = strict.fetch(HttpRequest::get("/forced/1")).await.unwrap_err();
    assert_eq!(
        err,
        TunnelError::CapabilityUnavailable {
            tool: "http_request".to_string()
        }
    );
}

#[tokio::test]
async fn cross_origin_needs_absolute_urls_enabled() {
    let rpc = StubRpc::returning(json!({"status": 204}));
    let native = StubFetch::new();
    let fetch = interceptor(rpc.clone(), native.clone(), TunnelConfig::default());
    fetch.fetch(HttpRequest::get("https://other.example/api/x")).await.unwrap();
    assert!(rpc.calls().is_empty());
    assert_eq!(native.seen().len(), 1);

    let config = TunnelConfig::default().with_policy(InterceptPolicy::default().with_absolute_urls(true));
    let fetch = interceptor(rpc.clone(), StubFetch::new(), config);
    let response = fetch
        .fetch(HttpRequest::get("https://other.example/api/x?y=1#frag"))
        .await
        .unwrap();
    assert_eq!(response.status, 204);
    assert!(response.body.is_none());
    assert_eq!(rpc.last_arguments()["url"], "https://other.example/api/x?y=1");
}

#[tokio::test]
async fn remote_error_carries_message() {
    let rpc = StubRpc::responding(|_| Ok(ToolResult::error("upstream refused: path not allowed")));
    let fetch = interceptor(rpc, StubFetch::new(), TunnelConfig::default());
    let err = fetch.fetch(HttpRequest::get("/anything")).await.unwrap_err();
    assert_eq!(err, TunnelError::Remote("upstream refused: path not allowed".to_string()));
}

#[tokio::test]
async fn missing_status_is_malformed_with_preview() {
    let rpc = StubRpc::returning(json!({"headers": {}, "body": "x".repeat(500)}));
    let fetch = interceptor(rpc, StubFetch::new(), TunnelConfig::default());
    match fetch.fetch(HttpRequest::get("/anything")).await.unwrap_err() {
        TunnelError::MalformedResult { message, preview } => {
            assert!(message.contains("status"));
            assert!(preview.ends_with("..."));
            assert_eq!(preview.chars().count(), 203);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn text_content_is_accepted_when_structured_is_missing() {
    let rpc = StubRpc::responding(|_| {
        Ok(ToolResult {
            is_error: false,
            structured_content: None,
            content: vec![tunnel_core::ContentBlock::text(
                r#"{"status":200,"headers":{"content-type":"text/plain"},"bodyType":"text","body":"hi"}"#,
            )],
        })
    });
    let fetch = interceptor(rpc, StubFetch::new(), TunnelConfig::default());
    let response = fetch.fetch(HttpRequest::get("/greeting")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "hi");
}

#[tokio::test]
async fn already_aborted_signal_rejects_before_any_call() {
    let rpc = StubRpc::returning(created_item_envelope());
    let native = StubFetch::new();
    let fetch = interceptor(rpc.clone(), native.clone(), TunnelConfig::default());

    let controller = AbortController::new();
    controller.abort();
    let err = fetch
        .fetch(HttpRequest::get("/api/items").signal(controller.signal()))
        .await
        .unwrap_err();
    assert!(matches!(err, TunnelError::Aborted(_)));
    assert!(rpc.calls().is_empty());
    assert!(native.seen().is_empty());
}

#[tokio::test]
async fn caller_abort_unwinds_pending_call() {
    let rpc = StubRpc::pending();
    let fetch = Arc::new(interceptor(rpc.clone(), StubFetch::new(), TunnelConfig::default()));
    let controller = AbortController::new();

    let task = {
        let fetch = fetch.clone();
        let signal = controller.signal();
        tokio::spawn(async move { fetch.fetch(HttpRequest::get("/slow").signal(signal)).await })
    };
    while rpc.calls().is_empty() {
        tokio::task::yield_now().await;
    }
    controller.abort();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, TunnelError::Aborted(_)));
    assert_eq!(controller.signal().listener_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn default_timeout_surfaces_as_timed_out() {
    let rpc = StubRpc::pending();
    let config = TunnelConfig::default().with_default_timeout(Duration::from_millis(50));
    let fetch = interceptor(rpc.clone(), StubFetch::new(), config);
    let caller = AbortController::new();

    let err = fetch
        .fetch(HttpRequest::get("/slow").signal(caller.signal()))
        .await
        .unwrap_err();
    assert_eq!(err, TunnelError::TimedOut);
    assert_eq!(rpc.last_arguments()["timeoutMs"], 50);
    assert_eq!(caller.signal().listener_count(), 0);
}

#[tokio::test]
async fn stopped_adapter_passes_through() {
    let rpc = StubRpc::returning(created_item_envelope());
    let native = StubFetch::new();
    let fetch = interceptor(rpc.clone(), native.clone(), TunnelConfig::default());

    fetch.handle().stop();
    fetch.fetch(HttpRequest::get("/api/items")).await.unwrap();
    assert!(rpc.calls().is_empty());

    fetch.handle().start();
    fetch.fetch(HttpRequest::get("/api/items")).await.unwrap();
    assert_eq!(rpc.calls().len(), 1);

    fetch.handle().restore();
    fetch.handle().start();
    fetch.fetch(HttpRequest::get("/api/items")).await.unwrap();
    assert_eq!(rpc.calls().len(), 1);
    assert_eq!(native.seen().len(), 2);
}

#[tokio::test]
async fn binary_response_becomes_blob() {
    let rpc = StubRpc::returning(json!({
        "status": 200,
        "headers": {"content-type": "image/png"},
        "bodyType": "base64",
        "body": {"data": "iVBORw==", "contentType": "image/png"}
    }));
    let fetch = interceptor(rpc, StubFetch::new(), TunnelConfig::default());
    let response = fetch.fetch(HttpRequest::get("/logo.png")).await.unwrap();
    let blob = response.blob().await.unwrap();
    assert_eq!(blob.content_type, "image/png");
    assert_eq!(blob.bytes, vec![0x89, b'P', b'N', b'G']);
}

#[tokio::test]
async fn custom_tool_name_is_used() {
    let rpc = StubRpc::returning(json!({"status": 200}));
    let fetch = interceptor(
        rpc.clone(),
        StubFetch::new(),
        TunnelConfig::default().with_tool_name("proxy_http"),
    );
    fetch.fetch(HttpRequest::get("/x")).await.unwrap();
    assert_eq!(rpc.calls()[0].name, "proxy_http");
}

//! `HttpProxyHandler` against the live mock upstream.

mod common;

use std::time::Duration;

use common::{spawn_upstream, CapturingFetch};
use serde_json::{json, Value};
use tunnel_core::{AbortController, BodyType, TunnelError};
use tunnel_proxy::{HeaderSource, HttpProxyHandler, ProxyConfig, ProxyError};

fn handler() -> HttpProxyHandler {
    HttpProxyHandler::new(ProxyConfig::default())
}

#[tokio::test]
async fn json_post_reaches_upstream() {
    let base = spawn_upstream().await;
    let envelope = handler()
        .handle(
            json!({
                "method": "POST",
                "url": format!("{base}/api/items"),
                "headers": {"content-type": "application/json"},
                "bodyType": "json",
                "body": {"name": "Widget"}
            }),
            None,
        )
        .await
        .unwrap();

    assert_eq!(envelope.status, 201);
    assert!(envelope.ok);
    assert_eq!(envelope.status_text.as_deref(), Some("Created"));
    assert_eq!(envelope.body_type, BodyType::Json);
    let body = envelope.body.unwrap();
    assert_eq!(body["name"], "Widget");
    assert!(body["id"].is_string());
}

#[tokio::test]
async fn text_and_binary_responses_are_sniffed() {
    let base = spawn_upstream().await;

    let text = handler()
        .handle(json!({"method": "GET", "url": format!("{base}/text")}), None)
        .await
        .unwrap();
    assert_eq!(text.body_type, BodyType::Text);
    assert_eq!(text.body, Some(Value::String(mock_server::TEXT_BODY.to_string())));
    assert_eq!(text.headers["content-type"], "text/plain; charset=utf-8");

    let bytes = handler()
        .handle(json!({"method": "GET", "url": format!("{base}/bytes")}), None)
        .await
        .unwrap();
    assert_eq!(bytes.body_type, BodyType::Base64);
    assert_eq!(bytes.body, Some(Value::String("AAEC/w==".to_string())));
}

#[tokio::test]
async fn empty_and_falsy_bodies() {
    let base = spawn_upstream().await;

    let empty = handler()
        .handle(json!({"method": "GET", "url": format!("{base}/empty")}), None)
        .await
        .unwrap();
    assert_eq!(empty.status, 204);
    assert_eq!(empty.body_type, BodyType::None);
    assert!(empty.body.is_none());

    let falsy = handler()
        .handle(json!({"method": "GET", "url": format!("{base}/falsy")}), None)
        .await
        .unwrap();
    assert_eq!(falsy.body_type, BodyType::Json);
    assert_eq!(falsy.body, Some(Value::Bool(false)));

    let zero = handler()
        .handle(json!({"method": "GET", "url": format!("{base}/zero")}), None)
        .await
        .unwrap();
    assert_eq!(zero.body, Some(json!(0)));
}

#[tokio::test]
async fn error_statuses_are_responses_not_failures() {
    let base = spawn_upstream().await;
    let envelope = handler()
        .handle(json!({"method": "GET", "url": format!("{base}/status/503")}), None)
        .await
        .unwrap();
    assert_eq!(envelope.status, 503);
    assert!(!envelope.ok);
}

#[tokio::test]
async fn redirect_modes() {
    let base = spawn_upstream().await;

    let followed = handler()
        .handle(json!({"method": "GET", "url": format!("{base}/redirect")}), None)
        .await
        .unwrap();
    assert_eq!(followed.status, 200);
    assert!(followed.redirected);
    assert_eq!(followed.url, format!("{base}/text"));

    let manual = handler()
        .handle(
            json!({"method": "GET", "url": format!("{base}/redirect"), "redirect": "manual"}),
            None,
        )
        .await
        .unwrap();
    assert_eq!(manual.status, 307);
    assert!(!manual.redirected);

    let refused = handler()
        .handle(
            json!({"method": "GET", "url": format!("{base}/redirect"), "redirect": "error"}),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(refused, ProxyError::Tunnel(TunnelError::Network(_))));
}

#[tokio::test]
async fn urlencoded_bodies_get_their_content_type() {
    let base = spawn_upstream().await;
    let envelope = handler()
        .handle(
            json!({
                "method": "POST",
                "url": format!("{base}/form"),
                "bodyType": "urlEncoded",
                "body": "q=a+b&lang=en"
            }),
            None,
        )
        .await
        .unwrap();
    assert_eq!(envelope.status, 200);
    assert_eq!(envelope.body, Some(json!({"q": "a b", "lang": "en"})));
}

#[tokio::test]
async fn envelope_timeout_ends_a_slow_request() {
    let base = spawn_upstream().await;
    let err = handler()
        .handle(
            json!({"method": "GET", "url": format!("{base}/slow?ms=5000"), "timeoutMs": 50}),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err, ProxyError::Tunnel(TunnelError::TimedOut));
}

#[tokio::test]
async fn caller_abort_ends_a_slow_request() {
    let base = spawn_upstream().await;
    let controller = AbortController::new();
    let signal = controller.signal();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.abort();
    });

    let err = handler()
        .handle(json!({"method": "GET", "url": format!("{base}/slow?ms=5000")}), Some(signal))
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::Tunnel(TunnelError::Aborted(_))));
}

#[tokio::test]
async fn body_size_limit() {
    let base = spawn_upstream().await;
    let handler = HttpProxyHandler::new(ProxyConfig::default().with_max_body_size(10));

    let err = handler
        .handle(
            json!({
                "method": "POST",
                "url": format!("{base}/echo"),
                "bodyType": "text",
                "body": "x".repeat(32)
            }),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err, ProxyError::BodyTooLarge { size: 32, limit: 10 });

    let envelope = handler
        .handle(
            json!({"method": "POST", "url": format!("{base}/echo"), "bodyType": "text", "body": "0123456789"}),
            None,
        )
        .await
        .unwrap();
    assert_eq!(envelope.body.unwrap()["body"], "0123456789");
}

#[tokio::test]
async fn stray_get_bodies_do_not_count_against_the_limit() {
    let client = CapturingFetch::new();
    let handler = HttpProxyHandler::new(ProxyConfig::default().with_max_body_size(10).with_client(client.clone()));

    handler
        .handle(
            json!({
                "method": "GET",
                "url": "https://api.example.com/search",
                "bodyType": "text",
                "body": "x".repeat(32)
            }),
            None,
        )
        .await
        .unwrap();
    assert!(client.last().body.is_none());
}

#[tokio::test]
async fn allow_lists_reject_before_any_traffic() {
    let client = CapturingFetch::new();
    let handler = HttpProxyHandler::new(
        ProxyConfig::default()
            .with_allowed_origins(["https://api.example.com"])
            .with_allowed_paths(["/api"])
            .with_client(client.clone()),
    );

    let err = handler
        .handle(json!({"method": "GET", "url": "https://evil.example.com/api/x"}), None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ProxyError::OriginNotAllowed {
            origin: "https://evil.example.com".to_string()
        }
    );

    let err = handler
        .handle(json!({"method": "GET", "url": "https://api.example.com/admin"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::PathNotAllowed { .. }));

    handler
        .handle(json!({"method": "GET", "url": "https://api.example.com/api/x"}), None)
        .await
        .unwrap();
    assert_eq!(client.last().url, "https://api.example.com/api/x");
}

#[tokio::test]
async fn empty_path_list_allows_nothing() {
    let handler = HttpProxyHandler::new(
        ProxyConfig::default()
            .with_allowed_paths(Vec::<String>::new())
            .with_client(CapturingFetch::new()),
    );
    let err = handler
        .handle(json!({"method": "GET", "url": "https://api.example.com/"}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::PathNotAllowed { .. }));
}

#[tokio::test]
async fn authorization_never_leaves_the_proxy() {
    let client = CapturingFetch::new();
    let handler = HttpProxyHandler::new(
        ProxyConfig::default()
            .with_headers(HeaderSource::Static(
                [("authorization", "Bearer configured"), ("x-api-version", "2")]
                    .into_iter()
                    .collect(),
            ))
            .with_client(client.clone()),
    );

    handler
        .handle(
            json!({
                "method": "GET",
                "url": "https://api.example.com/me",
                "headers": {"Authorization": "Bearer caller", "Cookie": "a=b", "Accept": "application/json"}
            }),
            None,
        )
        .await
        .unwrap();

    let request = client.last();
    assert!(request.headers.get("authorization").is_none());
    assert!(request.headers.get("cookie").is_none());
    assert_eq!(request.headers.get("accept"), Some("application/json"));
    assert_eq!(request.headers.get("x-api-version"), Some("2"));
}

#[tokio::test]
async fn derived_headers_and_relative_urls() {
    let client = CapturingFetch::new();
    let handler = HttpProxyHandler::new(
        ProxyConfig::default()
            .with_base_url("https://api.example.com/v1/")
            .unwrap()
            .with_headers(HeaderSource::derived(|envelope: &tunnel_core::HttpRequestEnvelope| {
                [("x-upstream-method", envelope.method.as_str())].into_iter().collect()
            }))
            .with_client(client.clone()),
    );

    let envelope = handler
        .handle(json!({"method": "DELETE", "url": "items/7"}), None)
        .await
        .unwrap();
    assert_eq!(envelope.status, 204);

    let request = client.last();
    assert_eq!(request.url, "https://api.example.com/v1/items/7");
    assert_eq!(request.headers.get("x-upstream-method"), Some("DELETE"));
}

#[tokio::test]
async fn call_tool_wraps_outcomes() {
    let base = spawn_upstream().await;
    let handler = handler();

    let ok = handler
        .call_tool(json!({"method": "GET", "url": format!("{base}/text")}), None)
        .await;
    assert!(!ok.is_error);
    assert_eq!(ok.structured_content.unwrap()["status"], 200);

    let err = handler.call_tool(json!({"url": 42}), None).await;
    assert!(err.is_error);
    assert!(err.text().starts_with("invalid request envelope"));
}

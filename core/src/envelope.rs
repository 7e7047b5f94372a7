//! Request/response envelopes carried across the procedure boundary.
//!
//! # Design
//! Envelopes are the only data that crosses the trust boundary, so they are
//! plain serde structs with camelCase wire names. Building a request
//! envelope enforces the GET/HEAD-has-no-body invariant; unpacking a
//! procedure result enforces the numeric-status invariant and reports every
//! violation with a preview of the offending payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{BodyType, EncodedBody};
use crate::error::{Result, TunnelError};
use crate::headers::Headers;
use crate::http::{CachePolicy, CredentialsPolicy, HttpMethod, RedirectPolicy};
use crate::rpc::ToolResult;

const PREVIEW_LIMIT: usize = 200;

fn default_method() -> String {
    "GET".to_string()
}

/// HTTP request in transport form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestEnvelope {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CachePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl HttpRequestEnvelope {
    pub fn method(&self) -> HttpMethod {
        HttpMethod::parse(&self.method)
    }
}

/// HTTP response in transport form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseEnvelope {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default)]
    pub body_type: BodyType,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub redirected: bool,
    #[serde(default)]
    pub ok: bool,
}

/// Everything needed to build a request envelope.
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: EncodedBody,
    pub redirect: Option<RedirectPolicy>,
    pub cache: Option<CachePolicy>,
    pub credentials: Option<CredentialsPolicy>,
    pub timeout_ms: Option<u64>,
}

/// Composes the procedure argument for a request.
pub fn build_request_envelope(parts: RequestParts) -> HttpRequestEnvelope {
    let (body, body_type) = if parts.method.allows_body() && parts.body.body_type != BodyType::None {
        (parts.body.payload, parts.body.body_type)
    } else {
        (None, BodyType::None)
    };
    HttpRequestEnvelope {
        method: parts.method.as_str().to_string(),
        url: parts.url,
        headers: parts.headers.to_map(),
        body,
        body_type,
        redirect: parts.redirect,
        cache: parts.cache,
        credentials: parts.credentials,
        timeout_ms: parts.timeout_ms.filter(|ms| *ms > 0),
    }
}

/// Composes a response envelope; `ok` is derived from `status`.
pub fn build_response_envelope(
    status: u16,
    status_text: Option<String>,
    headers: &Headers,
    body: EncodedBody,
    url: String,
    redirected: bool,
) -> HttpResponseEnvelope {
    HttpResponseEnvelope {
        status,
        status_text,
        headers: headers.to_map(),
        body: body.payload,
        body_type: body.body_type,
        url,
        redirected,
        ok: (200..300).contains(&status),
    }
}

/// Truncates a payload for error messages, on a character boundary.
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn malformed(message: impl Into<String>, payload: &str) -> TunnelError {
    TunnelError::MalformedResult {
        message: message.into(),
        preview: preview(payload),
    }
}

/// Validates a JSON value as a response envelope.
pub fn parse_response_value(value: Value) -> Result<HttpResponseEnvelope> {
    let status_ok = value
        .get("status")
        .and_then(Value::as_u64)
        .is_some_and(|status| status <= u64::from(u16::MAX));
    if !value.is_object() {
        return Err(malformed("response envelope is not an object", &value.to_string()));
    }
    if !status_ok {
        return Err(malformed("response envelope has no numeric status", &value.to_string()));
    }
    let raw = value.to_string();
    let mut envelope: HttpResponseEnvelope = serde_json::from_value(value)
        .map_err(|e| malformed(format!("response envelope does not match schema: {e}"), &raw))?;
    envelope.ok = (200..300).contains(&envelope.status);
    Ok(envelope)
}

/// Unpacks a procedure result into a response envelope.
///
/// Application errors become [`TunnelError::Remote`]. Structured content is
/// preferred; a text block holding the JSON serialization is accepted as a
/// degraded form.
pub fn parse_tool_result(result: ToolResult) -> Result<HttpResponseEnvelope> {
    if result.is_error {
        let message = result.text();
        let message = if message.trim().is_empty() {
            "remote procedure reported an error".to_string()
        } else {
            message
        };
        return Err(TunnelError::Remote(message));
    }
    if let Some(structured) = result.structured_content {
        return parse_response_value(structured);
    }
    let text = result.text();
    if text.trim().is_empty() {
        return Err(malformed(
            "result carries neither structured content nor text",
            "",
        ));
    }
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| malformed(format!("text content is not JSON: {e}"), &text))?;
    parse_response_value(value)
}

//! The remote-procedure boundary, consumed as an opaque capability.
//!
//! # Design
//! The transport and its handshake live outside this crate. All the
//! interceptors need is "call a named procedure, optionally cancellable" and
//! "is that procedure callable right now"; `RpcClient` is exactly that.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::abort::AbortSignal;
use crate::error::Result;

/// Default name of the remote HTTP procedure.
pub const DEFAULT_TOOL_NAME: &str = "http_request";

/// A procedure invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

/// One block of human-readable result content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// What a procedure call returns.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl ToolResult {
    pub fn structured(value: Value) -> Self {
        Self {
            is_error: false,
            content: vec![ContentBlock::text(value.to_string())],
            structured_content: Some(value),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            structured_content: None,
            content: vec![ContentBlock::text(message)],
        }
    }

    /// All text blocks joined with newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Client side of the remote-procedure transport.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Invokes a procedure. Implementations should unwind promptly once
    /// `signal` fires.
    async fn call_tool(&self, call: ToolCall, signal: Option<AbortSignal>) -> Result<ToolResult>;

    /// Capability probe: whether the host currently exposes `name`.
    fn is_tool_available(&self, name: &str) -> bool;
}

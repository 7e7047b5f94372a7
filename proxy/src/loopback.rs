//! In-process [`RpcClient`] that answers with a local [`HttpProxyHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use tunnel_core::{AbortSignal, Result, RpcClient, ToolCall, ToolResult};

use crate::handler::HttpProxyHandler;

/// Connects the client-side interceptors directly to a handler, with no
/// transport in between. Only the handler's own tool name is served.
#[derive(Debug, Clone)]
pub struct LoopbackRpc {
    handler: Arc<HttpProxyHandler>,
}

impl LoopbackRpc {
    pub fn new(handler: HttpProxyHandler) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub fn from_shared(handler: Arc<HttpProxyHandler>) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &HttpProxyHandler {
        &self.handler
    }
}

#[async_trait]
impl RpcClient for LoopbackRpc {
    async fn call_tool(&self, call: ToolCall, signal: Option<AbortSignal>) -> Result<ToolResult> {
        if call.name != self.handler.tool_name() {
            return Ok(ToolResult::error(format!("unknown tool `{}`", call.name)));
        }
        Ok(self.handler.call_tool(call.arguments, signal).await)
    }

    fn is_tool_available(&self, name: &str) -> bool {
        name == self.handler.tool_name()
    }
}

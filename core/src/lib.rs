//! HTTP interception core: tunnels HTTP-shaped calls through a remote
//! procedure.
//!
//! # Overview
//! A sandboxed caller issues ordinary HTTP requests through [`Fetch`] or the
//! event-driven [`TunnelXhr`]. Requests matching the [`InterceptPolicy`]
//! are encoded into a JSON [`HttpRequestEnvelope`] and handed to an
//! [`RpcClient`]; the [`HttpResponseEnvelope`] that comes back is decoded
//! into a native-shaped response. Everything else passes through to the
//! injected native implementation untouched.
//!
//! # Design
//! - The core performs no network I/O. The native HTTP surface and the RPC
//!   transport are trait objects supplied by the host.
//! - Body conversion is centralized in [`codec`]: one table from native
//!   bodies to `(payload, BodyType)` and one back.
//! - Cancellation is one mechanism: timeouts are abort signals fired by a
//!   timer and combined with the caller's signal by [`merge_signals`].
//! - [`global`] is an optional outer adapter; core logic never reads it.

pub mod abort;
pub mod adapter;
pub mod body;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod fetch;
pub mod global;
pub mod headers;
pub mod http;
pub mod policy;
pub mod rpc;
pub mod xhr;

pub use abort::{merge_signals, AbortController, AbortReason, AbortSignal, MergedSignal, TimeoutSignal};
pub use adapter::{AdapterHandle, AdapterState};
pub use body::{Blob, Body, FormData, FormValue, UrlSearchParams};
pub use codec::{BodyType, EncodedBody, FormField};
pub use config::TunnelConfig;
pub use envelope::{HttpRequestEnvelope, HttpResponseEnvelope};
pub use error::{Result, TunnelError};
pub use fetch::TunnelFetch;
pub use headers::Headers;
pub use http::{CachePolicy, CredentialsPolicy, Fetch, HttpMethod, HttpRequest, HttpResponse, RedirectPolicy};
pub use policy::InterceptPolicy;
pub use rpc::{ContentBlock, RpcClient, ToolCall, ToolResult, DEFAULT_TOOL_NAME};
pub use xhr::{ReadyState, ResponseType, TunnelXhr, XhrEvent, XhrEventKind, XhrFactory, XhrResponse};

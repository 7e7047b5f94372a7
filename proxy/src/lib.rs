//! Server side of the HTTP tunnel.
//!
//! [`HttpProxyHandler`] receives the request envelopes produced by
//! `tunnel-core`, checks them against its allow-lists and size limit, makes
//! the real request with [`ReqwestFetch`] (or any injected [`Fetch`]) and
//! answers with a response envelope. [`LoopbackRpc`] wires a handler
//! straight into the client-side interceptors for in-process use.
//!
//! [`Fetch`]: tunnel_core::Fetch

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod loopback;

pub use client::ReqwestFetch;
pub use config::{HeaderSource, ProxyConfig, DEFAULT_MAX_BODY_SIZE, DEFAULT_TIMEOUT};
pub use error::{ProxyError, Result};
pub use handler::HttpProxyHandler;
pub use loopback::LoopbackRpc;

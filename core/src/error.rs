//! Error types for the tunnelling layer.
//!
//! # Design
//! One enum covers every failure a caller of the interceptors can observe.
//! Policy rejections, remote failures and malformed results each get their
//! own variant so callers can tell "the host refused" apart from "the host
//! answered garbage". Cancellation is split into `Aborted` and `TimedOut`
//! because the stateful interceptor names its terminal event after the cause.

use thiserror::Error;

use crate::abort::AbortReason;

/// Errors produced by the interceptors, the codec and the envelope builder.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TunnelError {
    /// The request was intercepted but refused by an allow-list or a limit.
    #[error("request rejected: {0}")]
    PolicyRejected(String),

    /// Tunnelling was requested but the host does not expose the procedure.
    #[error("remote procedure `{tool}` is not available and fallback to native HTTP is disabled")]
    CapabilityUnavailable { tool: String },

    /// The procedure ran and reported an application-level failure.
    #[error("remote procedure failed: {0}")]
    Remote(String),

    /// The procedure returned something that is not a response envelope.
    #[error("malformed remote result: {message} (payload preview: {preview})")]
    MalformedResult { message: String, preview: String },

    /// The caller's cancellation token was triggered.
    #[error("request aborted: {0}")]
    Aborted(AbortReason),

    /// The internally derived timeout token fired.
    #[error("request timed out")]
    TimedOut,

    /// Synchronous requests cannot be tunnelled.
    #[error("synchronous requests cannot be tunnelled through the remote procedure; use async mode")]
    SyncUnsupported,

    /// An operation was attempted in a state that does not permit it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The request URL could not be parsed or resolved.
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The underlying HTTP implementation failed before producing a response.
    #[error("network error: {0}")]
    Network(String),

    /// A body payload could not be converted between representations.
    #[error("body codec error: {0}")]
    Codec(String),
}

impl TunnelError {
    /// Maps a triggered abort reason onto the matching error variant.
    pub fn from_abort(reason: AbortReason) -> Self {
        match reason {
            AbortReason::TimedOut => TunnelError::TimedOut,
            other => TunnelError::Aborted(other),
        }
    }

    /// True for errors caused by cancellation rather than by the request itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TunnelError::Aborted(_) | TunnelError::TimedOut)
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;

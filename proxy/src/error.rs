//! Errors produced while serving a tunnelled request.

use thiserror::Error;
use tunnel_core::TunnelError;

/// Why the handler refused or failed a request envelope.
///
/// Rejections (`Origin`, `Path`, `BodyTooLarge`) happen before any network
/// traffic; `Tunnel` wraps failures of the real HTTP call and of the codec.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProxyError {
    #[error("invalid request envelope: {0}")]
    InvalidEnvelope(String),

    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("origin `{origin}` is not allowed")]
    OriginNotAllowed { origin: String },

    #[error("path `{path}` is not allowed")]
    PathNotAllowed { path: String },

    #[error("request body of {size} bytes exceeds the limit of {limit} bytes")]
    BodyTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Tunnel(#[from] TunnelError),
}

impl ProxyError {
    /// True for allow-list and size-limit rejections.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            ProxyError::OriginNotAllowed { .. } | ProxyError::PathNotAllowed { .. } | ProxyError::BodyTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

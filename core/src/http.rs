//! Native HTTP surface as plain data plus the `Fetch` seam.
//!
//! # Design
//! `HttpRequest` and `HttpResponse` describe one request/response pair
//! without touching the network. Whoever implements [`Fetch`] performs the
//! round-trip: a real client on the host, or the tunnelling interceptor in
//! the sandbox. Both sides speak the same types, so the interceptor is a
//! drop-in replacement for the native implementation it wraps.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::abort::AbortSignal;
use crate::body::{Blob, Body, FormData, UrlSearchParams};
use crate::error::{Result, TunnelError};
use crate::headers::{media_type, Headers};

/// HTTP method for a request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    /// Any other token, stored upper-cased.
    Other(String),
}

impl HttpMethod {
    /// Case-insensitive parse; an empty string means GET.
    pub fn parse(method: &str) -> Self {
        let upper = method.trim().to_ascii_uppercase();
        match upper.as_str() {
            "" | "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "OPTIONS" => HttpMethod::Options,
            _ => HttpMethod::Other(upper),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Other(token) => token,
        }
    }

    /// GET and HEAD never carry a body.
    pub fn allows_body(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectPolicy {
    #[default]
    Follow,
    Manual,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialsPolicy {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// An HTTP request described as plain data.
#[derive(Debug)]
pub struct HttpRequest {
    pub method: HttpMethod,
    /// Absolute, or relative to the caller's base URL.
    pub url: String,
    pub headers: Headers,
    pub body: Option<Body>,
    pub redirect: RedirectPolicy,
    pub cache: CachePolicy,
    pub credentials: CredentialsPolicy,
    pub signal: Option<AbortSignal>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
            redirect: RedirectPolicy::default(),
            cache: CachePolicy::default(),
            credentials: CredentialsPolicy::default(),
            signal: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json(self, value: serde_json::Value) -> Self {
        self.header("content-type", "application/json")
            .body(Body::Json(value))
    }

    pub fn redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    pub fn credentials(mut self, credentials: CredentialsPolicy) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// An HTTP response described as plain data.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    /// Final URL after redirects.
    pub url: String,
    pub redirected: bool,
    pub body: Option<Body>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Headers::new(),
            url: String::new(),
            redirected: false,
            body: None,
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text. Binary bodies are decoded as UTF-8, lossily.
    pub async fn text(self) -> Result<String> {
        match self.body {
            None => Ok(String::new()),
            Some(Body::Text(text)) => Ok(text),
            Some(body) => Ok(String::from_utf8_lossy(&body.into_bytes().await?).into_owned()),
        }
    }

    pub async fn json(self) -> Result<serde_json::Value> {
        match self.body {
            Some(Body::Json(value)) => Ok(value),
            None => Err(TunnelError::Codec("response has no body to parse as JSON".to_string())),
            Some(body) => {
                let bytes = body.into_bytes().await?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| TunnelError::Codec(format!("response body is not valid JSON: {e}")))
            }
        }
    }

    pub async fn bytes(self) -> Result<Vec<u8>> {
        match self.body {
            None => Ok(Vec::new()),
            Some(body) => body.into_bytes().await,
        }
    }

    /// Body as a blob typed with the response's content type.
    pub async fn blob(self) -> Result<Blob> {
        let content_type = self
            .headers
            .content_type()
            .map(media_type)
            .unwrap_or_default();
        match self.body {
            Some(Body::Blob(blob)) => Ok(blob),
            None => Ok(Blob::new(Vec::new(), content_type)),
            Some(body) => Ok(Blob::new(body.into_bytes().await?, content_type)),
        }
    }

    /// Body as a form. URL-encoded bodies become text entries.
    pub async fn form_data(self) -> Result<FormData> {
        match self.body {
            Some(Body::Form(form)) => Ok(form),
            Some(Body::UrlEncoded(params)) => Ok(params_to_form(&params)),
            Some(Body::Text(text)) => Ok(params_to_form(&UrlSearchParams::parse(&text))),
            _ => Err(TunnelError::Codec(
                "response body cannot be read as form data".to_string(),
            )),
        }
    }
}

fn params_to_form(params: &UrlSearchParams) -> FormData {
    let mut form = FormData::new();
    for (name, value) in params.pairs() {
        form.append_text(name.clone(), value.clone());
    }
    form
}

/// Performs an HTTP round-trip.
///
/// Implemented by the real network client on the host and by the tunnelling
/// interceptor in the sandbox.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse>;
}

//! Native body representations.
//!
//! These are the shapes a caller hands to the interceptors and receives
//! back from them. The codec maps each variant onto one envelope tag.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::error::{Result, TunnelError};

/// A byte-producing stream, drained completely before it is tunnelled.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Raw bytes tagged with a media type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl Blob {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Value of a multipart form entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    File { blob: Blob, filename: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormEntry {
    pub name: String,
    pub value: FormValue,
}

/// An ordered multipart form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    entries: Vec<FormEntry>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(FormEntry {
            name: name.into(),
            value: FormValue::Text(value.into()),
        });
    }

    pub fn append_file(&mut self, name: impl Into<String>, blob: Blob, filename: Option<String>) {
        self.entries.push(FormEntry {
            name: name.into(),
            value: FormValue::File { blob, filename },
        });
    }

    pub fn push(&mut self, entry: FormEntry) {
        self.entries.push(entry);
    }

    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.value)
    }

    pub fn entries(&self) -> &[FormEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered key/value query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlSearchParams {
    pairs: Vec<(String, String)>,
}

impl UrlSearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `a=1&b=two`; a leading `?` is ignored.
    pub fn parse(input: &str) -> Self {
        let input = input.strip_prefix('?').unwrap_or(input);
        Self {
            pairs: url::form_urlencoded::parse(input.as_bytes())
                .into_owned()
                .collect(),
        }
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

impl fmt::Display for UrlSearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.pairs.iter())
            .finish();
        f.write_str(&encoded)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UrlSearchParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// A request or response body in native form.
pub enum Body {
    Text(String),
    /// A parsed JSON value, sent as `application/json`.
    Json(serde_json::Value),
    UrlEncoded(UrlSearchParams),
    Form(FormData),
    Bytes(Vec<u8>),
    Blob(Blob),
    Stream(BodyStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Body::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Body::UrlEncoded(params) => f.debug_tuple("UrlEncoded").field(params).finish(),
            Body::Form(form) => f.debug_tuple("Form").field(form).finish(),
            Body::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Body::Blob(blob) => f.debug_tuple("Blob").field(&blob.content_type).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Body::Text(a), Body::Text(b)) => a == b,
            (Body::Json(a), Body::Json(b)) => a == b,
            (Body::UrlEncoded(a), Body::UrlEncoded(b)) => a == b,
            (Body::Form(a), Body::Form(b)) => a == b,
            (Body::Bytes(a), Body::Bytes(b)) => a == b,
            (Body::Blob(a), Body::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Body::Json(value)
    }
}

impl From<FormData> for Body {
    fn from(form: FormData) -> Self {
        Body::Form(form)
    }
}

impl From<UrlSearchParams> for Body {
    fn from(params: UrlSearchParams) -> Self {
        Body::UrlEncoded(params)
    }
}

impl From<Blob> for Body {
    fn from(blob: Blob) -> Self {
        Body::Blob(blob)
    }
}

impl Body {
    /// Content type a native client would set when the caller declared none.
    ///
    /// Multipart forms return `None`: the boundary is chosen by whichever
    /// client finally serializes the form.
    pub fn default_content_type(&self) -> Option<String> {
        match self {
            Body::Text(_) => Some("text/plain;charset=UTF-8".to_string()),
            Body::Json(_) => Some("application/json".to_string()),
            Body::UrlEncoded(_) => {
                Some("application/x-www-form-urlencoded;charset=UTF-8".to_string())
            }
            Body::Blob(blob) if !blob.content_type.is_empty() => Some(blob.content_type.clone()),
            Body::Form(_) | Body::Bytes(_) | Body::Blob(_) | Body::Stream(_) => None,
        }
    }

    /// Flattens the body to bytes, draining streams.
    ///
    /// Forms have no byte form without a boundary and are rejected.
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Body::Text(text) => Ok(text.into_bytes()),
            Body::Json(value) => serde_json::to_vec(&value)
                .map_err(|e| TunnelError::Codec(format!("failed to serialize JSON body: {e}"))),
            Body::UrlEncoded(params) => Ok(params.to_string().into_bytes()),
            Body::Bytes(bytes) => Ok(bytes),
            Body::Blob(blob) => Ok(blob.bytes),
            Body::Stream(stream) => drain_stream(stream).await,
            Body::Form(_) => Err(TunnelError::Codec(
                "multipart form bodies have no standalone byte representation".to_string(),
            )),
        }
    }
}

/// Reads a body stream to the end.
pub async fn drain_stream(mut stream: BodyStream) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TunnelError::Codec(format!("failed to read body stream: {e}")))?;
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer)
}

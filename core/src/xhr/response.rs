//! Response types and decoding of a response envelope into them.

use serde_json::Value;

use crate::body::{Blob, Body};
use crate::codec::{decode_body, estimate_size, BodyShape, BodyType};
use crate::error::Result;

/// The representation requested through `responseType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// `""`: text.
    #[default]
    Default,
    Text,
    Json,
    ArrayBuffer,
    Blob,
    Document,
}

impl ResponseType {
    /// Parses the native string form; unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "" => Some(ResponseType::Default),
            "text" => Some(ResponseType::Text),
            "json" => Some(ResponseType::Json),
            "arraybuffer" => Some(ResponseType::ArrayBuffer),
            "blob" => Some(ResponseType::Blob),
            "document" => Some(ResponseType::Document),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ResponseType::Default | ResponseType::Text)
    }
}

/// A decoded response value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum XhrResponse {
    #[default]
    Null,
    Text(String),
    Json(Value),
    ArrayBuffer(Vec<u8>),
    Blob(Blob),
}

impl XhrResponse {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            XhrResponse::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            XhrResponse::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, XhrResponse::Null)
    }
}

/// Decodes an envelope body into `response_type`; also returns the loaded
/// byte count for progress events.
pub(crate) fn decode_response(
    payload: Option<&Value>,
    body_type: BodyType,
    response_type: ResponseType,
    content_type: Option<&str>,
    verbose: bool,
) -> Result<(XhrResponse, u64)> {
    let loaded = u64::try_from(estimate_size(payload, body_type)).unwrap_or(u64::MAX);
    let response = match response_type {
        ResponseType::Default | ResponseType::Text => {
            match decode_body(payload, body_type, BodyShape::Text, content_type, verbose)? {
                Some(Body::Text(text)) => XhrResponse::Text(text),
                _ => XhrResponse::Text(String::new()),
            }
        }
        ResponseType::Json => {
            match decode_body(payload, body_type, BodyShape::Json, content_type, verbose)? {
                Some(Body::Json(value)) => XhrResponse::Json(value),
                Some(_) => {
                    tracing::warn!(
                        body_type = body_type.as_str(),
                        "response body is not valid JSON; response is null"
                    );
                    XhrResponse::Null
                }
                None => XhrResponse::Null,
            }
        }
        ResponseType::ArrayBuffer => {
            match decode_body(payload, body_type, BodyShape::Bytes, content_type, verbose)? {
                Some(Body::Bytes(bytes)) => XhrResponse::ArrayBuffer(bytes),
                _ => XhrResponse::ArrayBuffer(Vec::new()),
            }
        }
        ResponseType::Blob => {
            match decode_body(payload, body_type, BodyShape::Blob, content_type, verbose)? {
                Some(Body::Blob(blob)) => XhrResponse::Blob(blob),
                _ => XhrResponse::Blob(Blob::new(
                    Vec::new(),
                    content_type.map(crate::headers::media_type).unwrap_or_default(),
                )),
            }
        }
        ResponseType::Document => XhrResponse::Null,
    };
    Ok((response, loaded))
}

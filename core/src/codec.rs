//! Bidirectional conversion between native bodies and envelope payloads.
//!
//! # Design
//! Every envelope body is a `(payload, BodyType)` pair where the payload is
//! plain JSON. `encode_body` is the single native-to-wire table (one arm per
//! `Body` variant) and `decode_body` the single wire-to-native table (one
//! arm per `BodyType`, then reshaped into the representation the caller
//! asked for). JSON parse failures never surface as errors; they degrade to
//! the `text` tag and are reported only when verbose diagnostics are on.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::body::{drain_stream, Blob, Body, FormData, FormEntry, FormValue, UrlSearchParams};
use crate::error::{Result, TunnelError};
use crate::headers::media_type;

const DEFAULT_BINARY_TYPE: &str = "application/octet-stream";

/// How an envelope `body` is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyType {
    #[default]
    None,
    Json,
    Text,
    FormData,
    UrlEncoded,
    Base64,
}

impl BodyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyType::None => "none",
            BodyType::Json => "json",
            BodyType::Text => "text",
            BodyType::FormData => "formData",
            BodyType::UrlEncoded => "urlEncoded",
            BodyType::Base64 => "base64",
        }
    }
}

/// One entry of a `formData` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormField {
    Binary {
        name: String,
        /// Base64 of the raw bytes.
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        #[serde(default, rename = "contentType", skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },
    Text {
        name: String,
        value: String,
    },
}

impl FormField {
    pub fn name(&self) -> &str {
        match self {
            FormField::Binary { name, .. } | FormField::Text { name, .. } => name,
        }
    }
}

/// A body ready to be placed in an envelope.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EncodedBody {
    pub payload: Option<Value>,
    pub body_type: BodyType,
}

impl EncodedBody {
    pub fn none() -> Self {
        Self::default()
    }

    fn new(body_type: BodyType, payload: Value) -> Self {
        Self {
            payload: Some(payload),
            body_type,
        }
    }
}

/// The native representation a decoded body should take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    /// The variant that naturally matches the tag.
    Native,
    Text,
    Json,
    Bytes,
    Blob,
}

pub fn is_json_media(media: &str) -> bool {
    media == "application/json" || media == "text/json" || media.ends_with("+json")
}

fn is_textual_media(media: &str) -> bool {
    media.starts_with("text/")
        || media.ends_with("+xml")
        || matches!(
            media,
            "application/xml"
                | "application/javascript"
                | "application/ecmascript"
                | "application/x-javascript"
                | "application/graphql"
                | "application/x-ndjson"
        )
}

const URL_ENCODED: &str = "application/x-www-form-urlencoded";

/// Native body to envelope payload.
///
/// `declared_content_type` is the caller's `Content-Type` header, used only
/// to classify plain strings.
pub async fn encode_body(
    body: Option<Body>,
    declared_content_type: Option<&str>,
    verbose: bool,
) -> Result<EncodedBody> {
    let Some(body) = body else {
        return Ok(EncodedBody::none());
    };
    let media = declared_content_type.map(media_type).unwrap_or_default();

    let encoded = match body {
        Body::Text(text) => {
            if is_json_media(&media) {
                match serde_json::from_str::<Value>(&text) {
                    Ok(value) => EncodedBody::new(BodyType::Json, value),
                    Err(e) => {
                        if verbose {
                            tracing::debug!(error = %e, "request body declared as JSON failed to parse; sending as text");
                        }
                        EncodedBody::new(BodyType::Text, Value::String(text))
                    }
                }
            } else if media == URL_ENCODED {
                EncodedBody::new(BodyType::UrlEncoded, Value::String(text))
            } else {
                EncodedBody::new(BodyType::Text, Value::String(text))
            }
        }
        Body::Json(value) => EncodedBody::new(BodyType::Json, value),
        Body::UrlEncoded(params) => {
            EncodedBody::new(BodyType::UrlEncoded, Value::String(params.to_string()))
        }
        Body::Form(form) => EncodedBody::new(BodyType::FormData, encode_form(&form)?),
        Body::Bytes(bytes) => EncodedBody::new(BodyType::Base64, Value::String(STANDARD.encode(bytes))),
        Body::Blob(blob) => EncodedBody::new(BodyType::Base64, blob_payload(&blob)),
        Body::Stream(stream) => {
            let bytes = drain_stream(stream).await?;
            EncodedBody::new(BodyType::Base64, Value::String(STANDARD.encode(bytes)))
        }
    };
    Ok(encoded)
}

fn blob_payload(blob: &Blob) -> Value {
    let mut object = Map::new();
    object.insert("data".to_string(), Value::String(STANDARD.encode(&blob.bytes)));
    if !blob.content_type.is_empty() {
        object.insert(
            "contentType".to_string(),
            Value::String(blob.content_type.clone()),
        );
    }
    Value::Object(object)
}

fn encode_form(form: &FormData) -> Result<Value> {
    let fields: Vec<FormField> = form
        .entries()
        .iter()
        .map(|entry| match &entry.value {
            FormValue::Text(value) => FormField::Text {
                name: entry.name.clone(),
                value: value.clone(),
            },
            FormValue::File { blob, filename } => FormField::Binary {
                name: entry.name.clone(),
                data: STANDARD.encode(&blob.bytes),
                filename: filename.clone(),
                content_type: Some(if blob.content_type.is_empty() {
                    DEFAULT_BINARY_TYPE.to_string()
                } else {
                    blob.content_type.clone()
                }),
            },
        })
        .collect();
    serde_json::to_value(fields).map_err(|e| TunnelError::Codec(format!("failed to encode form fields: {e}")))
}

/// Parses a `formData` payload, dropping entries that have no usable name.
pub fn parse_form_fields(payload: &Value, verbose: bool) -> Result<Vec<FormField>> {
    let Value::Array(items) = payload else {
        return Err(TunnelError::Codec(format!(
            "formData payload must be an array, got {}",
            json_kind(payload)
        )));
    };
    let mut fields = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let named = item
            .get("name")
            .and_then(Value::as_str)
            .is_some_and(|name| !name.is_empty());
        if !named {
            if verbose {
                tracing::debug!(index, "dropping form field without a name");
            }
            continue;
        }
        match serde_json::from_value::<FormField>(item.clone()) {
            Ok(field) => fields.push(field),
            Err(e) => {
                if verbose {
                    tracing::debug!(index, error = %e, "dropping malformed form field");
                }
            }
        }
    }
    Ok(fields)
}

fn decode_form(payload: &Value, verbose: bool) -> Result<FormData> {
    let mut form = FormData::new();
    for field in parse_form_fields(payload, verbose)? {
        match field {
            FormField::Text { name, value } => form.push(FormEntry {
                name,
                value: FormValue::Text(value),
            }),
            FormField::Binary {
                name,
                data,
                filename,
                content_type,
            } => {
                let bytes = decode_base64(&data)?;
                let blob = Blob::new(
                    bytes,
                    content_type.unwrap_or_else(|| DEFAULT_BINARY_TYPE.to_string()),
                );
                form.push(FormEntry {
                    name,
                    value: FormValue::File { blob, filename },
                });
            }
        }
    }
    Ok(form)
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(data.trim())
        .map_err(|e| TunnelError::Codec(format!("invalid base64 payload: {e}")))
}

/// Extracts `(bytes, content type)` from a base64 payload, which may be a
/// bare string or an object carrying `data`/`base64` and `contentType`.
fn base64_parts(payload: &Value) -> Result<(Vec<u8>, Option<String>)> {
    match payload {
        Value::String(data) => Ok((decode_base64(data)?, None)),
        Value::Object(object) => {
            let data = object
                .get("data")
                .or_else(|| object.get("base64"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    TunnelError::Codec("base64 payload object carries no `data` string".to_string())
                })?;
            let content_type = object
                .get("contentType")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok((decode_base64(data)?, content_type))
        }
        other => Err(TunnelError::Codec(format!(
            "base64 payload must be a string or object, got {}",
            json_kind(other)
        ))),
    }
}

fn url_encoded_text(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        Value::Object(map) => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in map {
                serializer.append_pair(key, &scalar_text(value));
            }
            serializer.finish()
        }
        other => other.to_string(),
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The text a payload puts on the wire.
pub fn wire_text(payload: &Value, body_type: BodyType) -> Result<String> {
    match body_type {
        BodyType::None => Ok(String::new()),
        BodyType::Json => serde_json::to_string(payload)
            .map_err(|e| TunnelError::Codec(format!("failed to serialize JSON payload: {e}"))),
        BodyType::Text => Ok(scalar_text(payload)),
        BodyType::UrlEncoded => Ok(url_encoded_text(payload)),
        BodyType::FormData => Ok(payload.to_string()),
        BodyType::Base64 => {
            let (bytes, _) = base64_parts(payload)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

/// The raw bytes a payload stands for.
pub fn wire_bytes(payload: &Value, body_type: BodyType) -> Result<Vec<u8>> {
    match body_type {
        BodyType::Base64 => Ok(base64_parts(payload)?.0),
        other => Ok(wire_text(payload, other)?.into_bytes()),
    }
}

/// Envelope payload to native body.
///
/// Returns `None` for the `none` tag or a missing payload, whatever the
/// requested shape. `content_type` types blobs when the payload does not.
pub fn decode_body(
    payload: Option<&Value>,
    body_type: BodyType,
    shape: BodyShape,
    content_type: Option<&str>,
    verbose: bool,
) -> Result<Option<Body>> {
    let Some(payload) = payload else {
        return Ok(None);
    };
    if body_type == BodyType::None {
        return Ok(None);
    }

    let body = match shape {
        BodyShape::Native => decode_native(payload, body_type, verbose)?,
        BodyShape::Text => Body::Text(wire_text(payload, body_type)?),
        BodyShape::Bytes => Body::Bytes(wire_bytes(payload, body_type)?),
        BodyShape::Blob => {
            let (bytes, embedded_type) = match body_type {
                BodyType::Base64 => base64_parts(payload)?,
                other => (wire_text(payload, other)?.into_bytes(), None),
            };
            let blob_type = embedded_type
                .or_else(|| content_type.map(media_type))
                .unwrap_or_default();
            Body::Blob(Blob::new(bytes, blob_type))
        }
        BodyShape::Json => match body_type {
            BodyType::Json => Body::Json(payload.clone()),
            BodyType::FormData => Body::Json(payload.clone()),
            other => {
                let text = wire_text(payload, other)?;
                match serde_json::from_str::<Value>(&text) {
                    Ok(value) => Body::Json(value),
                    Err(e) => {
                        if verbose {
                            tracing::debug!(error = %e, body_type = other.as_str(), "body is not valid JSON; keeping text");
                        }
                        Body::Text(text)
                    }
                }
            }
        },
    };
    Ok(Some(body))
}

fn decode_native(payload: &Value, body_type: BodyType, verbose: bool) -> Result<Body> {
    let body = match body_type {
        BodyType::Json => Body::Json(payload.clone()),
        BodyType::Text => Body::Text(scalar_text(payload)),
        BodyType::UrlEncoded => Body::UrlEncoded(UrlSearchParams::parse(&url_encoded_text(payload))),
        BodyType::FormData => Body::Form(decode_form(payload, verbose)?),
        BodyType::Base64 => match base64_parts(payload)? {
            (bytes, Some(content_type)) => Body::Blob(Blob::new(bytes, content_type)),
            (bytes, None) => Body::Bytes(bytes),
        },
        BodyType::None => Body::Bytes(Vec::new()),
    };
    Ok(body)
}

/// Serializes a real HTTP response body by sniffing its content type.
pub fn encode_response_body(
    status: u16,
    content_type: Option<&str>,
    bytes: Vec<u8>,
    verbose: bool,
) -> EncodedBody {
    if matches!(status, 204 | 205 | 304) || bytes.is_empty() {
        return EncodedBody::none();
    }
    let media = content_type.map(media_type).unwrap_or_default();

    if is_json_media(&media) {
        return match serde_json::from_slice::<Value>(&bytes) {
            // `false`, `0` and `""` are legitimate JSON bodies and keep the tag.
            Ok(value) => EncodedBody::new(BodyType::Json, value),
            Err(e) => {
                if verbose {
                    tracing::debug!(error = %e, "response declared as JSON failed to parse; sending as text");
                }
                EncodedBody::new(
                    BodyType::Text,
                    Value::String(String::from_utf8_lossy(&bytes).into_owned()),
                )
            }
        };
    }
    if media == URL_ENCODED {
        return EncodedBody::new(
            BodyType::UrlEncoded,
            Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        );
    }
    if is_textual_media(&media) {
        return EncodedBody::new(
            BodyType::Text,
            Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        );
    }
    EncodedBody::new(BodyType::Base64, Value::String(STANDARD.encode(bytes)))
}

/// Approximate on-the-wire size of a payload, used for body-size limits.
///
/// Binary payloads count decoded bytes; everything else counts the length of
/// its serialized text.
pub fn estimate_size(payload: Option<&Value>, body_type: BodyType) -> usize {
    let Some(payload) = payload else {
        return 0;
    };
    match body_type {
        BodyType::None => 0,
        BodyType::Base64 => base64_len(payload),
        BodyType::FormData => match payload {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    let name = item.get("name").and_then(Value::as_str).map_or(0, str::len);
                    let value = match (item.get("value"), item.get("data")) {
                        (Some(value), _) => scalar_text(value).len(),
                        (None, Some(data)) => base64_len(data),
                        (None, None) => 0,
                    };
                    name + value
                })
                .sum(),
            other => other.to_string().len(),
        },
        other => wire_text(payload, other).map_or_else(|_| payload.to_string().len(), |t| t.len()),
    }
}

fn base64_len(payload: &Value) -> usize {
    let data = match payload {
        Value::String(data) => data.as_str(),
        Value::Object(object) => object
            .get("data")
            .or_else(|| object.get("base64"))
            .and_then(Value::as_str)
            .unwrap_or_default(),
        other => return other.to_string().len(),
    };
    let data = data.trim();
    let padding = data.bytes().rev().take_while(|b| *b == b'=').count();
    (data.len() / 4 * 3 + (data.len() % 4) * 3 / 4).saturating_sub(padding)
}

//! Header map and the forbidden-header rules shared by both sides of the tunnel.
//!
//! # Design
//! Names are stored lower-cased in insertion order. `append` follows the
//! native convention of joining repeated values with `", "` instead of
//! keeping duplicate entries, so a `Headers` value flattens losslessly into
//! the plain mapping carried by the envelopes.

use std::collections::BTreeMap;

/// Request headers that are never forwarded across the trust boundary.
///
/// They either carry credentials or let the sandboxed caller spoof where a
/// request comes from.
pub const FORBIDDEN_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "cookie2",
    "set-cookie",
    "host",
    "origin",
    "referer",
    "forwarded",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "x-real-ip",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "content-length",
];

/// Case-insensitive membership test against [`FORBIDDEN_HEADERS`].
pub fn is_forbidden_header(name: &str) -> bool {
    FORBIDDEN_HEADERS
        .iter()
        .any(|forbidden| forbidden.eq_ignore_ascii_case(name.trim()))
}

/// An ordered, case-insensitive header collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, comma-joining it onto an existing entry of the same name.
    pub fn append(&mut self, name: &str, value: &str) {
        let key = name.trim().to_ascii_lowercase();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, current)) => {
                current.push_str(", ");
                current.push_str(value);
            }
            None => self.entries.push((key, value.to_string())),
        }
    }

    /// Replaces any existing value for `name`.
    pub fn set(&mut self, name: &str, value: &str) {
        let key = name.trim().to_ascii_lowercase();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, current)) => *current = value.to_string(),
            None => self.entries.push((key, value.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name.trim()))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let position = self
            .entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name.trim()))?;
        Some(self.entries.remove(position).1)
    }

    /// Removes every header whose name satisfies `predicate`, returning the
    /// removed names.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut removed = Vec::new();
        self.entries.retain(|(name, _)| {
            if predicate(name) {
                removed.push(name.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Overlays `other` on top of `self`; names present in `other` win.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get("content-type")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flattens into the plain mapping used by the envelopes.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries.iter().cloned().collect()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value.as_ref());
        }
        headers
    }
}

impl From<&BTreeMap<String, String>> for Headers {
    fn from(map: &BTreeMap<String, String>) -> Self {
        map.iter().collect()
    }
}

/// Extracts the bare media type (`application/json`) from a content-type value.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

//! Keys and key/value pairs
//!
//! A key is an opaque byte string. The optional namespace separator only
//! affects how the key is displayed and grouped (`user:42:name` with `:`
//! lives in namespace `user:42`); it never changes the stored bytes.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, Result};
use crate::value::NValue;

/// Key expiry in seconds.
pub type Ttl = i64;

/// The key never expires.
pub const NO_TTL: Ttl = -1;

/// The key does not exist or already expired.
pub const EXPIRED_TTL: Ttl = -2;

/// An immutable backend key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NKey {
    bytes: Vec<u8>,
    ns_separator: Option<String>,
}

impl NKey {
    /// Create a key without a namespace separator.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        NKey {
            bytes: bytes.into(),
            ns_separator: None,
        }
    }

    /// Create a key that splits into namespaces on `separator`.
    pub fn with_separator(bytes: impl Into<Vec<u8>>, separator: impl Into<String>) -> Self {
        let separator = separator.into();
        NKey {
            bytes: bytes.into(),
            ns_separator: if separator.is_empty() {
                None
            } else {
                Some(separator)
            },
        }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Check if the key has no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Namespace separator, if any.
    pub fn separator(&self) -> Option<&str> {
        self.ns_separator.as_deref()
    }

    /// The key as text for building commands.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the key is empty or not valid UTF-8.
    pub fn command_text(&self) -> Result<&str> {
        if self.bytes.is_empty() {
            return Err(Error::invalid_argument("empty key"));
        }
        std::str::from_utf8(&self.bytes)
            .map_err(|_| Error::invalid_argument("key is not valid UTF-8"))
    }

    /// Lossy text form for display.
    pub fn to_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    fn segments(&self) -> Vec<String> {
        let text = self.to_text();
        match self.ns_separator.as_deref() {
            Some(sep) => text.split(sep).map(str::to_string).collect(),
            None => vec![text.into_owned()],
        }
    }

    /// True when the key has at least one namespace segment.
    pub fn has_namespace(&self) -> bool {
        self.segments().len() > 1
    }

    /// Every segment but the last, re-joined with the separator.
    pub fn namespace(&self) -> Option<String> {
        let segments = self.segments();
        if segments.len() < 2 {
            return None;
        }
        let sep = self.ns_separator.as_deref().unwrap_or_default();
        Some(segments[..segments.len() - 1].join(sep))
    }

    /// The first `depth` namespace segments joined with the separator.
    pub fn join_namespace(&self, depth: usize) -> String {
        let segments = self.segments();
        let sep = self.ns_separator.as_deref().unwrap_or_default();
        let ns_len = segments.len().saturating_sub(1);
        segments[..depth.min(ns_len)].join(sep)
    }

    /// The last segment.
    pub fn display_name(&self) -> String {
        self.segments().pop().unwrap_or_default()
    }
}

impl fmt::Display for NKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for NKey {
    fn from(s: &str) -> Self {
        NKey::new(s)
    }
}

impl From<String> for NKey {
    fn from(s: String) -> Self {
        NKey::new(s)
    }
}

/// A key with its value and expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NDbKValue {
    /// The key
    pub key: NKey,
    /// The value
    pub value: NValue,
    /// Expiry in seconds, [`NO_TTL`] when none
    pub ttl: Ttl,
}

impl NDbKValue {
    /// Pair a key with a value; no expiry.
    pub fn new(key: impl Into<NKey>, value: impl Into<NValue>) -> Self {
        NDbKValue {
            key: key.into(),
            value: value.into(),
            ttl: NO_TTL,
        }
    }

    /// Set the expiry.
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }
}

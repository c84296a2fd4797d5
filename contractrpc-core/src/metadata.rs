//! Call metadata (headers and trailers).
//!
//! Keys are lowercase ASCII. Binary entries use keys ending in `-bin` and are
//! carried base64-encoded (standard alphabet, no padding), matching the gRPC
//! convention for binary metadata.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::RpcError;

/// Suffix marking a binary metadata entry.
pub const BINARY_SUFFIX: &str = "-bin";

/// Metadata key carrying the encoded request header envelope.
pub const REQUEST_HEADER_KEY: &str = "x-call-input-bin";

/// Metadata key carrying the encoded response header envelope.
pub const RESPONSE_HEADER_KEY: &str = "x-call-output-bin";

/// Key prefixes owned by the engine. User entries under them are overwritten.
pub const RESERVED_PREFIXES: [&str; 2] = ["x-call-", "x-fault-"];

/// Key/value metadata attached to a call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    headers: HeaderMap,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a text entry, replacing any previous value.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), RpcError> {
        let name = parse_name(key)?;
        if name.as_str().ends_with(BINARY_SUFFIX) {
            return Err(RpcError::Protocol(format!(
                "text metadata key must not end with {BINARY_SUFFIX}: {key}"
            )));
        }
        let value = HeaderValue::from_str(value)
            .map_err(|_| RpcError::Protocol(format!("invalid metadata value for {key}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Get a text entry.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// Insert a binary entry. The key must end in `-bin`.
    pub fn insert_bin(&mut self, key: &str, value: &[u8]) -> Result<(), RpcError> {
        let name = parse_name(key)?;
        if !name.as_str().ends_with(BINARY_SUFFIX) {
            return Err(RpcError::Protocol(format!(
                "binary metadata key must end with {BINARY_SUFFIX}: {key}"
            )));
        }
        let encoded = STANDARD_NO_PAD.encode(value);
        let value = HeaderValue::from_str(&encoded)
            .map_err(|_| RpcError::Protocol(format!("invalid metadata value for {key}")))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Get and decode a binary entry.
    ///
    /// Returns `None` when the entry is absent. Padded base64 is accepted too.
    pub fn get_bin(&self, key: &str) -> Option<Result<Bytes, RpcError>> {
        let raw = self.headers.get(key)?;
        let decoded = STANDARD_NO_PAD
            .decode(raw.as_bytes())
            .or_else(|_| STANDARD.decode(raw.as_bytes()))
            .map(Bytes::from)
            .map_err(|e| RpcError::Protocol(format!("invalid base64 in metadata {key}: {e}")));
        Some(decoded)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.headers.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Copy every entry of `other` into `self`, replacing duplicates.
    pub fn merge(&mut self, other: &Metadata) {
        for (name, value) in other.headers.iter() {
            self.headers.insert(name.clone(), value.clone());
        }
    }

    /// Drop every entry under a reserved prefix.
    pub fn strip_reserved(&mut self) {
        let reserved: Vec<HeaderName> = self
            .headers
            .keys()
            .filter(|name| is_reserved(name.as_str()))
            .cloned()
            .collect();
        for name in reserved {
            self.headers.remove(name);
        }
    }

    /// Iterate over text entries. Binary entries and non-UTF8 values are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .filter(|(name, _)| !name.as_str().ends_with(BINARY_SUFFIX))
            .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
    }

    pub fn as_header_map(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_header_map(self) -> HeaderMap {
        self.headers
    }
}

impl From<HeaderMap> for Metadata {
    fn from(headers: HeaderMap) -> Self {
        Self { headers }
    }
}

/// Whether a key falls under an engine-owned prefix.
pub fn is_reserved(key: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

fn parse_name(key: &str) -> Result<HeaderName, RpcError> {
    HeaderName::from_bytes(key.to_ascii_lowercase().as_bytes())
        .map_err(|_| RpcError::Protocol(format!("invalid metadata key: {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_entries() {
        let mut md = Metadata::new();
        md.insert("X-Request-Id", "abc").unwrap();
        assert_eq!(md.get("x-request-id"), Some("abc"));
        assert_eq!(md.iter().collect::<Vec<_>>(), vec![("x-request-id", "abc")]);
    }

    #[test]
    fn test_binary_entries_are_base64() {
        let mut md = Metadata::new();
        md.insert_bin("payload-bin", &[1, 2, 3]).unwrap();
        assert_eq!(md.as_header_map().get("payload-bin").unwrap(), "AQID");
        assert_eq!(
            md.get_bin("payload-bin").unwrap().unwrap(),
            Bytes::from_static(&[1, 2, 3])
        );
        assert!(md.get_bin("missing-bin").is_none());
        assert_eq!(md.iter().count(), 0);
    }

    #[test]
    fn test_key_suffix_is_enforced() {
        let mut md = Metadata::new();
        assert!(md.insert("data-bin", "x").is_err());
        assert!(md.insert_bin("data", b"x").is_err());
    }

    #[test]
    fn test_strip_reserved() {
        let mut md = Metadata::new();
        md.insert("x-call-spoof", "1").unwrap();
        md.insert("x-fault-detail-type", "t").unwrap();
        md.insert("authorization", "token").unwrap();
        md.strip_reserved();
        assert_eq!(md.len(), 1);
        assert_eq!(md.get("authorization"), Some("token"));
    }

    #[test]
    fn test_merge_replaces() {
        let mut a = Metadata::new();
        a.insert("k", "1").unwrap();
        let mut b = Metadata::new();
        b.insert("k", "2").unwrap();
        b.insert("other", "3").unwrap();
        a.merge(&b);
        assert_eq!(a.get("k"), Some("2"));
        assert_eq!(a.len(), 2);
    }
}

//! Tag sets and the tag signature codec
//!
//! A view groups measurements by the values of its tag keys. The grouping key
//! is a *signature*: the values of the view's keys, in the view's key order,
//! encoded as self-delimiting byte fields.
//!
//! Signature format, one field per view key:
//!
//! ```text
//! absent:  0x00
//! present: 0x01 <len: LEB128 varint> <value bytes: UTF-8>
//! ```
//!
//! An absent key and an empty value encode differently (`00` vs `01 00`), so
//! decoding recovers exactly which keys were present.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const ABSENT: u8 = 0x00;
const PRESENT: u8 = 0x01;

/// Longest varint we accept for a value length (u32 range)
const MAX_VARINT_BYTES: usize = 5;

/// Error decoding a tag signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Input ended in the middle of a field
    Truncated { offset: usize },
    /// Field did not start with a presence marker
    InvalidMarker { offset: usize, marker: u8 },
    /// Value length varint is longer than allowed
    InvalidLength { offset: usize },
    /// Value bytes for this key are not UTF-8
    InvalidUtf8 { key: String },
    /// Bytes left over after all keys were decoded
    TrailingBytes { remaining: usize },
}

impl std::fmt::Display for SignatureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignatureError::Truncated { offset } => {
                write!(f, "signature truncated at byte {}", offset)
            }
            SignatureError::InvalidMarker { offset, marker } => {
                write!(f, "invalid presence marker {:#04x} at byte {}", marker, offset)
            }
            SignatureError::InvalidLength { offset } => {
                write!(f, "invalid value length at byte {}", offset)
            }
            SignatureError::InvalidUtf8 { key } => {
                write!(f, "value for tag key {} is not valid UTF-8", key)
            }
            SignatureError::TrailingBytes { remaining } => {
                write!(f, "{} trailing bytes after last tag key", remaining)
            }
        }
    }
}

impl std::error::Error for SignatureError {}

/// A set of tags (key-value pairs) attached to a recording call
///
/// Tags are stored in sorted order so equal sets compare equal regardless of
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet {
    tags: BTreeMap<String, String>,
}

impl TagSet {
    /// Create a new TagSet from key-value pairs
    pub fn new(tags: BTreeMap<String, String>) -> Self {
        TagSet { tags }
    }

    /// Create an empty TagSet
    pub fn empty() -> Self {
        TagSet::default()
    }

    /// Create TagSet from slice of (key, value) tuples
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let tags: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(tags)
    }

    /// Parse tags from "key:value,key2:value2" format
    ///
    /// Pairs without a `:` or with an empty key are skipped. Empty values are
    /// kept, since an empty value is distinct from a missing key.
    pub fn parse(s: &str) -> Self {
        let tags: BTreeMap<String, String> = s
            .split(',')
            .filter_map(|pair| {
                let (key, value) = pair.split_once(':')?;
                let key = key.trim();
                if key.is_empty() {
                    None
                } else {
                    Some((key.to_string(), value.trim().to_string()))
                }
            })
            .collect();
        Self::new(tags)
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a tag, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.tags.insert(key.into(), value.into())
    }

    /// Get a specific tag value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Iterate tags in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Encode the values of `keys`, in `keys` order, as a signature
    ///
    /// Tags whose key is not in `keys` do not contribute. An empty key list
    /// yields an empty signature.
    pub fn values_signature(&self, keys: &[String]) -> Vec<u8> {
        let mut sig = Vec::with_capacity(keys.len() * 8);
        for key in keys {
            match self.tags.get(key) {
                Some(value) => {
                    sig.put_u8(PRESENT);
                    put_varint(&mut sig, value.len() as u64);
                    sig.put_slice(value.as_bytes());
                }
                None => sig.put_u8(ABSENT),
            }
        }
        sig
    }

    /// Decode a signature produced by [`TagSet::values_signature`] with the
    /// same key order
    pub fn from_values_signature(sig: &[u8], keys: &[String]) -> Result<TagSet, SignatureError> {
        let total = sig.len();
        let mut buf = sig;
        let mut tags = BTreeMap::new();

        for key in keys {
            let offset = total - buf.remaining();
            if !buf.has_remaining() {
                return Err(SignatureError::Truncated { offset });
            }
            match buf.get_u8() {
                ABSENT => continue,
                PRESENT => {}
                marker => return Err(SignatureError::InvalidMarker { offset, marker }),
            }

            let len = get_varint(&mut buf, total)? as usize;
            if buf.remaining() < len {
                return Err(SignatureError::Truncated {
                    offset: total - buf.remaining(),
                });
            }
            let value = std::str::from_utf8(&buf[..len])
                .map_err(|_| SignatureError::InvalidUtf8 { key: key.clone() })?
                .to_string();
            buf.advance(len);
            tags.insert(key.clone(), value);
        }

        if buf.has_remaining() {
            return Err(SignatureError::TrailingBytes {
                remaining: buf.remaining(),
            });
        }
        Ok(TagSet { tags })
    }
}

impl std::fmt::Display for TagSet {
    /// Serialize tags to "key:value,key2:value2" format
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", k, v)?;
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        TagSet {
            tags: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

fn put_varint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.put_u8((v as u8) | 0x80);
        v >>= 7;
    }
    buf.put_u8(v as u8);
}

fn get_varint(buf: &mut &[u8], total: usize) -> Result<u64, SignatureError> {
    let start = total - buf.remaining();
    let mut value = 0u64;
    for i in 0..MAX_VARINT_BYTES {
        if !buf.has_remaining() {
            return Err(SignatureError::Truncated {
                offset: total - buf.remaining(),
            });
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(SignatureError::InvalidLength { offset: start })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(ks: &[&str]) -> Vec<String> {
        ks.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_tag_set_creation() {
        let tags = TagSet::from_pairs(&[("host", "web01"), ("env", "prod")]);
        assert_eq!(tags.get("host"), Some("web01"));
        assert_eq!(tags.get("env"), Some("prod"));
        assert_eq!(tags.get("missing"), None);
    }

    #[test]
    fn test_tag_set_parsing() {
        let tags = TagSet::parse("host:web01,env:prod,service:api");
        assert_eq!(tags.len(), 3);
        assert_eq!(tags.get("service"), Some("api"));
        assert_eq!(tags.to_string(), "env:prod,host:web01,service:api");

        assert!(TagSet::parse("").is_empty());
        assert_eq!(TagSet::parse("novalue,:x,k:").get("k"), Some(""));
    }

    #[test]
    fn test_signature_ignores_other_keys() {
        let ks = keys(&["method", "status"]);
        let a = TagSet::from_pairs(&[("method", "GET"), ("status", "200"), ("host", "a")]);
        let b = TagSet::from_pairs(&[("status", "200"), ("method", "GET"), ("host", "b")]);
        assert_eq!(a.values_signature(&ks), b.values_signature(&ks));

        let c = TagSet::from_pairs(&[("method", "GET"), ("status", "500")]);
        assert_ne!(a.values_signature(&ks), c.values_signature(&ks));
    }

    #[test]
    fn test_missing_differs_from_empty() {
        let ks = keys(&["region"]);
        let missing = TagSet::empty().values_signature(&ks);
        let empty = TagSet::from_pairs(&[("region", "")]).values_signature(&ks);
        assert_eq!(missing, vec![ABSENT]);
        assert_eq!(empty, vec![PRESENT, 0]);
    }

    #[test]
    fn test_key_order_matters() {
        let tags = TagSet::from_pairs(&[("a", "1"), ("b", "2")]);
        assert_ne!(
            tags.values_signature(&keys(&["a", "b"])),
            tags.values_signature(&keys(&["b", "a"]))
        );
    }

    #[test]
    fn test_no_keys_empty_signature() {
        let tags = TagSet::from_pairs(&[("a", "1")]);
        assert!(tags.values_signature(&[]).is_empty());
        assert!(TagSet::from_values_signature(&[], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_decode_drops_unlisted_and_missing_keys() {
        let ks = keys(&["method", "region", "status"]);
        let tags = TagSet::from_pairs(&[("method", "PUT"), ("status", ""), ("host", "x")]);
        let sig = tags.values_signature(&ks);
        let decoded = TagSet::from_values_signature(&sig, &ks).unwrap();
        assert_eq!(decoded, TagSet::from_pairs(&[("method", "PUT"), ("status", "")]));
    }

    #[test]
    fn test_long_value_uses_multibyte_length() {
        let ks = keys(&["payload"]);
        let long = "x".repeat(300);
        let tags = TagSet::empty().with("payload", long.clone());
        let sig = tags.values_signature(&ks);
        assert_eq!(sig.len(), 1 + 2 + 300);
        let decoded = TagSet::from_values_signature(&sig, &ks).unwrap();
        assert_eq!(decoded.get("payload"), Some(long.as_str()));
    }

    #[test]
    fn test_decode_errors() {
        let ks = keys(&["a"]);
        assert_eq!(
            TagSet::from_values_signature(&[], &ks),
            Err(SignatureError::Truncated { offset: 0 })
        );
        assert_eq!(
            TagSet::from_values_signature(&[7], &ks),
            Err(SignatureError::InvalidMarker { offset: 0, marker: 7 })
        );
        assert_eq!(
            TagSet::from_values_signature(&[PRESENT, 5, b'a'], &ks),
            Err(SignatureError::Truncated { offset: 2 })
        );
        assert_eq!(
            TagSet::from_values_signature(&[PRESENT, 1, 0xff], &ks),
            Err(SignatureError::InvalidUtf8 { key: "a".to_string() })
        );
        assert_eq!(
            TagSet::from_values_signature(&[ABSENT, ABSENT], &ks),
            Err(SignatureError::TrailingBytes { remaining: 1 })
        );
        assert_eq!(
            TagSet::from_values_signature(&[PRESENT, 0x80, 0x80, 0x80, 0x80, 0x80], &ks),
            Err(SignatureError::InvalidLength { offset: 1 })
        );
    }
}

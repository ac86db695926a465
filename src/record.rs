//! Key metadata records
//!
//! A [`KeyRecord`] is one key's metadata as produced by a snapshot decoder or
//! a live scan. Records are immutable and flow once through the filter
//! pipeline into the accumulators.

use crate::error::DecodeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value type of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    String,
    List,
    Set,
    #[serde(rename = "zset")]
    SortedSet,
    Hash,
    Stream,
    Module,
    #[serde(other)]
    Unknown,
}

impl KeyType {
    /// Parse the reply of the TYPE command
    pub fn from_type_reply(reply: &str) -> Self {
        match reply {
            "string" => KeyType::String,
            "list" => KeyType::List,
            "set" => KeyType::Set,
            "zset" => KeyType::SortedSet,
            "hash" => KeyType::Hash,
            "stream" => KeyType::Stream,
            "none" => KeyType::Unknown,
            _ => KeyType::Module,
        }
    }

    /// Name used in reports, matching the TYPE command
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::Set => "set",
            KeyType::SortedSet => "zset",
            KeyType::Hash => "hash",
            KeyType::Stream => "stream",
            KeyType::Module => "module",
            KeyType::Unknown => "unknown",
        }
    }

    /// Command that returns the element count for this type, if any
    pub fn length_command(&self) -> Option<&'static str> {
        match self {
            KeyType::List => Some("LLEN"),
            KeyType::Set => Some("SCARD"),
            KeyType::SortedSet => Some("ZCARD"),
            KeyType::Hash => Some("HLEN"),
            KeyType::Stream => Some("XLEN"),
            KeyType::String | KeyType::Module | KeyType::Unknown => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for a single key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Logical database index
    #[serde(rename = "db")]
    pub database: u32,

    /// Key name
    pub key: String,

    /// Value type
    #[serde(rename = "type")]
    pub key_type: KeyType,

    /// Estimated memory footprint in bytes
    #[serde(rename = "size")]
    pub size_bytes: u64,

    /// Number of elements (1 for strings)
    #[serde(rename = "elements", default)]
    pub element_count: u64,

    /// Internal encoding reported by the server
    #[serde(default)]
    pub encoding: String,

    /// Absolute expiration time, if the key is volatile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
}

impl KeyRecord {
    /// Create a persistent record with the given size
    pub fn new(database: u32, key: impl Into<String>, key_type: KeyType, size_bytes: u64) -> Self {
        Self {
            database,
            key: key.into(),
            key_type,
            size_bytes,
            element_count: 1,
            encoding: String::new(),
            expiration: None,
        }
    }

    /// Set the expiration time
    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Set the element count
    pub fn with_elements(mut self, element_count: u64) -> Self {
        self.element_count = element_count;
        self
    }

    /// Set the encoding
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    /// True if the key has no expiration
    pub fn is_persistent(&self) -> bool {
        self.expiration.is_none()
    }
}

/// A lazy, finite stream of records from one snapshot or one live node
///
/// Any iterator over decode results is a record source. A source cannot be
/// restarted; reopen the snapshot to read it again.
pub trait RecordSource: Iterator<Item = Result<KeyRecord, DecodeError>> {
    /// Human-readable name of the source (file path or node address)
    fn name(&self) -> String;
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn name(&self) -> String {
        (**self).name()
    }
}

/// Adapter that turns any iterator of records into a named source
pub struct IterSource<I> {
    name: String,
    inner: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Result<KeyRecord, DecodeError>>,
{
    pub fn new(name: impl Into<String>, inner: I) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }
}

impl<I> Iterator for IterSource<I>
where
    I: Iterator<Item = Result<KeyRecord, DecodeError>>,
{
    type Item = Result<KeyRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<I> RecordSource for IterSource<I>
where
    I: Iterator<Item = Result<KeyRecord, DecodeError>>,
{
    fn name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_key_type_from_reply() {
        assert_eq!(KeyType::from_type_reply("zset"), KeyType::SortedSet);
        assert_eq!(KeyType::from_type_reply("hash"), KeyType::Hash);
        assert_eq!(KeyType::from_type_reply("ReJSON-RL"), KeyType::Module);
        assert_eq!(KeyType::from_type_reply("none"), KeyType::Unknown);
    }

    #[test]
    fn test_record_json_shape() {
        let expiration = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
        let record = KeyRecord::new(2, "session:42", KeyType::Hash, 512)
            .with_elements(7)
            .with_encoding("listpack")
            .with_expiration(expiration);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["db"], 2);
        assert_eq!(json["type"], "hash");
        assert_eq!(json["size"], 512);
        assert_eq!(json["elements"], 7);
        assert_eq!(json["expiration"], "2030-01-02T03:04:05Z");

        let back: KeyRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_minimal_record_defaults() {
        let record: KeyRecord =
            serde_json::from_str(r#"{"db":0,"key":"k","type":"string","size":10}"#).unwrap();
        assert!(record.is_persistent());
        assert_eq!(record.element_count, 0);
        assert_eq!(record.encoding, "");
    }

    #[test]
    fn test_unknown_type_tolerated() {
        let record: KeyRecord =
            serde_json::from_str(r#"{"db":0,"key":"k","type":"mystery","size":10}"#).unwrap();
        assert_eq!(record.key_type, KeyType::Unknown);
    }
}

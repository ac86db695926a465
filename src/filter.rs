//! Record filters
//!
//! Filters are predicates over [`KeyRecord`]s. A [`FilterPipeline`] holds a
//! flat list of them and evaluates it left to right over a pull-based record
//! source. Decode errors flow through untouched so ingestion still fails fast.

use crate::error::{ConfigError, DecodeError};
use crate::record::KeyRecord;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::cell::Cell;
use std::fmt;
use std::str::FromStr;

/// A predicate over key records
pub trait RecordFilter {
    /// Whether the record passes
    fn accepts(&self, record: &KeyRecord) -> bool;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Passes records whose key matches a regular expression
#[derive(Debug, Clone)]
pub struct KeyPatternFilter {
    regex: Regex,
}

impl KeyPatternFilter {
    /// Compile the expression; a malformed one is rejected immediately
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).map_err(|e| ConfigError::InvalidRegex {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { regex })
    }
}

impl RecordFilter for KeyPatternFilter {
    fn accepts(&self, record: &KeyRecord) -> bool {
        self.regex.is_match(&record.key)
    }

    fn describe(&self) -> String {
        format!("regex '{}'", self.regex.as_str())
    }
}

/// Expiration state selected by the expire filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationMode {
    /// Keys without expiration
    Persistent,
    /// Keys with any expiration
    Volatile,
    /// Persistent keys, or keys expiring after the reference time
    NotExpired,
    /// Keys whose expiration is strictly before the reference time
    Expired,
}

impl ExpirationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirationMode::Persistent => "persistent",
            ExpirationMode::Volatile => "volatile",
            ExpirationMode::NotExpired => "not-expired",
            ExpirationMode::Expired => "expired",
        }
    }
}

impl FromStr for ExpirationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "persistent" => Ok(ExpirationMode::Persistent),
            "volatile" => Ok(ExpirationMode::Volatile),
            "not-expired" => Ok(ExpirationMode::NotExpired),
            "expired" => Ok(ExpirationMode::Expired),
            other => Err(ConfigError::InvalidExpireMode {
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ExpirationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Passes records by expiration state, relative to a fixed reference time
#[derive(Debug, Clone)]
pub struct ExpirationFilter {
    mode: ExpirationMode,
    now: DateTime<Utc>,
}

impl ExpirationFilter {
    /// Capture the current time as the reference
    pub fn new(mode: ExpirationMode) -> Self {
        Self::at(mode, Utc::now())
    }

    /// Use an explicit reference time
    pub fn at(mode: ExpirationMode, now: DateTime<Utc>) -> Self {
        Self { mode, now }
    }
}

impl RecordFilter for ExpirationFilter {
    fn accepts(&self, record: &KeyRecord) -> bool {
        match (self.mode, record.expiration) {
            (ExpirationMode::Persistent, expiration) => expiration.is_none(),
            (ExpirationMode::Volatile, expiration) => expiration.is_some(),
            (ExpirationMode::NotExpired, None) => true,
            (ExpirationMode::NotExpired, Some(at)) => at > self.now,
            // Persistent keys never count as expired
            (ExpirationMode::Expired, None) => false,
            (ExpirationMode::Expired, Some(at)) => at < self.now,
        }
    }

    fn describe(&self) -> String {
        format!("expire '{}'", self.mode)
    }
}

/// Pass/reject counters kept by a pipeline
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub passed: u64,
    pub rejected: u64,
}

/// Ordered list of filters applied to a record source
#[derive(Default)]
pub struct FilterPipeline {
    filters: Vec<Box<dyn RecordFilter>>,
    passed: Cell<u64>,
    rejected: Cell<u64>,
}

impl FilterPipeline {
    /// Pipeline with no filters; passes everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the optional CLI filter settings
    pub fn from_options(
        regex: Option<&str>,
        expire: Option<ExpirationMode>,
    ) -> Result<Self, ConfigError> {
        let mut pipeline = Self::new();
        if let Some(pattern) = regex {
            pipeline.push(KeyPatternFilter::new(pattern)?);
        }
        if let Some(mode) = expire {
            pipeline.push(ExpirationFilter::new(mode));
        }
        Ok(pipeline)
    }

    /// Append a filter; evaluation order follows insertion order
    pub fn push<F: RecordFilter + 'static>(&mut self, filter: F) {
        self.filters.push(Box::new(filter));
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Descriptions of the active filters
    pub fn describe(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.describe()).collect()
    }

    /// True if the record passes every filter; updates the counters
    pub fn accepts(&self, record: &KeyRecord) -> bool {
        let pass = self.filters.iter().all(|f| f.accepts(record));
        if pass {
            self.passed.set(self.passed.get() + 1);
        } else {
            self.rejected.set(self.rejected.get() + 1);
        }
        pass
    }

    /// Wrap a source; records failing any filter are skipped, errors pass through
    pub fn apply<'a, I>(&'a self, source: I) -> Filtered<'a, I>
    where
        I: Iterator<Item = Result<KeyRecord, DecodeError>>,
    {
        Filtered {
            pipeline: self,
            inner: source,
        }
    }

    pub fn stats(&self) -> FilterStats {
        FilterStats {
            passed: self.passed.get(),
            rejected: self.rejected.get(),
        }
    }
}

/// Iterator returned by [`FilterPipeline::apply`]
pub struct Filtered<'a, I> {
    pipeline: &'a FilterPipeline,
    inner: I,
}

impl<I> Iterator for Filtered<'_, I>
where
    I: Iterator<Item = Result<KeyRecord, DecodeError>>,
{
    type Item = Result<KeyRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(record) if self.pipeline.accepts(&record) => return Some(Ok(record)),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::KeyType;
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn sample() -> Vec<KeyRecord> {
        let now = reference();
        vec![
            KeyRecord::new(0, "user:1", KeyType::String, 10),
            KeyRecord::new(0, "user:2", KeyType::String, 10)
                .with_expiration(now + Duration::hours(1)),
            KeyRecord::new(0, "order:1", KeyType::Hash, 10)
                .with_expiration(now - Duration::hours(1)),
            KeyRecord::new(0, "order:2", KeyType::Hash, 10).with_expiration(now),
        ]
    }

    fn passing(filter: &dyn RecordFilter) -> Vec<String> {
        sample()
            .into_iter()
            .filter(|r| filter.accepts(r))
            .map(|r| r.key)
            .collect()
    }

    #[test]
    fn test_invalid_regex_names_pattern() {
        let err = KeyPatternFilter::new("user:(").unwrap_err();
        match err {
            ConfigError::InvalidRegex { pattern, .. } => assert_eq!(pattern, "user:("),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_regex_matches_key_only() {
        let filter = KeyPatternFilter::new("^user:").unwrap();
        assert_eq!(passing(&filter), vec!["user:1", "user:2"]);
    }

    #[test]
    fn test_expire_mode_parse() {
        assert_eq!("not-expired".parse::<ExpirationMode>().unwrap(), ExpirationMode::NotExpired);
        assert!(matches!(
            "forever".parse::<ExpirationMode>(),
            Err(ConfigError::InvalidExpireMode { .. })
        ));
    }

    #[test]
    fn test_persistent_and_volatile_partition() {
        let persistent = passing(&ExpirationFilter::at(ExpirationMode::Persistent, reference()));
        let volatile = passing(&ExpirationFilter::at(ExpirationMode::Volatile, reference()));
        assert_eq!(persistent, vec!["user:1"]);
        assert_eq!(volatile, vec!["user:2", "order:1", "order:2"]);
        assert_eq!(persistent.len() + volatile.len(), sample().len());
    }

    #[test]
    fn test_expired_and_not_expired() {
        let expired = passing(&ExpirationFilter::at(ExpirationMode::Expired, reference()));
        let not_expired = passing(&ExpirationFilter::at(ExpirationMode::NotExpired, reference()));
        assert_eq!(expired, vec!["order:1"]);
        // Expiring exactly at the reference time is neither strictly before nor after
        assert_eq!(not_expired, vec!["user:1", "user:2"]);
        assert!(expired.iter().all(|k| !not_expired.contains(k)));
    }

    #[test]
    fn test_persistent_never_expired() {
        let filter = ExpirationFilter::at(ExpirationMode::Expired, reference());
        let record = KeyRecord::new(0, "forever", KeyType::String, 1);
        assert!(!filter.accepts(&record));
    }

    #[test]
    fn test_pipeline_preserves_order_and_errors() {
        let mut pipeline = FilterPipeline::new();
        pipeline.push(KeyPatternFilter::new("^order:").unwrap());
        pipeline.push(ExpirationFilter::at(ExpirationMode::Volatile, reference()));

        let mut items: Vec<Result<KeyRecord, DecodeError>> = sample().into_iter().map(Ok).collect();
        items.insert(
            1,
            Err(DecodeError::Malformed {
                file: PathBuf::from("dump.jsonl"),
                line: 2,
                reason: "bad".into(),
            }),
        );

        let out: Vec<_> = pipeline.apply(items.into_iter()).collect();
        assert_eq!(out.len(), 3);
        assert!(out[0].is_err());
        assert_eq!(out[1].as_ref().unwrap().key, "order:1");
        assert_eq!(out[2].as_ref().unwrap().key, "order:2");
        assert_eq!(pipeline.stats(), FilterStats { passed: 2, rejected: 2 });
    }

    #[test]
    fn test_empty_pipeline_passes_all() {
        let pipeline = FilterPipeline::from_options(None, None).unwrap();
        assert!(pipeline.is_empty());
        let count = pipeline
            .apply(sample().into_iter().map(Ok))
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(count, 4);
    }
}

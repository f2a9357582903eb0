//! Normalized per-service record cache.
//!
//! The cache is a two-level structure: [`CacheState`] holds one
//! [`ServiceCache`] bucket per service, and each bucket keys records by their
//! identifier. Responses and real-time events are folded into the buckets by
//! the reduction functions in [`normalize`].
//!
//! The shape of one bucket:
//!
//! ```text
//! ServiceCache {
//!     records: { id → record, … }    // the normalized list
//!     query:   last response that carried no identifier
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod normalize;

/// The key a cached record is stored under.
///
/// Remote services hand out integer or string identifiers; both sort and hash,
/// so either works as a map key. Extracted from a record's identifier field
/// with [`RecordId::of`] — any other JSON type there (including `null`) counts
/// as "no identifier".
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use syncstore::cache::RecordId;
///
/// let record = json!({ "id": 7, "text": "hi" });
/// assert_eq!(RecordId::of(&record, "id"), Some(RecordId::Int(7)));
/// assert_eq!(RecordId::of(&record, "_id"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// An integer identifier.
    Int(i64),
    /// A string identifier.
    Str(String),
}

impl RecordId {
    /// Extracts the identifier of a record from the given field.
    ///
    /// Returns `None` when the field is absent or holds anything other than
    /// an integer or a string.
    pub fn of(record: &Value, id_field: &str) -> Option<Self> {
        Self::from_value(record.get(id_field)?)
    }

    /// Converts a JSON value into an identifier, if it is one.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Str(s.clone())),
            _ => None,
        }
    }

    /// Returns the identifier as a JSON value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Str(s) => Value::from(s.clone()),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<i32> for RecordId {
    fn from(id: i32) -> Self {
        Self::Int(i64::from(id))
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::Str(id.to_owned())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self::Str(id)
    }
}

/// Cached state for a single remote service.
///
/// `records` is the normalized list — whole records keyed by identifier, each
/// entry replaced on merge. `query` keeps the most recent response that
/// carried no identifier (aggregation results, status payloads, and the
/// like), so those are not lost just because they cannot be keyed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceCache {
    /// Records keyed by identifier, in identifier order.
    pub records: BTreeMap<RecordId, Value>,
    /// Last response that carried no identifier.
    pub query: Option<Value>,
}

impl ServiceCache {
    /// Creates an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached record with the given identifier, if any.
    pub fn record(&self, id: impl Into<RecordId>) -> Option<&Value> {
        self.records.get(&id.into())
    }

    /// Returns `true` if a record with the given identifier is cached.
    pub fn contains(&self, id: impl Into<RecordId>) -> bool {
        self.records.contains_key(&id.into())
    }

    /// Returns the number of cached records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no records are cached.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The entire cache — one [`ServiceCache`] bucket per service.
///
/// Buckets come into existence the first time a reduction names a service;
/// reading never creates one.
///
/// # Examples
///
/// ```
/// use syncstore::cache::CacheState;
///
/// let mut state = CacheState::new();
/// assert!(state.service("messages").is_none());
///
/// state.service_mut("messages");
/// assert!(state.service("messages").is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheState {
    services: HashMap<String, ServiceCache>,
}

impl CacheState {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bucket for the named service, if it exists.
    pub fn service(&self, name: &str) -> Option<&ServiceCache> {
        self.services.get(name)
    }

    /// Returns the bucket for the named service, creating it when absent.
    pub fn service_mut(&mut self, name: &str) -> &mut ServiceCache {
        self.services.entry(name.to_owned()).or_default()
    }

    /// Returns `true` if a bucket exists for the named service.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Returns the number of service buckets.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if no service has been touched yet.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Returns an iterator over `(service name, bucket)` pairs.
    ///
    /// Iteration order is unspecified; within a bucket, records iterate in
    /// identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceCache)> {
        self.services.iter().map(|(name, cache)| (name.as_str(), cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── RecordId ──────────────────────────────────────────────────────────────

    #[test]
    fn id_extracted_from_integer_field() {
        let record = json!({ "id": 42 });
        assert_eq!(RecordId::of(&record, "id"), Some(RecordId::Int(42)));
    }

    #[test]
    fn id_extracted_from_string_field() {
        let record = json!({ "_id": "a1b2" });
        assert_eq!(RecordId::of(&record, "_id"), Some(RecordId::Str("a1b2".into())));
    }

    #[test]
    fn id_zero_counts_as_present() {
        let record = json!({ "id": 0 });
        assert_eq!(RecordId::of(&record, "id"), Some(RecordId::Int(0)));
    }

    #[test]
    fn non_scalar_id_values_are_absent() {
        for record in [
            json!({ "id": null }),
            json!({ "id": true }),
            json!({ "id": 1.5 }),
            json!({ "id": [1] }),
            json!({ "id": { "n": 1 } }),
            json!({ "other": 1 }),
            json!("not an object"),
        ] {
            assert_eq!(RecordId::of(&record, "id"), None, "record: {record}");
        }
    }

    #[test]
    fn id_display_and_value_round_trip() {
        assert_eq!(RecordId::Int(7).to_string(), "7");
        assert_eq!(RecordId::Str("x9".into()).to_string(), "x9");
        assert_eq!(RecordId::Int(7).to_value(), json!(7));
        assert_eq!(RecordId::Str("x9".into()).to_value(), json!("x9"));
    }

    #[test]
    fn int_ids_sort_before_string_ids() {
        let mut ids = vec![
            RecordId::from("b"),
            RecordId::from(10),
            RecordId::from("a"),
            RecordId::from(2),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                RecordId::from(2),
                RecordId::from(10),
                RecordId::from("a"),
                RecordId::from("b"),
            ]
        );
    }

    // ── ServiceCache / CacheState ─────────────────────────────────────────────

    #[test]
    fn bucket_created_on_mutable_access_only() {
        let mut state = CacheState::new();
        assert!(state.service("messages").is_none());
        assert!(!state.contains("messages"));

        state.service_mut("messages");
        assert!(state.contains("messages"));
        assert_eq!(state.len(), 1);
        assert!(state.service("messages").is_some_and(ServiceCache::is_empty));
    }

    #[test]
    fn bucket_lookup_by_record_id() {
        let mut state = CacheState::new();
        let bucket = state.service_mut("messages");
        bucket.records.insert(5.into(), json!({ "id": 5 }));

        assert!(bucket.contains(5));
        assert!(!bucket.contains(6));
        assert_eq!(bucket.record(5), Some(&json!({ "id": 5 })));
        assert_eq!(bucket.len(), 1);
    }
}

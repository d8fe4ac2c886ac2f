//! Tagged per-key results.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::api::{ApiError, FailureReport};

/// Result of querying one key in a batch.
///
/// Serializes as `{"status": "found", "data": ...}`,
/// `{"status": "no_data"}` or `{"status": "failed", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum QueryOutcome<T> {
    /// Statistics were computed.
    Found(T),
    /// The upstream answered, but with nothing to summarize.
    NoData,
    /// The request or its post-processing failed.
    Failed(FailureReport),
}

impl<T> QueryOutcome<T> {
    /// Wraps an optional value: `None` becomes [`QueryOutcome::NoData`].
    pub fn from_option(value: Option<T>) -> Self {
        value.map_or(Self::NoData, Self::Found)
    }

    /// Records a failure.
    pub fn failed(error: &ApiError) -> Self {
        Self::Failed(FailureReport::from(error))
    }

    /// The computed value, if any.
    pub fn found(&self) -> Option<&T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NoData | Self::Failed(_) => None,
        }
    }

    /// Returns true for [`QueryOutcome::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Insertion-ordered mapping from key to value.
///
/// Serializes as a JSON object whose members keep insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedResults<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for KeyedResults<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> KeyedResults<V> {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key` unless the key is already present.
    ///
    /// Returns false when the key already existed; the first value wins.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> bool {
        let key = key.into();
        if self.contains_key(&key) {
            return false;
        }
        self.entries.push((key, value));
        true
    }

    /// Looks up the value for `key`.
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns true when `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> FromIterator<(String, V)> for KeyedResults<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut results = Self::new();
        for (key, value) in iter {
            let _ = results.insert(key, value);
        }
        results
    }
}

impl<V> IntoIterator for KeyedResults<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<V: Serialize> Serialize for KeyedResults<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for KeyedResults<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
            type Value = KeyedResults<V>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut results = KeyedResults::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    let _ = results.insert(key, value);
                }
                Ok(results)
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// Per-key outcomes of a batch call.
pub type BatchResults<T> = KeyedResults<QueryOutcome<T>>;

/// A batch result stamped with the time it was computed.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricsReport<T> {
    /// When collection finished.
    pub computed_at: DateTime<Utc>,
    /// Per-key outcomes in input order.
    pub results: BatchResults<T>,
}

impl<T> MetricsReport<T> {
    /// Stamps `results` with the current time.
    pub fn now(results: BatchResults<T>) -> Self {
        Self {
            computed_at: Utc::now(),
            results,
        }
    }
}

//! Developer metadata attached to a recording session

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const METADATA_SCORE: &str = "score";
pub const METADATA_LEVEL: &str = "level";
pub const METADATA_LEVEL_NAME: &str = "level_name";

/// A single metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        MetadataValue::Integer(value as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

/// Flat key/value mapping; merges are additive and last write wins per key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeveloperMetadata {
    entries: BTreeMap<String, MetadataValue>,
}

impl DeveloperMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `other` into this mapping without touching keys it does not name
    pub fn merge<I, K, V>(&mut self, other: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetadataValue>,
    {
        for (key, value) in other {
            self.entries.insert(key.into(), value.into());
        }
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_untouched_keys() {
        let mut metadata = DeveloperMetadata::new();
        metadata.merge([(METADATA_SCORE, 10)]);
        metadata.merge([(METADATA_LEVEL, 2)]);
        assert_eq!(metadata.len(), 2);

        metadata.merge([(METADATA_SCORE, 20)]);
        assert_eq!(metadata.get(METADATA_SCORE), Some(&MetadataValue::Integer(20)));
        assert_eq!(metadata.get(METADATA_LEVEL), Some(&MetadataValue::Integer(2)));
    }

    #[test]
    fn serializes_as_flat_json_object() {
        let mut metadata = DeveloperMetadata::new();
        metadata.merge([(METADATA_LEVEL_NAME, MetadataValue::from("Caves"))]);
        metadata.merge([(METADATA_SCORE, 7)]);
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, r#"{"level_name":"Caves","score":7}"#);
    }
}

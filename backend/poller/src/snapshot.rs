//! # Snapshots
//!
//! One successful poll, frozen.
//!
//! ## Change Detection
//!
//! - Every collection gets a fingerprint: its value as compact JSON
//! - `serde_json` maps are ordered by key, so the fingerprint does not depend on field order
//! - Numbers keep their formatting, `1` and `1.0` are different fingerprints
//! - A collection missing from a response keeps its previous value and fingerprint
use std::collections::BTreeMap;

use chrono::Utc;
use collections::TIMESTAMP_FIELD;
use serde_json::Value;

use crate::error::PollError;

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    value: Value,
    fingerprint: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    entries: BTreeMap<String, Entry>,
    timestamp: i64,
}

impl Snapshot {
    pub fn from_payload(payload: Value) -> Result<Self, PollError> {
        let Value::Object(fields) = payload else {
            return Err(PollError::Malformed("expected a JSON object".to_string()));
        };

        let mut timestamp = None;
        let mut entries = BTreeMap::new();

        for (name, value) in fields {
            if name == TIMESTAMP_FIELD {
                timestamp = value.as_i64();
                continue;
            }

            entries.insert(
                name,
                Entry {
                    fingerprint: fingerprint(&value),
                    value,
                },
            );
        }

        Ok(Self {
            entries,
            timestamp: timestamp.unwrap_or_else(|| Utc::now().timestamp_millis()),
        })
    }

    /// Names whose fingerprint differs from `previous`, or all of them without one.
    pub fn changed_since(&self, previous: Option<&Snapshot>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(name, entry)| {
                previous
                    .and_then(|p| p.entries.get(*name))
                    .map_or(true, |old| old.fingerprint != entry.fingerprint)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Copies over collections this snapshot is missing.
    pub fn carry_forward(mut self, previous: Option<&Snapshot>) -> Self {
        if let Some(previous) = previous {
            for (name, entry) in &previous.entries {
                self.entries
                    .entry(name.clone())
                    .or_insert_with(|| entry.clone());
            }
        }

        self
    }

    pub fn get(&self, collection: &str) -> Option<&Value> {
        self.entries.get(collection).map(|entry| &entry.value)
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.entries.contains_key(collection)
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

fn fingerprint(value: &Value) -> String {
    value.to_string()
}

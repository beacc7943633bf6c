//! Result records: an assignment merged with flattened metrics and metadata.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::{ParamValue, ParameterAssignment};

/// Metadata field holding the per-invocation sweep id.
pub const SWEEP_ID_FIELD: &str = "sweep_id";

/// Metadata field holding the unix timestamp the record was written.
pub const RECORDED_AT_FIELD: &str = "recorded_at";

/// A persisted trial result.
///
/// Fields are kept sorted by name so the column order of an insert is
/// stable. Assignment fields are never overwritten by metrics.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct ResultRecord {
    fields: BTreeMap<String, ParamValue>,
}

impl ResultRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a record from every parameter of an assignment.
    pub fn from_assignment(assignment: &ParameterAssignment) -> Self {
        let fields = assignment
            .iter()
            .map(|(name, _, value)| (name.to_string(), value.clone()))
            .collect();
        Self { fields }
    }

    /// Set a field unconditionally.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Merge one flattened metric.
    ///
    /// Returns `false` (and leaves the record unchanged) if the key is
    /// already present, so job output can never rewrite dedup fields.
    /// Keys are compared ASCII case-insensitively, as store columns are.
    pub fn merge_metric(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.fields.keys().any(|k| k.eq_ignore_ascii_case(&key)) {
            return false;
        }
        self.fields.insert(key, ParamValue::String(value.into()));
        true
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.fields.get(key)
    }

    /// Iterate fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

//! Flattening of structured job diagnostics into record fields.
//!
//! Object keys and array indices are joined into the parent path with a
//! separator; scalars end the recursion and are stringified; empty
//! containers contribute nothing. `{"a": {"b": 1, "c": [2, 3]}}` becomes
//! `a_b = "1"`, `a_c_0 = "2"`, `a_c_1 = "3"`.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Default path separator.
pub const DEFAULT_SEPARATOR: &str = "_";

/// Errors from metrics parsing.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Diagnostics channel was empty.
    #[error("diagnostics output is empty")]
    Empty,

    /// Diagnostics were not valid JSON.
    #[error("malformed diagnostics: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The configured prefix pattern does not compile.
    #[error("invalid strip pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Flatten any JSON value into `path -> string` pairs.
///
/// Total over every JSON value. A top-level scalar is stored under the
/// empty key.
pub fn flatten(value: &Value, separator: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    walk(value, None, separator, &mut out);
    out
}

fn walk(value: &Value, path: Option<&str>, sep: &str, out: &mut BTreeMap<String, String>) {
    let child = |key: &str| match path {
        Some(p) => format!("{}{}{}", p, sep, key),
        None => key.to_string(),
    };

    match value {
        Value::Object(map) => {
            for (key, v) in map {
                walk(v, Some(&child(key)), sep, out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                walk(v, Some(&child(&i.to_string())), sep, out);
            }
        }
        scalar => {
            out.insert(path.unwrap_or_default().to_string(), stringify(scalar));
        }
    }
}

fn stringify(scalar: &Value) -> String {
    match scalar {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Parses a job's diagnostics channel into normalized metric fields.
#[derive(Debug, Clone)]
pub struct MetricsParser {
    separator: String,
    strip: Option<Regex>,
}

impl Default for MetricsParser {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATOR)
    }
}

impl MetricsParser {
    /// Create a parser with the given path separator and no prefix stripping.
    pub fn new(separator: &str) -> Self {
        Self {
            separator: separator.to_string(),
            strip: None,
        }
    }

    /// Strip every match of `pattern` from flattened keys.
    pub fn with_strip_pattern(mut self, pattern: &str) -> Result<Self, MetricsError> {
        self.strip = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Parse raw diagnostics (JSON text) into flat, normalized metrics.
    pub fn parse(&self, raw: &str) -> Result<BTreeMap<String, String>, MetricsError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(MetricsError::Empty);
        }
        let value: Value = serde_json::from_str(trimmed).map_err(MetricsError::Malformed)?;
        Ok(self.normalize(flatten(&value, &self.separator)))
    }

    /// Apply the prefix-stripping pattern to every key.
    pub fn normalize(&self, flat: BTreeMap<String, String>) -> BTreeMap<String, String> {
        match &self.strip {
            None => flat,
            Some(re) => flat
                .into_iter()
                .map(|(k, v)| (re.replace_all(&k, "").into_owned(), v))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn flattens_nested_objects_and_arrays() {
        let v = json!({"a": {"b": 1, "c": [2, 3]}});
        assert_eq!(
            flatten(&v, "_"),
            map(&[("a_b", "1"), ("a_c_0", "2"), ("a_c_1", "3")])
        );
    }

    #[test]
    fn stringifies_every_scalar_kind() {
        let v = json!({"s": "x", "f": 1.5, "t": true, "n": null});
        assert_eq!(
            flatten(&v, "_"),
            map(&[("s", "x"), ("f", "1.5"), ("t", "true"), ("n", "null")])
        );
    }

    #[test]
    fn empty_containers_contribute_nothing() {
        let v = json!({"a": {}, "b": [], "c": {"d": []}, "e": 0});
        assert_eq!(flatten(&v, "_"), map(&[("e", "0")]));
    }

    #[test]
    fn top_level_scalar_uses_empty_key() {
        assert_eq!(flatten(&json!(42), "_"), map(&[("", "42")]));
        assert_eq!(flatten(&json!(null), "_"), map(&[("", "null")]));
    }

    #[test]
    fn top_level_array() {
        assert_eq!(
            flatten(&json!([{"x": 1}, 2]), "."),
            map(&[("0.x", "1"), ("1", "2")])
        );
    }

    #[test]
    fn flatten_is_deterministic() {
        let v = json!({"z": 1, "a": {"m": [1, {"q": 2}]}});
        assert_eq!(flatten(&v, "_"), flatten(&v, "_"));
    }

    #[test]
    fn parse_strips_namespace_prefix() {
        let parser = MetricsParser::default()
            .with_strip_pattern(r"owl\.\w+\.")
            .unwrap();
        let raw = r#"{"meters": {"owl.retwis.op": {"count": 10}}, "total_time": 61.2}"#;
        let metrics = parser.parse(raw).unwrap();
        assert_eq!(
            metrics,
            map(&[("meters_op_count", "10"), ("total_time", "61.2")])
        );
    }

    #[test]
    fn parse_rejects_empty_output() {
        let err = MetricsParser::default().parse("  \n").unwrap_err();
        assert!(matches!(err, MetricsError::Empty));
    }

    #[test]
    fn parse_rejects_malformed_output() {
        let err = MetricsParser::default()
            .parse("Exception in thread main")
            .unwrap_err();
        assert!(matches!(err, MetricsError::Malformed(_)));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = MetricsParser::default().with_strip_pattern("(").unwrap_err();
        assert!(matches!(err, MetricsError::InvalidPattern(_)));
    }
}

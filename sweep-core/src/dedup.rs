//! The dedup predicate used to count prior attempts of an assignment.
//!
//! A [`CountQuery`] is the store-agnostic description of "records that
//! already satisfy this trial": equality over an allow-listed subset of the
//! assignment's fields, relative tolerance for floats, empty string equal
//! to null, plus a validity condition. SQL stores translate it; the
//! in-memory store evaluates it with [`CountQuery::matches`].

use sweep_types::{ParamValue, ParameterAssignment, ResultRecord};

/// Default relative tolerance for float comparison.
pub const DEFAULT_FLOAT_TOLERANCE: f64 = 1e-4;

/// Condition a stored record must meet to count as a completed trial.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Validity {
    /// Every matching record counts.
    #[default]
    Always,
    /// The named field must be present and non-null.
    NotNull(String),
}

/// Field-subset predicate plus validity condition.
#[derive(Debug, Clone, PartialEq)]
pub struct CountQuery {
    /// `(field, wanted value)` pairs, all of which must match.
    pub conditions: Vec<(String, ParamValue)>,
    /// Validity condition.
    pub validity: Validity,
    /// Relative tolerance for float fields.
    pub tolerance: f64,
}

impl CountQuery {
    /// Build the query for an assignment.
    ///
    /// `fields` is the explicit allow-list; `None` compares every
    /// parameter. Allow-listed names absent from the assignment are ignored.
    pub fn for_assignment(
        assignment: &ParameterAssignment,
        fields: Option<&[String]>,
        validity: Validity,
        tolerance: f64,
    ) -> Self {
        let conditions = assignment
            .iter()
            .filter(|(name, _, _)| fields.map_or(true, |allow| allow.iter().any(|f| f == name)))
            .map(|(name, _, value)| (name.to_string(), value.clone()))
            .collect();
        Self {
            conditions,
            validity,
            tolerance,
        }
    }

    /// Evaluate the query against one record.
    pub fn matches(&self, record: &ResultRecord) -> bool {
        let valid = match &self.validity {
            Validity::Always => true,
            Validity::NotNull(field) => record.get(field).is_some(),
        };
        valid
            && self
                .conditions
                .iter()
                .all(|(k, want)| values_match(record.get(k), want, self.tolerance))
    }
}

/// Compare a stored value against the wanted one with store semantics.
pub fn values_match(stored: Option<&ParamValue>, wanted: &ParamValue, tolerance: f64) -> bool {
    if wanted.is_empty_string() {
        return stored.map_or(true, ParamValue::is_empty_string);
    }
    let Some(stored) = stored else {
        return false;
    };
    match (wanted, stored) {
        (ParamValue::Float(b), _) => match numeric(stored) {
            Some(a) if *b == 0.0 => a.abs() < tolerance,
            Some(a) => (a - b).abs() / b.abs() < tolerance,
            None => false,
        },
        (ParamValue::Int(b), ParamValue::Float(a)) => *a == *b as f64,
        (ParamValue::Bool(b), ParamValue::Int(a)) => *a == i64::from(*b),
        _ => stored == wanted,
    }
}

fn numeric(value: &ParamValue) -> Option<f64> {
    match value {
        ParamValue::Float(f) => Some(*f),
        ParamValue::Int(i) => Some(*i as f64),
        _ => None,
    }
}

//! Parameter assignments: one concrete point of a parameter matrix.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{ParamValue, TypeError};

/// How a parameter reaches the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamRole {
    /// Rendered as a `-Dkey=value` job flag.
    #[default]
    Flag,
    /// Passed alongside the job as structured context (hooks, logging), never as a flag.
    Context,
}

/// An immutable mapping from parameter name to value, in matrix declaration order.
///
/// Identity is the full key-value set; two assignments produced by the same
/// matrix compare equal iff every parameter has the same value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterAssignment {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    name: String,
    role: ParamRole,
    value: ParamValue,
}

impl ParameterAssignment {
    /// Create an empty assignment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter, returning the extended assignment.
    ///
    /// Fails if `name` is not a valid column identifier or is already present.
    pub fn with(
        mut self,
        name: impl Into<String>,
        role: ParamRole,
        value: impl Into<ParamValue>,
    ) -> Result<Self, TypeError> {
        let name = name.into();
        if !is_valid_identifier(&name) {
            return Err(TypeError::InvalidIdentifier(name));
        }
        if self.get(&name).is_some() {
            return Err(TypeError::DuplicateParameter(name));
        }
        self.entries.push(Entry {
            name,
            role,
            value: value.into(),
        });
        Ok(self)
    }

    /// Look up a parameter value by name.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.value)
    }

    /// Role of a parameter, if present.
    pub fn role(&self, name: &str) -> Option<ParamRole> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.role)
    }

    /// Iterate `(name, role, value)` in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ParamRole, &ParamValue)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.role, &e.value))
    }

    /// Iterate only the job-flag parameters.
    pub fn flags(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.iter()
            .filter(|(_, role, _)| *role == ParamRole::Flag)
            .map(|(name, _, value)| (name, value))
    }

    /// Iterate only the context parameters.
    pub fn context(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.iter()
            .filter(|(_, role, _)| *role == ParamRole::Context)
            .map(|(name, _, value)| (name, value))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ParameterAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, _, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}

/// True if `name` matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

//! Parameter matrix: the cartesian product of named candidate lists.
//!
//! The product order is fixed: the first declared parameter varies slowest
//! and the last varies fastest. Regenerating from the same specs always
//! yields the same sequence, which is what makes a sweep restartable.

use serde::Deserialize;
use sweep_types::{is_valid_identifier, ParamRole, ParamValue, ParameterAssignment, TypeError};
use thiserror::Error;

/// Errors raised when building a matrix.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    /// No parameters were declared.
    #[error("parameter matrix is empty")]
    Empty,

    /// A parameter has no candidate values.
    #[error("parameter {0} has no values")]
    NoValues(String),

    /// A float candidate is NaN or infinite and could never be matched
    /// against stored records.
    #[error("parameter {0} has a non-finite value")]
    NonFinite(String),

    /// A name is invalid or repeated.
    #[error(transparent)]
    Name(#[from] TypeError),
}

/// One named parameter and its ordered candidate values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name, also the store column name.
    pub name: String,
    /// Whether the parameter is rendered as a job flag or passed as context.
    #[serde(default)]
    pub role: ParamRole,
    /// Candidate values, in sweep order.
    pub values: Vec<ParamValue>,
}

impl ParameterSpec {
    /// Create a job-flag parameter.
    pub fn flag(name: &str, values: Vec<ParamValue>) -> Self {
        Self {
            name: name.into(),
            role: ParamRole::Flag,
            values,
        }
    }

    /// Create a context parameter.
    pub fn context(name: &str, values: Vec<ParamValue>) -> Self {
        Self {
            name: name.into(),
            role: ParamRole::Context,
            values,
        }
    }
}

/// A validated, immutable parameter matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterMatrix {
    specs: Vec<ParameterSpec>,
}

impl ParameterMatrix {
    /// Validate the specs and build a matrix.
    pub fn new(specs: Vec<ParameterSpec>) -> Result<Self, MatrixError> {
        if specs.is_empty() {
            return Err(MatrixError::Empty);
        }
        for (i, spec) in specs.iter().enumerate() {
            if !is_valid_identifier(&spec.name) {
                return Err(TypeError::InvalidIdentifier(spec.name.clone()).into());
            }
            if spec.values.is_empty() {
                return Err(MatrixError::NoValues(spec.name.clone()));
            }
            if spec
                .values
                .iter()
                .any(|v| matches!(v, ParamValue::Float(f) if !f.is_finite()))
            {
                return Err(MatrixError::NonFinite(spec.name.clone()));
            }
            if specs[..i].iter().any(|s| s.name == spec.name) {
                return Err(TypeError::DuplicateParameter(spec.name.clone()).into());
            }
        }
        Ok(Self { specs })
    }

    /// Pin a single-valued parameter in front of the declared ones.
    ///
    /// Used for the version tag, so every assignment (and every dedup
    /// query) carries it.
    pub fn pin(
        self,
        name: &str,
        role: ParamRole,
        value: impl Into<ParamValue>,
    ) -> Result<Self, MatrixError> {
        let mut specs = Vec::with_capacity(self.specs.len() + 1);
        specs.push(ParameterSpec {
            name: name.into(),
            role,
            values: vec![value.into()],
        });
        specs.extend(self.specs);
        Self::new(specs)
    }

    /// The declared parameter specs.
    pub fn specs(&self) -> &[ParameterSpec] {
        &self.specs
    }

    /// Number of assignments (∏ of candidate list lengths).
    pub fn len(&self) -> usize {
        self.specs
            .iter()
            .fold(1usize, |acc, s| acc.saturating_mul(s.values.len()))
    }

    /// Always false for a validated matrix; present for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate every assignment in product order.
    pub fn iter(&self) -> Combinations<'_> {
        Combinations {
            specs: &self.specs,
            indices: vec![0; self.specs.len()],
            done: false,
        }
    }

    /// Build the assignment at the given index vector.
    fn assignment_at(specs: &[ParameterSpec], indices: &[usize]) -> Option<ParameterAssignment> {
        // Names were validated in `new`, so `with` cannot fail here.
        specs
            .iter()
            .zip(indices)
            .try_fold(ParameterAssignment::new(), |acc, (spec, &i)| {
                acc.with(spec.name.clone(), spec.role, spec.values[i].clone())
                    .ok()
            })
    }
}

impl<'a> IntoIterator for &'a ParameterMatrix {
    type Item = ParameterAssignment;
    type IntoIter = Combinations<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Odometer-style iterator over a matrix.
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    specs: &'a [ParameterSpec],
    indices: Vec<usize>,
    done: bool,
}

impl Iterator for Combinations<'_> {
    type Item = ParameterAssignment;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = ParameterMatrix::assignment_at(self.specs, &self.indices);

        // Advance: last position fastest, carry leftwards.
        self.done = true;
        for pos in (0..self.indices.len()).rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < self.specs[pos].values.len() {
                self.done = false;
                break;
            }
            self.indices[pos] = 0;
        }

        current
    }
}

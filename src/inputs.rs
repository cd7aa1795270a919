//! Named inputs passed across the residual and output interfaces.
//!
//! Field inputs borrow their buffers: a [`MachInputs`] never owns state data, so the
//! caller keeps every buffer alive for as long as the map is in use.
use crate::error::{MachError, Result};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputValue<'a> {
    Scalar(f64),
    Field(&'a [f64]),
}

impl<'a> From<f64> for InputValue<'a> {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

impl<'a> From<&'a [f64]> for InputValue<'a> {
    fn from(field: &'a [f64]) -> Self {
        Self::Field(field)
    }
}

impl<'a> From<&'a Vec<f64>> for InputValue<'a> {
    fn from(field: &'a Vec<f64>) -> Self {
        Self::Field(field.as_slice())
    }
}

impl<'a> From<&'a nalgebra::DVector<f64>> for InputValue<'a> {
    fn from(field: &'a nalgebra::DVector<f64>) -> Self {
        Self::Field(field.as_slice())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachInputs<'a> {
    values: FxHashMap<String, InputValue<'a>>,
}

impl<'a> MachInputs<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, key: &str, value: impl Into<InputValue<'a>>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<InputValue<'a>>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&InputValue<'a>> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InputValue<'a>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The scalar stored under `key`, if present.
    pub fn scalar(&self, key: &str) -> Result<Option<f64>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(InputValue::Scalar(value)) => Ok(Some(*value)),
            Some(InputValue::Field(_)) => Err(MachError::BadInputType {
                key: key.to_string(),
                expected: "scalar",
            }),
        }
    }

    /// The field stored under `key`, if present.
    pub fn field(&self, key: &str) -> Result<Option<&'a [f64]>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(InputValue::Field(field)) => Ok(Some(*field)),
            Some(InputValue::Scalar(_)) => Err(MachError::BadInputType {
                key: key.to_string(),
                expected: "field",
            }),
        }
    }

    pub fn require_scalar(&self, key: &str) -> Result<f64> {
        self.scalar(key)?
            .ok_or_else(|| MachError::MissingInput(key.to_string()))
    }

    pub fn require_field(&self, key: &str) -> Result<&'a [f64]> {
        self.field(key)?
            .ok_or_else(|| MachError::MissingInput(key.to_string()))
    }
}

/// Checks that a field has the length an object expects.
pub fn check_size(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(MachError::SizeMismatch { expected, actual })
    }
}

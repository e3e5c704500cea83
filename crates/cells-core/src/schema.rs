//! # Schema Validation
//!
//! Every boundary crossing (storage reads, storage writes, wire payloads)
//! goes through [`validate`]. Schemas are independent of cells so they can be
//! unit-tested and swapped on their own.

use crate::error::ValidationError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed view of an untyped stored value.
pub trait Schema<T>: Send + Sync {
    /// Name used in validation errors.
    fn name(&self) -> &str;

    /// Validate a raw value and decode it.
    fn decode(&self, raw: &Value) -> Result<T, ValidationError>;

    /// Validate a typed value and encode it for storage.
    fn encode(&self, value: &T) -> Result<Value, ValidationError>;
}

/// Validate `raw` against `schema`.
pub fn validate<T>(raw: &Value, schema: &dyn Schema<T>) -> Result<T, ValidationError> {
    schema.decode(raw)
}

type Check<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// A schema defined by a serde type plus optional named refinements.
pub struct JsonSchema<T> {
    name: String,
    checks: Vec<(String, Check<T>)>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSchema<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checks: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Add a refinement the decoded value must satisfy.
    pub fn with_check<F>(mut self, check: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.checks.push((check.into(), Arc::new(predicate)));
        self
    }

    fn refine(&self, value: &T) -> Result<(), ValidationError> {
        match self.checks.iter().find(|(_, check)| !check(value)) {
            Some((check, _)) => Err(ValidationError::Check {
                schema: self.name.clone(),
                check: check.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl<T> fmt::Debug for JsonSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchema")
            .field("name", &self.name)
            .field("checks", &self.checks.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Serialize + DeserializeOwned> Schema<T> for JsonSchema<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, raw: &Value) -> Result<T, ValidationError> {
        let value = T::deserialize(raw).map_err(|e| ValidationError::Shape {
            schema: self.name.clone(),
            reason: e.to_string(),
        })?;
        self.refine(&value)?;
        Ok(value)
    }

    fn encode(&self, value: &T) -> Result<Value, ValidationError> {
        self.refine(value)?;
        serde_json::to_value(value).map_err(|e| ValidationError::Encode {
            schema: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

//! Stage inputs with strictness enforcement.

use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::RunIdentity;
use crate::errors::{StageError, UndeclaredInputError};

/// The projected view of the run context handed to a stage body.
///
/// Only declared keys are readable. Reading an undeclared key, or a value
/// that does not decode into the requested type, is a fatal stage error.
#[derive(Debug, Clone)]
pub struct StageInputs {
    identity: RunIdentity,
    stage_id: String,
    values: BTreeMap<String, serde_json::Value>,
    declared: BTreeSet<String>,
}

impl StageInputs {
    /// Creates new stage inputs.
    #[must_use]
    pub fn new(
        identity: RunIdentity,
        stage_id: impl Into<String>,
        values: BTreeMap<String, serde_json::Value>,
        declared: BTreeSet<String>,
    ) -> Self {
        Self {
            identity,
            stage_id: stage_id.into(),
            values,
            declared,
        }
    }

    /// Returns the run identity.
    #[must_use]
    pub const fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Returns the run id.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.identity.run_id
    }

    /// Returns the id of the stage these inputs were projected for.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    /// Gets a raw value.
    ///
    /// # Errors
    ///
    /// Returns `UndeclaredInputError` if the key was not declared.
    pub fn raw(&self, key: &str) -> Result<Option<&serde_json::Value>, UndeclaredInputError> {
        if !self.declared.contains(key) {
            return Err(UndeclaredInputError::new(&self.stage_id, key));
        }
        Ok(self.values.get(key))
    }

    /// Decodes a required input.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the key is undeclared, absent, or has the wrong shape.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, StageError> {
        self.optional(key)?.ok_or_else(|| {
            StageError::fatal(format!("stage '{}' requires input '{key}'", self.stage_id))
        })
    }

    /// Decodes an optional input.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if the key is undeclared or has the wrong shape.
    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StageError> {
        let Some(value) = self.raw(key)? else {
            return Ok(None);
        };
        serde_json::from_value(value.clone()).map(Some).map_err(|e| {
            StageError::fatal(format!(
                "input '{key}' of stage '{}' does not match its declared type: {e}",
                self.stage_id
            ))
        })
    }

    /// Checks whether a declared key has a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the declared keys.
    #[must_use]
    pub const fn declared(&self) -> &BTreeSet<String> {
        &self.declared
    }

    /// Returns the projected values.
    #[must_use]
    pub const fn values(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.values
    }
}

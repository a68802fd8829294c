//! The append-only run context.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{RunIdentity, StageInputs};
use crate::core::StageOutput;
use crate::errors::{DataConflictError, MissingInputError};

/// Accumulated stage outputs of one run, keyed by output key.
///
/// Keys are written once. Trigger payloads are seeded under the
/// definition's trigger keys before the first stage runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunContext {
    entries: BTreeMap<String, serde_json::Value>,
}

impl RunContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context from existing entries.
    #[must_use]
    pub fn from_entries(entries: BTreeMap<String, serde_json::Value>) -> Self {
        Self { entries }
    }

    /// Inserts a stage output.
    ///
    /// # Errors
    ///
    /// Returns `DataConflictError` if the key already exists.
    pub fn insert(&mut self, key: impl Into<String>, output: StageOutput) -> Result<(), DataConflictError> {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(DataConflictError::new(key));
        }
        self.entries.insert(key, output.into_value());
        Ok(())
    }

    /// Serializes and inserts a typed value.
    ///
    /// # Errors
    ///
    /// Returns `DataConflictError` if the key exists, or a serialization
    /// error message if the value is not representable as JSON.
    pub fn insert_typed<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<(), crate::ContentflowError> {
        let value = serde_json::to_value(value)?;
        self.insert(key, StageOutput::new(value))?;
        Ok(())
    }

    /// Gets a raw value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    /// Decodes a value into `T`.
    ///
    /// # Errors
    ///
    /// Returns the decode error if the stored value does not match `T`.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.entries
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns all keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the context is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the underlying entries.
    #[must_use]
    pub const fn entries(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.entries
    }

    /// Projects the context onto a stage's declared inputs.
    ///
    /// Every required key must be present; optional keys are passed through
    /// when present.
    ///
    /// # Errors
    ///
    /// Returns `MissingInputError` listing every absent required key.
    pub fn project(
        &self,
        identity: &RunIdentity,
        stage_id: &str,
        required: &BTreeSet<String>,
        optional: &BTreeSet<String>,
    ) -> Result<StageInputs, MissingInputError> {
        let missing: Vec<String> = required
            .iter()
            .filter(|key| !self.entries.contains_key(*key))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(MissingInputError::new(stage_id, missing));
        }

        let declared: BTreeSet<String> = required.union(optional).cloned().collect();
        let values = declared
            .iter()
            .filter_map(|key| self.entries.get(key).map(|v| (key.clone(), v.clone())))
            .collect();

        Ok(StageInputs::new(identity.clone(), stage_id, values, declared))
    }
}

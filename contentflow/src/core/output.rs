//! Stage output values.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::errors::StageError;

/// The value a stage produced, as stored in the run context.
///
/// Stage bodies produce their own statically typed output and convert it
/// with [`StageOutput::from_typed`]; readers decode it back into the same
/// type. A value that fails to decode breaks the stage's output contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageOutput(serde_json::Value);

impl Default for StageOutput {
    fn default() -> Self {
        Self::empty()
    }
}

impl StageOutput {
    /// Wraps a raw JSON value.
    #[must_use]
    pub const fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    /// An empty object output.
    #[must_use]
    pub fn empty() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }

    /// Serializes a typed stage result.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`StageError`] if the value cannot be represented as JSON.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, StageError> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Decodes the output into its declared type.
    ///
    /// # Errors
    ///
    /// Returns a fatal [`StageError`] when the value does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StageError> {
        Ok(serde_json::from_value(self.0.clone())?)
    }

    /// Returns the underlying value.
    #[must_use]
    pub const fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    /// Consumes the output, returning the underlying value.
    #[must_use]
    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

impl From<serde_json::Value> for StageOutput {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Stored {
        url: String,
        size: u64,
    }

    #[test]
    fn test_empty_is_object() {
        assert_eq!(StageOutput::default().as_value(), &json!({}));
    }

    #[test]
    fn test_typed_output_decodes_into_declared_type() {
        let stored = Stored { url: "blob://a".into(), size: 12 };
        let output = StageOutput::from_typed(&stored).unwrap();
        assert_eq!(output.decode::<Stored>().unwrap(), stored);
    }

    #[test]
    fn test_mismatched_shape_is_fatal() {
        let output = StageOutput::new(json!({"url": 5}));
        let err = output.decode::<Stored>().unwrap_err();
        assert!(!err.is_retryable());
    }
}

//! Orchestrator configuration.
//!
//! Defaults, then an optional JSON file, then `CONTENTFLOW_*` environment
//! variables are layered with the `config` crate and validated.

use ::config::{Config, Environment, File, FileFormat, Map};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::ContentflowError;
use crate::observability::LoggingConfig;
use crate::pipeline::{FanOutPolicy, RetryPolicy, DEFAULT_ERROR_MESSAGE_LIMIT};

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "CONTENTFLOW";

/// Separator between nested keys in an environment override.
pub const ENV_SEPARATOR: &str = "__";

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retry policy applied to every stage unless a stage overrides it.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Maximum length of the error message shown on an owner entity.
    #[serde(default = "default_error_message_limit")]
    pub error_message_limit: usize,

    /// Document ingestion settings.
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Course generation settings.
    #[serde(default)]
    pub course: CourseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_error_message_limit() -> usize {
    DEFAULT_ERROR_MESSAGE_LIMIT
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            error_message_limit: default_error_message_limit(),
            ingestion: IngestionConfig::default(),
            course: CourseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Document ingestion settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Delay between parse-job status polls.
    #[serde(default = "default_parse_poll_interval_ms")]
    pub parse_poll_interval_ms: u64,

    /// Status polls per parse attempt before giving up.
    #[serde(default = "default_parse_max_polls")]
    pub parse_max_polls: u32,

    /// Chunk window in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Chunks per vector upsert call.
    #[serde(default = "default_upsert_batch_size")]
    pub upsert_batch_size: usize,
}

const fn default_parse_poll_interval_ms() -> u64 {
    2000
}

const fn default_parse_max_polls() -> u32 {
    30
}

const fn default_chunk_size() -> usize {
    1000
}

const fn default_chunk_overlap() -> usize {
    200
}

const fn default_upsert_batch_size() -> usize {
    100
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            parse_poll_interval_ms: default_parse_poll_interval_ms(),
            parse_max_polls: default_parse_max_polls(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            upsert_batch_size: default_upsert_batch_size(),
        }
    }
}

impl IngestionConfig {
    /// Returns the poll interval as a duration.
    #[must_use]
    pub const fn parse_poll_interval(&self) -> Duration {
        Duration::from_millis(self.parse_poll_interval_ms)
    }
}

/// Course generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CourseConfig {
    /// What the lesson fan-out does when a lesson fails.
    #[serde(default)]
    pub fanout_policy: FanOutPolicy,

    /// Generate lessons only for the first N modules; the rest stay pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_generated_modules: Option<usize>,
}

impl OrchestratorConfig {
    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `ContentflowError::Config` if the JSON is malformed.
    pub fn from_json_str(json: &str) -> Result<Self, ContentflowError> {
        serde_json::from_str(json).map_err(|e| ContentflowError::Config(format!("Invalid configuration: {e}")))
    }

    /// Reads a JSON file, layers the process environment over it and validates.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ContentflowError> {
        Self::from_sources(Some(path.as_ref()), None)
    }

    /// Layers defaults, an optional JSON file and environment variables, in
    /// that order, then validates.
    ///
    /// Variables are named `CONTENTFLOW_<SECTION>__<FIELD>`, for example
    /// `CONTENTFLOW_INGESTION__UPSERT_BATCH_SIZE` or
    /// `CONTENTFLOW_RETRY__MAX_DELAY_MS`. `vars` replaces the process
    /// environment when given.
    ///
    /// # Errors
    ///
    /// Returns `ContentflowError::Config` if a source cannot be read, a value
    /// does not deserialize, or validation fails.
    pub fn from_sources(path: Option<&Path>, vars: Option<Map<String, String>>) -> Result<Self, ContentflowError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Json).required(true));
        }
        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| ContentflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ContentflowError::Config` naming the first invalid field.
    pub fn validate(&self) -> Result<(), ContentflowError> {
        let invalid = |msg: &str| Err(ContentflowError::Config(msg.to_string()));

        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1");
        }
        if self.error_message_limit < 4 {
            return invalid("error_message_limit must be at least 4");
        }
        if self.ingestion.parse_max_polls == 0 {
            return invalid("ingestion.parse_max_polls must be at least 1");
        }
        if self.ingestion.chunk_size == 0 {
            return invalid("ingestion.chunk_size must be positive");
        }
        if self.ingestion.chunk_overlap >= self.ingestion.chunk_size {
            return invalid("ingestion.chunk_overlap must be smaller than chunk_size");
        }
        if self.ingestion.upsert_batch_size == 0 {
            return invalid("ingestion.upsert_batch_size must be positive");
        }
        if self.course.max_generated_modules == Some(0) {
            return invalid("course.max_generated_modules must be at least 1 when set");
        }
        Ok(())
    }
}

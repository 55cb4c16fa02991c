//! Error types for regdoc.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule load error: {0}")]
    RuleLoad(#[from] ConfigLoadError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Factory error: {0}")]
    Factory(#[from] FactoryError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors (environment and option values).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Rule-file load problems. Never fatal: the affected category loads empty.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Rule file not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("Failed to read rule file {}: {reason}", path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("Failed to parse rule file {}: {reason}", path.display())]
    Unparseable { path: PathBuf, reason: String },

    #[error("Invalid entry {entry} in category {category}: {reason}")]
    InvalidEntry {
        category: String,
        entry: String,
        reason: String,
    },

    #[error("Invalid pattern for {entry} in category {category}: {reason}")]
    InvalidPattern {
        category: String,
        entry: String,
        reason: String,
    },
}

/// Malformed `ClassificationResult` construction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    #[error("Field {field} must not be blank when present")]
    BlankField { field: &'static str },

    #[error("Error result must carry the CLASSIFICATION_ERROR flag")]
    MissingErrorFlag,
}

/// A backend failed to classify a single document.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("Source too large: {size} bytes exceeds {limit} bytes")]
    SourceTooLarge { size: u64, limit: u64 },

    #[error("Backend {backend} does not support {kind} sources")]
    Unsupported { backend: String, kind: String },

    #[error("Backend {backend} timed out after {timeout:?}")]
    Timeout { backend: String, timeout: Duration },

    #[error("Model request failed: {0}")]
    Model(String),

    #[error("Failed to parse backend output: {0}")]
    Parse(String),

    #[error("Classification cancelled before dispatch")]
    Cancelled,

    #[error("Invalid result: {0}")]
    Validation(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classifier factory errors.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("Unknown backend: {name}. Available backends: {available:?}")]
    UnknownBackend { name: String, available: Vec<String> },

    #[error("Invalid backend name: {0:?}")]
    InvalidName(String),

    #[error("Backend {name} construction failed: {reason}")]
    Construction { name: String, reason: String },
}

/// Failures reported by external collaborators (sources, stores, sinks).
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{collaborator} unavailable: {reason}")]
    Unavailable { collaborator: String, reason: String },

    #[error("{collaborator} rejected the request: {reason}")]
    Rejected { collaborator: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Security verification failed: {checks}")]
    SecurityRejected { checks: String },

    #[error("Content extraction failed: {0}")]
    Extraction(String),

    #[error("Classification failed: {0}")]
    Classification(#[from] ClassifierError),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Batch fetch failed: {0}")]
    Fatal(#[from] CollaboratorError),

    #[error("No processing record for item {id}")]
    NotFound { id: String },
}

/// Result type alias for regdoc.
pub type Result<T> = std::result::Result<T, Error>;

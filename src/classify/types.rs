//! Classification data model.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Open metadata map carried on results and passed in by callers.
pub type Metadata = serde_json::Map<String, Value>;

// ── Sources ─────────────────────────────────────────────────────────

/// What a source is, for logging and `Unsupported` errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Bytes,
    Text,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::Bytes => "bytes",
            Self::Text => "text",
        })
    }
}

/// A document to classify. The variant is the source kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationSource {
    File(PathBuf),
    Bytes(Vec<u8>),
    Text(String),
}

impl ClassificationSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::File(_) => SourceKind::File,
            Self::Bytes(_) => SourceKind::Bytes,
            Self::Text(_) => SourceKind::Text,
        }
    }

    /// Short description for logs; never includes the content.
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
            Self::Text(text) => format!("<{} chars of text>", text.chars().count()),
        }
    }
}

// ── Result ──────────────────────────────────────────────────────────

/// Named entities. Every list is always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub companies: Vec<String>,
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub states: Vec<String>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.companies.is_empty() && self.products.is_empty() && self.states.is_empty()
    }

    pub fn count(&self) -> usize {
        self.companies.len() + self.products.len() + self.states.len()
    }
}

/// Extracted key fields. Every list is always present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFields {
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub registration_numbers: Vec<String>,
    #[serde(default)]
    pub amounts: Vec<String>,
}

impl KeyFields {
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() && self.registration_numbers.is_empty() && self.amounts.is_empty()
    }

    pub fn count(&self) -> usize {
        self.dates.len() + self.registration_numbers.len() + self.amounts.len()
    }
}

/// Fixed flag vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    LowConfidence,
    MissingDocumentType,
    NoEntitiesFound,
    NoDatesFound,
    NoRegistrationNumbers,
    NoProductCategoryMatch,
    ClassificationError,
}

impl Flag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::MissingDocumentType => "MISSING_DOCUMENT_TYPE",
            Self::NoEntitiesFound => "NO_ENTITIES_FOUND",
            Self::NoDatesFound => "NO_DATES_FOUND",
            Self::NoRegistrationNumbers => "NO_REGISTRATION_NUMBERS",
            Self::NoProductCategoryMatch => "NO_PRODUCT_CATEGORY_MATCH",
            Self::ClassificationError => "CLASSIFICATION_ERROR",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical classifier output. Serializes every key, empty or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub document_type: Option<String>,
    pub base_type: Option<String>,
    pub client_code: Option<String>,
    pub confidence: f64,
    pub entities: Entities,
    pub key_fields: KeyFields,
    pub metadata: Metadata,
    pub summary: Option<String>,
    pub flags: Vec<Flag>,
}

impl ClassificationResult {
    /// Result for a document that could not be classified.
    pub fn error(classifier: &str, message: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("error".into(), Value::String(message.into()));
        metadata.insert("classifier".into(), Value::String(classifier.to_string()));
        Self {
            document_type: None,
            base_type: None,
            client_code: None,
            confidence: 0.0,
            entities: Entities::default(),
            key_fields: KeyFields::default(),
            metadata,
            summary: None,
            flags: vec![Flag::ClassificationError],
        }
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_error(&self) -> bool {
        self.has_flag(Flag::ClassificationError)
    }

    /// Error message of an error result.
    pub fn error_message(&self) -> Option<&str> {
        self.metadata.get("error").and_then(Value::as_str)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(self.confidence));
        }
        for (field, value) in [
            ("document_type", &self.document_type),
            ("base_type", &self.base_type),
            ("client_code", &self.client_code),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ValidationError::BlankField { field });
            }
        }
        if self.metadata.contains_key("error") && !self.is_error() {
            return Err(ValidationError::MissingErrorFlag);
        }
        Ok(())
    }
}

/// Backend description returned by `Classifier::info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl ClassifierInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

//! Local registry-only backend.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::classify::classifier::Classifier;
use crate::classify::extract;
use crate::classify::factory::{BackendContext, BackendOptions, parse_options};
use crate::classify::scoring::{self, Analysis};
use crate::classify::types::{
    ClassificationResult, ClassificationSource, ClassifierInfo, Entities, KeyFields, Metadata,
};
use crate::error::{ClassifierError, FactoryError};
use crate::registry::PatternRegistry;

const WEIGHT_DOCUMENT_TYPE: f64 = 0.3;
const WEIGHT_ENTITIES: f64 = 0.2;
const WEIGHT_KEY_FIELDS: f64 = 0.3;
const WEIGHT_TABLES: f64 = 0.1;
const WEIGHT_SUMMARY: f64 = 0.1;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternOptions {
    /// Largest file or byte source accepted.
    pub max_file_bytes: u64,
}

impl Default for PatternOptions {
    fn default() -> Self {
        Self {
            max_file_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Classifies text with the pattern registry alone. Nothing leaves the process.
pub struct PatternClassifier {
    registry: Arc<PatternRegistry>,
    options: PatternOptions,
}

impl PatternClassifier {
    pub const NAME: &'static str = "pattern";
    pub const DISPLAY_NAME: &'static str = "Pattern Classifier";

    pub fn new(registry: Arc<PatternRegistry>, options: PatternOptions) -> Self {
        Self { registry, options }
    }

    pub fn from_options(
        context: &BackendContext,
        options: &BackendOptions,
    ) -> Result<Self, FactoryError> {
        let options = parse_options(Self::NAME, options)?;
        Ok(Self::new(context.registry.clone(), options))
    }

    /// Registry-driven analysis of plain text.
    pub fn analyze(&self, text: &str) -> Analysis {
        let registry = &self.registry;
        let document = registry.classify_document_type(text);
        let product_categories = registry.extract_product_categories(text);

        let mut companies: Vec<String> = Vec::new();
        for (_, matched) in registry.extract_client_candidates(text) {
            if !companies.contains(&matched) {
                companies.push(matched);
            }
        }
        let entities = Entities {
            companies,
            products: product_categories.clone(),
            states: registry.extract_jurisdictions(text),
        };
        let key_fields = KeyFields {
            dates: extract::extract_dates(text),
            registration_numbers: extract::extract_registration_numbers(text, registry),
            amounts: extract::extract_amounts(text),
        };
        let summary = extract::summarize(text);
        let has_tables = extract::has_tables(text);

        let base_confidence = [
            (document.is_some(), WEIGHT_DOCUMENT_TYPE),
            (!entities.is_empty(), WEIGHT_ENTITIES),
            (!key_fields.is_empty(), WEIGHT_KEY_FIELDS),
            (has_tables, WEIGHT_TABLES),
            (summary.is_some(), WEIGHT_SUMMARY),
        ]
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, weight)| weight)
        .sum();

        let (document_type, base_type) = match document {
            Some(m) => (Some(m.canonical_name), m.base_type),
            None => (None, None),
        };

        Analysis {
            document_type,
            base_type,
            entities,
            key_fields,
            product_categories,
            summary,
            base_confidence,
            page_count: extract::page_count(text),
            has_tables,
        }
    }
}

#[async_trait]
impl Classifier for PatternClassifier {
    fn info(&self) -> ClassifierInfo {
        ClassifierInfo::new(
            Self::DISPLAY_NAME,
            env!("CARGO_PKG_VERSION"),
            "Local pattern matching against the regulatory rule registry",
        )
    }

    async fn classify_one(
        &self,
        source: &ClassificationSource,
        metadata: Option<&Metadata>,
    ) -> Result<ClassificationResult, ClassifierError> {
        let text = extract::read_source_text(source, self.options.max_file_bytes).await?;
        debug!(source = %source.describe(), chars = text.len(), "Pattern classification");
        let analysis = self.analyze(&text);
        Ok(scoring::assemble(
            analysis,
            &self.registry,
            Self::NAME,
            &text,
            metadata,
        ))
    }
}

//! Remote model backend.
//!
//! The model returns a JSON analysis, sometimes wrapped in markdown. Its
//! answer is corroborated against the registry before scoring: registry
//! document types and jurisdictions take precedence over the model's.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::classify::classifier::Classifier;
use crate::classify::extract;
use crate::classify::factory::{BackendContext, BackendOptions, parse_options};
use crate::classify::scoring::{self, Analysis};
use crate::classify::types::{
    ClassificationResult, ClassificationSource, ClassifierInfo, Entities, KeyFields, Metadata,
};
use crate::error::{ClassifierError, FactoryError};
use crate::registry::PatternRegistry;

/// Largest document sent to the model.
pub const MAX_MODEL_FILE_BYTES: u64 = 20 * 1024 * 1024;

/// Environment fallback for the API key.
pub const API_KEY_ENV: &str = "MODEL_API_KEY";

const ANALYSIS_PROMPT: &str = r#"You analyze regulatory documents for agricultural product registration.
Return ONLY a JSON object with these keys:
{
  "document_type": string or null,
  "entities": {"companies": [], "products": [], "states": []},
  "key_fields": {"dates": [], "registration_numbers": [], "amounts": []},
  "product_categories": [],
  "summary": string or null,
  "has_tables": bool,
  "page_count": integer
}
States are two-letter codes. Use null or empty lists when unsure."#;

/// A model that turns document text into a JSON analysis.
#[async_trait]
pub trait DocumentModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Raw model output for `text`, expected to contain one JSON object.
    async fn analyze(&self, prompt: &str, text: &str) -> Result<String, ClassifierError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelOptions {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub max_file_bytes: u64,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/analyze".to_string(),
            model: "document-analyzer".to_string(),
            api_key: None,
            max_file_bytes: MAX_MODEL_FILE_BYTES,
        }
    }
}

/// Model output as parsed. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelAnalysis {
    document_type: Option<String>,
    entities: Entities,
    key_fields: KeyFields,
    product_categories: Vec<String>,
    summary: Option<String>,
    has_tables: bool,
    page_count: Option<u32>,
}

/// Classifier delegating analysis to a `DocumentModel`.
pub struct ModelClassifier {
    model: Arc<dyn DocumentModel>,
    registry: Arc<PatternRegistry>,
    max_file_bytes: u64,
}

impl ModelClassifier {
    pub const NAME: &'static str = "model";
    pub const DISPLAY_NAME: &'static str = "Model Classifier";

    pub fn new(model: Arc<dyn DocumentModel>, registry: Arc<PatternRegistry>) -> Self {
        Self {
            model,
            registry,
            max_file_bytes: MAX_MODEL_FILE_BYTES,
        }
    }

    /// HTTP-backed classifier. Fails without an API key in the options or
    /// in `MODEL_API_KEY`.
    pub fn from_options(
        context: &BackendContext,
        options: &BackendOptions,
    ) -> Result<Self, FactoryError> {
        let options: ModelOptions = parse_options(Self::NAME, options)?;
        let api_key = options
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok().map(SecretString::from))
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or_else(|| FactoryError::Construction {
                name: Self::NAME.to_string(),
                reason: format!("API key required (set api_key or {API_KEY_ENV})"),
            })?;
        let model = HttpDocumentModel::new(options.endpoint, options.model, api_key);
        info!(model = %model.model_name(), "Using HTTP document model");
        Ok(Self {
            model: Arc::new(model),
            registry: context.registry.clone(),
            max_file_bytes: options.max_file_bytes.min(MAX_MODEL_FILE_BYTES),
        })
    }

    fn corroborate(&self, parsed: ModelAnalysis, text: &str) -> Analysis {
        let registry = &self.registry;

        let (document_type, base_type) = match registry.classify_document_type(text) {
            Some(m) => (Some(m.canonical_name), m.base_type),
            None => match parsed
                .document_type
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
            {
                // Map the model's label onto a canonical type when possible.
                Some(label) => match registry.classify_document_type(label) {
                    Some(m) => (Some(m.canonical_name), m.base_type),
                    None => (Some(label.to_string()), None),
                },
                None => (None, None),
            },
        };

        let mut entities = parsed.entities;
        let states = registry.extract_jurisdictions(text);
        if !states.is_empty() {
            entities.states = states;
        }

        let registry_categories = registry.extract_product_categories(text);
        let product_categories = if registry_categories.is_empty() {
            parsed.product_categories
        } else {
            registry_categories
        };

        let summary = parsed.summary.filter(|s| !s.trim().is_empty());
        let present = [
            parsed.document_type.is_some(),
            !entities.is_empty(),
            !parsed.key_fields.is_empty(),
            summary.is_some(),
        ];
        let base_confidence =
            present.iter().filter(|p| **p).count() as f64 / present.len() as f64;

        Analysis {
            document_type,
            base_type,
            entities,
            key_fields: parsed.key_fields,
            product_categories,
            summary,
            base_confidence,
            page_count: parsed.page_count.unwrap_or_else(|| extract::page_count(text)),
            has_tables: parsed.has_tables,
        }
    }
}

#[async_trait]
impl Classifier for ModelClassifier {
    fn info(&self) -> ClassifierInfo {
        ClassifierInfo::new(
            Self::DISPLAY_NAME,
            env!("CARGO_PKG_VERSION"),
            format!(
                "Model analysis ({}) corroborated by the rule registry",
                self.model.model_name()
            ),
        )
    }

    async fn classify_one(
        &self,
        source: &ClassificationSource,
        metadata: Option<&Metadata>,
    ) -> Result<ClassificationResult, ClassifierError> {
        let text = extract::read_source_utf8(source, self.max_file_bytes, Self::NAME).await?;
        let raw = self.model.analyze(ANALYSIS_PROMPT, &text).await?;
        let json = extract_json_object(&raw);
        let parsed: ModelAnalysis = serde_json::from_str(&json)
            .map_err(|e| ClassifierError::Parse(format!("{e} in model output")))?;
        debug!(
            source = %source.describe(),
            document_type = ?parsed.document_type,
            "Model analysis parsed"
        );
        let analysis = self.corroborate(parsed, &text);
        Ok(scoring::assemble(
            analysis,
            &self.registry,
            Self::NAME,
            &text,
            metadata,
        ))
    }
}

/// Pull the JSON object out of a model reply that may wrap it in prose or a
/// markdown fence.
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

// ── HTTP model ──────────────────────────────────────────────────────

/// Posts `{model, prompt, text}` to an analysis endpoint with a bearer key.
pub struct HttpDocumentModel {
    endpoint: String,
    model: String,
    api_key: SecretString,
    client: reqwest::Client,
}

impl HttpDocumentModel {
    pub fn new(endpoint: String, model: String, api_key: SecretString) -> Self {
        Self {
            endpoint,
            model,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DocumentModel for HttpDocumentModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn analyze(&self, prompt: &str, text: &str) -> Result<String, ClassifierError> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "text": text,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifierError::Model(e.to_string()))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| ClassifierError::Model(e.to_string()))?;
        if !status.is_success() {
            return Err(ClassifierError::Model(format!(
                "{} returned {status}: {payload}",
                self.endpoint
            )));
        }

        // Endpoints either wrap the reply as {"output": "..."} or return it bare.
        Ok(match serde_json::from_str::<Value>(&payload) {
            Ok(Value::Object(map)) => match map.get("output").and_then(Value::as_str) {
                Some(output) => output.to_string(),
                None => Value::Object(map).to_string(),
            },
            _ => payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::classify::types::Flag;
    use crate::registry::{PatternFragment, RuleBundle};

    struct CannedModel(String);

    #[async_trait]
    impl DocumentModel for CannedModel {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn analyze(&self, _prompt: &str, _text: &str) -> Result<String, ClassifierError> {
            Ok(self.0.clone())
        }
    }

    fn registry() -> Arc<PatternRegistry> {
        let mut bundle = RuleBundle::default();
        bundle.document_types.push(
            "renewal",
            None,
            Some("RENEW"),
            vec![PatternFragment::regex(r"renewals?")],
        );
        bundle.jurisdictions.push("TX", None, None, vec![PatternFragment::literal("Texas")]);
        bundle
            .registration_formats
            .insert("TX".into(), r"TX-\d{3}".into());
        Arc::new(PatternRegistry::from_bundle(bundle))
    }

    fn classifier(reply: &str) -> ModelClassifier {
        ModelClassifier::new(Arc::new(CannedModel(reply.to_string())), registry())
    }

    #[tokio::test]
    async fn registry_overrides_model_labels() {
        let reply = r#"Here you go:
```json
{"document_type": "license", "entities": {"companies": ["Acme"], "states": ["OK"]},
 "key_fields": {"dates": ["2024-01-01"], "registration_numbers": ["TX-123", "REG-9"]},
 "product_categories": ["seed"], "summary": "Renewal notice"}
```"#;
        let result = classifier(reply)
            .classify_one(&ClassificationSource::text("Texas renewal notice"), None)
            .await
            .unwrap();
        assert_eq!(result.document_type.as_deref(), Some("renewal"));
        assert_eq!(result.base_type.as_deref(), Some("RENEW"));
        assert_eq!(result.entities.states, vec!["TX"]);
        assert_eq!(result.entities.companies, vec!["Acme"]);
        // REG-9 does not fit the TX format.
        assert_eq!(result.key_fields.registration_numbers, vec!["TX-123"]);
        assert!(result.validate().is_ok());
    }

    #[tokio::test]
    async fn model_label_used_when_registry_is_silent() {
        let reply = r#"{"document_type": "label review", "summary": "Label"}"#;
        let result = classifier(reply)
            .classify_one(&ClassificationSource::text("nothing known"), None)
            .await
            .unwrap();
        assert_eq!(result.document_type.as_deref(), Some("label review"));
        assert_eq!(result.base_type, None);
        assert!(result.has_flag(Flag::NoEntitiesFound));
    }

    #[tokio::test]
    async fn result_names_the_registered_backend() {
        let result = classifier(r#"{"summary": "Renewal"}"#)
            .classify_one(&ClassificationSource::text("Texas renewal"), None)
            .await
            .unwrap();
        assert_eq!(result.metadata["classifier"], json!("model"));
    }

    #[tokio::test]
    async fn unparseable_reply_is_a_parse_error() {
        let err = classifier("I cannot help with that")
            .classify_one(&ClassificationSource::text("x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Parse(_)));
    }

    #[tokio::test]
    async fn binary_bytes_are_unsupported() {
        let err = classifier("{}")
            .classify_one(&ClassificationSource::Bytes(vec![0xff, 0xfe, 0x00]), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClassifierError::Unsupported { ref backend, .. } if backend == "model"
        ));
        assert_eq!(
            err.to_string(),
            "Backend model does not support non-UTF-8 bytes sources"
        );
    }

    #[tokio::test]
    async fn oversized_bytes_rejected() {
        let big = vec![b'a'; (MAX_MODEL_FILE_BYTES + 1) as usize];
        let err = classifier("{}")
            .classify_one(&ClassificationSource::Bytes(big), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClassifierError::SourceTooLarge { .. }));
    }

    #[test]
    fn construction_requires_api_key() {
        let context = BackendContext::new(registry());
        let mut options = BackendOptions::new();
        options.insert("api_key".into(), json!("  "));
        assert!(matches!(
            ModelClassifier::from_options(&context, &options),
            Err(FactoryError::Construction { .. })
        ));

        options.insert("api_key".into(), json!("sk-test"));
        options.insert("model".into(), json!("doc-v2"));
        let classifier = ModelClassifier::from_options(&context, &options).unwrap();
        assert!(classifier.info().description.contains("doc-v2"));
    }

    #[test]
    fn json_is_found_in_wrapped_replies() {
        assert_eq!(extract_json_object(r#"{"a":1}"#), r#"{"a":1}"#);
        assert_eq!(extract_json_object("```json\n{\"a\":1}\n```"), r#"{"a":1}"#);
        assert_eq!(extract_json_object("```\n{\"a\":1}\n```"), r#"{"a":1}"#);
        assert_eq!(extract_json_object("Sure: {\"a\":1} done"), r#"{"a":1}"#);
    }
}

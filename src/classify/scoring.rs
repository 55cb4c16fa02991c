//! Confidence scoring and result assembly shared by every backend.
//!
//! A backend produces an `Analysis`; `assemble` turns it into the canonical
//! result: metadata enrichment, registration filtering, client lookup,
//! confidence and flags.

use serde_json::{Value, json};

use crate::classify::types::{ClassificationResult, Entities, Flag, KeyFields, Metadata};
use crate::registry::PatternRegistry;

/// Results below this confidence carry `LOW_CONFIDENCE`.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Intermediate backend output, before registry corroboration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    pub document_type: Option<String>,
    pub base_type: Option<String>,
    pub entities: Entities,
    pub key_fields: KeyFields,
    pub product_categories: Vec<String>,
    pub summary: Option<String>,
    pub base_confidence: f64,
    pub page_count: u32,
    pub has_tables: bool,
}

/// Fraction of the four domain checks that hold.
pub fn domain_confidence(analysis: &Analysis) -> f64 {
    let checks = [
        analysis.document_type.is_some(),
        !analysis.entities.states.is_empty(),
        !analysis.product_categories.is_empty(),
        !analysis.key_fields.registration_numbers.is_empty(),
    ];
    checks.iter().filter(|c| **c).count() as f64 / checks.len() as f64
}

/// Mean of base and domain confidence, clamped to `[0, 1]`.
pub fn combine(base: f64, domain: f64) -> f64 {
    let base = if base.is_finite() { base } else { 0.0 };
    ((base + domain) / 2.0).clamp(0.0, 1.0)
}

pub fn flags_for(analysis: &Analysis, confidence: f64) -> Vec<Flag> {
    let mut flags = Vec::new();
    if confidence < LOW_CONFIDENCE_THRESHOLD {
        flags.push(Flag::LowConfidence);
    }
    if analysis.document_type.is_none() {
        flags.push(Flag::MissingDocumentType);
    }
    if analysis.entities.is_empty() {
        flags.push(Flag::NoEntitiesFound);
    }
    if analysis.key_fields.dates.is_empty() {
        flags.push(Flag::NoDatesFound);
    }
    if analysis.key_fields.registration_numbers.is_empty() {
        flags.push(Flag::NoRegistrationNumbers);
    }
    if analysis.product_categories.is_empty() {
        flags.push(Flag::NoProductCategoryMatch);
    }
    flags
}

/// Keep numbers valid for at least one jurisdiction. Without jurisdictions
/// every number is kept.
pub fn filter_registration_numbers(
    registry: &PatternRegistry,
    numbers: Vec<String>,
    jurisdictions: &[String],
) -> Vec<String> {
    if jurisdictions.is_empty() {
        return numbers;
    }
    numbers
        .into_iter()
        .filter(|n| {
            jurisdictions
                .iter()
                .any(|j| registry.validate_registration_number(n, j))
        })
        .collect()
}

fn push_unique(list: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !list.contains(&item) {
            list.push(item);
        }
    }
}

/// Fold an `email_subject` entry into the entities.
pub fn enrich_from_metadata(
    analysis: &mut Analysis,
    registry: &PatternRegistry,
    metadata: &Metadata,
) {
    let Some(subject) = metadata.get("email_subject").and_then(Value::as_str) else {
        return;
    };
    push_unique(
        &mut analysis.entities.companies,
        registry
            .extract_client_candidates(subject)
            .into_iter()
            .map(|(_, matched)| matched),
    );
    push_unique(
        &mut analysis.entities.states,
        registry.extract_jurisdictions(subject),
    );
}

/// Client for the document: the text first, then each extracted company.
fn identify_client(
    registry: &PatternRegistry,
    text: &str,
    companies: &[String],
) -> (Option<String>, f64) {
    let found = registry.identify_client(text);
    if found.0.is_some() {
        return found;
    }
    companies
        .iter()
        .map(|c| registry.identify_client(c))
        .filter(|(code, _)| code.is_some())
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((None, 0.0))
}

/// Build the canonical result.
pub fn assemble(
    mut analysis: Analysis,
    registry: &PatternRegistry,
    classifier: &str,
    text: &str,
    metadata: Option<&Metadata>,
) -> ClassificationResult {
    if let Some(metadata) = metadata {
        enrich_from_metadata(&mut analysis, registry, metadata);
    }

    let numbers = std::mem::take(&mut analysis.key_fields.registration_numbers);
    analysis.key_fields.registration_numbers =
        filter_registration_numbers(registry, numbers, &analysis.entities.states);

    let domain = domain_confidence(&analysis);
    let confidence = combine(analysis.base_confidence, domain);
    let flags = flags_for(&analysis, confidence);
    let (client_code, client_confidence) =
        identify_client(registry, text, &analysis.entities.companies);

    let related: Vec<String> = analysis
        .document_type
        .as_deref()
        .map(|t| registry.related_document_types(t).to_vec())
        .unwrap_or_default();

    let mut meta = Metadata::new();
    meta.insert("classifier".into(), json!(classifier));
    meta.insert("base_confidence".into(), json!(analysis.base_confidence));
    meta.insert("domain_confidence".into(), json!(domain));
    meta.insert("product_categories".into(), json!(analysis.product_categories));
    meta.insert("related_document_types".into(), json!(related));
    meta.insert("entity_count".into(), json!(analysis.entities.count()));
    meta.insert("field_count".into(), json!(analysis.key_fields.count()));
    meta.insert("has_tables".into(), json!(analysis.has_tables));
    meta.insert("page_count".into(), json!(analysis.page_count));
    meta.insert("client_confidence".into(), json!(client_confidence));
    if let Some(source) = metadata {
        meta.insert("source_metadata".into(), Value::Object(source.clone()));
    }

    ClassificationResult {
        document_type: analysis.document_type,
        base_type: analysis.base_type,
        client_code,
        confidence,
        entities: analysis.entities,
        key_fields: analysis.key_fields,
        metadata: meta,
        summary: analysis.summary,
        flags,
    }
}

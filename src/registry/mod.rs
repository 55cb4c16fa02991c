//! Pattern registry.
//!
//! Built once from a `RuleBundle` and read-only afterward, so one instance can
//! be shared across tasks behind an `Arc`.

pub mod bundle;
pub mod client;
pub mod matcher;
pub mod version;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ConfigLoadError;

pub use bundle::{ClientRecord, FileVersion, RuleBundle, RuleEntry, RuleSet, VersionManifest};
pub use client::{ClientIndex, ClientRule};
pub use matcher::{Matcher, PatternFragment};
pub use version::{VersionWarning, WarningLatch, is_valid_version};

/// Result of `classify_document_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentTypeMatch {
    pub canonical_name: String,
    pub base_type: Option<String>,
}

#[derive(Debug, Clone)]
struct CompiledEntry {
    key: String,
    canonical_name: String,
    base_type: Option<String>,
    matcher: Matcher,
}

fn compile_rule_set(
    category: &str,
    set: &RuleSet,
    errors: &mut Vec<ConfigLoadError>,
) -> Vec<CompiledEntry> {
    let mut compiled = Vec::with_capacity(set.len());
    for entry in &set.entries {
        let fragments: Vec<PatternFragment> = entry
            .fragments
            .iter()
            .filter(|f| match matcher::check_fragment(f) {
                Ok(()) => true,
                Err(e) => {
                    errors.push(ConfigLoadError::InvalidPattern {
                        category: category.to_string(),
                        entry: entry.key.clone(),
                        reason: e.to_string(),
                    });
                    false
                }
            })
            .cloned()
            .collect();

        match Matcher::compile(&fragments) {
            Ok(Some(matcher)) => compiled.push(CompiledEntry {
                key: entry.key.clone(),
                canonical_name: entry.canonical_name.clone(),
                base_type: entry.base_type.clone(),
                matcher,
            }),
            Ok(None) => debug!(category, entry = %entry.key, "Entry has no patterns, skipped"),
            Err(e) => errors.push(ConfigLoadError::InvalidPattern {
                category: category.to_string(),
                entry: entry.key.clone(),
                reason: e.to_string(),
            }),
        }
    }
    compiled
}

/// Compiled rule bundle answering classification and extraction queries.
#[derive(Debug)]
pub struct PatternRegistry {
    document_types: Vec<CompiledEntry>,
    product_categories: Vec<CompiledEntry>,
    jurisdictions: Vec<CompiledEntry>,
    clients: ClientIndex,
    registration_formats: HashMap<String, Regex>,
    relationships: HashMap<String, Vec<String>>,
    bundle: RuleBundle,
    load_errors: Vec<ConfigLoadError>,
    warnings: Vec<VersionWarning>,
    latch: Arc<WarningLatch>,
}

impl PatternRegistry {
    /// Load the bundle in `dir` with a fresh warning latch.
    pub fn load(dir: &Path) -> Self {
        Self::load_with_latch(dir, Arc::new(WarningLatch::new()))
    }

    /// Load the bundle in `dir`, surfacing version warnings through `latch`.
    pub fn load_with_latch(dir: &Path, latch: Arc<WarningLatch>) -> Self {
        let (bundle, errors) = RuleBundle::load_dir(dir);
        let registry = Self::build(bundle, errors, latch);
        info!(
            dir = %dir.display(),
            document_types = registry.document_types.len(),
            product_categories = registry.product_categories.len(),
            jurisdictions = registry.jurisdictions.len(),
            clients = registry.clients.len(),
            "Pattern registry loaded"
        );
        registry
    }

    pub fn from_bundle(bundle: RuleBundle) -> Self {
        Self::build(bundle, Vec::new(), Arc::new(WarningLatch::new()))
    }

    pub fn from_bundle_with_latch(bundle: RuleBundle, latch: Arc<WarningLatch>) -> Self {
        Self::build(bundle, Vec::new(), latch)
    }

    /// A registry that matches nothing.
    pub fn empty() -> Self {
        Self::from_bundle(RuleBundle::default())
    }

    fn build(
        bundle: RuleBundle,
        mut errors: Vec<ConfigLoadError>,
        latch: Arc<WarningLatch>,
    ) -> Self {
        let document_types =
            compile_rule_set(bundle::DOCUMENT_TYPES, &bundle.document_types, &mut errors);
        let product_categories = compile_rule_set(
            bundle::PRODUCT_CATEGORIES,
            &bundle.product_categories,
            &mut errors,
        );
        let jurisdictions =
            compile_rule_set(bundle::JURISDICTIONS, &bundle.jurisdictions, &mut errors);
        let clients = ClientIndex::compile(&bundle.clients, &mut errors);

        let mut registration_formats = HashMap::new();
        for (code, format) in &bundle.registration_formats {
            match RegexBuilder::new(format).case_insensitive(true).build() {
                Ok(re) => {
                    registration_formats.insert(code.to_uppercase(), re);
                }
                Err(e) => errors.push(ConfigLoadError::InvalidPattern {
                    category: bundle::VALIDATION_RULES.into(),
                    entry: code.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        for error in &errors {
            warn!(error = %error, "Rule bundle problem");
        }

        let warnings = version::check_compatibility(&bundle);
        latch.surface(&warnings);

        Self {
            document_types,
            product_categories,
            jurisdictions,
            clients,
            registration_formats,
            relationships: bundle.relationships.clone(),
            bundle,
            load_errors: errors,
            warnings,
            latch,
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// First matching document type in declared order.
    pub fn classify_document_type(&self, text: &str) -> Option<DocumentTypeMatch> {
        let entry = self
            .document_types
            .iter()
            .find(|e| e.matcher.is_match(text))?;
        debug!(document_type = %entry.canonical_name, "Matched document type");
        Some(DocumentTypeMatch {
            canonical_name: entry.canonical_name.clone(),
            base_type: entry.base_type.clone(),
        })
    }

    /// Every matching product category, in declared order.
    pub fn extract_product_categories(&self, text: &str) -> Vec<String> {
        self.product_categories
            .iter()
            .filter(|e| e.matcher.is_match(text))
            .map(|e| e.canonical_name.clone())
            .collect()
    }

    /// Every matching jurisdiction code, in declared order.
    pub fn extract_jurisdictions(&self, text: &str) -> Vec<String> {
        self.jurisdictions
            .iter()
            .filter(|e| e.matcher.is_match(text))
            .map(|e| e.key.clone())
            .collect()
    }

    /// Every client alternation hit as `(code, matched substring)`.
    pub fn extract_client_candidates(&self, text: &str) -> Vec<(String, String)> {
        self.clients.candidates(text)
    }

    /// Best client for `text` and the confidence of the rung that found it.
    pub fn identify_client(&self, text: &str) -> (Option<String>, f64) {
        self.clients.identify(text)
    }

    /// Client owning the email domain of `address`.
    pub fn client_for_sender(&self, address: &str) -> Option<String> {
        self.clients.by_email_domain(address)
    }

    /// True when no format is declared for `jurisdiction`, otherwise whether
    /// the number matches the format from its first character.
    pub fn validate_registration_number(&self, number: &str, jurisdiction: &str) -> bool {
        match self
            .registration_formats
            .get(&jurisdiction.trim().to_uppercase())
        {
            None => true,
            Some(re) => re.find(number.trim()).is_some_and(|m| m.start() == 0),
        }
    }

    /// Declared registration formats, keyed by jurisdiction code.
    pub fn registration_formats(&self) -> impl Iterator<Item = (&str, &Regex)> {
        self.registration_formats
            .iter()
            .map(|(code, re)| (code.as_str(), re))
    }

    pub fn related_document_types(&self, doc_type: &str) -> &[String] {
        self.relationships
            .get(doc_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    // ── Versions ────────────────────────────────────────────────────

    pub fn warnings(&self) -> &[VersionWarning] {
        &self.warnings
    }

    pub fn load_errors(&self) -> &[ConfigLoadError] {
        &self.load_errors
    }

    pub fn latch(&self) -> &Arc<WarningLatch> {
        &self.latch
    }

    /// Log the version warnings again if the latch has been reset.
    pub fn surface_warnings(&self) -> bool {
        self.latch.surface(&self.warnings)
    }

    pub fn needs_migration(&self, file: &str) -> bool {
        version::needs_migration(&self.bundle, file)
    }

    pub fn required_migrations(&self, file: &str) -> Vec<String> {
        version::required_migrations(&self.bundle, file)
    }
}

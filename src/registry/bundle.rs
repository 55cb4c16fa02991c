//! Rule bundle: the parsed shape of a rules directory.
//!
//! Each category lives in its own YAML file. A missing or broken file yields
//! an empty category plus a `ConfigLoadError`; loading never aborts.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::ConfigLoadError;
use crate::registry::matcher::PatternFragment;

pub const DOCUMENT_TYPES: &str = "document_types";
pub const PRODUCT_CATEGORIES: &str = "product_categories";
pub const JURISDICTIONS: &str = "jurisdictions";
pub const CLIENTS: &str = "clients";
pub const VALIDATION_RULES: &str = "validation_rules";
pub const RELATIONSHIPS: &str = "relationships";
pub const VERSION_CONTROL: &str = "version_control";

/// Files whose declared version takes part in the version check.
pub const VERSIONED_FILES: &[&str] = &[
    DOCUMENT_TYPES,
    PRODUCT_CATEGORIES,
    JURISDICTIONS,
    CLIENTS,
    VALIDATION_RULES,
    RELATIONSHIPS,
];

/// One canonical entry of a category.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEntry {
    /// Map key in the rule file (jurisdiction code, rule id).
    pub key: String,
    /// Name returned by queries. Defaults to the key.
    pub canonical_name: String,
    /// Coarse bucket such as NEW, RENEW or TONNAGE.
    pub base_type: Option<String>,
    pub fragments: Vec<PatternFragment>,
}

/// An ordered category. Order is the author's and decides precedence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    pub entries: Vec<RuleEntry>,
}

impl RuleSet {
    pub fn push(
        &mut self,
        key: impl Into<String>,
        canonical_name: Option<&str>,
        base_type: Option<&str>,
        fragments: Vec<PatternFragment>,
    ) {
        let key = key.into();
        self.entries.push(RuleEntry {
            canonical_name: canonical_name.map(String::from).unwrap_or_else(|| key.clone()),
            key,
            base_type: base_type.map(String::from),
            fragments,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A recognized business entity.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClientRecord {
    /// Short alphabetic id, e.g. `EEA`.
    #[serde(skip)]
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    /// Raw regex fragments.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl ClientRecord {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            aliases: Vec::new(),
            domains: Vec::new(),
            patterns: Vec::new(),
        }
    }

    pub fn with_aliases<I: IntoIterator<Item = S>, S: Into<String>>(mut self, aliases: I) -> Self {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_domains<I: IntoIterator<Item = S>, S: Into<String>>(mut self, domains: I) -> Self {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_patterns<I: IntoIterator<Item = S>, S: Into<String>>(
        mut self,
        patterns: I,
    ) -> Self {
        self.patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Fragments for the fallback alternation: name, aliases, domains and code
    /// as literals, authored patterns verbatim.
    pub fn fragments(&self) -> Vec<PatternFragment> {
        std::iter::once(&self.name)
            .chain(&self.aliases)
            .chain(&self.domains)
            .chain(std::iter::once(&self.code))
            .map(|s| PatternFragment::literal(s.as_str()))
            .chain(self.patterns.iter().map(|p| PatternFragment::regex(p.as_str())))
            .collect()
    }
}

/// The `version_control` manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionManifest {
    pub min_compatible_version: String,
    /// Expected version per file stem, in declared order.
    pub current_versions: Vec<(String, String)>,
    /// Migration steps keyed by the version that introduced them.
    pub migrations_required: Vec<(String, Vec<String>)>,
}

impl Default for VersionManifest {
    fn default() -> Self {
        Self {
            min_compatible_version: "1.0.0".to_string(),
            current_versions: Vec::new(),
            migrations_required: Vec::new(),
        }
    }
}

/// What a rule file declared about its own version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileVersion {
    Missing,
    Unversioned,
    Declared(String),
}

/// Everything the registry is built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleBundle {
    pub document_types: RuleSet,
    pub product_categories: RuleSet,
    pub jurisdictions: RuleSet,
    pub clients: Vec<ClientRecord>,
    /// Registration-number format per jurisdiction code.
    pub registration_formats: BTreeMap<String, String>,
    /// Document type → related document types.
    pub relationships: HashMap<String, Vec<String>>,
    pub manifest: VersionManifest,
    /// Declared version per file stem, as found on disk.
    pub file_versions: BTreeMap<String, FileVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PatternSpec {
    Raw(String),
    Tagged {
        #[serde(default)]
        regex: Option<String>,
        #[serde(default)]
        literal: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    canonical_name: Option<String>,
    #[serde(default)]
    base_type: Option<String>,
    #[serde(default)]
    patterns: Vec<PatternSpec>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    pattern: Option<String>,
}

impl RuleBundle {
    /// Load every category file from `dir`.
    ///
    /// Returns the bundle plus the non-fatal problems met along the way.
    pub fn load_dir(dir: &Path) -> (Self, Vec<ConfigLoadError>) {
        let mut errors = Vec::new();
        let mut bundle = Self::default();

        let mut docs: HashMap<&str, Value> = HashMap::new();
        for name in VERSIONED_FILES.iter().chain(std::iter::once(&VERSION_CONTROL)) {
            let path = dir.join(format!("{name}.yaml"));
            match read_yaml(&path) {
                Ok(doc) => {
                    if *name != VERSION_CONTROL {
                        let version = doc
                            .get("version")
                            .and_then(scalar_string)
                            .map(FileVersion::Declared)
                            .unwrap_or(FileVersion::Unversioned);
                        bundle.file_versions.insert(name.to_string(), version);
                    }
                    docs.insert(*name, doc);
                }
                Err(e) => {
                    if *name != VERSION_CONTROL {
                        bundle
                            .file_versions
                            .insert(name.to_string(), FileVersion::Missing);
                    }
                    errors.push(e);
                }
            }
        }

        if let Some(doc) = docs.get(DOCUMENT_TYPES) {
            bundle.document_types = parse_rule_set(doc, DOCUMENT_TYPES, &mut errors);
        }
        if let Some(doc) = docs.get(PRODUCT_CATEGORIES) {
            bundle.product_categories = parse_rule_set(doc, PRODUCT_CATEGORIES, &mut errors);
        }
        if let Some(doc) = docs.get(JURISDICTIONS) {
            bundle.jurisdictions = parse_rule_set(doc, JURISDICTIONS, &mut errors);
        }
        if let Some(doc) = docs.get(CLIENTS) {
            bundle.clients = parse_clients(doc, &mut errors);
        }
        if let Some(doc) = docs.get(VALIDATION_RULES) {
            bundle.registration_formats = parse_formats(doc, &mut errors);
        }
        if let Some(doc) = docs.get(RELATIONSHIPS) {
            bundle.relationships = parse_relationships(doc, &mut errors);
        }
        if let Some(doc) = docs.get(VERSION_CONTROL) {
            bundle.manifest = parse_manifest(doc);
        }

        debug!(
            dir = %dir.display(),
            document_types = bundle.document_types.len(),
            product_categories = bundle.product_categories.len(),
            jurisdictions = bundle.jurisdictions.len(),
            clients = bundle.clients.len(),
            problems = errors.len(),
            "Loaded rule bundle"
        );

        (bundle, errors)
    }
}

fn read_yaml(path: &Path) -> Result<Value, ConfigLoadError> {
    if !path.exists() {
        return Err(ConfigLoadError::Missing {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigLoadError::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let value: Value = serde_yaml::from_str(&raw).map_err(|e| unparseable(path, e.to_string()))?;
    match value {
        Value::Mapping(_) => Ok(value),
        Value::Null => Ok(Value::Mapping(Mapping::new())),
        _ => Err(unparseable(path, "top level must be a mapping".into())),
    }
}

fn unparseable(path: &Path, reason: String) -> ConfigLoadError {
    ConfigLoadError::Unparseable {
        path: PathBuf::from(path),
        reason,
    }
}

/// Versions are sometimes written unquoted (`version: 1.0`).
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn category_mapping<'a>(doc: &'a Value, key: &str) -> Option<&'a Mapping> {
    doc.get(key).and_then(Value::as_mapping)
}

fn parse_rule_set(doc: &Value, category: &str, errors: &mut Vec<ConfigLoadError>) -> RuleSet {
    let mut set = RuleSet::default();
    let Some(mapping) = category_mapping(doc, category) else {
        return set;
    };

    for (key, value) in mapping {
        let Some(key) = scalar_string(key) else {
            errors.push(ConfigLoadError::InvalidEntry {
                category: category.into(),
                entry: format!("{key:?}"),
                reason: "entry key must be a string".into(),
            });
            continue;
        };
        let raw: RawEntry = match serde_yaml::from_value(value.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                errors.push(ConfigLoadError::InvalidEntry {
                    category: category.into(),
                    entry: key,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let fragments = raw
            .patterns
            .into_iter()
            .filter_map(|spec| match spec {
                PatternSpec::Raw(regex) => Some(PatternFragment::Regex(regex)),
                PatternSpec::Tagged {
                    regex: Some(regex), ..
                } => Some(PatternFragment::Regex(regex)),
                PatternSpec::Tagged {
                    literal: Some(literal),
                    ..
                } => Some(PatternFragment::Literal(literal)),
                PatternSpec::Tagged { .. } => None,
            })
            .collect();
        set.push(
            key,
            raw.canonical_name.as_deref(),
            raw.base_type.as_deref(),
            fragments,
        );
    }
    set
}

fn parse_clients(doc: &Value, errors: &mut Vec<ConfigLoadError>) -> Vec<ClientRecord> {
    let Some(mapping) = category_mapping(doc, "companies") else {
        return Vec::new();
    };
    let mut clients = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let Some(code) = scalar_string(key) else {
            continue;
        };
        match serde_yaml::from_value::<ClientRecord>(value.clone()) {
            Ok(mut record) => {
                record.code = code;
                clients.push(record);
            }
            Err(e) => errors.push(ConfigLoadError::InvalidEntry {
                category: CLIENTS.into(),
                entry: code,
                reason: e.to_string(),
            }),
        }
    }
    clients
}

fn parse_formats(doc: &Value, errors: &mut Vec<ConfigLoadError>) -> BTreeMap<String, String> {
    let mut formats = BTreeMap::new();
    let Some(mapping) = category_mapping(doc, "registration_numbers") else {
        return formats;
    };
    for (key, value) in mapping {
        let Some(code) = scalar_string(key) else {
            continue;
        };
        match serde_yaml::from_value::<RawFormat>(value.clone()) {
            Ok(RawFormat {
                pattern: Some(pattern),
            }) => {
                formats.insert(code, pattern);
            }
            Ok(RawFormat { pattern: None }) => {}
            Err(e) => errors.push(ConfigLoadError::InvalidEntry {
                category: VALIDATION_RULES.into(),
                entry: code,
                reason: e.to_string(),
            }),
        }
    }
    formats
}

fn parse_relationships(
    doc: &Value,
    errors: &mut Vec<ConfigLoadError>,
) -> HashMap<String, Vec<String>> {
    let mut relationships = HashMap::new();
    let Some(mapping) = category_mapping(doc, "document_relationships") else {
        return relationships;
    };
    for (key, value) in mapping {
        let Some(doc_type) = scalar_string(key) else {
            continue;
        };
        match serde_yaml::from_value::<Vec<String>>(value.clone()) {
            Ok(related) => {
                relationships.insert(doc_type, related);
            }
            Err(e) => errors.push(ConfigLoadError::InvalidEntry {
                category: RELATIONSHIPS.into(),
                entry: doc_type,
                reason: e.to_string(),
            }),
        }
    }
    relationships
}

fn parse_manifest(doc: &Value) -> VersionManifest {
    let mut manifest = VersionManifest::default();
    let Some(section) = doc.get(VERSION_CONTROL) else {
        return manifest;
    };
    if let Some(min) = section.get("min_compatible_version").and_then(scalar_string) {
        manifest.min_compatible_version = min;
    }
    if let Some(current) = section.get("current_versions").and_then(Value::as_mapping) {
        manifest.current_versions = current
            .iter()
            .filter_map(|(k, v)| Some((scalar_string(k)?, scalar_string(v)?)))
            .collect();
    }
    if let Some(migrations) = section.get("migrations_required").and_then(Value::as_mapping) {
        manifest.migrations_required = migrations
            .iter()
            .filter_map(|(k, v)| {
                let steps = v
                    .as_sequence()?
                    .iter()
                    .filter_map(scalar_string)
                    .collect();
                Some((scalar_string(k)?, steps))
            })
            .collect();
    }
    manifest
}

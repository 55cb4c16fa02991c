//! Configuration types.
//!
//! Every section has a `Default` and a `from_env()` constructor. Unset or
//! unparseable variables fall back to the default value.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Default maximum attachment size: 25 MB.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 25 * 1024 * 1024;

/// Mime types accepted by the attachment scan unless overridden.
pub const DEFAULT_ALLOWED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
    "image/tiff",
    "text/plain",
    "text/csv",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
];

/// Classifier selection and batch behaviour.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Backend name passed to the factory.
    pub classifier_type: String,
    /// Directory holding the rule bundle.
    pub rules_dir: PathBuf,
    /// Chunk size for `classify_many`.
    pub max_concurrent_requests: usize,
    /// Per-document backend timeout.
    pub request_timeout: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            classifier_type: "pattern".to_string(),
            rules_dir: PathBuf::from("./config/rules"),
            max_concurrent_requests: 5,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ClassifierConfig {
    /// Build config from `CLASSIFIER_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            classifier_type: std::env::var("CLASSIFIER_TYPE")
                .unwrap_or(defaults.classifier_type),
            rules_dir: std::env::var("CLASSIFIER_RULES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_dir),
            max_concurrent_requests: env_parse("CLASSIFIER_MAX_CONCURRENT")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_requests),
            request_timeout: env_parse("CLASSIFIER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }
}

/// Security gate policy.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Sender entries that may submit documents: domains, addresses or `*`.
    /// Empty denies all.
    pub allowed_domains: Vec<String>,
    /// Entries that are always rejected, in the same forms as the allowlist.
    pub blocked_senders: Vec<String>,
    /// Attachments larger than this fail the scan.
    pub max_attachment_bytes: u64,
    /// Accepted attachment mime types (lowercase).
    pub allowed_mime_types: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            blocked_senders: Vec::new(),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SecurityConfig {
    /// Build config from `SECURITY_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            allowed_domains: env_list("SECURITY_ALLOWED_DOMAINS"),
            blocked_senders: env_list("SECURITY_BLOCKED_SENDERS"),
            max_attachment_bytes: env_parse::<u64>("SECURITY_MAX_ATTACHMENT_MB")
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.max_attachment_bytes),
            allowed_mime_types: {
                let custom = env_list("SECURITY_ALLOWED_MIME_TYPES");
                if custom.is_empty() {
                    defaults.allowed_mime_types
                } else {
                    custom
                }
            },
        }
    }

    /// Policy with the given sender domains allowed and everything else default.
    pub fn with_allowed_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_domains: domains.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Orchestrator behaviour.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Automatic retries before a record is failed for good.
    pub max_retries: u32,
    /// Items processed concurrently by `process_batch`.
    pub max_concurrent_items: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            max_concurrent_items: 4,
        }
    }
}

impl PipelineConfig {
    /// Build config from `PIPELINE_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: env_parse("PIPELINE_MAX_RETRIES").unwrap_or(defaults.max_retries),
            max_concurrent_items: env_parse("PIPELINE_MAX_CONCURRENT_ITEMS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_items),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub classifier: ClassifierConfig,
    pub security: SecurityConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    /// Build every section from the environment.
    pub fn from_env() -> Self {
        Self {
            classifier: ClassifierConfig::from_env(),
            security: SecurityConfig::from_env(),
            pipeline: PipelineConfig::from_env(),
        }
    }

    /// Reject combinations that cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.classifier.classifier_type.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "CLASSIFIER_TYPE".into(),
                hint: "Set it to a registered backend such as \"pattern\".".into(),
            });
        }
        if self.classifier.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "CLASSIFIER_TIMEOUT_SECS".into(),
                message: "timeout must be at least one second".into(),
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

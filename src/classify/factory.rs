//! Name-keyed classifier construction.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::classify::classifier::Classifier;
use crate::classify::model::ModelClassifier;
use crate::classify::pattern::PatternClassifier;
use crate::classify::types::ClassifierInfo;
use crate::error::FactoryError;
use crate::registry::PatternRegistry;

/// Opaque per-backend options. Each backend reads its own typed view.
pub type BackendOptions = serde_json::Map<String, Value>;

/// Shared collaborators every constructor receives.
#[derive(Debug, Clone)]
pub struct BackendContext {
    pub registry: Arc<PatternRegistry>,
}

impl BackendContext {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self { registry }
    }
}

/// Builds a backend from the context and options.
pub type Constructor = Arc<
    dyn Fn(&BackendContext, &BackendOptions) -> Result<Arc<dyn Classifier>, FactoryError>
        + Send
        + Sync,
>;

/// Deserialize a backend's typed options from the opaque map.
pub fn parse_options<T: DeserializeOwned>(
    backend: &str,
    options: &BackendOptions,
) -> Result<T, FactoryError> {
    serde_json::from_value(Value::Object(options.clone())).map_err(|e| {
        FactoryError::Construction {
            name: backend.to_string(),
            reason: format!("invalid options: {e}"),
        }
    })
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Registry of classifier constructors.
pub struct ClassifierFactory {
    context: BackendContext,
    constructors: BTreeMap<String, Constructor>,
}

impl ClassifierFactory {
    /// Create an empty factory.
    pub fn new(context: BackendContext) -> Self {
        Self {
            context,
            constructors: BTreeMap::new(),
        }
    }

    /// Factory with the `pattern` and `model` backends registered.
    pub fn with_builtin_backends(context: BackendContext) -> Self {
        let mut factory = Self::new(context);
        factory.insert(PatternClassifier::NAME.to_string(), |ctx, opts| {
            Ok(Arc::new(PatternClassifier::from_options(ctx, opts)?) as Arc<dyn Classifier>)
        });
        factory.insert(ModelClassifier::NAME.to_string(), |ctx, opts| {
            Ok(Arc::new(ModelClassifier::from_options(ctx, opts)?) as Arc<dyn Classifier>)
        });
        factory
    }

    fn insert<F>(&mut self, key: String, constructor: F) -> bool
    where
        F: Fn(&BackendContext, &BackendOptions) -> Result<Arc<dyn Classifier>, FactoryError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(key, Arc::new(constructor)).is_some()
    }

    /// Register (or replace) a backend. Names are case-insensitive.
    pub fn register<F>(&mut self, name: &str, constructor: F) -> Result<(), FactoryError>
    where
        F: Fn(&BackendContext, &BackendOptions) -> Result<Arc<dyn Classifier>, FactoryError>
            + Send
            + Sync
            + 'static,
    {
        let key = normalize(name);
        if !is_valid_name(&key) {
            return Err(FactoryError::InvalidName(name.to_string()));
        }
        if self.insert(key.clone(), constructor) {
            info!(backend = %key, "Replaced classifier backend");
        } else {
            debug!(backend = %key, "Registered classifier backend");
        }
        Ok(())
    }

    pub fn create(
        &self,
        name: &str,
        options: &BackendOptions,
    ) -> Result<Arc<dyn Classifier>, FactoryError> {
        let key = normalize(name);
        let constructor =
            self.constructors
                .get(&key)
                .ok_or_else(|| FactoryError::UnknownBackend {
                    name: name.to_string(),
                    available: self.names(),
                })?;
        let classifier = constructor(&self.context, options)?;
        info!(backend = %key, classifier = %classifier.info().name, "Created classifier");
        Ok(classifier)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Info per backend from a default-options construction. A backend that
    /// cannot be built with defaults gets a placeholder description.
    pub fn list_available(&self) -> BTreeMap<String, ClassifierInfo> {
        let defaults = BackendOptions::new();
        self.constructors
            .iter()
            .map(|(name, constructor)| {
                let info = match constructor(&self.context, &defaults) {
                    Ok(classifier) => classifier.info(),
                    Err(e) => ClassifierInfo::new(
                        name.clone(),
                        "unknown",
                        format!("(Configuration required) {e}"),
                    ),
                };
                (name.clone(), info)
            })
            .collect()
    }
}

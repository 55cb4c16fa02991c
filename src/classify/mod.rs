//! Document classification: the backend trait, its factory and the built-in
//! backends.

pub mod classifier;
pub mod extract;
pub mod factory;
pub mod model;
pub mod pattern;
pub mod scoring;
pub mod types;

pub use classifier::{BatchControl, Classifier, classify_checked, run_batch};
pub use factory::{BackendContext, BackendOptions, ClassifierFactory};
pub use model::{DocumentModel, HttpDocumentModel, ModelClassifier, ModelOptions};
pub use pattern::{PatternClassifier, PatternOptions};
pub use types::{
    ClassificationResult, ClassificationSource, ClassifierInfo, Entities, Flag, KeyFields,
    Metadata, SourceKind,
};

//! Integration tests against the bundled rule files in `config/rules`.
//!
//! Exercises the registry, the factory-built pattern backend and the full
//! orchestrator over a directory of `.eml` files.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regdoc::classify::{
    BackendContext, BackendOptions, ClassificationSource, ClassifierFactory, Flag,
};
use regdoc::config::{PipelineConfig, SecurityConfig};
use regdoc::error::FactoryError;
use regdoc::pipeline::{
    Collaborators, DirectorySource, JsonlStore, MemoryAuditLog, PipelineOrchestrator,
    PlainTextExtractor, ProcessingStatus, StoredResult,
};
use regdoc::registry::PatternRegistry;
use regdoc::security::SecurityGate;

fn rules_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("config/rules")
}

fn registry() -> Arc<PatternRegistry> {
    Arc::new(PatternRegistry::load(&rules_dir()))
}

const LETTER: &str = "Elemental Enzymes Agriculture\n\
New registration application for fertilizer products in California.\n\
Registration number CA-12345, fee $1,250.00, dated 2024-01-15.\n";

#[test]
fn bundled_rules_load_cleanly() {
    let registry = registry();
    assert!(registry.load_errors().is_empty(), "{:?}", registry.load_errors());
    assert!(registry.warnings().is_empty(), "{:?}", registry.warnings());
}

#[test]
fn bundled_rules_answer_registry_queries() {
    let registry = registry();

    assert_eq!(
        registry.identify_client("Elemental Enzymes Agriculture"),
        (Some("EEA".to_string()), 1.0)
    );
    let (client, confidence) = registry.identify_client("user@elementalenzymes.com");
    assert_eq!(client.as_deref(), Some("EEA"));
    assert!(confidence >= 0.95);

    let doc = registry
        .classify_document_type("This is a new registration application")
        .unwrap();
    assert_eq!(doc.canonical_name, "registration");
    assert_eq!(doc.base_type.as_deref(), Some("NEW"));

    assert_eq!(registry.extract_jurisdictions("Filed with CDFA today"), vec!["CA"]);
    assert!(registry.validate_registration_number("CA-12345", "CA"));
    assert!(!registry.validate_registration_number("TX-12345", "CA"));
    assert!(registry.related_document_types("registration").contains(&"renewal".to_string()));
}

#[tokio::test]
async fn pattern_backend_classifies_letter_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("letter.txt");
    std::fs::write(&path, LETTER).unwrap();

    let factory = ClassifierFactory::with_builtin_backends(BackendContext::new(registry()));
    let classifier = factory.create("Pattern", &BackendOptions::new()).unwrap();

    let result = classifier
        .classify_one(&ClassificationSource::file(&path), None)
        .await
        .unwrap();

    assert_eq!(result.document_type.as_deref(), Some("registration"));
    assert_eq!(result.base_type.as_deref(), Some("NEW"));
    assert_eq!(result.client_code.as_deref(), Some("EEA"));
    assert_eq!(result.entities.states, vec!["CA"]);
    assert!(result.key_fields.registration_numbers.contains(&"CA-12345".to_string()));
    assert_eq!(result.key_fields.amounts, vec!["$1,250.00"]);
    assert!(!result.key_fields.dates.is_empty());
    assert!((0.0..=1.0).contains(&result.confidence));
    assert!(!result.has_flag(Flag::LowConfidence));
    assert_eq!(result.metadata["classifier"], "pattern");
}

#[tokio::test]
async fn batch_keeps_order_and_flags_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.txt");
    std::fs::write(&good, LETTER).unwrap();

    let factory = ClassifierFactory::with_builtin_backends(BackendContext::new(registry()));
    let classifier = factory.create("pattern", &BackendOptions::new()).unwrap();
    let sources = vec![
        ClassificationSource::file(&good),
        ClassificationSource::file(dir.path().join("missing.txt")),
        ClassificationSource::text("Quarterly tonnage report for Texas"),
    ];

    let results = classifier.classify_many(&sources, None, 2).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].document_type.as_deref(), Some("registration"));
    assert!(results[1].has_flag(Flag::ClassificationError));
    assert_eq!(results[1].confidence, 0.0);
    assert_eq!(results[2].document_type.as_deref(), Some("tonnage_report"));
    assert_eq!(results[2].entities.states, vec!["TX"]);
}

#[test]
fn unknown_backend_lists_available() {
    let factory = ClassifierFactory::with_builtin_backends(BackendContext::new(registry()));
    match factory.create("ocr", &BackendOptions::new()) {
        Err(FactoryError::UnknownBackend { available, .. }) => {
            assert_eq!(available, vec!["model".to_string(), "pattern".to_string()]);
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("ocr backend should not exist"),
    }
}

#[tokio::test]
async fn inbox_directory_end_to_end() {
    let inbox = tempfile::tempdir().unwrap();
    std::fs::write(
        inbox.path().join("a_good.eml"),
        "From: Alice <alice@elementalenzymes.com>\r\n\
Subject: New registration application - California\r\n\
\r\n\
Elemental Enzymes Agriculture submits a fertilizer registration.\r\n\
Registration number CA-12345.\r\n",
    )
    .unwrap();
    std::fs::write(
        inbox.path().join("b_foreign.eml"),
        "From: someone@unknown-sender.net\r\n\
Subject: New registration application\r\n\
\r\n\
Please register our product.\r\n",
    )
    .unwrap();

    let out = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonlStore::new(out.path().join("results.jsonl")));
    let log = Arc::new(MemoryAuditLog::new());

    let registry = registry();
    let factory = ClassifierFactory::with_builtin_backends(BackendContext::new(registry));
    let classifier = factory.create("pattern", &BackendOptions::new()).unwrap();

    let gate = SecurityGate::new(
        SecurityConfig::with_allowed_domains(["elementalenzymes.com"]),
        log.clone(),
        log.clone(),
    );
    let orchestrator = PipelineOrchestrator::new(
        gate,
        classifier,
        Collaborators {
            source: Arc::new(DirectorySource::new(inbox.path())),
            extractor: Arc::new(PlainTextExtractor),
            store: store.clone(),
            audit: log.clone(),
            notifier: log.clone(),
        },
        PipelineConfig::default(),
    )
    .with_classify_timeout(Duration::from_secs(5));

    let records = orchestrator.process_batch().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].item_id, "a_good");
    assert_eq!(records[0].status, ProcessingStatus::Completed);
    assert_eq!(records[0].metadata["document_type"], "registration");
    assert_eq!(records[0].metadata["client_code"], "EEA");
    assert_eq!(records[1].status, ProcessingStatus::Failed);
    assert_eq!(records[1].error.as_deref(), Some("sender_verification"));

    let lines = std::fs::read_to_string(store.path()).unwrap();
    let stored: Vec<StoredResult> = lines
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].item_id, "a_good");
    assert_eq!(stored[0].classification.entities.states, vec!["CA"]);

    assert_eq!(log.events_of("security_verdict").await.len(), 2);
    assert_eq!(log.events_of("processing_completed").await.len(), 1);
    assert_eq!(log.alerts().await.len(), 1);
    assert_eq!(
        orchestrator.get_state("b_foreign").await.unwrap().status,
        ProcessingStatus::Failed
    );
}

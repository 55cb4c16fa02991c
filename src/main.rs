use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use serde_json::{Value, json};
use tracing::{info, warn};

use regdoc::classify::{
    BackendContext, BackendOptions, BatchControl, ClassificationSource, ClassifierFactory,
    run_batch,
};
use regdoc::config::AppConfig;
use regdoc::error::ConfigError;
use regdoc::pipeline::{
    Collaborators, DirectorySource, InMemoryStore, JsonlStore, PersistenceStore,
    PipelineOrchestrator, PlainTextExtractor, TracingAuditSink, TracingNotifier,
};
use regdoc::registry::PatternRegistry;
use regdoc::security::SecurityGate;

/// Classify regulatory documents, or run a directory of `.eml` messages
/// through the processing pipeline.
///
/// Environment: CLASSIFIER_TYPE, CLASSIFIER_RULES_DIR, CLASSIFIER_MAX_CONCURRENT,
/// CLASSIFIER_TIMEOUT_SECS, CLASSIFIER_OPTIONS (JSON object), SECURITY_*, PIPELINE_*
#[derive(Parser, Debug)]
#[command(name = "regdoc", version, about)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Classifier backend, overriding CLASSIFIER_TYPE
    #[arg(long)]
    backend: Option<String>,

    /// Directory of .eml messages to process
    #[arg(long, conflicts_with = "files")]
    inbox: Option<PathBuf>,

    /// Append stored results to this JSONL file
    #[arg(long, requires = "inbox")]
    out: Option<PathBuf>,

    /// List classifier backends and exit
    #[arg(long)]
    list: bool,

    /// Text files to classify
    files: Vec<PathBuf>,
}

/// Backend options from `CLASSIFIER_OPTIONS`, empty when unset.
fn backend_options_from_env() -> Result<BackendOptions, ConfigError> {
    match std::env::var("CLASSIFIER_OPTIONS") {
        Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("CLASSIFIER_OPTIONS: {e}"))),
        _ => Ok(BackendOptions::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output = run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(cli: Cli) -> regdoc::Result<Value> {
    let mut config = AppConfig::from_env();
    if let Some(backend) = &cli.backend {
        config.classifier.classifier_type = backend.clone();
    }
    config.validate()?;

    let registry = Arc::new(PatternRegistry::load(&config.classifier.rules_dir));
    info!(
        rules_dir = %config.classifier.rules_dir.display(),
        load_errors = registry.load_errors().len(),
        "Loaded rule bundle"
    );

    let factory = ClassifierFactory::with_builtin_backends(BackendContext::new(registry.clone()));

    if cli.list {
        return Ok(json!(factory.list_available()));
    }

    let options = backend_options_from_env()?;
    let classifier = factory.create(&config.classifier.classifier_type, &options)?;

    // Stop dispatching new chunks on Ctrl-C
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing current chunk");
                shutdown.store(true, Ordering::SeqCst);
            }
        });
    }

    if let Some(inbox) = cli.inbox {
        let audit = Arc::new(TracingAuditSink);
        let notifier = Arc::new(TracingNotifier);
        let memory_store = Arc::new(InMemoryStore::new());
        let store: Arc<dyn PersistenceStore> = match &cli.out {
            Some(path) => Arc::new(JsonlStore::new(path)),
            None => memory_store.clone(),
        };

        let gate = SecurityGate::new(config.security.clone(), audit.clone(), notifier.clone());
        let orchestrator = PipelineOrchestrator::new(
            gate,
            classifier,
            Collaborators {
                source: Arc::new(DirectorySource::new(inbox)),
                extractor: Arc::new(PlainTextExtractor),
                store,
                audit,
                notifier,
            },
            config.pipeline.clone(),
        )
        .with_classify_timeout(config.classifier.request_timeout);

        let records = orchestrator.process_batch().await?;
        return Ok(if cli.out.is_some() {
            json!({ "records": records })
        } else {
            json!({ "records": records, "results": memory_store.results().await })
        });
    }

    let sources: Vec<ClassificationSource> =
        cli.files.into_iter().map(ClassificationSource::file).collect();
    let control = BatchControl::new(config.classifier.max_concurrent_requests)
        .with_timeout(config.classifier.request_timeout)
        .with_shutdown(shutdown);
    let results = run_batch(classifier.as_ref(), &sources, None, &control).await;

    let output: Vec<Value> = sources
        .iter()
        .zip(&results)
        .map(|(source, result)| json!({ "source": source.describe(), "result": result }))
        .collect();
    Ok(Value::Array(output))
}

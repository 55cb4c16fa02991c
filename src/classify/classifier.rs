//! The classifier trait and its batch contract.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::classify::types::{ClassificationResult, ClassificationSource, ClassifierInfo, Metadata};
use crate::error::ClassifierError;

/// A document classification backend.
///
/// `classify_one` propagates failures; `classify_many` folds them into
/// error-flagged results so one bad document never sinks a batch.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn info(&self) -> ClassifierInfo;

    async fn classify_one(
        &self,
        source: &ClassificationSource,
        metadata: Option<&Metadata>,
    ) -> Result<ClassificationResult, ClassifierError>;

    /// Classify in chunks of `max_concurrent`, preserving order and length.
    async fn classify_many(
        &self,
        sources: &[ClassificationSource],
        metadata: Option<&[Metadata]>,
        max_concurrent: usize,
    ) -> Vec<ClassificationResult> {
        run_batch(self, sources, metadata, &BatchControl::new(max_concurrent)).await
    }
}

/// Knobs for a batch run.
#[derive(Debug, Clone)]
pub struct BatchControl {
    pub max_concurrent: usize,
    /// Per-document limit. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Checked before each chunk is dispatched.
    pub shutdown: Option<Arc<AtomicBool>>,
}

impl BatchControl {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            timeout: None,
            shutdown: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// One document with an optional timeout, result validated.
pub async fn classify_checked<C: Classifier + ?Sized>(
    classifier: &C,
    source: &ClassificationSource,
    metadata: Option<&Metadata>,
    timeout: Option<Duration>,
) -> Result<ClassificationResult, ClassifierError> {
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, classifier.classify_one(source, metadata))
            .await
            .map_err(|_| ClassifierError::Timeout {
                backend: classifier.info().name,
                timeout: limit,
            })??,
        None => classifier.classify_one(source, metadata).await?,
    };
    result.validate()?;
    Ok(result)
}

/// Chunked batch run. Chunk N+1 starts only after chunk N has resolved.
pub async fn run_batch<C: Classifier + ?Sized>(
    classifier: &C,
    sources: &[ClassificationSource],
    metadata: Option<&[Metadata]>,
    control: &BatchControl,
) -> Vec<ClassificationResult> {
    let name = classifier.info().name;
    let chunk_size = control.max_concurrent.max(1);
    let mut results = Vec::with_capacity(sources.len());

    info!(
        classifier = %name,
        count = sources.len(),
        chunk_size,
        "Classifying batch"
    );

    for (index, chunk) in sources.chunks(chunk_size).enumerate() {
        if control.is_cancelled() {
            let remaining = sources.len() - results.len();
            warn!(classifier = %name, remaining, "Batch cancelled at chunk boundary");
            let cancelled = ClassifierError::Cancelled.to_string();
            results.extend((0..remaining).map(|_| ClassificationResult::error(&name, &cancelled)));
            break;
        }

        let offset = index * chunk_size;
        let tasks = chunk.iter().enumerate().map(|(i, source)| {
            let md = metadata.and_then(|m| m.get(offset + i));
            let name = name.as_str();
            async move {
                match classify_checked(classifier, source, md, control.timeout).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(
                            classifier = %name,
                            source = %source.describe(),
                            error = %e,
                            "Document classification failed"
                        );
                        ClassificationResult::error(name, e.to_string())
                    }
                }
            }
        });
        results.extend(join_all(tasks).await);
        debug!(classifier = %name, chunk = index, done = results.len(), "Chunk resolved");
    }

    results
}

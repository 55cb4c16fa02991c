//! Pipeline orchestrator: security gate, extraction, classification and
//! persistence for each inbound message, tracked by a processing record.
//!
//! Flow per item:
//! 1. `SecurityGate::inspect()` → a failing verdict fails the record for good
//! 2. `ContentExtractor::extract()`
//! 3. `classify_checked()` with the per-document timeout
//! 4. `PersistenceStore::store_result()`
//!
//! Errors after the gate count against the retry bound. A record in
//! `RETRYING` waits for an external scheduler to call `process` again.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::classify::{
    ClassificationResult, ClassificationSource, Classifier, Metadata, classify_checked,
};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::audit::{
    AuditEvent, AuditSink, NotificationSink, Severity, alert_best_effort, record_best_effort,
};
use crate::pipeline::records::RecordStore;
use crate::pipeline::state::{ProcessingRecord, ProcessingStatus, TransitionError};
use crate::pipeline::types::{ContentExtractor, MessageSource, PersistenceStore, RawMessage};
use crate::security::SecurityGate;

/// Default per-document classification timeout.
pub const DEFAULT_CLASSIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// External collaborators the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn MessageSource>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub store: Arc<dyn PersistenceStore>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationSink>,
}

pub struct PipelineOrchestrator {
    gate: SecurityGate,
    classifier: Arc<dyn Classifier>,
    collaborators: Collaborators,
    config: PipelineConfig,
    classify_timeout: Duration,
    records: RecordStore,
}

impl PipelineOrchestrator {
    pub fn new(
        gate: SecurityGate,
        classifier: Arc<dyn Classifier>,
        collaborators: Collaborators,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gate,
            classifier,
            collaborators,
            config,
            classify_timeout: DEFAULT_CLASSIFY_TIMEOUT,
            records: RecordStore::new(),
        }
    }

    pub fn with_classify_timeout(mut self, timeout: Duration) -> Self {
        self.classify_timeout = timeout;
        self
    }

    /// Snapshot of the record for `item_id`.
    pub async fn get_state(&self, item_id: &str) -> Option<ProcessingRecord> {
        self.records.get(item_id).await
    }

    /// All records seen so far.
    pub async fn records(&self) -> Vec<ProcessingRecord> {
        self.records.all().await
    }

    /// Run one message through the pipeline and return its record.
    ///
    /// The record lock is held only while a transition is applied, so
    /// `get_state` sees `PROCESSING` while stages run. A call for an item
    /// that is in flight or terminal returns its current snapshot.
    pub async fn process(&self, message: &RawMessage) -> ProcessingRecord {
        let id = message.id.as_str();
        let handle = self.records.entry(id).await;
        let attempt = {
            let mut record = handle.lock().await;
            if let Err(e) = record.start() {
                debug!(id = %id, status = %record.status, error = %e, "Skipping item");
                return record.clone();
            }
            record.set_meta("sender", message.sender.as_str());
            record.set_meta("subject", message.subject.as_str());
            record.retry_count + 1
        };
        info!(id = %id, sender = %message.sender, attempt, "Processing item");

        // Step 1: Security gate
        let verdict = self.gate.inspect(message).await;
        if !verdict.is_safe {
            let failed = verdict.failed_summary();
            let rejection = PipelineError::SecurityRejected {
                checks: failed.clone(),
            };
            let Some(((), record)) = self.transition(id, |r| r.fail(failed)).await else {
                return self.snapshot(id).await;
            };
            error!(id = %id, error = %rejection, "Item rejected");
            self.audit(
                "processing_failed",
                id,
                Severity::Critical,
                json!({
                    "stage": "security",
                    "error": record.error,
                    "threat_level": verdict.threat_level,
                }),
            )
            .await;
            return record;
        }

        // Steps 2-4
        match self.run_stages(message).await {
            Ok(classification) => {
                let completed = self
                    .transition(id, |r| {
                        r.complete()?;
                        r.set_meta("document_type", classification.document_type.clone());
                        r.set_meta("client_code", classification.client_code.clone());
                        r.set_meta("confidence", classification.confidence);
                        Ok(())
                    })
                    .await;
                let Some(((), record)) = completed else {
                    return self.snapshot(id).await;
                };

                let duration_ms = record.duration_ms().unwrap_or_default();
                info!(
                    id = %id,
                    document_type = classification.document_type.as_deref().unwrap_or("unknown"),
                    confidence = classification.confidence,
                    duration_ms,
                    "Item completed"
                );
                self.audit(
                    "processing_completed",
                    id,
                    Severity::Info,
                    json!({
                        "duration_ms": duration_ms,
                        "document_type": classification.document_type,
                        "client_code": classification.client_code,
                        "confidence": classification.confidence,
                    }),
                )
                .await;
                record
            }
            Err(e) => self.handle_failure(id, e).await,
        }
    }

    /// Fetch pending messages and process them, up to
    /// `max_concurrent_items` at a time. Records come back in fetch order.
    pub async fn process_batch(&self) -> Result<Vec<ProcessingRecord>, PipelineError> {
        let source = self.collaborators.source.name().to_string();
        let messages = match self.collaborators.source.get_unread().await {
            Ok(messages) => messages,
            Err(e) => {
                error!(source = %source, error = %e, "Failed to fetch pending items");
                let details = json!({ "source": source, "error": e.to_string() });
                alert_best_effort(
                    self.collaborators.notifier.as_ref(),
                    "batch",
                    Severity::Critical,
                    details.clone(),
                )
                .await;
                self.audit("batch_fetch_failed", "batch", Severity::Critical, details)
                    .await;
                return Err(PipelineError::Fatal(e));
            }
        };

        let count = messages.len();
        info!(source = %source, count, "Processing batch");

        let records: Vec<ProcessingRecord> = stream::iter(messages.iter())
            .map(|message| self.process(message))
            .buffered(self.config.max_concurrent_items.max(1))
            .collect()
            .await;

        let completed = records
            .iter()
            .filter(|r| r.status == ProcessingStatus::Completed)
            .count();
        info!(completed, total = count, "Batch processing complete");
        Ok(records)
    }

    async fn run_stages(
        &self,
        message: &RawMessage,
    ) -> Result<ClassificationResult, PipelineError> {
        let content = self
            .collaborators
            .extractor
            .extract(message)
            .await
            .map_err(|e| PipelineError::Extraction(e.to_string()))?;

        let mut metadata = Metadata::new();
        metadata.insert("email_subject".into(), Value::from(message.subject.as_str()));
        metadata.insert("sender".into(), Value::from(message.sender.as_str()));
        metadata.insert("page_count".into(), Value::from(content.page_count));

        let source = ClassificationSource::text(content.text.clone());
        let classification = classify_checked(
            self.classifier.as_ref(),
            &source,
            Some(&metadata),
            Some(self.classify_timeout),
        )
        .await?;

        self.collaborators
            .store
            .store_result(message, &content, &classification)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        Ok(classification)
    }

    async fn handle_failure(&self, id: &str, cause: PipelineError) -> ProcessingRecord {
        let max_retries = self.config.max_retries;
        let failed = self
            .transition(id, |r| r.record_failure(cause.to_string(), max_retries))
            .await;
        let Some((status, record)) = failed else {
            return self.snapshot(id).await;
        };

        let details = json!({
            "error": cause.to_string(),
            "retry_count": record.retry_count,
            "max_retries": max_retries,
        });
        match status {
            ProcessingStatus::Failed => {
                error!(id = %id, retries = record.retry_count, error = %cause, "Item failed");
                alert_best_effort(
                    self.collaborators.notifier.as_ref(),
                    id,
                    Severity::Warning,
                    details.clone(),
                )
                .await;
                self.audit("processing_failed", id, Severity::Warning, details)
                    .await;
            }
            _ => {
                warn!(
                    id = %id,
                    retries = record.retry_count,
                    error = %cause,
                    "Item will be retried"
                );
                self.audit("processing_retry", id, Severity::Info, details)
                    .await;
            }
        }
        record
    }

    /// Apply a transition under the record lock and return its output with a
    /// snapshot. `None` when the record is gone or the transition is refused.
    async fn transition<F, R>(&self, id: &str, f: F) -> Option<(R, ProcessingRecord)>
    where
        F: FnOnce(&mut ProcessingRecord) -> Result<R, TransitionError>,
    {
        let applied = self
            .records
            .update(id, |r| f(r).map(|out| (out, r.clone())))
            .await;
        match applied {
            Ok(Ok(done)) => Some(done),
            Ok(Err(e)) => {
                error!(id = %id, error = %e, "Invalid state change");
                None
            }
            Err(e) => {
                error!(id = %id, error = %e, "Record disappeared");
                None
            }
        }
    }

    async fn snapshot(&self, id: &str) -> ProcessingRecord {
        self.records
            .get(id)
            .await
            .unwrap_or_else(|| ProcessingRecord::new(id))
    }

    async fn audit(&self, event_type: &str, id: &str, severity: Severity, details: Value) {
        record_best_effort(
            self.collaborators.audit.as_ref(),
            AuditEvent::new(event_type, id, severity, details),
        )
        .await;
    }
}

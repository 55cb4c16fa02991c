//! Document processing pipeline.
//!
//! Every inbound message flows through:
//! 1. `SecurityGate::inspect()`: sender, attachment and content checks
//! 2. `ContentExtractor::extract()`: message → classifiable text
//! 3. `Classifier::classify_one()`: the configured backend
//! 4. `PersistenceStore::store_result()`
//!
//! `PipelineOrchestrator` tracks each item in a `ProcessingRecord` and
//! reports to the audit and notification sinks along the way.

pub mod audit;
pub mod collaborators;
pub mod message;
pub mod orchestrator;
pub mod records;
pub mod state;
pub mod types;

pub use audit::{
    AuditEvent, AuditSink, MemoryAuditLog, NotificationSink, Severity, TracingAuditSink,
    TracingNotifier,
};
pub use collaborators::{
    DirectorySource, InMemoryStore, JsonlStore, MemorySource, PlainTextExtractor, StoredResult,
};
pub use orchestrator::{Collaborators, PipelineOrchestrator};
pub use records::RecordStore;
pub use state::{ProcessingRecord, ProcessingStatus, TransitionError};
pub use types::{
    Attachment, ContentExtractor, ExtractedContent, MessageSource, PersistenceStore, RawMessage,
};

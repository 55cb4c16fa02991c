//! Shared types for the document processing pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ClassificationResult;
use crate::error::CollaboratorError;

// ── Inbound message ─────────────────────────────────────────────────

/// A received message carrying regulatory documents. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Unique ID (source-native or generated).
    pub id: String,
    /// Sender address, e.g. `alice@example.com`.
    pub sender: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    pub plain_body: Option<String>,
    pub html_body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl RawMessage {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            ..Self::default()
        }
    }

    pub fn with_plain_body(mut self, body: impl Into<String>) -> Self {
        self.plain_body = Some(body.into());
        self
    }

    pub fn with_html_body(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Plain body, or the HTML body with tags stripped.
    pub fn body_text(&self) -> String {
        match (&self.plain_body, &self.html_body) {
            (Some(plain), _) if !plain.trim().is_empty() => plain.clone(),
            (_, Some(html)) => crate::pipeline::message::strip_html(html),
            _ => String::new(),
        }
    }
}

/// A file attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    /// Declared size in bytes. May differ from `content.len()` when the
    /// source reports size without handing over the bytes.
    pub size: u64,
    #[serde(default, skip_serializing)]
    pub content: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            size: content.len() as u64,
            content,
        }
    }

    /// Attachment metadata without content.
    pub fn declared(filename: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            size,
            content: Vec::new(),
        }
    }

    /// Lowercased extension, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
    }
}

/// Output of a `ContentExtractor`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub text: String,
    pub page_count: u32,
    pub has_tables: bool,
}

// ── Collaborators ───────────────────────────────────────────────────

/// Where pending messages come from.
#[async_trait]
pub trait MessageSource: Send + Sync {
    fn name(&self) -> &str;

    /// Messages not yet processed.
    async fn get_unread(&self) -> Result<Vec<RawMessage>, CollaboratorError>;
}

/// Turns a message into classifiable text.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, message: &RawMessage) -> Result<ExtractedContent, CollaboratorError>;
}

/// Persists classification outcomes.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn store_result(
        &self,
        message: &RawMessage,
        content: &ExtractedContent,
        classification: &ClassificationResult,
    ) -> Result<(), CollaboratorError>;
}

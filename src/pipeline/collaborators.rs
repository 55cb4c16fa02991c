//! Default collaborator implementations: a text extractor, message sources
//! and result stores.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classify::ClassificationResult;
use crate::error::CollaboratorError;
use crate::pipeline::types::{
    ContentExtractor, ExtractedContent, MessageSource, PersistenceStore, RawMessage,
};

// ── Extraction ──────────────────────────────────────────────────────

/// Subject, body and any text attachments. Binary attachments are counted
/// but not decoded.
#[derive(Debug, Default)]
pub struct PlainTextExtractor;

impl PlainTextExtractor {
    fn is_text(mime_type: &str) -> bool {
        mime_type.starts_with("text/")
    }
}

#[async_trait]
impl ContentExtractor for PlainTextExtractor {
    async fn extract(&self, message: &RawMessage) -> Result<ExtractedContent, CollaboratorError> {
        let mut parts = Vec::new();
        if !message.subject.trim().is_empty() {
            parts.push(message.subject.trim().to_string());
        }
        let body = message.body_text();
        if !body.trim().is_empty() {
            parts.push(body);
        }
        for attachment in &message.attachments {
            if Self::is_text(&attachment.mime_type) && !attachment.content.is_empty() {
                parts.push(String::from_utf8_lossy(&attachment.content).into_owned());
            }
        }

        if parts.is_empty() {
            return Err(CollaboratorError::Rejected {
                collaborator: "extractor".into(),
                reason: format!("message {} has no readable content", message.id),
            });
        }

        Ok(ExtractedContent {
            text: parts.join("\n\n"),
            page_count: message.attachments.len().max(1) as u32,
            has_tables: false,
        })
    }
}

// ── Sources ─────────────────────────────────────────────────────────

/// Reads `*.eml` files from a directory, in file name order.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl MessageSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    async fn get_unread(&self) -> Result<Vec<RawMessage>, CollaboratorError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            CollaboratorError::Unavailable {
                collaborator: format!("directory source {}", self.dir.display()),
                reason: e.to_string(),
            }
        })?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"))
            {
                paths.push(path);
            }
        }
        paths.sort();

        let mut messages = Vec::with_capacity(paths.len());
        for path in paths {
            let fallback_id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let raw = tokio::fs::read(&path).await?;
            match RawMessage::from_rfc822(&fallback_id, &raw) {
                Ok(message) => {
                    debug!(id = %message.id, path = %path.display(), "Loaded message");
                    messages.push(message);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unparseable message");
                }
            }
        }

        info!(dir = %self.dir.display(), count = messages.len(), "Fetched messages");
        Ok(messages)
    }
}

/// Hands out a fixed set of messages once.
#[derive(Debug, Default)]
pub struct MemorySource {
    pending: Mutex<Vec<RawMessage>>,
}

impl MemorySource {
    pub fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            pending: Mutex::new(messages),
        }
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_unread(&self) -> Result<Vec<RawMessage>, CollaboratorError> {
        Ok(std::mem::take(&mut *self.pending.lock().await))
    }
}

// ── Stores ──────────────────────────────────────────────────────────

/// One persisted classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub item_id: String,
    pub sender: String,
    pub subject: String,
    pub stored_at: DateTime<Utc>,
    pub page_count: u32,
    pub has_tables: bool,
    pub classification: ClassificationResult,
}

impl StoredResult {
    fn build(
        message: &RawMessage,
        content: &ExtractedContent,
        classification: &ClassificationResult,
    ) -> Self {
        Self {
            item_id: message.id.clone(),
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            stored_at: Utc::now(),
            page_count: content.page_count,
            has_tables: content.has_tables,
            classification: classification.clone(),
        }
    }
}

/// Appends one JSON line per result.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PersistenceStore for JsonlStore {
    async fn store_result(
        &self,
        message: &RawMessage,
        content: &ExtractedContent,
        classification: &ClassificationResult,
    ) -> Result<(), CollaboratorError> {
        let record = StoredResult::build(message, content, classification);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(id = %message.id, path = %self.path.display(), "Stored result");
        Ok(())
    }
}

/// Keeps results in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    results: Mutex<Vec<StoredResult>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn results(&self) -> Vec<StoredResult> {
        self.results.lock().await.clone()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn store_result(
        &self,
        message: &RawMessage,
        content: &ExtractedContent,
        classification: &ClassificationResult,
    ) -> Result<(), CollaboratorError> {
        self.results
            .lock()
            .await
            .push(StoredResult::build(message, content, classification));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Attachment;

    #[tokio::test]
    async fn extractor_joins_subject_body_and_text_attachments() {
        let msg = RawMessage::new("m1", "a@example.com", "Renewal")
            .with_plain_body("See attached.")
            .with_attachment(Attachment::new("r.txt", "text/plain", b"REG-1234".to_vec()))
            .with_attachment(Attachment::new("l.pdf", "application/pdf", vec![0, 1, 2]));
        let content = PlainTextExtractor.extract(&msg).await.unwrap();
        assert_eq!(content.text, "Renewal\n\nSee attached.\n\nREG-1234");
        assert_eq!(content.page_count, 2);
        assert!(!content.has_tables);
    }

    #[tokio::test]
    async fn extractor_rejects_empty_message() {
        let msg = RawMessage::new("m1", "a@example.com", "  ");
        assert!(matches!(
            PlainTextExtractor.extract(&msg).await,
            Err(CollaboratorError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn directory_source_reads_eml_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b.eml"),
            "From: b@example.com\r\nSubject: second\r\n\r\nbody\r\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.eml"),
            "From: a@example.com\r\nSubject: first\r\n\r\nbody\r\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let messages = DirectorySource::new(dir.path()).get_unread().await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "a");
        assert_eq!(messages[1].subject, "second");
    }

    #[tokio::test]
    async fn directory_source_missing_dir_is_unavailable() {
        let source = DirectorySource::new("/nonexistent/regdoc-inbox");
        assert!(matches!(
            source.get_unread().await,
            Err(CollaboratorError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn memory_source_drains() {
        let source = MemorySource::new(vec![RawMessage::new("1", "a@b.com", "s")]);
        assert_eq!(source.get_unread().await.unwrap().len(), 1);
        assert!(source.get_unread().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn jsonl_store_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::new(dir.path().join("results.jsonl"));
        let msg = RawMessage::new("m1", "a@example.com", "Renewal");
        let content = ExtractedContent {
            text: "x".into(),
            page_count: 1,
            has_tables: false,
        };
        let result = ClassificationResult::error("pattern", "boom");
        store.store_result(&msg, &content, &result).await.unwrap();
        store.store_result(&msg, &content, &result).await.unwrap();

        let written = std::fs::read_to_string(store.path()).unwrap();
        let lines: Vec<_> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: StoredResult = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.item_id, "m1");
        assert!(parsed.classification.is_error());
    }

    #[tokio::test]
    async fn in_memory_store_keeps_results() {
        let store = InMemoryStore::new();
        let msg = RawMessage::new("m1", "a@example.com", "s");
        let result = ClassificationResult::error("p", "e");
        store
            .store_result(&msg, &ExtractedContent::default(), &result)
            .await
            .unwrap();
        assert_eq!(store.results().await[0].sender, "a@example.com");
    }
}

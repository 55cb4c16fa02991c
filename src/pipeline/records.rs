//! Shared store of processing records.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::error::PipelineError;
use crate::pipeline::state::ProcessingRecord;

/// Records keyed by item id. Each record sits behind its own lock so work on
/// one item is serialized without blocking others.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: RwLock<HashMap<String, Arc<Mutex<ProcessingRecord>>>>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the record for `item_id`, creating a `PENDING` one if absent.
    pub async fn entry(&self, item_id: &str) -> Arc<Mutex<ProcessingRecord>> {
        if let Some(existing) = self.records.read().await.get(item_id) {
            return existing.clone();
        }
        self.records
            .write()
            .await
            .entry(item_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ProcessingRecord::new(item_id))))
            .clone()
    }

    /// Snapshot of one record.
    pub async fn get(&self, item_id: &str) -> Option<ProcessingRecord> {
        let handle = self.records.read().await.get(item_id).cloned()?;
        let record = handle.lock().await;
        Some(record.clone())
    }

    /// Apply `f` to an existing record.
    pub async fn update<F, R>(&self, item_id: &str, f: F) -> Result<R, PipelineError>
    where
        F: FnOnce(&mut ProcessingRecord) -> R,
    {
        let handle = self
            .records
            .read()
            .await
            .get(item_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound {
                id: item_id.to_string(),
            })?;
        let mut record = handle.lock().await;
        Ok(f(&mut record))
    }

    /// Snapshots of every record, sorted by item id.
    pub async fn all(&self) -> Vec<ProcessingRecord> {
        let handles: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(handles.len());
        for handle in handles {
            out.push(handle.lock().await.clone());
        }
        out.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        out
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

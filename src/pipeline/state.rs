//! Processing state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// State of a processing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    /// Created, not yet started.
    Pending,
    /// Inside the pipeline.
    Processing,
    /// Classified and persisted.
    Completed,
    /// Rejected or out of retries. Never leaves this state.
    Failed,
    /// Waiting for an external scheduler to re-dispatch.
    Retrying,
}

impl ProcessingStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: ProcessingStatus) -> bool {
        use ProcessingStatus::*;

        matches!(
            (self, target),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Retrying)
                | (Retrying, Processing)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Retrying => "RETRYING",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot transition item {item_id} from {from} to {to}")]
pub struct TransitionError {
    pub item_id: String,
    pub from: ProcessingStatus,
    pub to: ProcessingStatus,
}

/// Lifecycle of one item through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub item_id: String,
    pub status: ProcessingStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last error message, if any.
    pub error: Option<String>,
    pub retry_count: u32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ProcessingRecord {
    /// New record in `PENDING`.
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            status: ProcessingStatus::Pending,
            started_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
            metadata: Map::new(),
        }
    }

    /// Transition to a new state, stamping timestamps.
    pub fn transition_to(&mut self, target: ProcessingStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(target) {
            return Err(TransitionError {
                item_id: self.item_id.clone(),
                from: self.status,
                to: target,
            });
        }
        self.status = target;

        match target {
            ProcessingStatus::Processing if self.started_at.is_none() => {
                self.started_at = Some(Utc::now());
            }
            ProcessingStatus::Completed | ProcessingStatus::Failed => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition_to(ProcessingStatus::Processing)
    }

    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition_to(ProcessingStatus::Completed)?;
        self.error = None;
        Ok(())
    }

    /// Fail with `reason`. Terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition_to(ProcessingStatus::Failed)?;
        self.error = Some(reason.into());
        Ok(())
    }

    /// Count a failed attempt: `RETRYING` while within `max_retries`, `FAILED`
    /// once past it. Returns the new status.
    pub fn record_failure(
        &mut self,
        reason: impl Into<String>,
        max_retries: u32,
    ) -> Result<ProcessingStatus, TransitionError> {
        let target = if self.retry_count + 1 > max_retries {
            ProcessingStatus::Failed
        } else {
            ProcessingStatus::Retrying
        };
        self.transition_to(target)?;
        self.retry_count += 1;
        self.error = Some(reason.into());
        Ok(target)
    }

    /// Milliseconds between start and completion.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    pub fn set_meta(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

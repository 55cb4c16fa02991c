//! Audit and notification collaborators.
//!
//! Both are best-effort: a failing sink is logged and never changes the
//! outcome of the item being processed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::CollaboratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `security_verdict`, `processing_completed`.
    pub event_type: String,
    /// Item the event is about; `batch` for batch-level events.
    pub subject_id: String,
    pub severity: Severity,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        subject_id: impl Into<String>,
        severity: Severity,
        details: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            subject_id: subject_id.into(),
            severity,
            details,
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn alert(
        &self,
        subject_id: &str,
        severity: Severity,
        details: Value,
    ) -> Result<(), CollaboratorError>;
}

/// Record an event, logging instead of failing.
pub async fn record_best_effort(sink: &dyn AuditSink, event: AuditEvent) {
    let event_type = event.event_type.clone();
    let subject_id = event.subject_id.clone();
    if let Err(e) = sink.record(event).await {
        warn!(event_type = %event_type, id = %subject_id, error = %e, "Audit sink failed");
    }
}

/// Send an alert, logging instead of failing.
pub async fn alert_best_effort(
    sink: &dyn NotificationSink,
    subject_id: &str,
    severity: Severity,
    details: Value,
) {
    if let Err(e) = sink.alert(subject_id, severity, details).await {
        warn!(
            id = %subject_id,
            severity = severity.as_str(),
            error = %e,
            "Notification sink failed"
        );
    }
}

// ── Tracing implementations ─────────────────────────────────────────

/// Writes audit events to the log.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), CollaboratorError> {
        let details = serde_json::to_string(&event.details)?;
        match event.severity {
            Severity::Info => info!(
                event_type = %event.event_type,
                id = %event.subject_id,
                details = %details,
                "Audit"
            ),
            Severity::Warning => warn!(
                event_type = %event.event_type,
                id = %event.subject_id,
                details = %details,
                "Audit"
            ),
            Severity::Critical => error!(
                event_type = %event.event_type,
                id = %event.subject_id,
                details = %details,
                "Audit"
            ),
        }
        Ok(())
    }
}

/// Logs alerts. Stands in for a real paging or mail integration.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationSink for TracingNotifier {
    async fn alert(
        &self,
        subject_id: &str,
        severity: Severity,
        details: Value,
    ) -> Result<(), CollaboratorError> {
        warn!(
            id = %subject_id,
            severity = severity.as_str(),
            details = %details,
            "Alert"
        );
        Ok(())
    }
}

/// Keeps events and alerts in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
    alerts: Mutex<Vec<(String, Severity, Value)>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }

    pub async fn alerts(&self) -> Vec<(String, Severity, Value)> {
        self.alerts.lock().await.clone()
    }

    /// Events of one type, in recording order.
    pub async fn events_of(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<(), CollaboratorError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for MemoryAuditLog {
    async fn alert(
        &self,
        subject_id: &str,
        severity: Severity,
        details: Value,
    ) -> Result<(), CollaboratorError> {
        self.alerts
            .lock()
            .await
            .push((subject_id.to_string(), severity, details));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct BrokenSink;

    #[async_trait]
    impl AuditSink for BrokenSink {
        async fn record(&self, _event: AuditEvent) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Unavailable {
                collaborator: "audit".into(),
                reason: "disk full".into(),
            })
        }
    }

    #[async_trait]
    impl NotificationSink for BrokenSink {
        async fn alert(
            &self,
            _subject_id: &str,
            _severity: Severity,
            _details: Value,
        ) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Unavailable {
                collaborator: "notifier".into(),
                reason: "smtp down".into(),
            })
        }
    }

    #[tokio::test]
    async fn best_effort_swallows_sink_failures() {
        record_best_effort(
            &BrokenSink,
            AuditEvent::new("test", "item-1", Severity::Info, json!({})),
        )
        .await;
        alert_best_effort(&BrokenSink, "item-1", Severity::Critical, json!({})).await;
    }

    #[tokio::test]
    async fn memory_log_keeps_order() {
        let log = MemoryAuditLog::new();
        for kind in ["a", "b", "a"] {
            log.record(AuditEvent::new(kind, "x", Severity::Info, json!(null)))
                .await
                .unwrap();
        }
        assert_eq!(log.events().await.len(), 3);
        assert_eq!(log.events_of("a").await.len(), 2);
        log.alert("x", Severity::Warning, json!({"k": 1})).await.unwrap();
        assert_eq!(log.alerts().await[0].1, Severity::Warning);
    }

    #[test]
    fn event_serializes_lowercase_severity() {
        let event = AuditEvent::new("security_verdict", "m1", Severity::Critical, json!({}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["event_type"], "security_verdict");
    }
}

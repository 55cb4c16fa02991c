//! Security gate: sender, attachment and content checks for inbound messages.
//!
//! `verify` is pure and always runs all three checks. `inspect` also reports
//! the verdict to the audit and notification sinks.

use std::fmt;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::SecurityConfig;
use crate::pipeline::audit::{
    AuditEvent, AuditSink, NotificationSink, Severity, alert_best_effort, record_best_effort,
};
use crate::pipeline::types::{Attachment, RawMessage};

/// Urgency, credential and transfer lures.
static SUSPICIOUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\burgent(?:ly)?\b.{0,40}\b(?:action|response|payment|wire|reply)\b",
        r"(?i)\b(?:act|respond)\s+(?:now|immediately)\b",
        r"(?i)\b(?:account|payment)\s+(?:will\s+be\s+)?(?:suspended|locked|terminated)\b",
        r"(?i)\b(?:verify|confirm|update|validate)\s+your\s+(?:account|password|credentials|login|identity)\b",
        r"(?i)\b(?:send|provide|enter)\s+(?:us\s+)?your\s+(?:password|passcode|pin|credentials)\b",
        r"(?i)\b(?:wire|bank)\s+transfer\b",
        r"(?i)\bgift\s+cards?\b",
        r"(?i)\bmalicious\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Extensions always refused by the default scanner.
const BLOCKED_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "pif", "msi", "js", "vbs", "ps1", "jar", "dll",
];

// ── Verdict ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
}

impl ThreatLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn severity(self) -> Severity {
        match self {
            Self::Low => Severity::Warning,
            Self::Medium => Severity::Warning,
            Self::High => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityCheck {
    SenderVerification,
    AttachmentScan,
    ContentSafety,
}

impl SecurityCheck {
    pub const ALL: [SecurityCheck; 3] = [
        Self::SenderVerification,
        Self::AttachmentScan,
        Self::ContentSafety,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SenderVerification => "sender_verification",
            Self::AttachmentScan => "attachment_scan",
            Self::ContentSafety => "content_safety",
        }
    }
}

impl fmt::Display for SecurityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of `SecurityGate::verify`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityVerdict {
    pub is_safe: bool,
    pub checks_passed: Vec<SecurityCheck>,
    pub checks_failed: Vec<SecurityCheck>,
    pub threat_level: ThreatLevel,
    pub scan_date: DateTime<Utc>,
    /// Human-readable reason for each failure.
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl SecurityVerdict {
    pub fn failed(&self, check: SecurityCheck) -> bool {
        self.checks_failed.contains(&check)
    }

    /// Failed check names joined with `, `.
    pub fn failed_summary(&self) -> String {
        self.checks_failed
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Threat level from the failed checks: attachments dominate, then breadth.
pub fn threat_level(failed: &[SecurityCheck]) -> ThreatLevel {
    if failed.is_empty() {
        ThreatLevel::Low
    } else if failed.contains(&SecurityCheck::AttachmentScan) {
        ThreatLevel::High
    } else if failed.len() > 1 {
        ThreatLevel::Medium
    } else {
        ThreatLevel::Low
    }
}

// ── Attachment scanning hook ────────────────────────────────────────

/// Per-attachment content scan run after the size and type checks.
pub trait AttachmentScanner: Send + Sync {
    /// `Err(reason)` rejects the attachment.
    fn scan(&self, attachment: &Attachment) -> Result<(), String>;
}

/// Refuses executable file extensions; does not inspect content.
#[derive(Debug, Default)]
pub struct ExtensionScanner;

impl AttachmentScanner for ExtensionScanner {
    fn scan(&self, attachment: &Attachment) -> Result<(), String> {
        match attachment.extension() {
            Some(ext) if BLOCKED_EXTENSIONS.contains(&ext.as_str()) => Err(format!(
                "{}: blocked file extension .{ext}",
                attachment.filename
            )),
            _ => Ok(()),
        }
    }
}

// ── Sender helpers ──────────────────────────────────────────────────

/// Bare address from `Name <addr>` or `addr`.
pub fn bare_address(sender: &str) -> &str {
    let s = sender.trim();
    match (s.rfind('<'), s.rfind('>')) {
        (Some(start), Some(end)) if end > start => s[start + 1..end].trim(),
        _ => s,
    }
}

/// Split an address into `(local, domain)`. `None` when either part is empty
/// or contains whitespace.
pub fn split_address(address: &str) -> Option<(&str, &str)> {
    let (local, domain) = address.rsplit_once('@')?;
    let valid = |p: &str| !p.is_empty() && !p.chars().any(char::is_whitespace);
    (valid(local) && valid(domain) && !local.contains('@')).then_some((local, domain))
}

/// Whether a sender policy entry covers `address`.
///
/// `*` covers every address. An entry with a local part covers only that
/// address. A bare domain, with or without a leading `@`, covers every
/// address at exactly that domain. Comparison ignores case.
pub fn sender_matches(entry: &str, address: &str) -> bool {
    let entry = entry.trim();
    if entry == "*" {
        return true;
    }
    let Some((_, domain)) = split_address(address) else {
        return false;
    };
    match entry.strip_prefix('@') {
        Some(entry_domain) => entry_domain.eq_ignore_ascii_case(domain),
        None if entry.contains('@') => entry.eq_ignore_ascii_case(address),
        None => entry.eq_ignore_ascii_case(domain),
    }
}

/// Allowlist check. An empty allowlist admits nobody.
pub fn is_sender_allowed(allowed: &[String], address: &str) -> bool {
    allowed.iter().any(|entry| sender_matches(entry, address))
}

// ── Gate ────────────────────────────────────────────────────────────

/// Stateless per-message verification. Shareable across tasks.
pub struct SecurityGate {
    config: SecurityConfig,
    scanner: Arc<dyn AttachmentScanner>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationSink>,
}

impl SecurityGate {
    pub fn new(
        config: SecurityConfig,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            config,
            scanner: Arc::new(ExtensionScanner),
            audit,
            notifier,
        }
    }

    /// Replace the attachment content scanner.
    pub fn with_scanner(mut self, scanner: Arc<dyn AttachmentScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    fn check_sender(&self, sender: &str) -> Result<(), String> {
        let address = bare_address(sender);
        if split_address(address).is_none() {
            return Err(format!("malformed sender address {sender:?}"));
        }
        if self
            .config
            .blocked_senders
            .iter()
            .any(|entry| sender_matches(entry, address))
        {
            return Err(format!("sender {address} is blocklisted"));
        }
        if !is_sender_allowed(&self.config.allowed_domains, address) {
            return Err(format!("sender {address} is not from an allowed domain"));
        }
        Ok(())
    }

    fn check_attachments(&self, attachments: &[Attachment]) -> Result<(), String> {
        let mut problems = Vec::new();
        for attachment in attachments {
            if attachment.size > self.config.max_attachment_bytes {
                problems.push(format!(
                    "{}: {} bytes exceeds limit of {} bytes",
                    attachment.filename, attachment.size, self.config.max_attachment_bytes
                ));
                continue;
            }
            let mime = attachment.mime_type.trim().to_lowercase();
            if !self.config.allowed_mime_types.iter().any(|m| *m == mime) {
                problems.push(format!(
                    "{}: mime type {mime:?} not allowed",
                    attachment.filename
                ));
                continue;
            }
            if let Err(reason) = self.scanner.scan(attachment) {
                problems.push(reason);
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    fn check_content(&self, message: &RawMessage) -> Result<(), String> {
        let text = format!("{}\n{}", message.subject, message.body_text());
        match SUSPICIOUS_PATTERNS.iter().find(|p| p.is_match(&text)) {
            Some(pattern) => Err(format!(
                "content matches suspicious pattern {}",
                pattern.as_str()
            )),
            None => Ok(()),
        }
    }

    /// Run every check. Pure: no sinks are called.
    pub fn verify(&self, message: &RawMessage) -> SecurityVerdict {
        let mut passed = Vec::new();
        let mut failed = Vec::new();
        let mut reasons = Vec::new();

        for check in SecurityCheck::ALL {
            let outcome = match check {
                SecurityCheck::SenderVerification => self.check_sender(&message.sender),
                SecurityCheck::AttachmentScan => self.check_attachments(&message.attachments),
                SecurityCheck::ContentSafety => self.check_content(message),
            };
            match outcome {
                Ok(()) => passed.push(check),
                Err(reason) => {
                    debug!(
                        id = %message.id,
                        check = check.as_str(),
                        reason = %reason,
                        "Security check failed"
                    );
                    failed.push(check);
                    reasons.push(format!("{check}: {reason}"));
                }
            }
        }

        SecurityVerdict {
            is_safe: failed.is_empty(),
            threat_level: threat_level(&failed),
            checks_passed: passed,
            checks_failed: failed,
            scan_date: Utc::now(),
            reasons,
        }
    }

    /// Verify, audit the verdict, and alert on failure.
    pub async fn inspect(&self, message: &RawMessage) -> SecurityVerdict {
        let verdict = self.verify(message);
        let details = json!({
            "sender": message.sender,
            "subject": message.subject,
            "verdict": verdict,
        });

        let severity = if verdict.is_safe {
            Severity::Info
        } else {
            verdict.threat_level.severity()
        };
        record_best_effort(
            self.audit.as_ref(),
            AuditEvent::new("security_verdict", &message.id, severity, details),
        )
        .await;

        if !verdict.is_safe {
            warn!(
                id = %message.id,
                threat_level = verdict.threat_level.as_str(),
                failed = %verdict.failed_summary(),
                "Message failed security verification"
            );
            alert_best_effort(
                self.notifier.as_ref(),
                &message.id,
                severity,
                json!({
                    "threat_level": verdict.threat_level,
                    "checks_failed": verdict.checks_failed,
                    "reasons": verdict.reasons,
                }),
            )
            .await;
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::audit::MemoryAuditLog;

    const MB: u64 = 1024 * 1024;

    fn gate_with_log() -> (SecurityGate, Arc<MemoryAuditLog>) {
        let log = Arc::new(MemoryAuditLog::new());
        let gate = SecurityGate::new(
            SecurityConfig::with_allowed_domains(["example.com"]),
            log.clone(),
            log.clone(),
        );
        (gate, log)
    }

    fn gate() -> SecurityGate {
        gate_with_log().0
    }

    fn message() -> RawMessage {
        RawMessage::new("m1", "test@example.com", "Registration documents")
            .with_plain_body("Please find the label attached.")
    }

    #[test]
    fn clean_message_passes_all_checks() {
        let label = Attachment::declared("label.pdf", "application/pdf", MB);
        let verdict = gate().verify(&message().with_attachment(label));
        assert!(verdict.is_safe);
        assert_eq!(verdict.checks_passed, SecurityCheck::ALL.to_vec());
        assert!(verdict.checks_failed.is_empty());
        assert_eq!(verdict.threat_level, ThreatLevel::Low);
    }

    #[test]
    fn oversized_attachment_is_high_threat() {
        let msg =
            message().with_attachment(Attachment::declared("big.pdf", "application/pdf", 26 * MB));
        let verdict = gate().verify(&msg);
        assert!(verdict.failed(SecurityCheck::AttachmentScan));
        assert!(!verdict.is_safe);
        assert_eq!(verdict.threat_level, ThreatLevel::High);
        assert_eq!(verdict.checks_failed, vec![SecurityCheck::AttachmentScan]);
    }

    #[test]
    fn executable_and_unknown_mime_fail_scan() {
        let exe = message().with_attachment(Attachment::declared(
            "setup.exe",
            "application/pdf",
            10,
        ));
        assert!(gate().verify(&exe).failed(SecurityCheck::AttachmentScan));

        let zip = message().with_attachment(Attachment::declared("a.zip", "application/zip", 10));
        assert!(gate().verify(&zip).failed(SecurityCheck::AttachmentScan));
    }

    #[test]
    fn senders_without_domain_always_fail() {
        for sender in ["nobody", "nobody@", "@example.com", "a b@example.com", ""] {
            let msg = RawMessage {
                sender: sender.into(),
                ..message()
            };
            let verdict = gate().verify(&msg);
            assert!(
                verdict.failed(SecurityCheck::SenderVerification),
                "{sender:?} passed"
            );
        }
    }

    #[test]
    fn sender_allow_and_block_lists() {
        let mut config = SecurityConfig::with_allowed_domains(["example.com"]);
        config.blocked_senders = vec!["spam@example.com".into()];
        let log = Arc::new(MemoryAuditLog::new());
        let gate = SecurityGate::new(config, log.clone(), log);

        let named = RawMessage {
            sender: "Test User <test@example.com>".into(),
            ..message()
        };
        assert!(gate.verify(&named).is_safe);

        let blocked = RawMessage {
            sender: "SPAM@example.com".into(),
            ..message()
        };
        assert!(gate.verify(&blocked).failed(SecurityCheck::SenderVerification));

        let foreign = RawMessage {
            sender: "suspicious@malicious-domain.com".into(),
            ..message()
        };
        let verdict = gate.verify(&foreign);
        assert!(verdict.failed(SecurityCheck::SenderVerification));
        assert_eq!(verdict.threat_level, ThreatLevel::Low);
    }

    #[test]
    fn policy_entries_cover_address_or_domain() {
        assert!(sender_matches("*", "a@anywhere.org"));
        assert!(sender_matches("Grower@Example.com", "grower@example.com"));
        assert!(!sender_matches("grower@example.com", "other@example.com"));
        assert!(sender_matches("@example.com", "a@EXAMPLE.com"));
        assert!(sender_matches("example.com", "a@example.com"));
        assert!(!sender_matches("example.com", "a@mail.example.com"));
        assert!(!sender_matches("example.com", "a@notexample.com"));
        assert!(!sender_matches("example.com", "not-an-address"));

        let allowed = vec!["cdfa.ca.gov".to_string(), "agent@example.com".to_string()];
        assert!(is_sender_allowed(&allowed, "clerk@cdfa.ca.gov"));
        assert!(is_sender_allowed(&allowed, "agent@example.com"));
        assert!(!is_sender_allowed(&allowed, "other@example.com"));
        assert!(!is_sender_allowed(&[], "clerk@cdfa.ca.gov"));
    }

    #[test]
    fn blocklisted_domain_overrides_allowlist() {
        let mut config = SecurityConfig::with_allowed_domains(["*"]);
        config.blocked_senders = vec!["@spam.test".into()];
        let log = Arc::new(MemoryAuditLog::new());
        let gate = SecurityGate::new(config, log.clone(), log);

        let blocked = RawMessage {
            sender: "bulk@spam.test".into(),
            ..message()
        };
        assert!(gate.verify(&blocked).failed(SecurityCheck::SenderVerification));
        assert!(gate.verify(&message()).is_safe);
    }

    #[test]
    fn empty_allow_list_denies_everyone() {
        let log = Arc::new(MemoryAuditLog::new());
        let gate = SecurityGate::new(SecurityConfig::default(), log.clone(), log);
        assert!(gate.verify(&message()).failed(SecurityCheck::SenderVerification));
    }

    #[test]
    fn suspicious_content_fails_check() {
        let msg =
            message().with_plain_body("URGENT: immediate action required, verify your account");
        let verdict = gate().verify(&msg);
        assert!(verdict.failed(SecurityCheck::ContentSafety));
        assert_eq!(verdict.threat_level, ThreatLevel::Low);

        let subject_lure = RawMessage::new("m2", "test@example.com", "Wire transfer needed");
        assert!(gate().verify(&subject_lure).failed(SecurityCheck::ContentSafety));
    }

    #[test]
    fn two_non_attachment_failures_are_medium() {
        let msg = RawMessage {
            sender: "x@elsewhere.org".into(),
            ..message().with_plain_body("Please send your password today")
        };
        let verdict = gate().verify(&msg);
        assert_eq!(
            verdict.checks_failed,
            vec![SecurityCheck::SenderVerification, SecurityCheck::ContentSafety]
        );
        assert_eq!(verdict.threat_level, ThreatLevel::Medium);
        assert_eq!(verdict.failed_summary(), "sender_verification, content_safety");
    }

    #[test]
    fn threat_level_rules() {
        use SecurityCheck::*;
        assert_eq!(threat_level(&[]), ThreatLevel::Low);
        assert_eq!(threat_level(&[ContentSafety]), ThreatLevel::Low);
        assert_eq!(threat_level(&[AttachmentScan]), ThreatLevel::High);
        assert_eq!(threat_level(&[SenderVerification, ContentSafety]), ThreatLevel::Medium);
        assert_eq!(threat_level(&SecurityCheck::ALL), ThreatLevel::High);
    }

    struct RejectAll;

    impl AttachmentScanner for RejectAll {
        fn scan(&self, attachment: &Attachment) -> Result<(), String> {
            Err(format!("{}: infected", attachment.filename))
        }
    }

    #[test]
    fn custom_scanner_hook_runs() {
        let gate = gate().with_scanner(Arc::new(RejectAll));
        let msg = message().with_attachment(Attachment::declared("a.pdf", "application/pdf", 10));
        let verdict = gate.verify(&msg);
        assert!(verdict.failed(SecurityCheck::AttachmentScan));
        assert!(verdict.reasons[0].contains("infected"));
    }

    #[tokio::test]
    async fn inspect_audits_every_verdict_and_alerts_failures() {
        let (gate, log) = gate_with_log();
        gate.inspect(&message()).await;
        assert_eq!(log.events_of("security_verdict").await.len(), 1);
        assert!(log.alerts().await.is_empty());

        let big =
            message().with_attachment(Attachment::declared("big.pdf", "application/pdf", 26 * MB));
        gate.inspect(&big).await;
        assert_eq!(log.events_of("security_verdict").await.len(), 2);
        let alerts = log.alerts().await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].1, Severity::Critical);
        assert_eq!(alerts[0].2["threat_level"], "high");
        assert_eq!(alerts[0].2["checks_failed"], json!(["attachment_scan"]));
    }
}

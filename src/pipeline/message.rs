//! RFC 822 parsing into `RawMessage`.

use mail_parser::{MessageParser, MimeHeaders};

use crate::error::CollaboratorError;
use crate::pipeline::types::{Attachment, RawMessage};

impl RawMessage {
    /// Parse a raw email. `fallback_id` is used when there is no Message-ID.
    pub fn from_rfc822(fallback_id: &str, raw: &[u8]) -> Result<Self, CollaboratorError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| CollaboratorError::Rejected {
                collaborator: "rfc822".into(),
                reason: format!("message {fallback_id} is not a parseable email"),
            })?;

        let sender = parsed
            .from()
            .and_then(|addr| addr.first())
            .and_then(|a| a.address())
            .map(|s| s.to_string())
            .unwrap_or_default();

        let recipients = parsed
            .to()
            .map(|addr| {
                addr.iter()
                    .filter_map(|a| a.address())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let date = parsed
            .date()
            .and_then(|d| chrono::DateTime::from_timestamp(d.to_timestamp(), 0));

        let attachments = parsed
            .attachments()
            .map(|part| {
                let filename = MimeHeaders::attachment_name(part)
                    .unwrap_or("attachment")
                    .to_string();
                let mime_type = MimeHeaders::content_type(part)
                    .map(|ct| match ct.subtype() {
                        Some(sub) => format!("{}/{}", ct.ctype(), sub),
                        None => ct.ctype().to_string(),
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string())
                    .to_lowercase();
                Attachment::new(filename, mime_type, part.contents().to_vec())
            })
            .collect();

        Ok(Self {
            id: parsed
                .message_id()
                .map(|s| s.to_string())
                .unwrap_or_else(|| fallback_id.to_string()),
            sender,
            recipients,
            subject: parsed.subject().unwrap_or_default().to_string(),
            date,
            plain_body: parsed.body_text(0).map(|t| t.to_string()),
            html_body: parsed.body_html(0).map(|h| h.to_string()),
            attachments,
        })
    }
}

/// Plain text of an HTML body: tags become word breaks and whitespace
/// collapses. Entities are left as written.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

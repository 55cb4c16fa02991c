//! Client identification.
//!
//! Rungs are tried in a fixed order and the first rung with any hit wins.
//! Within a rung, clients are tried in the order the rule file declares them.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::ConfigLoadError;
use crate::registry::bundle::{CLIENTS, ClientRecord};
use crate::registry::matcher::{Matcher, PatternFragment, check_fragment};

pub const EXACT_NAME_CONFIDENCE: f64 = 1.0;
pub const EXACT_ALIAS_CONFIDENCE: f64 = 0.95;
pub const EMAIL_DOMAIN_CONFIDENCE: f64 = 0.95;
pub const NAME_SUBSTRING_CONFIDENCE: f64 = 0.9;
pub const ALIAS_SUBSTRING_CONFIDENCE: f64 = 0.85;
pub const CODE_CONFIDENCE: f64 = 0.8;
pub const PATTERN_CONFIDENCE: f64 = 0.75;

/// Which rung identified the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRule {
    ExactName,
    ExactAlias,
    EmailDomain,
    NameSubstring,
    AliasSubstring,
    Code,
    Pattern,
}

impl ClientRule {
    pub const LADDER: [ClientRule; 7] = [
        Self::ExactName,
        Self::ExactAlias,
        Self::EmailDomain,
        Self::NameSubstring,
        Self::AliasSubstring,
        Self::Code,
        Self::Pattern,
    ];

    pub fn confidence(self) -> f64 {
        match self {
            Self::ExactName => EXACT_NAME_CONFIDENCE,
            Self::ExactAlias => EXACT_ALIAS_CONFIDENCE,
            Self::EmailDomain => EMAIL_DOMAIN_CONFIDENCE,
            Self::NameSubstring => NAME_SUBSTRING_CONFIDENCE,
            Self::AliasSubstring => ALIAS_SUBSTRING_CONFIDENCE,
            Self::Code => CODE_CONFIDENCE,
            Self::Pattern => PATTERN_CONFIDENCE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::ExactName => "exact_name",
            Self::ExactAlias => "exact_alias",
            Self::EmailDomain => "email_domain",
            Self::NameSubstring => "name_substring",
            Self::AliasSubstring => "alias_substring",
            Self::Code => "code",
            Self::Pattern => "pattern",
        }
    }
}

/// A client with its lookups prepared.
#[derive(Debug, Clone)]
struct CompiledClient {
    code: String,
    name_lower: String,
    aliases_lower: Vec<String>,
    domain_regex: Option<Regex>,
    code_regex: Option<Regex>,
    matcher: Option<Matcher>,
}

impl CompiledClient {
    fn compile(record: &ClientRecord, errors: &mut Vec<ConfigLoadError>) -> Self {
        let invalid = |reason: String| ConfigLoadError::InvalidPattern {
            category: CLIENTS.into(),
            entry: record.code.clone(),
            reason,
        };

        let fragments: Vec<PatternFragment> = record
            .fragments()
            .into_iter()
            .filter(|f| match check_fragment(f) {
                Ok(()) => true,
                Err(e) => {
                    errors.push(invalid(e.to_string()));
                    false
                }
            })
            .collect();
        let matcher = Matcher::compile(&fragments).unwrap_or_else(|e| {
            errors.push(invalid(e.to_string()));
            None
        });

        let domains: Vec<String> = record
            .domains
            .iter()
            .map(|d| d.trim().trim_start_matches('@'))
            .filter(|d| !d.is_empty())
            .map(regex::escape)
            .collect();
        let domain_regex = if domains.is_empty() {
            None
        } else {
            let source = format!(r"@(?:[\w-]+\.)*(?:{})\b", domains.join("|"));
            RegexBuilder::new(&source)
                .case_insensitive(true)
                .build()
                .map_err(|e| errors.push(invalid(e.to_string())))
                .ok()
        };

        // Codes are matched case-sensitively: "ARB" must not hit "arb" in prose.
        let code_regex = if record.code.trim().is_empty() {
            None
        } else {
            Regex::new(&format!(r"\b{}\b", regex::escape(record.code.trim()))).ok()
        };

        Self {
            code: record.code.clone(),
            name_lower: record.name.trim().to_lowercase(),
            aliases_lower: record
                .aliases
                .iter()
                .map(|a| a.trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
            domain_regex,
            code_regex,
            matcher,
        }
    }

    fn satisfies(&self, rule: ClientRule, text: &str, trimmed_lower: &str) -> bool {
        match rule {
            ClientRule::ExactName => {
                !self.name_lower.is_empty() && trimmed_lower == self.name_lower
            }
            ClientRule::ExactAlias => self.aliases_lower.iter().any(|a| trimmed_lower == a),
            ClientRule::EmailDomain => self.domain_regex.as_ref().is_some_and(|r| r.is_match(text)),
            ClientRule::NameSubstring => {
                !self.name_lower.is_empty() && trimmed_lower.contains(&self.name_lower)
            }
            ClientRule::AliasSubstring => {
                self.aliases_lower.iter().any(|a| trimmed_lower.contains(a))
            }
            ClientRule::Code => self.code_regex.as_ref().is_some_and(|r| r.is_match(text)),
            ClientRule::Pattern => self.matcher.as_ref().is_some_and(|m| m.is_match(text)),
        }
    }
}

/// Compiled client lookups in declared order.
#[derive(Debug, Clone, Default)]
pub struct ClientIndex {
    clients: Vec<CompiledClient>,
}

impl ClientIndex {
    pub fn compile(records: &[ClientRecord], errors: &mut Vec<ConfigLoadError>) -> Self {
        Self {
            clients: records
                .iter()
                .map(|r| CompiledClient::compile(r, errors))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Walk the ladder. `(None, 0.0)` when nothing qualifies.
    pub fn identify(&self, text: &str) -> (Option<String>, f64) {
        let trimmed_lower = text.trim().to_lowercase();
        for rule in ClientRule::LADDER {
            if let Some(client) = self
                .clients
                .iter()
                .find(|c| c.satisfies(rule, text, &trimmed_lower))
            {
                debug!(code = %client.code, rule = rule.label(), "Identified client");
                return (Some(client.code.clone()), rule.confidence());
            }
        }
        (None, 0.0)
    }

    /// Every alternation hit as `(code, matched substring)`.
    pub fn candidates(&self, text: &str) -> Vec<(String, String)> {
        self.clients
            .iter()
            .filter_map(|c| c.matcher.as_ref().map(|m| (c, m)))
            .flat_map(|(c, m)| m.find_all(text).map(|s| (c.code.clone(), s.to_string())))
            .collect()
    }

    /// Client whose email domain appears in `address`.
    pub fn by_email_domain(&self, address: &str) -> Option<String> {
        self.clients
            .iter()
            .find(|c| c.domain_regex.as_ref().is_some_and(|r| r.is_match(address)))
            .map(|c| c.code.clone())
    }
}

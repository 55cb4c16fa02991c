//! Compiled pattern matchers.
//!
//! A matcher is built from a tagged list of fragments. Literals are escaped and
//! delimited by word boundaries; raw regex fragments are used verbatim. All
//! fragments of one entry are joined into a single case-insensitive alternation.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// One piece of a matcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternFragment {
    /// Plain text (name, alias, domain, code). Escaped before compilation.
    Literal(String),
    /// Raw regular expression, used as written.
    Regex(String),
}

impl PatternFragment {
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::Regex(pattern.into())
    }

    /// Regex source for this fragment.
    pub fn to_source(&self) -> String {
        match self {
            Self::Literal(text) => bounded_literal(text),
            Self::Regex(pattern) => pattern.clone(),
        }
    }
}

/// Escape a literal and add `\b` on each side that starts or ends with a word
/// character. A boundary next to punctuation would never match at end of text.
pub fn bounded_literal(text: &str) -> String {
    let escaped = regex::escape(text);
    let starts_word = text.chars().next().is_some_and(is_word_char);
    let ends_word = text.chars().last().is_some_and(is_word_char);
    format!(
        "{}{}{}",
        if starts_word { r"\b" } else { "" },
        escaped,
        if ends_word { r"\b" } else { "" }
    )
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// A compiled alternation for one canonical entry.
#[derive(Debug, Clone)]
pub struct Matcher {
    regex: Regex,
}

impl Matcher {
    /// Compile fragments into one alternation.
    ///
    /// Returns `Ok(None)` when there are no non-empty fragments.
    pub fn compile(fragments: &[PatternFragment]) -> Result<Option<Self>, regex::Error> {
        let sources: Vec<String> = fragments
            .iter()
            .filter(|f| match f {
                PatternFragment::Literal(t) | PatternFragment::Regex(t) => !t.trim().is_empty(),
            })
            .map(|f| format!("(?:{})", f.to_source()))
            .collect();

        if sources.is_empty() {
            return Ok(None);
        }

        let regex = RegexBuilder::new(&sources.join("|"))
            .case_insensitive(true)
            .build()?;
        Ok(Some(Self { regex }))
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// All non-overlapping matched substrings, in text order.
    pub fn find_all<'t>(&self, text: &'t str) -> impl Iterator<Item = &'t str> {
        self.regex.find_iter(text).map(|m| m.as_str())
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

/// Validate a single raw fragment so a bad one can be dropped on its own.
pub fn check_fragment(fragment: &PatternFragment) -> Result<(), regex::Error> {
    RegexBuilder::new(&fragment.to_source())
        .case_insensitive(true)
        .build()
        .map(|_| ())
}

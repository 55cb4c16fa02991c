//! Text field extraction for the local backend.

use std::sync::LazyLock;

use regex::Regex;

use crate::classify::types::ClassificationSource;
use crate::error::ClassifierError;
use crate::registry::PatternRegistry;

/// Longest summary kept, in characters.
pub const SUMMARY_MAX_CHARS: usize = 200;

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b\d{4}-\d{2}-\d{2}\b",
        r"|\b\d{1,2}/\d{1,2}/\d{2,4}\b",
        r"|\b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?",
        r"|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)",
        r"\.?\s+\d{1,2},?\s+\d{4}\b",
    ))
    .unwrap()
});

static REGISTRATION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:REG|LIC)-?\d+\b").unwrap());

static AMOUNT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\d+(?:,\d{3})*(?:\.\d{2})?").unwrap());

fn unique_matches<'a>(found: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in found {
        if !out.iter().any(|o| o == m) {
            out.push(m.to_string());
        }
    }
    out
}

/// ISO, US numeric and "Month D, YYYY" dates in text order.
pub fn extract_dates(text: &str) -> Vec<String> {
    unique_matches(DATE_PATTERN.find_iter(text).map(|m| m.as_str()))
}

/// `REG-`/`LIC-` numbers plus anything matching a jurisdiction format.
pub fn extract_registration_numbers(text: &str, registry: &PatternRegistry) -> Vec<String> {
    let generic = REGISTRATION_PATTERN.find_iter(text).map(|m| m.as_str());
    let mut formats: Vec<_> = registry.registration_formats().collect();
    formats.sort_by_key(|(code, _)| *code);
    let specific: Vec<&str> = formats
        .iter()
        .flat_map(|(_, re)| re.find_iter(text).map(|m| m.as_str()))
        .collect();
    unique_matches(generic.chain(specific))
}

/// Dollar amounts such as `$1,234.56`.
pub fn extract_amounts(text: &str) -> Vec<String> {
    unique_matches(AMOUNT_PATTERN.find_iter(text).map(|m| m.as_str()))
}

/// First non-empty line, cut to `SUMMARY_MAX_CHARS`.
pub fn summarize(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    Some(line.chars().take(SUMMARY_MAX_CHARS).collect())
}

/// Decode a source to text. Files above `max_bytes` are rejected unread.
/// Invalid UTF-8 is replaced.
pub async fn read_source_text(
    source: &ClassificationSource,
    max_bytes: u64,
) -> Result<String, ClassifierError> {
    match source {
        ClassificationSource::Text(text) => Ok(text.clone()),
        _ => {
            let bytes = read_source_bytes(source, max_bytes).await?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

/// Like [`read_source_text`], but content that is not valid UTF-8 is
/// `Unsupported` by `backend`.
pub async fn read_source_utf8(
    source: &ClassificationSource,
    max_bytes: u64,
    backend: &str,
) -> Result<String, ClassifierError> {
    match source {
        ClassificationSource::Text(text) => Ok(text.clone()),
        _ => {
            let bytes = read_source_bytes(source, max_bytes).await?;
            String::from_utf8(bytes).map_err(|_| ClassifierError::Unsupported {
                backend: backend.to_string(),
                kind: format!("non-UTF-8 {}", source.kind()),
            })
        }
    }
}

async fn read_source_bytes(
    source: &ClassificationSource,
    max_bytes: u64,
) -> Result<Vec<u8>, ClassifierError> {
    match source {
        ClassificationSource::Text(text) => Ok(text.clone().into_bytes()),
        ClassificationSource::Bytes(bytes) => {
            check_size(bytes.len() as u64, max_bytes)?;
            Ok(bytes.clone())
        }
        ClassificationSource::File(path) => {
            let meta = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ClassifierError::SourceNotFound { path: path.clone() }
                }
                _ => ClassifierError::Io(e),
            })?;
            check_size(meta.len(), max_bytes)?;
            Ok(tokio::fs::read(path).await?)
        }
    }
}

fn check_size(size: u64, limit: u64) -> Result<(), ClassifierError> {
    if size > limit {
        return Err(ClassifierError::SourceTooLarge { size, limit });
    }
    Ok(())
}

/// Lines that look like a table row: pipe or tab separated with 3+ cells.
pub fn has_tables(text: &str) -> bool {
    text.lines()
        .any(|l| l.matches('|').count() >= 2 || l.matches('\t').count() >= 2)
}

/// Pages separated by form feeds; at least one.
pub fn page_count(text: &str) -> u32 {
    let pages = text.split('\u{c}').filter(|p| !p.trim().is_empty()).count();
    u32::try_from(pages.max(1)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RuleBundle;

    #[test]
    fn finds_all_date_styles_in_order() {
        let text = "Filed 2024-01-15, due 3/1/2024, renewed March 5, 2025 and Dec. 1 2025.";
        assert_eq!(
            extract_dates(text),
            vec!["2024-01-15", "3/1/2024", "March 5, 2025", "Dec. 1 2025"]
        );
    }

    #[test]
    fn registration_numbers_include_jurisdiction_formats() {
        let mut bundle = RuleBundle::default();
        bundle
            .registration_formats
            .insert("CA".into(), r"CA-\d{5}".into());
        let registry = PatternRegistry::from_bundle(bundle);
        let text = "Numbers REG-123, LIC42, reg-123 again and CA-12345.";
        assert_eq!(
            extract_registration_numbers(text, &registry),
            vec!["REG-123", "LIC42", "reg-123", "CA-12345"]
        );
    }

    #[test]
    fn amounts_with_grouping_and_cents() {
        assert_eq!(
            extract_amounts("Fee $1,234.56 plus $75 and 300 units"),
            vec!["$1,234.56", "$75"]
        );
    }

    #[test]
    fn table_and_page_detection() {
        assert!(has_tables("Name | Rate | Unit\nUrea | 46 | %"));
        assert!(has_tables("a\tb\tc"));
        assert!(!has_tables("plain prose, no columns"));
        assert_eq!(page_count("one"), 1);
        assert_eq!(page_count("one\u{c}two\u{c}three"), 3);
        assert_eq!(page_count(""), 1);
    }

    #[tokio::test]
    async fn source_reading_respects_kind_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        std::fs::write(&path, "Registration form").unwrap();

        let text = read_source_text(&ClassificationSource::file(&path), 1024)
            .await
            .unwrap();
        assert_eq!(text, "Registration form");
        assert!(matches!(
            read_source_text(&ClassificationSource::file(&path), 4).await,
            Err(ClassifierError::SourceTooLarge { size: 17, limit: 4 })
        ));
        assert!(matches!(
            read_source_text(&ClassificationSource::file(dir.path().join("missing.txt")), 1024)
                .await,
            Err(ClassifierError::SourceNotFound { .. })
        ));
        let bytes = ClassificationSource::Bytes(vec![b'o', b'k', 0xff]);
        assert_eq!(read_source_text(&bytes, 1024).await.unwrap(), "ok\u{fffd}");
    }

    #[tokio::test]
    async fn strict_reading_rejects_invalid_utf8() {
        let bytes = ClassificationSource::Bytes(vec![b'o', b'k', 0xff]);
        match read_source_utf8(&bytes, 1024, "model").await {
            Err(ClassifierError::Unsupported { backend, kind }) => {
                assert_eq!(backend, "model");
                assert_eq!(kind, "non-UTF-8 bytes");
            }
            other => panic!("expected Unsupported, got {other:?}"),
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.bin");
        std::fs::write(&path, [0xfe, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            read_source_utf8(&ClassificationSource::file(&path), 1024, "model").await,
            Err(ClassifierError::Unsupported { .. })
        ));

        let valid = ClassificationSource::Bytes("Tonnage report".as_bytes().to_vec());
        assert_eq!(
            read_source_utf8(&valid, 1024, "model").await.unwrap(),
            "Tonnage report"
        );
    }

    #[test]
    fn summary_is_first_non_empty_line_truncated() {
        assert_eq!(summarize("\n\n  Title line  \nbody"), Some("Title line".into()));
        assert_eq!(summarize("   \n"), None);
        let long = "x".repeat(500);
        assert_eq!(summarize(&long).unwrap().chars().count(), SUMMARY_MAX_CHARS);
    }
}

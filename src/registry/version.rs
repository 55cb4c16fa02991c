//! Rule-file version checks.
//!
//! Mismatches are warnings, never errors. The registry surfaces them through a
//! `WarningLatch` so they are logged once per latch, however often the checks
//! run.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use semver::Version;
use serde::Serialize;
use tracing::warn;

use crate::registry::bundle::{FileVersion, RuleBundle, VersionManifest};

/// A non-fatal version problem in the rule bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VersionWarning {
    MissingFile { file: String },
    NoVersion { file: String },
    InvalidFormat { file: String, version: String },
    BelowMinimum {
        file: String,
        version: String,
        minimum: String,
    },
    Mismatch {
        file: String,
        version: String,
        expected: String,
    },
}

impl fmt::Display for VersionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFile { file } => write!(f, "Missing config file: {file}.yaml"),
            Self::NoVersion { file } => write!(f, "No version found in {file}.yaml"),
            Self::InvalidFormat { file, version } => {
                write!(f, "Invalid version format in {file}.yaml: {version:?}")
            }
            Self::BelowMinimum {
                file,
                version,
                minimum,
            } => write!(
                f,
                "Config {file}.yaml version {version} is below minimum compatible version {minimum}"
            ),
            Self::Mismatch {
                file,
                version,
                expected,
            } => write!(
                f,
                "Config {file}.yaml version {version} does not match expected version {expected}"
            ),
        }
    }
}

/// One-shot notifier for version warnings.
///
/// The first `surface` call with a non-empty list logs it; later calls are
/// silent until `reset`. Query results never depend on the latch.
#[derive(Debug, Default)]
pub struct WarningLatch {
    fired: AtomicBool,
}

impl WarningLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log the warnings if this latch has not fired yet. Returns whether it logged.
    pub fn surface(&self, warnings: &[VersionWarning]) -> bool {
        if warnings.is_empty() {
            return false;
        }
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        for warning in warnings {
            warn!(warning = %warning, "Rule bundle version warning");
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.fired.store(false, Ordering::SeqCst);
    }
}

/// Whether a string parses as a semantic version.
pub fn is_valid_version(version: &str) -> bool {
    Version::parse(version).is_ok()
}

/// Parse a version from a rule file or manifest. An unquoted YAML `1.0`
/// arrives as `"1.0"` and reads as `1.0.0`.
pub fn parse_version(version: &str) -> Option<Version> {
    let version = version.trim();
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }
    let (major, minor) = version.split_once('.')?;
    let numeric = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if numeric(major) && numeric(minor) {
        Version::parse(&format!("{major}.{minor}.0")).ok()
    } else {
        None
    }
}

/// Compare every file named in the manifest against its expected version and
/// the manifest's minimum.
pub fn check_compatibility(bundle: &RuleBundle) -> Vec<VersionWarning> {
    let manifest = &bundle.manifest;
    let minimum = parse_version(&manifest.min_compatible_version);
    let mut warnings = Vec::new();

    for (file, expected) in &manifest.current_versions {
        let actual = match bundle.file_versions.get(file) {
            None | Some(FileVersion::Missing) => {
                warnings.push(VersionWarning::MissingFile { file: file.clone() });
                continue;
            }
            Some(FileVersion::Unversioned) => {
                warnings.push(VersionWarning::NoVersion { file: file.clone() });
                continue;
            }
            Some(FileVersion::Declared(v)) => v,
        };

        let Some(parsed) = parse_version(actual) else {
            warnings.push(VersionWarning::InvalidFormat {
                file: file.clone(),
                version: actual.clone(),
            });
            continue;
        };

        if let Some(ref min) = minimum
            && parsed < *min
        {
            warnings.push(VersionWarning::BelowMinimum {
                file: file.clone(),
                version: actual.clone(),
                minimum: manifest.min_compatible_version.clone(),
            });
        }

        let matches_expected = match parse_version(expected) {
            Some(expected) => parsed == expected,
            None => actual == expected,
        };
        if !matches_expected {
            warnings.push(VersionWarning::Mismatch {
                file: file.clone(),
                version: actual.clone(),
                expected: expected.clone(),
            });
        }
    }

    warnings
}

fn declared_version(bundle: &RuleBundle, file: &str) -> Option<Version> {
    match bundle.file_versions.get(file) {
        Some(FileVersion::Declared(v)) => parse_version(v),
        _ => None,
    }
}

fn expected_version(manifest: &VersionManifest, file: &str) -> Option<Version> {
    manifest
        .current_versions
        .iter()
        .find(|(name, _)| name == file)
        .and_then(|(_, v)| parse_version(v))
}

/// True when the file's declared version is older than the manifest expects.
pub fn needs_migration(bundle: &RuleBundle, file: &str) -> bool {
    match (
        declared_version(bundle, file),
        expected_version(&bundle.manifest, file),
    ) {
        (Some(actual), Some(expected)) => actual < expected,
        _ => false,
    }
}

/// Migration steps for every manifest version newer than the file's, in
/// manifest order.
pub fn required_migrations(bundle: &RuleBundle, file: &str) -> Vec<String> {
    if !needs_migration(bundle, file) {
        return Vec::new();
    }
    let Some(actual) = declared_version(bundle, file) else {
        return Vec::new();
    };
    bundle
        .manifest
        .migrations_required
        .iter()
        .filter(|(version, _)| parse_version(version).is_some_and(|v| actual < v))
        .flat_map(|(_, steps)| steps.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with(file_version: FileVersion, expected: &str, minimum: &str) -> RuleBundle {
        let mut bundle = RuleBundle::default();
        bundle
            .file_versions
            .insert("clients".to_string(), file_version);
        bundle.manifest = VersionManifest {
            min_compatible_version: minimum.to_string(),
            current_versions: vec![("clients".to_string(), expected.to_string())],
            migrations_required: vec![
                ("1.1.0".to_string(), vec!["add_domains".to_string()]),
                ("1.2.0".to_string(), vec!["split_aliases".to_string()]),
                ("2.0.0".to_string(), vec!["rename_codes".to_string()]),
            ],
        };
        bundle
    }

    #[test]
    fn matching_versions_produce_no_warnings() {
        let bundle = bundle_with(FileVersion::Declared("1.0.0".into()), "1.0.0", "1.0.0");
        assert!(check_compatibility(&bundle).is_empty());
    }

    #[test]
    fn older_file_warns_below_minimum_and_mismatch() {
        let bundle = bundle_with(FileVersion::Declared("0.9.0".into()), "1.2.0", "1.0.0");
        let warnings = check_compatibility(&bundle);
        assert_eq!(warnings.len(), 2);
        assert!(matches!(warnings[0], VersionWarning::BelowMinimum { .. }));
        assert!(matches!(warnings[1], VersionWarning::Mismatch { .. }));
    }

    #[test]
    fn semantic_comparison_not_lexical() {
        // "1.10.0" sorts before "1.9.0" as text but is newer.
        let bundle = bundle_with(FileVersion::Declared("1.10.0".into()), "1.10.0", "1.9.0");
        assert!(check_compatibility(&bundle).is_empty());
    }

    #[test]
    fn missing_unversioned_and_invalid_files_warn() {
        let missing = bundle_with(FileVersion::Missing, "1.0.0", "1.0.0");
        assert_eq!(
            check_compatibility(&missing),
            vec![VersionWarning::MissingFile {
                file: "clients".into()
            }]
        );
        let unversioned = bundle_with(FileVersion::Unversioned, "1.0.0", "1.0.0");
        assert!(matches!(
            check_compatibility(&unversioned)[0],
            VersionWarning::NoVersion { .. }
        ));
        let invalid = bundle_with(FileVersion::Declared("one".into()), "1.0.0", "1.0.0");
        assert!(matches!(
            check_compatibility(&invalid)[0],
            VersionWarning::InvalidFormat { .. }
        ));
    }

    #[test]
    fn migrations_listed_for_outdated_file() {
        let bundle = bundle_with(FileVersion::Declared("1.0.0".into()), "1.2.0", "1.0.0");
        assert!(needs_migration(&bundle, "clients"));
        assert_eq!(
            required_migrations(&bundle, "clients"),
            vec!["add_domains", "split_aliases", "rename_codes"]
        );

        let current = bundle_with(FileVersion::Declared("1.2.0".into()), "1.2.0", "1.0.0");
        assert!(!needs_migration(&current, "clients"));
        assert!(required_migrations(&current, "clients").is_empty());
    }

    #[test]
    fn latch_fires_once_until_reset() {
        let latch = WarningLatch::new();
        let warnings = vec![VersionWarning::NoVersion {
            file: "clients".into(),
        }];
        assert!(!latch.surface(&[]));
        assert!(!latch.has_fired());
        assert!(latch.surface(&warnings));
        assert!(!latch.surface(&warnings));
        latch.reset();
        assert!(latch.surface(&warnings));
    }

    #[test]
    fn version_format_validation() {
        assert!(is_valid_version("1.2.3"));
        assert!(!is_valid_version("1.2"));
        assert!(!is_valid_version("latest"));
    }

    #[test]
    fn major_minor_reads_as_patch_zero() {
        assert_eq!(parse_version("1.0"), Some(Version::new(1, 0, 0)));
        assert_eq!(parse_version(" 2.3.4 "), Some(Version::new(2, 3, 4)));
        assert_eq!(parse_version("1"), None);
        assert_eq!(parse_version("1.x"), None);
        assert_eq!(parse_version("latest"), None);

        let bundle = bundle_with(FileVersion::Declared("1.0".into()), "1.0.0", "1.0");
        assert!(check_compatibility(&bundle).is_empty());
    }

    #[test]
    fn warning_display_is_readable() {
        let w = VersionWarning::Mismatch {
            file: "clients".into(),
            version: "1.0.0".into(),
            expected: "1.1.0".into(),
        };
        assert_eq!(
            w.to_string(),
            "Config clients.yaml version 1.0.0 does not match expected version 1.1.0"
        );
    }
}

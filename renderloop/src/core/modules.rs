//! Missing-module detection and install-name safety checks.
//!
//! Error text from the container is an opaque string, so detection is
//! pattern matching over known signature families, not exception-type
//! inspection. Name validation is a security boundary: accepted names become
//! arguments to a package-install command run inside the container.

use std::sync::LazyLock;

use regex::Regex;

static NO_MODULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"No module named ['"]([^'"]+)['"]"#).unwrap());

static IMPORT_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"ImportError:.*\bfrom\s+['"]([A-Za-z0-9_.]+)['"]"#).unwrap());

/// Names that would be dangerous or nonsensical to install: they shadow core
/// runtime facilities and must never reach the install command.
const DENYLIST: [&str; 6] = ["os", "sys", "subprocess", "shutil", "pathlib", "logging"];

/// Scan error text for missing-module signatures.
///
/// Two families are recognized: `No module named '<name>'` and `ImportError`
/// lines citing a source module (`cannot import name X from Y` keeps `Y`).
/// Results are deduplicated by top-level package name (text before the first
/// `.`), order of first appearance preserved, unsafe names dropped. Returns
/// an empty vector, never an error, when nothing matches.
pub fn extract_missing_modules(error_text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    let candidates = NO_MODULE_RE
        .captures_iter(error_text)
        .chain(IMPORT_FROM_RE.captures_iter(error_text))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()));

    for candidate in candidates {
        let base = candidate.split('.').next().unwrap_or("").trim();
        if base.is_empty() || !is_safe_module_name(base) {
            continue;
        }
        if !found.iter().any(|seen| seen == base) {
            found.push(base.to_string());
        }
    }

    found
}

/// Check whether a module name is safe to pass to the install command.
///
/// Accepts only `[A-Za-z0-9_.-]+`, rejects shell metacharacters outright,
/// and rejects the denylist case-insensitively. Fails closed: anything
/// doubtful is unsafe.
pub fn is_safe_module_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    if name.contains([';', '&', '|', '$', '(', ')', '`', '\\', '/']) {
        return false;
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return false;
    }
    let lowered = name.to_ascii_lowercase();
    !DENYLIST.contains(&lowered.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_quoted_module_name() {
        let error = "ModuleNotFoundError: No module named 'requests'";
        assert_eq!(extract_missing_modules(error), vec!["requests"]);
    }

    #[test]
    fn extracts_top_level_of_dotted_name() {
        let error = "ModuleNotFoundError: No module named 'scipy.stats'";
        assert_eq!(extract_missing_modules(error), vec!["scipy"]);
    }

    #[test]
    fn extracts_import_error_source_module() {
        let error = "ImportError: cannot import name 'signal' from 'scipy' (unknown location)";
        assert_eq!(extract_missing_modules(error), vec!["scipy"]);
    }

    #[test]
    fn dedupes_across_signature_families() {
        let error = "No module named 'numpy'\nImportError: cannot import name 'array' from 'numpy'";
        assert_eq!(extract_missing_modules(error), vec!["numpy"]);
    }

    #[test]
    fn preserves_first_seen_order() {
        let error = "No module named 'pandas'\nNo module named 'numpy'";
        assert_eq!(extract_missing_modules(error), vec!["pandas", "numpy"]);
    }

    #[test]
    fn drops_denylisted_matches() {
        let error = "No module named 'os'";
        assert!(extract_missing_modules(error).is_empty());
    }

    #[test]
    fn returns_empty_on_unrelated_errors() {
        let error = "NameError: name 'circle' is not defined";
        assert!(extract_missing_modules(error).is_empty());
    }

    /// Canonical vectors for the install-name safety boundary.
    #[test]
    fn safety_rejects_dangerous_names() {
        assert!(!is_safe_module_name("os"));
        assert!(!is_safe_module_name("OS"));
        assert!(!is_safe_module_name("requests; rm -rf /"));
        assert!(!is_safe_module_name("../etc"));
        assert!(!is_safe_module_name(""));
        assert!(!is_safe_module_name("a`b"));
        assert!(!is_safe_module_name("a b"));
    }

    #[test]
    fn safety_accepts_ordinary_names() {
        assert!(is_safe_module_name("numpy"));
        assert!(is_safe_module_name("scipy.stats"));
        assert!(is_safe_module_name("scikit-learn"));
        assert!(is_safe_module_name("typing_extensions"));
    }
}

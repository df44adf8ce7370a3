//! Reduction of arbitrary field values to filesystem-safe path fragments.

use crate::record::Record;
use unicode_normalization::UnicodeNormalization;

/// Returns true for the characters allowed in a sanitized value.
#[must_use]
pub const fn is_path_safe_char(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | ' ' | '-' | '_' | '.')
}

/// Reduces `value` to ASCII letters, digits, space, `-`, `_` and `.`.
///
/// The value is NFKD-decomposed first so accented letters keep their base
/// letter; everything outside the safe set is removed, never replaced.
///
/// ```
/// assert_eq!(docmerge::path_safe("Café 42!"), "Cafe 42");
/// assert_eq!(docmerge::path_safe("A/B"), "AB");
/// ```
#[must_use]
pub fn path_safe(value: &str) -> String {
    value
        .nfkd()
        .filter(char::is_ascii)
        .filter(|&c| is_path_safe_char(c))
        .collect()
}

/// Applies [`path_safe`] to every value of `record`, keeping its fields.
#[must_use]
pub fn sanitize_record(record: &Record) -> Record {
    record.map_values(path_safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_accents_and_punctuation() {
        assert_eq!(path_safe("Café 42!"), "Cafe 42");
        assert_eq!(path_safe("Ångström-Straße_7.b"), "Angstrom-Strae_7.b");
    }

    #[test]
    fn test_empty_and_non_ascii() {
        assert_eq!(path_safe(""), "");
        assert_eq!(path_safe("日本語"), "");
        assert_eq!(path_safe("///"), "");
    }

    #[test]
    fn test_separators_are_dropped_not_replaced() {
        assert_eq!(path_safe("A/B"), "AB");
        assert_eq!(path_safe("..\\etc/passwd"), "..etcpasswd");
        assert_eq!(path_safe("tab\there"), "tabhere");
    }

    #[test]
    fn test_compatibility_forms_fold() {
        // Fullwidth letters and ligatures decompose to plain ASCII.
        assert_eq!(path_safe("ＡＢＣ"), "ABC");
        assert_eq!(path_safe("ﬁle"), "file");
        assert_eq!(path_safe("½"), "12");
    }

    #[test]
    fn test_idempotent_and_closed_over_safe_set() {
        let samples = [
            "Café 42!",
            "Zoë/Ünïcödé\\path:*?",
            "naïve résumé — draft #3",
            "日本語 text",
            "  spaced  out  ",
            "ﬀ ﬃ ™ ①",
            "",
        ];
        for sample in samples {
            let once = path_safe(sample);
            assert_eq!(path_safe(&once), once, "not idempotent for {sample:?}");
            assert!(once.chars().all(is_path_safe_char), "unsafe output for {sample:?}");
        }
    }

    #[test]
    fn test_sanitize_record() {
        let record = Record::from_pairs([("name", "A/B"), ("city", "Zürich")]);
        let safe = sanitize_record(&record);
        assert_eq!(safe.get("name"), Some("AB"));
        assert_eq!(safe.get("city"), Some("Zurich"));
        // The original is untouched.
        assert_eq!(record.get("name"), Some("A/B"));
    }
}

use crate::error::{Result, RevmarkError};
use crate::types::Rgb;
use crate::util::culture::parse_locale;
use crate::xml::XmlDocument;
use serde::{Deserialize, Serialize};

/// Settings for comparison, consolidation and revision extraction.
///
/// Settings are read-only for the duration of a call and are shared by
/// every per-reviewer worker during consolidation. Missing fields in a
/// serialized settings object take their default value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparerSettings {
    /// Characters that separate words for comparison purposes.
    /// Default includes space, punctuation, currency and CJK punctuation.
    pub word_separators: Vec<char>,

    /// Author written on every generated revision marker.
    pub author_for_new_revisions: String,

    /// RFC 3339 timestamp written as `w:date`. When unset no date is written,
    /// which keeps output byte-identical between runs.
    pub date_time_for_revisions: Option<String>,

    /// Minimum match ratio (0.0-1.0) for character-level refinement inside a
    /// changed word region. Below it the region is replaced as a whole.
    pub detail_threshold: f64,

    /// Compare text ignoring case. Emitted text is never altered.
    pub case_insensitive: bool,

    /// Culture used for case folding (e.g. "tr-TR"). Only read when
    /// `case_insensitive` is set.
    pub locale: Option<String>,

    /// Treat U+00A0 as an ordinary space when comparing.
    pub conflate_breaking_and_nonbreaking_spaces: bool,

    /// Emit and report run / paragraph property changes.
    pub track_formatting_changes: bool,

    /// Reclassify near-duplicate deleted and inserted paragraphs as moves.
    pub detect_moved_content: bool,

    /// Minimum word-level similarity (0.0-1.0] for a move pair.
    pub similarity_threshold: f64,

    /// Paragraphs with fewer words never take part in move detection.
    pub min_move_word_count: usize,
}

impl Default for ComparerSettings {
    fn default() -> Self {
        Self {
            word_separators: vec![
                ' ', '-', ')', '(', ';', ',',
                '$', '€', '£', '¥', '¢', '₹', '₽', '₩', '₪', '฿',
                '（', // U+FF08 FULLWIDTH LEFT PARENTHESIS
                '）', // U+FF09 FULLWIDTH RIGHT PARENTHESIS
                '，', // U+FF0C FULLWIDTH COMMA
                '、', // U+3001 IDEOGRAPHIC COMMA
                '；', // U+FF1B FULLWIDTH SEMICOLON
                '。', // U+3002 IDEOGRAPHIC FULL STOP
                '：', // U+FF1A FULLWIDTH COLON
                '的', // U+7684 possessive particle
            ],
            author_for_new_revisions: "revmark".to_string(),
            date_time_for_revisions: None,
            detail_threshold: 0.15,
            case_insensitive: false,
            locale: None,
            conflate_breaking_and_nonbreaking_spaces: true,
            track_formatting_changes: true,
            detect_moved_content: false,
            similarity_threshold: 0.8,
            min_move_word_count: 3,
        }
    }
}

impl ComparerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author_for_new_revisions = author.into();
        self
    }

    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_date_time(mut self, date_time: impl Into<String>) -> Self {
        self.date_time_for_revisions = Some(date_time.into());
        self
    }

    pub fn with_track_formatting(mut self, track: bool) -> Self {
        self.track_formatting_changes = track;
        self
    }

    pub fn with_detect_moves(mut self, detect: bool) -> Self {
        self.detect_moved_content = detect;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_detail_threshold(mut self, threshold: f64) -> Self {
        self.detail_threshold = threshold;
        self
    }

    pub fn is_word_separator(&self, c: char) -> bool {
        self.word_separators.contains(&c)
    }

    /// Checks every option before any comparison work begins.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(RevmarkError::InvalidSettings { message });

        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return invalid(format!(
                "similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.detail_threshold) {
            return invalid(format!(
                "detail_threshold must be in [0, 1], got {}",
                self.detail_threshold
            ));
        }
        if self.author_for_new_revisions.trim().is_empty() {
            return invalid("author_for_new_revisions must not be empty".to_string());
        }
        if self.case_insensitive {
            if let Some(locale) = &self.locale {
                parse_locale(locale)?;
            }
        }
        if let Some(date) = &self.date_time_for_revisions {
            if chrono::DateTime::parse_from_rfc3339(date).is_err() {
                return invalid(format!("'{date}' is not an RFC 3339 timestamp"));
            }
        }
        Ok(())
    }
}

/// One reviewer's copy of the original, for consolidation.
#[derive(Debug, Clone)]
pub struct RevisedDocument {
    pub document: XmlDocument,
    pub author: String,
    pub color: Rgb,
}

impl RevisedDocument {
    pub fn new(document: XmlDocument, author: impl Into<String>, color: Rgb) -> Self {
        Self {
            document,
            author: author.into(),
            color,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_have_expected_values() {
        let settings = ComparerSettings::default();

        assert!(!settings.case_insensitive);
        assert!(!settings.detect_moved_content);
        assert!(settings.track_formatting_changes);
        assert!(settings.conflate_breaking_and_nonbreaking_spaces);

        assert!((settings.detail_threshold - 0.15).abs() < f64::EPSILON);
        assert!((settings.similarity_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(settings.min_move_word_count, 3);

        assert_eq!(settings.author_for_new_revisions, "revmark");
        assert!(settings.date_time_for_revisions.is_none());
        assert!(settings.locale.is_none());

        assert!(settings.is_word_separator(' '));
        assert!(settings.is_word_separator('（'));
        assert!(settings.is_word_separator('€'));
        assert!(!settings.is_word_separator('a'));
    }

    #[test]
    fn builder_pattern_works() {
        let settings = ComparerSettings::new()
            .with_author("Test Author")
            .with_case_insensitive(true)
            .with_locale("tr-TR")
            .with_track_formatting(false)
            .with_detect_moves(true)
            .with_date_time("2025-12-28T12:00:00Z");

        assert_eq!(settings.author_for_new_revisions, "Test Author");
        assert!(settings.case_insensitive);
        assert!(!settings.track_formatting_changes);
        assert!(settings.detect_moved_content);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let settings = ComparerSettings::new().with_similarity_threshold(0.0);
        assert!(matches!(
            settings.validate(),
            Err(RevmarkError::InvalidSettings { .. })
        ));
        let settings = ComparerSettings::new().with_similarity_threshold(1.5);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_author_and_bad_date() {
        assert!(ComparerSettings::new().with_author("  ").validate().is_err());
        assert!(ComparerSettings::new()
            .with_date_time("yesterday")
            .validate()
            .is_err());
    }

    #[test]
    fn locale_is_only_checked_when_folding_case() {
        let settings = ComparerSettings::new().with_locale("!!");
        assert!(settings.validate().is_ok());
        assert!(settings.with_case_insensitive(true).validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: ComparerSettings =
            serde_json::from_str(r#"{"author_for_new_revisions":"Ann","detect_moved_content":true}"#)
                .unwrap();
        assert_eq!(settings.author_for_new_revisions, "Ann");
        assert!(settings.detect_moved_content);
        assert_eq!(settings.min_move_word_count, 3);
    }
}

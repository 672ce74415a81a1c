use crate::error::{Result, RevmarkError};
use icu::casemap::CaseMapper;
use icu::locid::LanguageIdentifier;

/// Parses a culture tag such as `tr-TR` or `en_US`.
pub fn parse_locale(tag: &str) -> Result<LanguageIdentifier> {
    tag.trim()
        .replace('_', "-")
        .parse::<LanguageIdentifier>()
        .map_err(|e| RevmarkError::InvalidSettings {
            message: format!("unrecognized locale '{tag}': {e}"),
        })
}

pub fn to_upper_invariant(s: &str) -> String {
    CaseMapper::new().uppercase_to_string(s, &LanguageIdentifier::UND)
}

pub fn to_upper_culture(s: &str, culture: &LanguageIdentifier) -> String {
    CaseMapper::new().uppercase_to_string(s, culture)
}

/// Locale-aware case normalization applied to comparison keys only.
pub struct CaseFolder {
    mapper: CaseMapper,
    langid: LanguageIdentifier,
}

impl CaseFolder {
    pub fn new(locale: Option<&str>) -> Result<Self> {
        let langid = match locale {
            Some(tag) => parse_locale(tag)?,
            None => LanguageIdentifier::UND,
        };
        Ok(Self {
            mapper: CaseMapper::new(),
            langid,
        })
    }

    pub fn fold(&self, s: &str) -> String {
        self.mapper.uppercase_to_string(s, &self.langid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_upper_invariant_basic() {
        assert_eq!(to_upper_invariant("hello"), "HELLO");
        assert_eq!(to_upper_invariant("Hello World"), "HELLO WORLD");
    }

    #[test]
    fn to_upper_invariant_unicode() {
        assert_eq!(to_upper_invariant("café"), "CAFÉ");
    }

    #[test]
    fn turkish_dotted_i() {
        let tr = parse_locale("tr-TR").unwrap();
        assert_eq!(to_upper_culture("i", &tr), "İ");
        assert_eq!(to_upper_invariant("i"), "I");
    }

    #[test]
    fn underscore_locale_is_accepted() {
        assert!(parse_locale("en_US").is_ok());
        assert!(parse_locale("not a locale!").is_err());
    }

    #[test]
    fn folder_without_locale_is_invariant() {
        let folder = CaseFolder::new(None).unwrap();
        assert_eq!(folder.fold("Fox"), "FOX");
    }
}

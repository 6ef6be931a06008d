//! Keyword relevance filter.
//!
//! A text matches when any whitespace-delimited token contains any keyword
//! as a substring, compared case-insensitively. An empty keyword list
//! disables the filter.

use crate::error::{PubmedkitError, Result};
use crate::record::RawRecord;
use std::fmt;
use std::str::FromStr;

/// Which record fields the keyword scan looks at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeywordTarget {
    Title,
    Abstract,
    /// Title OR abstract
    #[default]
    Either,
}

impl FromStr for KeywordTarget {
    type Err = PubmedkitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "title" => Ok(KeywordTarget::Title),
            "abstract" => Ok(KeywordTarget::Abstract),
            "either" | "both" => Ok(KeywordTarget::Either),
            other => Err(PubmedkitError::Config(format!(
                "invalid keyword target {:?}: expected title, abstract or either",
                other
            ))),
        }
    }
}

impl fmt::Display for KeywordTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeywordTarget::Title => "title",
            KeywordTarget::Abstract => "abstract",
            KeywordTarget::Either => "either",
        };
        f.write_str(s)
    }
}

/// Check whether `text` passes the keyword policy.
///
/// `keywords` must already be lower-cased. Returns `true` for an empty list.
pub fn matches_keywords(text: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    text.split_whitespace().any(|token| {
        let token = token.to_lowercase();
        keywords.iter().any(|kw| token.contains(kw.as_str()))
    })
}

/// Keyword filter bound to a target field
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
    target: KeywordTarget,
}

impl KeywordFilter {
    /// Build a filter. Blank keywords are discarded.
    pub fn new<S: AsRef<str>>(keywords: &[S], target: KeywordTarget) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords, target }
    }

    /// Build a filter from a textual target selector.
    ///
    /// Fails with [`PubmedkitError::Config`] for an unknown selector.
    pub fn from_config<S: AsRef<str>>(keywords: &[S], target: &str) -> Result<Self> {
        Ok(Self::new(keywords, target.parse()?))
    }

    /// A filter that keeps every record
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        !self.keywords.is_empty()
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn target(&self) -> KeywordTarget {
        self.target
    }

    /// Keep/drop decision for one text
    pub fn keep_text(&self, text: &str) -> bool {
        matches_keywords(text, &self.keywords)
    }

    /// Keep/drop decision for one record according to the target field.
    pub fn keep(&self, record: &RawRecord) -> bool {
        if !self.is_enabled() {
            return true;
        }
        match self.target {
            KeywordTarget::Title => self.keep_text(&record.title),
            KeywordTarget::Abstract => self.keep_text(&record.abstract_text),
            KeywordTarget::Either => {
                self.keep_text(&record.title) || self.keep_text(&record.abstract_text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, abstract_text: &str) -> RawRecord {
        RawRecord {
            id: "1".into(),
            title: title.into(),
            abstract_text: abstract_text.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_keywords_keep_everything() {
        assert!(matches_keywords("", &[]));
        assert!(matches_keywords("anything at all", &[]));
        let filter = KeywordFilter::new::<&str>(&[], KeywordTarget::Title);
        assert!(filter.keep(&record("", "")));
    }

    #[test]
    fn test_substring_within_token_case_insensitive() {
        let filter = KeywordFilter::new(&["Promoter"], KeywordTarget::Either);
        assert!(filter.keep_text("Two PROMOTERS were bound"));
        assert!(filter.keep_text("pro-promoter-like"));
        assert!(!filter.keep_text("pro moter"));
    }

    #[test]
    fn test_keyword_spanning_tokens_does_not_match() {
        let filter = KeywordFilter::new(&["cis regulatory"], KeywordTarget::Either);
        assert!(!filter.keep_text("a cis regulatory module"));
        let filter = KeywordFilter::new(&["cis-regulatory"], KeywordTarget::Either);
        assert!(filter.keep_text("a cis-regulatory module"));
    }

    #[test]
    fn test_target_fields() {
        let r = record("Enhancer screens", "Nothing relevant here");
        let kw = ["enhancer"];
        assert!(KeywordFilter::new(&kw, KeywordTarget::Title).keep(&r));
        assert!(!KeywordFilter::new(&kw, KeywordTarget::Abstract).keep(&r));
        assert!(KeywordFilter::new(&kw, KeywordTarget::Either).keep(&r));

        let r = record("Nothing", "An enhancer was found");
        assert!(!KeywordFilter::new(&kw, KeywordTarget::Title).keep(&r));
        assert!(KeywordFilter::new(&kw, KeywordTarget::Either).keep(&r));
    }

    #[test]
    fn test_blank_keywords_are_dropped() {
        let filter = KeywordFilter::new(&["", "   "], KeywordTarget::Either);
        assert!(!filter.is_enabled());
    }

    #[test]
    fn test_invalid_target_is_config_error() {
        let result = KeywordFilter::from_config(&["promoter"], "journal");
        assert!(matches!(result, Err(PubmedkitError::Config(_))));
        assert_eq!("BOTH".parse::<KeywordTarget>().unwrap(), KeywordTarget::Either);
    }
}

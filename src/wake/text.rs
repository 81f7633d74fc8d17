// Transcript-text trigger word matching

use regex::Regex;

/// Punctuation stripped during normalization
const PUNCTUATION: &str = ".,!?;:'\"()-";

/// Normalize text for matching: lowercase, strip punctuation, collapse
/// whitespace runs, trim.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if PUNCTUATION.contains(c) { ' ' } else { c })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Matches a configured trigger word against transcript text.
///
/// Matching is two-layered: a whole-word match on normalized text first,
/// then a substring fallback that catches run-together recognitions
/// ("heycat" for "hey cat"). An absent or empty word disables the matcher;
/// `matches()` then always returns false.
#[derive(Debug, Clone)]
pub struct TextMatcher {
    word: Option<String>,
    pattern: Option<Regex>,
}

impl TextMatcher {
    /// Build a matcher for the given word. None, empty, or all-punctuation
    /// words produce a permanently disabled matcher.
    pub fn new(word: Option<&str>) -> Self {
        let word = word.map(normalize).filter(|w| !w.is_empty());
        let pattern = word
            .as_deref()
            .and_then(|w| Regex::new(&format!(r"\b{}\b", regex::escape(w))).ok());
        Self { word, pattern }
    }

    /// The normalized word this matcher looks for, if any
    pub fn word(&self) -> Option<&str> {
        self.word.as_deref()
    }

    /// Whether a word is configured
    pub fn is_enabled(&self) -> bool {
        self.word.is_some()
    }

    /// Check whether the configured word occurs in the text
    pub fn matches(&self, text: &str) -> bool {
        let Some(word) = self.word.as_deref() else {
            return false;
        };
        let haystack = normalize(text);
        if haystack.is_empty() {
            return false;
        }

        if let Some(pattern) = &self.pattern {
            if pattern.is_match(&haystack) {
                crate::trace!("Matched '{}' as whole word in transcript", word);
                return true;
            }
        }
        if haystack.contains(word) {
            crate::trace!("Matched '{}' as substring in transcript", word);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_case() {
        assert_eq!(normalize("Hello, World!"), "hello world");
        assert_eq!(normalize("  HEY   cat  "), "hey cat");
        assert_eq!(normalize("don't"), "don t");
        assert_eq!(normalize("...!?"), "");
    }

    #[test]
    fn test_matches_exact_word() {
        let matcher = TextMatcher::new(Some("hello"));
        assert!(matcher.matches("hello"));
        assert!(matcher.matches("Hello"));
        assert!(matcher.matches("HELLO!"));
    }

    #[test]
    fn test_matches_word_within_sentence() {
        let matcher = TextMatcher::new(Some("hello"));
        assert!(matcher.matches("well hello there"));
        assert!(matcher.matches("I said, hello."));
    }

    #[test]
    fn test_matches_phrase_with_punctuation_between() {
        let matcher = TextMatcher::new(Some("hey cat"));
        assert!(matcher.matches("Hey, cat!"));
        assert!(matcher.matches("okay hey cat now"));
    }

    #[test]
    fn test_substring_fallback_catches_run_together_text() {
        // "catalog" has no whole-word "cat" but contains it
        let matcher = TextMatcher::new(Some("cat"));
        assert!(matcher.matches("catalog"));

        let matcher = TextMatcher::new(Some("heycat"));
        assert!(matcher.matches("okheycat"));
    }

    #[test]
    fn test_no_match_for_different_word() {
        let matcher = TextMatcher::new(Some("hello"));
        assert!(!matcher.matches("goodbye"));
        assert!(!matcher.matches("hell o"));
        assert!(!matcher.matches(""));
    }

    #[test]
    fn test_absent_word_never_matches() {
        let matcher = TextMatcher::new(None);
        assert!(!matcher.is_enabled());
        assert!(!matcher.matches("anything at all"));

        let matcher = TextMatcher::new(Some(""));
        assert!(!matcher.is_enabled());
        assert!(!matcher.matches("anything at all"));

        // All-punctuation words normalize to empty and disable the matcher
        let matcher = TextMatcher::new(Some("!!!"));
        assert!(!matcher.matches("!!!"));
    }

    #[test]
    fn test_word_is_normalized_at_construction() {
        let matcher = TextMatcher::new(Some("  Hey, Cat! "));
        assert_eq!(matcher.word(), Some("hey cat"));
        assert!(matcher.matches("hey cat"));
    }

    #[test]
    fn test_regex_metacharacters_in_word_are_literal() {
        // Punctuation is stripped, but regex-significant characters that
        // survive normalization must not be treated as syntax
        let matcher = TextMatcher::new(Some("c++"));
        // '+' is not in the stripped set; the word stays "c++"
        assert_eq!(matcher.word(), Some("c++"));
        assert!(matcher.matches("I like c++ a lot"));
        assert!(!matcher.matches("I like c a lot"));
    }
}

//! Key patterns with the store's MATCH semantics:
//! `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.
//!
//! Patterns are compiled with `globset` (no path separators, backslash
//! escapes on) and cached per pattern string. A pattern globset rejects,
//! such as an unterminated class, matches only itself.

use dashmap::DashMap;
use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

#[derive(Clone, Debug)]
pub enum KeyPattern {
    Glob(GlobMatcher),
    Literal(String),
}

impl KeyPattern {
    pub fn compile(pattern: &str) -> Self {
        let built = GlobBuilder::new(&to_globset_syntax(pattern))
            .literal_separator(false)
            .backslash_escape(true)
            .build();
        match built {
            Ok(glob) => Self::Glob(glob.compile_matcher()),
            Err(e) => {
                warn!("Glob: pattern {:?} rejected ({}), matching it literally", pattern, e);
                Self::Literal(pattern.to_string())
            }
        }
    }

    pub fn is_match(&self, key: &str) -> bool {
        match self {
            Self::Glob(matcher) => matcher.is_match(key),
            Self::Literal(literal) => literal == key,
        }
    }
}

/// `[^...]` negation is written `[!...]` in globset.
fn to_globset_syntax(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '[' if chars.peek() == Some(&'^') => {
                chars.next();
                out.push('!');
            }
            _ => {}
        }
    }
    out
}

/// Compiled patterns, shared by every connection of a store.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: DashMap<String, KeyPattern>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pattern: &str) -> KeyPattern {
        if let Some(cached) = self.compiled.get(pattern) {
            return cached.value().clone();
        }
        let compiled = KeyPattern::compile(pattern);
        self.compiled.insert(pattern.to_string(), compiled.clone());
        compiled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, key: &str) -> bool {
        KeyPattern::compile(pattern).is_match(key)
    }

    #[test]
    fn star_and_question_mark() {
        assert!(matches("*", ""));
        assert!(matches("*", "anything"));
        assert!(matches("u:*", "u:1"));
        assert!(!matches("u:*", "s:1"));
        assert!(matches("h?llo", "hello"));
        assert!(!matches("h?llo", "hllo"));
        assert!(matches("*:session:*", "app:session:42"));
        assert!(matches("a*b*c", "aXXbYYc"));
        assert!(!matches("a*b*c", "aXXbYY"));
    }

    #[test]
    fn slashes_are_ordinary_characters() {
        assert!(matches("cache:*", "cache:/img/a.png"));
        assert!(matches("a?b", "a/b"));
    }

    #[test]
    fn classes_and_ranges() {
        assert!(matches("h[ae]llo", "hallo"));
        assert!(!matches("h[ae]llo", "hillo"));
        assert!(matches("h[^e]llo", "hallo"));
        assert!(!matches("h[^e]llo", "hello"));
        assert!(matches("key[0-9]", "key7"));
        assert!(!matches("key[0-9]", "keyx"));
    }

    #[test]
    fn escapes_match_literally() {
        assert!(matches(r"what\?", "what?"));
        assert!(!matches(r"what\?", "whatx"));
        assert!(matches(r"star\*", "star*"));
        assert!(!matches(r"star\*", "starry"));
        assert!(matches(r"caret\[^x]", "caret[^x]"));
    }

    #[test]
    fn rejected_pattern_matches_only_itself() {
        assert!(matches("broken[", "broken["));
        assert!(!matches("broken[", "brokenx"));
    }

    #[test]
    fn empty_pattern_only_matches_empty_text() {
        assert!(matches("", ""));
        assert!(!matches("", "a"));
    }

    #[test]
    fn cache_compiles_each_pattern_once() {
        let cache = PatternCache::new();
        assert!(cache.get("u:*").is_match("u:1"));
        assert!(!cache.get("u:*").is_match("s:1"));
        assert!(cache.get("s:*").is_match("s:1"));
        assert_eq!(cache.compiled.len(), 2);
    }
}

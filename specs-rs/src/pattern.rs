//! Regular expressions behind `rmatch`, `rsearch` and `rreplace`.
//!
//! Compiled expressions are kept in a small cache owned by the interpreter,
//! since the same expression is typically applied to every record.
//!
//! ## Option words
//!
//! The optional last argument of each function is a comma-separated list:
//!
//! | Word | Effect |
//! |------|--------|
//! | `icase` | case-insensitive matching |
//! | `first_only` | `rreplace` replaces only the first match |
//! | `default` | no effect |

use std::collections::HashMap;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::error::{RtResult, RuntimeError};

/// Compiled expressions kept before the cache is cleared.
const CACHE_LIMIT: usize = 150;

// ── Options ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchFlags {
    pub icase: bool,
    pub first_only: bool,
}

impl MatchFlags {
    /// Parse an option list for function `func`.
    pub fn parse(func: &str, list: &str) -> RtResult<Self> {
        let mut flags = MatchFlags::default();
        for word in list.split(',').map(str::trim).filter(|w| !w.is_empty()) {
            match word.to_ascii_lowercase().as_str() {
                "icase" => flags.icase = true,
                "first_only" => flags.first_only = true,
                "default" => {}
                _ => {
                    return Err(RuntimeError::invalid(
                        func,
                        format!("Invalid regular expression option: {word}"),
                    ))
                }
            }
        }
        Ok(flags)
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    src: String,
    icase: bool,
    /// Compiled to match the whole subject.
    whole: bool,
}

#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: HashMap<Key, Arc<Regex>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    fn get(&mut self, func: &str, src: &str, icase: bool, whole: bool) -> RtResult<Arc<Regex>> {
        let key = Key { src: src.to_owned(), icase, whole };
        if let Some(re) = self.compiled.get(&key) {
            return Ok(Arc::clone(re));
        }
        let pattern = if whole { format!("^(?:{src})$") } else { src.to_owned() };
        let re = RegexBuilder::new(&pattern)
            .case_insensitive(icase)
            .build()
            .map_err(|e| RuntimeError::invalid(func, format!("invalid regular expression: {e}")))?;
        if self.compiled.len() >= CACHE_LIMIT {
            debug!(entries = self.compiled.len(), "regex cache cleared");
            self.compiled.clear();
        }
        let re = Arc::new(re);
        self.compiled.insert(key, Arc::clone(&re));
        Ok(re)
    }

    /// `true` when `re` matches all of `text`.
    pub fn is_match(&mut self, text: &str, re: &str, flags: MatchFlags) -> RtResult<bool> {
        Ok(self.get("rmatch", re, flags.icase, true)?.is_match(text))
    }

    /// `true` when `re` matches somewhere in `text`.
    pub fn search(&mut self, text: &str, re: &str, flags: MatchFlags) -> RtResult<bool> {
        Ok(self.get("rsearch", re, flags.icase, false)?.is_match(text))
    }

    /// Replace matches of `re` in `text`.  The replacement uses `$&` for the
    /// whole match and `$1`… for groups.
    pub fn replace(
        &mut self,
        text: &str,
        re: &str,
        replacement: &str,
        flags: MatchFlags,
    ) -> RtResult<String> {
        let compiled = self.get("rreplace", re, flags.icase, false)?;
        let rep = translate_replacement(replacement);
        let limit = if flags.first_only { 1 } else { 0 };
        Ok(compiled.replacen(text, limit, rep.as_str()).into_owned())
    }
}

/// Rewrite `$&`, `$n` and `$$` into the `regex` crate's `${n}` syntax; any
/// other `$` is literal.
fn translate_replacement(rep: &str) -> String {
    let mut out = String::with_capacity(rep.len() + 8);
    let mut chars = rep.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('&') => {
                chars.next();
                out.push_str("${0}");
            }
            Some(d) if d.is_ascii_digit() => {
                let mut n = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    n.push(d);
                    chars.next();
                }
                out.push_str(&format!("${{{n}}}"));
            }
            Some('$') => {
                chars.next();
                out.push_str("$$");
            }
            _ => out.push_str("$$"),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(s: &str) -> MatchFlags {
        MatchFlags::parse("rmatch", s).unwrap()
    }

    #[test]
    fn match_is_anchored() {
        let mut cache = PatternCache::new();
        assert!(cache.is_match("hello", "h.*o", flags("")).unwrap());
        assert!(!cache.is_match("hello world", "h.*o", flags("")).unwrap());
        assert!(cache.search("hello world", "o w", flags("")).unwrap());
    }

    #[test]
    fn alternation_is_grouped_when_anchored() {
        let mut cache = PatternCache::new();
        assert!(!cache.is_match("abc", "a|abc2", flags("")).unwrap());
        assert!(cache.is_match("abc", "x|abc", flags("")).unwrap());
    }

    #[test]
    fn icase_option() {
        let mut cache = PatternCache::new();
        assert!(!cache.search("HELLO", "hello", flags("")).unwrap());
        assert!(cache.search("HELLO", "hello", flags("icase")).unwrap());
    }

    #[test]
    fn replace_all_and_first_only() {
        let mut cache = PatternCache::new();
        assert_eq!(cache.replace("a1b2", "[0-9]", "#", flags("")).unwrap(), "a#b#");
        assert_eq!(cache.replace("a1b2", "[0-9]", "#", flags("first_only")).unwrap(), "a#b2");
    }

    #[test]
    fn replacement_groups() {
        let mut cache = PatternCache::new();
        assert_eq!(cache.replace("john smith", "(\\w+) (\\w+)", "$2, $1", flags("")).unwrap(), "smith, john");
        assert_eq!(cache.replace("ab", "b", "[$&]", flags("")).unwrap(), "a[b]");
        assert_eq!(cache.replace("ab", "b", "$$", flags("")).unwrap(), "a$");
    }

    #[test]
    fn bad_option_and_bad_regex() {
        assert!(MatchFlags::parse("rmatch", "sideways").is_err());
        let mut cache = PatternCache::new();
        let err = cache.search("x", "(", flags("")).unwrap_err();
        assert!(err.to_string().starts_with("rsearch: invalid regular expression"));
    }

    #[test]
    fn cache_reuses_compiled() {
        let mut cache = PatternCache::new();
        for _ in 0..3 {
            cache.search("abc", "b", flags("")).unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}

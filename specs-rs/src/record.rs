//! One input record and its word and field views.
//!
//! Positions are 1-based character positions.  Views are computed on first
//! use and cached together with the separator they were computed for, so a
//! separator change mid-run simply invalidates them.

use crate::script::token::Range;

/// Default word separator: any whitespace.
pub const DEFAULT_WORD_SEPARATOR: char = ' ';
/// Default field separator.
pub const DEFAULT_FIELD_SEPARATOR: char = '\t';

/// Which decomposition of a record is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Word,
    Field,
}

/// 0-based half-open character span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Record {
    text: String,
    chars: Vec<char>,
    words: Option<(char, Vec<Span>)>,
    fields: Option<(char, Vec<Span>)>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

/// Words: runs of non-separator characters.  A blank separator matches any
/// whitespace.
fn split_words(chars: &[char], sep: char) -> Vec<Span> {
    let is_sep = |c: char| if sep == ' ' { c.is_whitespace() } else { c == sep };
    let mut spans = Vec::new();
    let mut start = None;
    for (i, &c) in chars.iter().enumerate() {
        match (is_sep(c), start) {
            (true, Some(s)) => {
                spans.push(Span { start: s, end: i });
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push(Span { start: s, end: chars.len() });
    }
    spans
}

/// Fields: every separator ends a field, so adjacent separators delimit an
/// empty field.  An empty record has no fields.
fn split_fields(chars: &[char], sep: char) -> Vec<Span> {
    if chars.is_empty() {
        return Vec::new();
    }
    let mut spans = Vec::new();
    let mut start = 0;
    for (i, &c) in chars.iter().enumerate() {
        if c == sep {
            spans.push(Span { start, end: i });
            start = i + 1;
        }
    }
    spans.push(Span { start, end: chars.len() });
    spans
}

/// Resolve a 1-based, possibly negative element index against `count`.
fn resolve(idx: i64, count: usize) -> i64 {
    if idx < 0 {
        idx + count as i64 + 1
    } else {
        idx
    }
}

impl Record {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let chars = text.chars().collect();
        Record { text, chars, words: None, fields: None }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    fn slice(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    /// Characters `from` through `to`.  0 means the start or the end,
    /// negatives count from the end, and anything past the end is dropped.
    pub fn from_to(&self, from: i64, to: i64) -> String {
        let slen = self.chars.len() as i64;
        let mut from = if from == 0 { 1 } else { from };
        let mut to = if to == 0 { slen } else { to };
        if from < 0 {
            from = (from + slen + 1).max(1);
        }
        if to < 0 {
            to = (to + slen + 1).max(1);
        }
        if from > slen {
            return String::new();
        }
        let to = to.min(slen);
        if to < from {
            return String::new();
        }
        self.slice((from - 1) as usize, to as usize)
    }

    /// Character range extraction (`1-5`, `-3;-1`, `7.2`).
    pub fn range(&self, r: Range) -> String {
        self.from_to(r.first, r.last)
    }

    fn spans(&mut self, kind: Element, sep: char) -> &[Span] {
        let cache = match kind {
            Element::Word => &mut self.words,
            Element::Field => &mut self.fields,
        };
        if cache.as_ref().map_or(true, |(s, _)| *s != sep) {
            let spans = match kind {
                Element::Word => split_words(&self.chars, sep),
                Element::Field => split_fields(&self.chars, sep),
            };
            *cache = Some((sep, spans));
        }
        cache.as_ref().map_or(&[], |(_, v)| v.as_slice())
    }

    pub fn count(&mut self, kind: Element, sep: char) -> usize {
        self.spans(kind, sep).len()
    }

    /// Span of element `idx` (1-based, negative from the end).
    pub fn element_span(&mut self, kind: Element, sep: char, idx: i64) -> Option<Span> {
        let spans = self.spans(kind, sep);
        let i = resolve(idx, spans.len());
        if i < 1 || i as usize > spans.len() {
            return None;
        }
        Some(spans[i as usize - 1])
    }

    /// Character bounds covering elements `r.first` through `r.last`.  A last
    /// of 0 means the final element; a last beyond the count is clamped.
    pub fn element_bounds(&mut self, kind: Element, sep: char, r: Range) -> Option<Span> {
        let spans = self.spans(kind, sep);
        let n = spans.len() as i64;
        let first = resolve(r.first, spans.len()).max(1);
        let last = if r.last == 0 { n } else { resolve(r.last, spans.len()).min(n) };
        if first > n || last < first {
            return None;
        }
        Some(Span { start: spans[first as usize - 1].start, end: spans[last as usize - 1].end })
    }

    /// Text of elements `r.first` through `r.last`, separators between them
    /// included as they appear in the record.
    pub fn elements(&mut self, kind: Element, sep: char, r: Range) -> String {
        match self.element_bounds(kind, sep, r) {
            Some(span) => self.slice(span.start, span.end),
            None => String::new(),
        }
    }

    /// Text of one element, empty when it does not exist.
    pub fn element(&mut self, kind: Element, sep: char, idx: i64) -> String {
        match self.element_span(kind, sep, idx) {
            Some(span) => self.slice(span.start, span.end),
            None => String::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const WS: char = DEFAULT_WORD_SEPARATOR;
    const FS: char = DEFAULT_FIELD_SEPARATOR;

    #[test]
    fn from_to_conventions() {
        let r = Record::new("incredible");
        assert_eq!(r.from_to(4, 6), "red");
        assert_eq!(r.from_to(0, 3), "inc");
        assert_eq!(r.from_to(8, 0), "ble");
        assert_eq!(r.from_to(-3, -1), "ble");
        assert_eq!(r.from_to(-30, 2), "in");
        assert_eq!(r.from_to(11, 20), "");
        assert_eq!(r.from_to(9, 20), "le");
        assert_eq!(r.from_to(5, 4), "");
    }

    #[test]
    fn words_collapse_runs() {
        let mut r = Record::new("  one   two three ");
        assert_eq!(r.count(Element::Word, WS), 3);
        assert_eq!(r.element(Element::Word, WS, 2), "two");
        assert_eq!(r.element(Element::Word, WS, -1), "three");
        assert_eq!(r.element(Element::Word, WS, 4), "");
        assert_eq!(r.elements(Element::Word, WS, Range::span(1, 2)), "one   two");
        assert_eq!(r.elements(Element::Word, WS, Range::span(2, 0)), "two three");
    }

    #[test]
    fn word_positions() {
        let mut r = Record::new("ab  cde");
        let span = r.element_span(Element::Word, WS, 2).unwrap();
        assert_eq!((span.start + 1, span.end), (5, 7));
    }

    #[test]
    fn fields_keep_empties() {
        let mut r = Record::new("a\t\tb");
        assert_eq!(r.count(Element::Field, FS), 3);
        assert_eq!(r.element(Element::Field, FS, 2), "");
        assert_eq!(r.element(Element::Field, FS, 3), "b");
        assert_eq!(Record::new("").count(Element::Field, FS), 0);
    }

    #[test]
    fn separator_change_recomputes() {
        let mut r = Record::new("a,b c");
        assert_eq!(r.count(Element::Word, WS), 2);
        assert_eq!(r.count(Element::Word, ','), 2);
        assert_eq!(r.element(Element::Word, ',', 2), "b c");
        assert_eq!(r.count(Element::Field, ','), 2);
    }

    #[test]
    fn element_range_out_of_bounds_is_empty() {
        let mut r = Record::new("one two");
        assert_eq!(r.elements(Element::Word, WS, Range::span(3, 5)), "");
        assert_eq!(r.elements(Element::Word, WS, Range::span(2, 9)), "two");
    }

    #[test]
    fn extraction_is_idempotent() {
        let mut r = Record::new("x y z");
        let a = r.element(Element::Word, WS, 2);
        let b = r.element(Element::Word, WS, 2);
        assert_eq!(a, b);
    }
}

//! Program splitting and token classification.
//!
//! A specs program arrives either as separate command-line words or as one
//! string (an argument or a file) that must first be split into words.  Each
//! word is then classified by its shape.  The classifier never decides whether
//! a range is an input range or an output column; the compiler in
//! [`super::item`] does that by grammatical position.

use std::fmt;

use crate::conversion::Conversion;
use crate::error::SpecsError;

// ── Words ─────────────────────────────────────────────────────────────────────

/// One whitespace-delimited word of program text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    /// 1-based source line (always 1 for command-line words).
    pub line: usize,
}

impl Word {
    pub fn new(text: impl Into<String>, line: usize) -> Self {
        Word { text: text.into(), line }
    }
}

/// Characters that may delimit a literal (`/abc/`, `.abc.`, `"abc"`).
pub fn is_delimiter(c: char) -> bool {
    matches!(
        c,
        '/' | '@' | '\'' | '"' | '#' | '!' | '$' | '%' | '^' | '&' | '~' | '*' | '+' | '-'
            | '_' | '=' | '.' | ','
    )
}

/// Delimiters whose literal may contain blanks.
fn is_quote(c: char) -> bool {
    matches!(c, '"' | '\'' | '/')
}

/// Character-walking splitter over program text.
struct Splitter {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    at_line_start: bool,
}

impl Splitter {
    fn new(src: &str) -> Self {
        Splitter { chars: src.chars().collect(), pos: 0, line: 1, at_line_start: true }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if let Some(ch) = c {
            self.pos += 1;
            if ch == '\n' {
                self.line += 1;
                self.at_line_start = true;
            } else if !ch.is_whitespace() {
                self.at_line_start = false;
            }
        }
        c
    }

    /// Skip blanks, newlines and comment lines.
    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else if c == '#'
                && self.at_line_start
                && self.peek2().map_or(true, char::is_whitespace)
            {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_escape(&mut self, out: &mut String, line: usize) -> Result<(), SpecsError> {
        self.advance(); // backslash
        match self.advance() {
            Some(c) => {
                out.push(c);
                Ok(())
            }
            None => Err(SpecsError::parse_at("Bad escape character at end of input", line)),
        }
    }

    fn read_quoted(&mut self, delim: char) -> Result<String, SpecsError> {
        let line = self.line;
        let mut out = String::new();
        out.push(delim);
        self.advance();
        loop {
            match self.peek() {
                None => {
                    return Err(SpecsError::parse_at("Missing delimiter at end of input", line))
                }
                Some('\\') => self.read_escape(&mut out, line)?,
                Some(c) if c == delim => {
                    out.push(c);
                    self.advance();
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
            }
        }
    }

    fn read_plain(&mut self) -> Result<String, SpecsError> {
        let line = self.line;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                break;
            }
            if c == '\\' {
                self.read_escape(&mut out, line)?;
            } else {
                out.push(c);
                self.advance();
            }
        }
        Ok(out)
    }

    fn split(mut self) -> Result<Vec<Word>, SpecsError> {
        let mut words = Vec::new();
        loop {
            self.skip_ws();
            let Some(c) = self.peek() else { break };
            let line = self.line;
            let text = if is_quote(c) { self.read_quoted(c)? } else { self.read_plain()? };
            words.push(Word { text, line });
        }
        Ok(words)
    }
}

/// Split a program string (a single argument or a spec file) into words.
pub fn split_program(src: &str) -> Result<Vec<Word>, SpecsError> {
    Splitter::new(src).split()
}

/// Turn command-line program arguments into words.  A lone argument is split;
/// several arguments are taken one word each, exactly as the shell passed them.
pub fn words_from_args(args: &[String]) -> Result<Vec<Word>, SpecsError> {
    match args {
        [single] => split_program(single),
        many => Ok(many.iter().map(|a| Word::new(a.clone(), 1)).collect()),
    }
}

// ── Ranges ────────────────────────────────────────────────────────────────────

/// An inclusive 1-based range.  Negative bounds count from the end; a `last`
/// of 0 means "to the end".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub first: i64,
    pub last: i64,
    /// Written as a bare number (`5`), usable as an output column.
    pub single: bool,
}

impl Range {
    pub const fn single(n: i64) -> Self {
        Range { first: n, last: n, single: true }
    }

    pub const fn span(first: i64, last: i64) -> Self {
        Range { first, last, single: false }
    }

    /// Width of a positive, bounded range (`5-9`, `5.5`).
    pub fn width(&self) -> Option<usize> {
        (self.first > 0 && self.last >= self.first).then(|| (self.last - self.first + 1) as usize)
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.single {
            write!(f, "{}", self.first)
        } else if self.last == 0 {
            write!(f, "{}-*", self.first)
        } else {
            write!(f, "{};{}", self.first, self.last)
        }
    }
}

/// Parse a signed integer that is written in canonical form (no `+`, no
/// leading zeros) and is not zero.
fn canonical_nonzero(s: &str) -> Option<i64> {
    let n: i64 = s.parse().ok()?;
    (n != 0 && n.to_string() == s).then_some(n)
}

fn parse_single(s: &str) -> Option<Range> {
    canonical_nonzero(s).map(Range::single)
}

/// `from-to`, `from-*` (positive, ascending) or `from;to` (any sign).
fn parse_from_to(s: &str) -> Option<Range> {
    let split_at = s
        .char_indices()
        .skip(1)
        .find(|&(_, c)| c == '-' || c == ';')
        .map(|(i, _)| i)?;
    let (from, rest) = s.split_at(split_at);
    let semicolon = rest.starts_with(';');
    let to = &rest[1..];
    let first = canonical_nonzero(from)?;
    if to == "*" {
        return (semicolon || first > 0).then_some(Range::span(first, 0));
    }
    let last = canonical_nonzero(to)?;
    if !semicolon && (first < 1 || last < first) {
        return None;
    }
    Some(Range::span(first, last))
}

/// `from.len`.
fn parse_from_len(s: &str) -> Option<Range> {
    let (from, len) = s.split_once('.')?;
    let first = canonical_nonzero(from)?;
    let len = canonical_nonzero(len)?;
    if len < 1 {
        return None;
    }
    let mut last = first.checked_add(len - 1)?;
    if first < 0 && last >= 0 {
        last += 1; // there is no position zero
    }
    Some(Range::span(first, last))
}

/// Any of the simple range spellings.
pub fn parse_range(s: &str) -> Option<Range> {
    parse_single(s).or_else(|| parse_from_to(s)).or_else(|| parse_from_len(s))
}

// ── Tokens ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Stop,
    AllEof,
    AnyEof,
    MatchEof,
    Eof,
    Read,
    ReadStop,
    Write,
    NoWrite,
    Unread,
    Redo,
    Assert,
    Abend,
    Id,
    Set,
    Print,
    If,
    Then,
    Else,
    ElseIf,
    EndIf,
    While,
    Do,
    Done,
    Continue,
    Break,
    SkipWhile,
    SkipUntil,
    Select,
    First,
    Second,
    OutStream,
    Stderr,
    Number,
    TodClock,
    DTodClock,
    TimeDiff,
    Strip,
    Substring,
    Of,
    FieldSeparator,
    WordSeparator,
    Pad,
    Requires,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Range(Range),
    WordRange(Range),
    FieldRange(Range),
    /// `a:` — binds the following field to an identifier.
    Label(char),
    Period,
    Literal(String),
    Next(Option<usize>),
    NextWord(Option<usize>),
    NextField(Option<usize>),
    Conversion(Conversion),
    Align(Alignment),
    Keyword(Keyword),
}

/// A classified word.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The word as written.
    pub text: String,
    /// 1-based position of the word in the program.
    pub index: usize,
    pub line: usize,
}

impl Token {
    /// The word read as an argument: a literal's content, or the text as
    /// written for anything else.
    pub fn literal_text(&self) -> &str {
        match &self.kind {
            TokenKind::Literal(s) => s,
            _ => &self.text,
        }
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.kind == TokenKind::Keyword(kw)
    }

    /// Short description for diagnostics.
    pub fn describe(&self) -> String {
        format!("<{}> at index {}", self.text, self.index)
    }
}

/// Case-insensitive match allowing abbreviation down to `min` characters.
fn abbrev(word: &str, full: &str, min: usize) -> bool {
    word.len() >= min && word.len() <= full.len() && full[..word.len()].eq_ignore_ascii_case(word)
}

fn keyword(word: &str) -> Option<Keyword> {
    use Keyword::*;
    let lower = word.to_ascii_lowercase();
    let kw = match lower.as_str() {
        "stop" => Stop,
        "alleof" => AllEof,
        "anyeof" => AnyEof,
        "matcheof" => MatchEof,
        "eof" => Eof,
        "read" => Read,
        "readstop" => ReadStop,
        "write" => Write,
        "nowrite" => NoWrite,
        "unread" => Unread,
        "redo" => Redo,
        "assert" => Assert,
        "abend" => Abend,
        "id" => Id,
        "set" => Set,
        "print" => Print,
        "if" => If,
        "then" => Then,
        "else" => Else,
        "elseif" => ElseIf,
        "endif" => EndIf,
        "while" => While,
        "do" => Do,
        "done" => Done,
        "continue" => Continue,
        "break" => Break,
        "skip-while" => SkipWhile,
        "skip-until" => SkipUntil,
        "select" => Select,
        "first" => First,
        "second" => Second,
        "outstream" => OutStream,
        "stderr" => Stderr,
        "number" => Number,
        "todclock" => TodClock,
        "dtodclock" => DTodClock,
        "timediff" => TimeDiff,
        "strip" => Strip,
        "of" => Of,
        "fs" => FieldSeparator,
        "ws" => WordSeparator,
        "pad" => Pad,
        "requires" => Requires,
        _ if abbrev(word, "substring", 6) => Substring,
        _ if abbrev(word, "fieldseparator", 8) => FieldSeparator,
        _ if abbrev(word, "wordseparator", 7) => WordSeparator,
        _ => return None,
    };
    Some(kw)
}

fn alignment(word: &str) -> Option<Alignment> {
    match word.to_ascii_lowercase().as_str() {
        "left" => Some(Alignment::Left),
        "center" | "centre" => Some(Alignment::Center),
        "right" => Some(Alignment::Right),
        _ => None,
    }
}

/// `nw`, `nf`, `n` and their long forms, each with an optional `.len`.
fn next_placement(word: &str) -> Option<TokenKind> {
    let (base, len) = match word.split_once('.') {
        Some((base, len)) => {
            let n: usize = len.parse().ok()?;
            if n == 0 || n.to_string() != len {
                return None;
            }
            (base, Some(n))
        }
        None => (word, None),
    };
    let lower = base.to_ascii_lowercase();
    if lower == "nw" || lower == "nword" || abbrev(base, "nextword", 5) {
        Some(TokenKind::NextWord(len))
    } else if lower == "nf" || lower == "nfield" || abbrev(base, "nextfield", 5) {
        Some(TokenKind::NextField(len))
    } else if abbrev(base, "next", 1) {
        Some(TokenKind::Next(len))
    } else {
        None
    }
}

/// Decode pairs of hex digits into a string of byte-valued characters.
pub fn decode_hex(hex: &str) -> Option<String> {
    if hex.is_empty() || hex.len() % 2 != 0 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok().map(char::from))
        .collect()
}

/// Strip a matching pair of delimiter characters.
fn strip_delimiters(word: &str) -> &str {
    let mut chars = word.chars();
    match (chars.next(), chars.next_back()) {
        (Some(a), Some(b)) if a == b && is_delimiter(a) => &word[a.len_utf8()..word.len() - b.len_utf8()],
        _ => word,
    }
}

/// Classify one word.
fn classify(word: &str) -> TokenKind {
    if let Some(kw) = keyword(word) {
        return TokenKind::Keyword(kw);
    }
    if let Some(al) = alignment(word) {
        return TokenKind::Align(al);
    }

    let mut chars = word.chars();
    if let (Some(c), Some(':'), None) = (chars.next(), chars.next(), chars.next()) {
        if c.is_ascii_alphabetic() {
            return TokenKind::Label(c);
        }
    }
    if word == "." {
        return TokenKind::Period;
    }
    if let Some(conv) = Conversion::from_name(word) {
        return TokenKind::Conversion(conv);
    }
    if let Some(r) = parse_range(word) {
        return TokenKind::Range(r);
    }
    if let Some(rest) = word.strip_prefix(['w', 'W']) {
        if let Some(r) = parse_range(rest) {
            return TokenKind::WordRange(r);
        }
    }
    if let Some(rest) = word.strip_prefix(['f', 'F']) {
        if let Some(r) = parse_range(rest) {
            return TokenKind::FieldRange(r);
        }
    }
    if let Some(kind) = next_placement(word) {
        return kind;
    }
    if let Some(hex) = word.strip_prefix(['x', 'X']) {
        if let Some(lit) = decode_hex(hex) {
            return TokenKind::Literal(lit);
        }
    }
    TokenKind::Literal(strip_delimiters(word).to_owned())
}

/// Classify a word list, folding `WORD n` and `FIELD n` into one token.
pub fn tokenize(words: Vec<Word>) -> Result<Vec<Token>, SpecsError> {
    let mut tokens: Vec<Token> = Vec::with_capacity(words.len());
    let mut iter = words.into_iter().enumerate().peekable();
    while let Some((idx, word)) = iter.next() {
        let index = idx + 1;
        let is_word_kw = abbrev(&word.text, "word", 1) && keyword(&word.text).is_none();
        let is_field_kw = abbrev(&word.text, "field", 1) && keyword(&word.text).is_none();
        if is_word_kw || is_field_kw {
            let range = iter.peek().and_then(|(_, next)| parse_range(&next.text));
            let Some(range) = range else {
                let next = iter.peek().map(|(_, w)| w.text.clone()).unwrap_or_default();
                return Err(SpecsError::parse_at(
                    format!("Bad word/field range <{next}> at index {}.", index + 1),
                    word.line,
                ));
            };
            iter.next();
            let kind = if is_word_kw { TokenKind::WordRange(range) } else { TokenKind::FieldRange(range) };
            tokens.push(Token { kind, text: word.text, index, line: word.line });
            continue;
        }
        let kind = classify(&word.text);
        tokens.push(Token { kind, text: word.text, index, line: word.line });
    }
    Ok(tokens)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(split_program(src).unwrap()).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn texts(src: &str) -> Vec<String> {
        split_program(src).unwrap().into_iter().map(|w| w.text).collect()
    }

    #[test]
    fn split_plain_words() {
        assert_eq!(texts("hello 1"), vec!["hello", "1"]);
        assert_eq!(texts("  a:  w5 .  "), vec!["a:", "w5", "."]);
    }

    #[test]
    fn split_quoted_keeps_blanks() {
        assert_eq!(texts(r#"print "a || ' x'" 1"#), vec!["print", r#""a || ' x'""#, "1"]);
        assert_eq!(texts("/hello world/ 1"), vec!["/hello world/", "1"]);
    }

    #[test]
    fn split_escape() {
        assert_eq!(texts(r"a\ b 1"), vec!["a b", "1"]);
    }

    #[test]
    fn split_missing_delimiter() {
        let err = split_program("1-* 1\n\"abc 5").unwrap_err();
        assert_eq!(err.to_string(), "line 2: Missing delimiter at end of input");
    }

    #[test]
    fn split_skips_comment_lines() {
        let src = "# header comment\nw1 1\n  # indented\nw2 nw\n";
        assert_eq!(texts(src), vec!["w1", "1", "w2", "nw"]);
    }

    #[test]
    fn comment_needs_blank_after_hash() {
        assert_eq!(texts("#abc# 1"), vec!["#abc#", "1"]);
    }

    #[test]
    fn args_single_is_split() {
        let w = words_from_args(&["w1 1".to_owned()]).unwrap();
        assert_eq!(w.len(), 2);
        let w = words_from_args(&["a b".to_owned(), "1".to_owned()]).unwrap();
        assert_eq!(w[0].text, "a b");
    }

    #[test]
    fn ranges() {
        assert_eq!(parse_range("5"), Some(Range::single(5)));
        assert_eq!(parse_range("-5"), Some(Range::single(-5)));
        assert_eq!(parse_range("3-7"), Some(Range::span(3, 7)));
        assert_eq!(parse_range("3-*"), Some(Range::span(3, 0)));
        assert_eq!(parse_range("-5;-2"), Some(Range::span(-5, -2)));
        assert_eq!(parse_range("3.4"), Some(Range::span(3, 6)));
        assert_eq!(parse_range("-2.3"), Some(Range::span(-2, 1)));
        assert_eq!(parse_range("7-3"), None);
        assert_eq!(parse_range("0"), None);
        assert_eq!(parse_range("05"), None);
        assert_eq!(parse_range("abc"), None);
        assert_eq!(parse_range("9223372036854775807.2"), None);
        assert_eq!(parse_range("9223372036854775807.1"), Some(Range::span(i64::MAX, i64::MAX)));
    }

    #[test]
    fn range_width() {
        assert_eq!(Range::span(5, 9).width(), Some(5));
        assert_eq!(Range::single(5).width(), Some(1));
        assert_eq!(Range::span(5, 0).width(), None);
    }

    #[test]
    fn classify_words() {
        assert_eq!(
            kinds("a: w5 . f2 nw n.3 nf"),
            vec![
                TokenKind::Label('a'),
                TokenKind::WordRange(Range::single(5)),
                TokenKind::Period,
                TokenKind::FieldRange(Range::single(2)),
                TokenKind::NextWord(None),
                TokenKind::Next(Some(3)),
                TokenKind::NextField(None),
            ]
        );
    }

    #[test]
    fn word_and_field_keywords_take_range() {
        assert_eq!(kinds("word 2-3 1"), vec![
            TokenKind::WordRange(Range::span(2, 3)),
            TokenKind::Range(Range::single(1)),
        ]);
        assert_eq!(kinds("FIELD -1 1")[0], TokenKind::FieldRange(Range::single(-1)));
        assert!(tokenize(split_program("word abc").unwrap()).is_err());
    }

    #[test]
    fn keyword_abbreviations() {
        assert_eq!(kinds("substr")[0], TokenKind::Keyword(Keyword::Substring));
        assert_eq!(kinds("fieldsep")[0], TokenKind::Keyword(Keyword::FieldSeparator));
        assert_eq!(kinds("WORDSEP")[0], TokenKind::Keyword(Keyword::WordSeparator));
        assert_eq!(kinds("first")[0], TokenKind::Keyword(Keyword::First));
        assert_eq!(kinds("centre")[0], TokenKind::Align(Alignment::Center));
        assert_eq!(kinds("Number")[0], TokenKind::Keyword(Keyword::Number));
    }

    #[test]
    fn literals() {
        assert_eq!(kinds("hello")[0], TokenKind::Literal("hello".into()));
        assert_eq!(kinds("/abc/")[0], TokenKind::Literal("abc".into()));
        assert_eq!(kinds(".xyz.")[0], TokenKind::Literal("xyz".into()));
        assert_eq!(kinds("x4142")[0], TokenKind::Literal("AB".into()));
        assert_eq!(kinds("x2ch")[0], TokenKind::Literal("x2ch".into()));
        assert_eq!(kinds("abba")[0], TokenKind::Literal("abba".into()));
    }

    #[test]
    fn conversions_are_tokens() {
        assert!(matches!(kinds("c2x")[0], TokenKind::Conversion(_)));
        assert!(matches!(kinds("X2C")[0], TokenKind::Conversion(_)));
    }

    #[test]
    fn literal_text_of_non_literal() {
        let toks = tokenize(split_program("if 1 then").unwrap()).unwrap();
        assert_eq!(toks[1].literal_text(), "1");
    }
}

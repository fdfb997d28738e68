//! Compiler from classified tokens to a flat, executable item list.
//!
//! Blocks are resolved here, once: `IF`, `ELSEIF`, `ELSE` and `WHILE` become
//! conditional items and jumps with precomputed targets, so the interpreter
//! never scans for a matching `ENDIF` or `DONE`.
//!
//! ```text
//! IF c1 THEN a ELSEIF c2 THEN b ELSE d ENDIF
//!
//! 0 If(c1, on_false=3)   1 a   2 Jump(7)
//! 3 If(c2, on_false=6)   4 b   5 Jump(7)
//! 6 d                    7 …
//! ```

use tracing::debug;

use super::expr::{leading_token, parse_expr, Expr};
use super::token::{decode_hex, Alignment, Keyword, Range, Token, TokenKind};
use crate::conversion::Conversion;
use crate::error::{RuntimeError, SpecsError};
use crate::output::{Placement, MAX_LINE_WIDTH};
use crate::stream::{StopPolicy, MAX_STREAMS};

/// Functions that read the current record or run position.
pub const RECORD_FUNCTIONS: &[&str] = &[
    "record", "recno", "iterno", "wordcount", "fieldcount", "word", "field", "words", "fields",
    "range", "wordstart", "wordend", "wordlen", "fieldstart", "fieldend", "fieldlen", "first",
    "eof",
];

// ── Items ─────────────────────────────────────────────────────────────────────

/// Where a datafield's text comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// Characters of the record.
    Range(Range),
    Words(Range),
    Fields(Range),
    Literal(String),
    /// `ID x`: the text bound to a field identifier.
    Id(char),
    Number,
    TodClock,
    DTodClock,
    TimeDiff,
    Print(Expr),
    /// `SUBSTRING part OF whole`: a range applied to another source's text.
    Substring { part: Box<Source>, of: Box<Source> },
}

impl Source {
    /// `true` for the range sources, which may appear as a SUBSTRING part.
    fn is_range(&self) -> bool {
        matches!(self, Source::Range(_) | Source::Words(_) | Source::Fields(_))
    }

    fn reads_input(&self) -> bool {
        match self {
            Source::Range(_) | Source::Words(_) | Source::Fields(_) | Source::Id(_) => true,
            Source::Print(e) => expr_reads_input(e),
            Source::Substring { of, .. } => of.reads_input(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataField {
    pub label: Option<char>,
    pub source: Source,
    pub strip: bool,
    pub conversion: Option<Conversion>,
    pub placement: Placement,
    pub align: Alignment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Field(DataField),
    FieldSeparator(char),
    WordSeparator(char),
    Pad(char),
    Read,
    ReadStop,
    Write,
    NoWrite,
    Unread,
    Redo,
    Continue,
    /// Start of the run-out items.
    Eof,
    SelectInput(usize),
    OutStream(usize),
    Stderr,
    Assert { cond: Expr, src: String },
    Abend(String),
    Set(Expr),
    /// `BREAK x`: start tracking break key `x` on this record, so a later
    /// `break(x)` compares against it.  Fails if `x` is not bound.
    Break(char),
    SkipWhile(Expr),
    SkipUntil(Expr),
    /// Fall through when `cond` holds, otherwise continue at `on_false`.
    If { cond: Expr, on_false: usize },
    While { cond: Expr, on_false: usize },
    Jump(usize),
}

/// A compiled program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub items: Vec<Item>,
    /// Index of the `EOF` item, if any.
    pub eof_at: Option<usize>,
    pub stop: Option<StopPolicy>,
    /// Whether any item looks at input records.
    pub uses_input: bool,
}

impl Program {
    /// Items of a regular cycle: everything before `EOF`.
    pub fn cycle_end(&self) -> usize {
        self.eof_at.unwrap_or(self.items.len())
    }

    pub fn has_runout(&self) -> bool {
        self.eof_at.is_some()
    }
}

fn expr_reads_input(e: &Expr) -> bool {
    let mut reads = false;
    e.walk(&mut |node| match node {
        Expr::Break(_) => reads = true,
        Expr::Call(name, _) if RECORD_FUNCTIONS.contains(&name.as_str()) => reads = true,
        _ => {}
    });
    reads
}

// ── Compiler ──────────────────────────────────────────────────────────────────

enum Block {
    If {
        /// Conditional item whose `on_false` is still open.
        test: Option<usize>,
        /// Jumps to patch with the `ENDIF` position.
        exits: Vec<usize>,
        has_else: bool,
        opened: String,
    },
    While { start: usize, opened: String },
}

struct Compiler {
    tokens: Vec<Token>,
    pos: usize,
    program: Program,
    blocks: Vec<Block>,
}

/// Compile a token list.
pub fn compile(tokens: Vec<Token>) -> Result<Program, SpecsError> {
    let mut c = Compiler { tokens, pos: 0, program: Program::default(), blocks: Vec::new() };
    while c.pos < c.tokens.len() {
        c.item()?;
    }
    if let Some(block) = c.blocks.pop() {
        let (opened, closer) = match block {
            Block::If { opened, .. } => (opened, "ENDIF"),
            Block::While { opened, .. } => (opened, "DONE"),
        };
        return Err(SpecsError::parse(format!("{opened} is not terminated by {closer}")));
    }
    let p = &c.program;
    debug!(
        items = p.items.len(),
        eof_at = ?p.eof_at,
        uses_input = p.uses_input,
        "program compiled"
    );
    Ok(c.program)
}

impl Compiler {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn last_line(&self) -> usize {
        self.tokens.last().map_or(1, |t| t.line)
    }

    fn error(&self, message: impl Into<String>, tok: Option<&Token>) -> SpecsError {
        let line = tok.map_or_else(|| self.last_line(), |t| t.line);
        SpecsError::parse_at(message, line)
    }

    /// The word after `kw`, required.
    fn argument(&mut self, kw: &Token) -> Result<Token, SpecsError> {
        self.next().ok_or_else(|| {
            self.error(format!("Missing argument after {}", kw.describe()), Some(kw))
        })
    }

    fn expect_keyword(&mut self, kw: Keyword, after: &Token) -> Result<(), SpecsError> {
        let name = format!("{kw:?}").to_uppercase();
        match self.next() {
            Some(t) if t.is_keyword(kw) => Ok(()),
            Some(t) => Err(self.error(
                format!("Expected {name} after {}, got {}", after.describe(), t.describe()),
                Some(&t),
            )),
            None => Err(self.error(format!("Expected {name} after {}", after.describe()), Some(after))),
        }
    }

    fn expression(&mut self, kw: &Token) -> Result<(Expr, String), SpecsError> {
        let tok = self.argument(kw)?;
        let src = tok.literal_text().to_owned();
        let expr = parse_expr(&src).map_err(|e| {
            self.error(format!("Error in expression {}: {e}", tok.describe()), Some(&tok))
        })?;
        if expr_reads_input(&expr) {
            self.program.uses_input = true;
        }
        Ok((expr, src))
    }

    fn push(&mut self, item: Item) -> usize {
        self.program.items.push(item);
        self.program.items.len() - 1
    }

    fn patch(&mut self, at: usize, target: usize) {
        match self.program.items.get_mut(at) {
            Some(Item::If { on_false, .. } | Item::While { on_false, .. }) => *on_false = target,
            Some(Item::Jump(to)) => *to = target,
            _ => {}
        }
    }

    fn uses_input(&mut self) {
        self.program.uses_input = true;
    }

    fn item(&mut self) -> Result<(), SpecsError> {
        let Some(tok) = self.peek().cloned() else { return Ok(()) };
        let TokenKind::Keyword(kw) = &tok.kind else {
            let field = self.data_field()?;
            self.push(Item::Field(field));
            return Ok(());
        };
        let kw = *kw;
        match kw {
            Keyword::Id
            | Keyword::Number
            | Keyword::TodClock
            | Keyword::DTodClock
            | Keyword::TimeDiff
            | Keyword::Print
            | Keyword::Substring => {
                let field = self.data_field()?;
                self.push(Item::Field(field));
                return Ok(());
            }
            _ => {}
        }
        self.pos += 1;
        match kw {
            Keyword::FieldSeparator | Keyword::WordSeparator | Keyword::Pad => {
                let arg = self.argument(&tok)?;
                let c = separator_char(&arg)
                    .ok_or_else(|| self.error(format!("Bad separator {}", arg.describe()), Some(&arg)))?;
                self.push(match kw {
                    Keyword::FieldSeparator => Item::FieldSeparator(c),
                    Keyword::WordSeparator => Item::WordSeparator(c),
                    _ => Item::Pad(c),
                });
            }
            Keyword::Stop => {
                let arg = self.argument(&tok)?;
                let policy = match &arg.kind {
                    TokenKind::Keyword(Keyword::AllEof) => StopPolicy::AllEof,
                    TokenKind::Keyword(Keyword::AnyEof) => StopPolicy::AnyEof,
                    TokenKind::Keyword(Keyword::MatchEof) => StopPolicy::MatchEof,
                    _ => StopPolicy::Stream(self.stream_number(&arg)?),
                };
                self.program.stop = Some(policy);
            }
            Keyword::Requires => {
                let arg = self.argument(&tok)?;
                check_version(arg.literal_text()).map_err(|m| self.error(m, Some(&arg)))?;
            }
            Keyword::Read => self.directive(Item::Read),
            Keyword::ReadStop => self.directive(Item::ReadStop),
            Keyword::Unread => self.directive(Item::Unread),
            Keyword::Redo => self.directive(Item::Redo),
            Keyword::Write => {
                self.push(Item::Write);
            }
            Keyword::NoWrite => {
                self.push(Item::NoWrite);
            }
            Keyword::Continue => {
                self.push(Item::Continue);
            }
            Keyword::Eof => {
                if self.program.eof_at.is_some() {
                    return Err(self.error(format!("Second EOF at {}", tok.describe()), Some(&tok)));
                }
                if !self.blocks.is_empty() {
                    return Err(self.error(
                        format!("EOF inside a conditional or loop at {}", tok.describe()),
                        Some(&tok),
                    ));
                }
                let at = self.push(Item::Eof);
                self.program.eof_at = Some(at);
                self.uses_input();
            }
            Keyword::Select => {
                let arg = self.argument(&tok)?;
                let n = match &arg.kind {
                    TokenKind::Keyword(Keyword::First) => 1,
                    TokenKind::Keyword(Keyword::Second) => 2,
                    _ => self.stream_number(&arg)?,
                };
                self.directive(Item::SelectInput(n));
            }
            Keyword::OutStream => {
                let arg = self.argument(&tok)?;
                let n = self.stream_number(&arg)?;
                self.push(Item::OutStream(n));
            }
            Keyword::Stderr => {
                self.push(Item::Stderr);
            }
            Keyword::Assert => {
                let (cond, src) = self.expression(&tok)?;
                self.push(Item::Assert { cond, src });
            }
            Keyword::Abend => {
                let arg = self.argument(&tok)?;
                self.push(Item::Abend(arg.literal_text().to_owned()));
            }
            Keyword::Set => {
                let arg = self.peek().cloned();
                let (expr, src) = self.expression(&tok)?;
                if !expr.is_assignment() {
                    let got = leading_token(&src);
                    return Err(self.error(RuntimeError::AssignmentTarget(got).to_string(), arg.as_ref()));
                }
                self.push(Item::Set(expr));
            }
            Keyword::Break => {
                let arg = self.argument(&tok)?;
                let id = identifier(&arg)
                    .ok_or_else(|| self.error(format!("Bad break key {}", arg.describe()), Some(&arg)))?;
                self.directive(Item::Break(id));
            }
            Keyword::SkipWhile | Keyword::SkipUntil => {
                let (cond, _) = self.expression(&tok)?;
                self.directive(if kw == Keyword::SkipWhile {
                    Item::SkipWhile(cond)
                } else {
                    Item::SkipUntil(cond)
                });
            }
            Keyword::If => {
                let (cond, _) = self.expression(&tok)?;
                self.expect_keyword(Keyword::Then, &tok)?;
                let test = self.push(Item::If { cond, on_false: 0 });
                self.blocks.push(Block::If {
                    test: Some(test),
                    exits: Vec::new(),
                    has_else: false,
                    opened: tok.describe(),
                });
            }
            Keyword::ElseIf | Keyword::Else => self.else_branch(&tok, kw == Keyword::ElseIf)?,
            Keyword::EndIf => match self.blocks.pop() {
                Some(Block::If { test, exits, .. }) => {
                    let end = self.program.items.len();
                    if let Some(t) = test {
                        self.patch(t, end);
                    }
                    for j in exits {
                        self.patch(j, end);
                    }
                }
                _ => return Err(self.error(format!("ENDIF without IF at {}", tok.describe()), Some(&tok))),
            },
            Keyword::While => {
                let (cond, _) = self.expression(&tok)?;
                self.expect_keyword(Keyword::Do, &tok)?;
                let start = self.push(Item::While { cond, on_false: 0 });
                self.blocks.push(Block::While { start, opened: tok.describe() });
            }
            Keyword::Done => match self.blocks.pop() {
                Some(Block::While { start, .. }) => {
                    self.push(Item::Jump(start));
                    let end = self.program.items.len();
                    self.patch(start, end);
                }
                _ => return Err(self.error(format!("DONE without WHILE at {}", tok.describe()), Some(&tok))),
            },
            _ => {
                return Err(self.error(format!("Unexpected {}", tok.describe()), Some(&tok)));
            }
        }
        Ok(())
    }

    fn directive(&mut self, item: Item) {
        self.uses_input();
        self.push(item);
    }

    fn else_branch(&mut self, tok: &Token, is_elseif: bool) -> Result<(), SpecsError> {
        match self.blocks.last() {
            Some(Block::If { has_else: false, .. }) => {}
            Some(Block::If { .. }) => {
                return Err(self.error(format!("{} after ELSE", tok.describe()), Some(tok)));
            }
            _ => {
                let what = if is_elseif { "ELSEIF" } else { "ELSE" };
                return Err(self.error(format!("{what} without IF at {}", tok.describe()), Some(tok)));
            }
        }
        let cond = if is_elseif {
            let (cond, _) = self.expression(tok)?;
            self.expect_keyword(Keyword::Then, tok)?;
            Some(cond)
        } else {
            None
        };
        let jump = self.push(Item::Jump(0));
        let here = self.program.items.len();
        let open = match self.blocks.last_mut() {
            Some(Block::If { test, exits, has_else, .. }) => {
                exits.push(jump);
                let open = test.take();
                if cond.is_some() {
                    *test = Some(here);
                } else {
                    *has_else = true;
                }
                open
            }
            _ => None,
        };
        if let Some(cond) = cond {
            self.push(Item::If { cond, on_false: 0 });
        }
        if let Some(t) = open {
            self.patch(t, here);
        }
        Ok(())
    }

    fn stream_number(&self, tok: &Token) -> Result<usize, SpecsError> {
        match tok.kind {
            TokenKind::Range(Range { first, single: true, .. })
                if (1..=MAX_STREAMS as i64).contains(&first) =>
            {
                Ok(first as usize)
            }
            _ => Err(self.error(format!("Bad stream number {}", tok.describe()), Some(tok))),
        }
    }

    // ── Datafields ────────────────────────────────────────────────────────────

    fn data_field(&mut self) -> Result<DataField, SpecsError> {
        let mut label = None;
        if let Some(Token { kind: TokenKind::Label(c), .. }) = self.peek() {
            label = Some(*c);
            self.pos += 1;
        }
        let source = self.source()?;
        if source.reads_input() {
            self.uses_input();
        }

        let mut strip = false;
        if self.peek().is_some_and(|t| t.is_keyword(Keyword::Strip)) {
            strip = true;
            self.pos += 1;
        }
        let mut conversion = None;
        if let Some(Token { kind: TokenKind::Conversion(c), .. }) = self.peek() {
            conversion = Some(*c);
            self.pos += 1;
        }

        let tok = self
            .next()
            .ok_or_else(|| self.error("Missing output placement at end of program", None))?;
        let placement = match tok.kind {
            TokenKind::Period => Placement::Discard,
            TokenKind::Next(w) => Placement::Next(w),
            TokenKind::NextWord(w) => Placement::NextWord(w),
            TokenKind::NextField(w) => Placement::NextField(w),
            TokenKind::Range(r) if r.single && r.first > 0 => {
                Placement::Column { col: r.first as usize, width: None }
            }
            TokenKind::Range(r) => match r.width() {
                Some(w) => Placement::Column { col: r.first as usize, width: Some(w) },
                None => return Err(self.error(format!("Bad output placement {}", tok.describe()), Some(&tok))),
            },
            _ => return Err(self.error(format!("Bad output placement {}", tok.describe()), Some(&tok))),
        };
        if placement.reach() > MAX_LINE_WIDTH {
            return Err(self.error(
                format!("Output placement {} is beyond column {MAX_LINE_WIDTH}", tok.describe()),
                Some(&tok),
            ));
        }

        let mut align = Alignment::Left;
        if let Some(t @ Token { kind: TokenKind::Align(a), .. }) = self.peek() {
            if placement.width().is_none() {
                return Err(self.error(format!("Alignment {} requires an output width", t.describe()), Some(t)));
            }
            align = *a;
            self.pos += 1;
        }

        Ok(DataField { label, source, strip, conversion, placement, align })
    }

    fn source(&mut self) -> Result<Source, SpecsError> {
        let tok = self.next().ok_or_else(|| self.error("Missing input source at end of program", None))?;
        Ok(match &tok.kind {
            TokenKind::Range(r) => Source::Range(*r),
            TokenKind::WordRange(r) => Source::Words(*r),
            TokenKind::FieldRange(r) => Source::Fields(*r),
            TokenKind::Literal(s) => Source::Literal(s.clone()),
            TokenKind::Keyword(Keyword::Number) => Source::Number,
            TokenKind::Keyword(Keyword::TodClock) => Source::TodClock,
            TokenKind::Keyword(Keyword::DTodClock) => Source::DTodClock,
            TokenKind::Keyword(Keyword::TimeDiff) => Source::TimeDiff,
            TokenKind::Keyword(Keyword::Id) => {
                let arg = self.argument(&tok)?;
                let id = identifier(&arg).ok_or_else(|| {
                    self.error(format!("Bad field identifier {}", arg.describe()), Some(&arg))
                })?;
                Source::Id(id)
            }
            TokenKind::Keyword(Keyword::Print) => Source::Print(self.expression(&tok)?.0),
            TokenKind::Keyword(Keyword::Substring) => {
                let part = self.source()?;
                if !part.is_range() {
                    return Err(self.error(
                        format!("SUBSTRING needs a range after {}", tok.describe()),
                        Some(&tok),
                    ));
                }
                self.expect_keyword(Keyword::Of, &tok)?;
                let of = self.source()?;
                Source::Substring { part: Box::new(part), of: Box::new(of) }
            }
            _ => return Err(self.error(format!("Bad input source {}", tok.describe()), Some(&tok))),
        })
    }
}

// ── Argument helpers ──────────────────────────────────────────────────────────

/// A single-letter field identifier.
fn identifier(tok: &Token) -> Option<char> {
    let mut chars = tok.text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => Some(c),
        _ => None,
    }
}

/// A separator or pad argument: one character, `BLANK`/`SPACE`, `TAB`, or
/// `x` followed by two hex digits.
fn separator_char(tok: &Token) -> Option<char> {
    let single = |s: &str| {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        }
    };
    if let Some(c) = single(&tok.text) {
        return Some(c);
    }
    match tok.text.to_ascii_lowercase().as_str() {
        "blank" | "space" => return Some(' '),
        "tab" => return Some('\t'),
        _ => {}
    }
    if let Some(hex) = tok.text.strip_prefix(['x', 'X']).filter(|h| h.len() == 2) {
        if let Some(c) = decode_hex(hex).as_deref().and_then(single) {
            return Some(c);
        }
    }
    single(tok.literal_text())
}

fn version_parts(v: &str) -> Vec<u64> {
    v.trim_start_matches(['v', 'V'])
        .split('.')
        .map(|p| p.chars().take_while(char::is_ascii_digit).collect::<String>().parse().unwrap_or(0))
        .collect()
}

/// `REQUIRES`: the running version must be at least `wanted`.
fn check_version(wanted: &str) -> Result<(), String> {
    let mut have = version_parts(crate::VERSION);
    let mut need = version_parts(wanted);
    let n = have.len().max(need.len());
    have.resize(n, 0);
    need.resize(n, 0);
    if have >= need {
        Ok(())
    } else {
        Err(format!("This program requires version {wanted}; this is version {}", crate::VERSION))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! ALU: expression lexer, AST, parser, and evaluator.
//!
//! Expressions appear inside program words (`PRINT "a+b"`, `IF "#1 > 3" THEN`)
//! and are compiled once, before any record is read.  Names are resolved at
//! evaluation time through [`EvalContext`].
//!
//! Operator precedence (lowest → highest):
//!   assign  →  `|`  →  `&`  →  relational  →  `||`  →  additive  →
//!   multiplicative  →  unary  →  primary

use std::cmp::Ordering;
use std::fmt;

use super::value::Value;
use crate::error::{RtResult, RuntimeError};

// ── EvalContext ───────────────────────────────────────────────────────────────

/// Interface through which the evaluator reaches run state.
///
/// The interpreter's [`RunContext`](super::interp::RunContext) implements this trait to
/// give expressions access to field identifiers, counters, configuration
/// literals and functions.
pub trait EvalContext {
    /// Value bound to field identifier `id` in the current cycle.
    fn field(&self, id: char) -> RtResult<Value>;

    /// Counter `#n`; unset counters are [`Value::Absent`].
    fn counter(&self, n: usize) -> Value;

    fn set_counter(&mut self, n: usize, value: Value);

    /// Configuration literal `@key`.
    fn config(&self, key: &str) -> RtResult<Value>;

    /// Whether the control-break key `id` changed on this record.
    fn control_break(&mut self, id: char) -> RtResult<bool>;

    /// Invoke a built-in or external function.
    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> RtResult<Value>;
}

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Counter(usize),
    Field(char),
    Config(String),
    /// A name directly followed by `(`.
    Func(String),

    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Concat,
    Not,

    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StrictEq,
    StrictNe,
    StrictLt,
    StrictLe,
    StrictGt,
    StrictGe,

    And,
    Or,

    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    IntDivAssign,
    RemAssign,
    ConcatAssign,

    Comma,
    LParen,
    RParen,
    /// Unrecognised input — reported as a diagnostic instead of masking as end.
    Unknown(String),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Int(n) => return write!(f, "{n}"),
            Token::Float(x) => return write!(f, "{}", Value::Float(*x)),
            Token::Str(s) => return write!(f, "'{s}'"),
            Token::Counter(n) => return write!(f, "#{n}"),
            Token::Field(c) => return write!(f, "{c}"),
            Token::Config(k) => return write!(f, "@{k}"),
            Token::Func(name) => return write!(f, "{name}("),
            Token::Unknown(s) => return f.write_str(s),
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::SlashSlash => "//",
            Token::Percent => "%",
            Token::Concat => "||",
            Token::Not => "!",
            Token::Eq => "=",
            Token::Ne => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::StrictEq => "==",
            Token::StrictNe => "!==",
            Token::StrictLt => "<<",
            Token::StrictLe => "<<=",
            Token::StrictGt => ">>",
            Token::StrictGe => ">>=",
            Token::And => "&",
            Token::Or => "|",
            Token::Assign => ":=",
            Token::AddAssign => "+=",
            Token::SubAssign => "-=",
            Token::MulAssign => "*=",
            Token::DivAssign => "/=",
            Token::IntDivAssign => "//=",
            Token::RemAssign => "%=",
            Token::ConcatAssign => "||=",
            Token::Comma => ",",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Eof => "end of expression",
        };
        f.write_str(s)
    }
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer {
    src: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Lexer { src: src.chars().collect(), pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn take_while(&mut self, s: &mut String, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek().filter(|&c| pred(c)) {
            s.push(c);
            self.pos += 1;
        }
    }

    fn read_number(&mut self, first: char) -> Token {
        let mut s = String::new();
        s.push(first);
        let mut is_float = first == '.';
        self.take_while(&mut s, |c| c.is_ascii_digit());
        if !is_float && self.peek() == Some('.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            s.push('.');
            self.pos += 1;
            self.take_while(&mut s, |c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = matches!(self.peek2(), Some('+' | '-'));
            let digit_at = if sign { self.pos + 2 } else { self.pos + 1 };
            if self.src.get(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                for _ in self.pos..digit_at {
                    if let Some(c) = self.advance() {
                        s.push(c);
                    }
                }
                self.take_while(&mut s, |c| c.is_ascii_digit());
            }
        }
        if is_float {
            s.parse().map(Token::Float).unwrap_or(Token::Unknown(s))
        } else {
            // Too large for an integer: keep it as a real.
            s.parse()
                .map(Token::Int)
                .or_else(|_| s.parse().map(Token::Float))
                .unwrap_or(Token::Unknown(s))
        }
    }

    fn read_string(&mut self, quote: char) -> Token {
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Token::Unknown(format!("{quote}{s}")),
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => return Token::Unknown(format!("{quote}{s}\\")),
                },
                Some(c) if c == quote => break,
                Some(c) => s.push(c),
            }
        }
        Token::Str(s)
    }

    fn read_name(&mut self, first: char) -> Token {
        let mut s = String::new();
        s.push(first);
        self.take_while(&mut s, |c| c.is_ascii_alphanumeric() || c == '_');
        let save = self.pos;
        self.skip_ws();
        if self.peek() == Some('(') {
            return Token::Func(s.to_ascii_lowercase());
        }
        self.pos = save;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => Token::Field(c),
            _ => Token::Unknown(s),
        }
    }

    fn next_token(&mut self) -> Token {
        self.skip_ws();
        let ch = match self.advance() {
            None => return Token::Eof,
            Some(c) => c,
        };

        match ch {
            '0'..='9' => self.read_number(ch),
            '.' if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.read_number(ch),
            '"' | '\'' => self.read_string(ch),
            'a'..='z' | 'A'..='Z' | '_' => self.read_name(ch),
            '#' => {
                let mut s = String::new();
                self.take_while(&mut s, |c| c.is_ascii_digit());
                s.parse().map(Token::Counter).unwrap_or(Token::Unknown(format!("#{s}")))
            }
            '@' => {
                let mut s = String::new();
                self.take_while(&mut s, |c| c.is_ascii_alphanumeric() || c == '_');
                if s.is_empty() {
                    Token::Unknown("@".into())
                } else {
                    Token::Config(s)
                }
            }
            '+' if self.eat('=') => Token::AddAssign,
            '+' => Token::Plus,
            '-' if self.eat('=') => Token::SubAssign,
            '-' => Token::Minus,
            '*' if self.eat('=') => Token::MulAssign,
            '*' => Token::Star,
            '/' => {
                if self.eat('/') {
                    if self.eat('=') {
                        Token::IntDivAssign
                    } else {
                        Token::SlashSlash
                    }
                } else if self.eat('=') {
                    Token::DivAssign
                } else {
                    Token::Slash
                }
            }
            '%' if self.eat('=') => Token::RemAssign,
            '%' => Token::Percent,
            '|' => {
                if self.eat('|') {
                    if self.eat('=') {
                        Token::ConcatAssign
                    } else {
                        Token::Concat
                    }
                } else {
                    Token::Or
                }
            }
            '&' => Token::And,
            ':' if self.eat('=') => Token::Assign,
            '=' if self.eat('=') => Token::StrictEq,
            '=' => Token::Eq,
            '!' | '¬' => {
                if self.eat('=') {
                    if ch == '!' && self.eat('=') {
                        Token::StrictNe
                    } else {
                        Token::Ne
                    }
                } else {
                    Token::Not
                }
            }
            '<' => {
                if self.eat('<') {
                    if self.eat('=') {
                        Token::StrictLe
                    } else {
                        Token::StrictLt
                    }
                } else if self.eat('=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('>') {
                    if self.eat('=') {
                        Token::StrictGe
                    } else {
                        Token::StrictGt
                    }
                } else if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            ',' => Token::Comma,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c => Token::Unknown(c.to_string()),
        }
    }

    fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token();
            let done = matches!(t, Token::Eof);
            tokens.push(t);
            if done {
                break;
            }
        }
        tokens
    }
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Rem,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StrictEq,
    StrictNe,
    StrictLt,
    StrictLe,
    StrictGt,
    StrictGe,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    IntDiv,
    Rem,
    Concat,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Counter(usize),
    Field(char),
    Config(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Assign(usize, AssignOp, Box<Expr>),
    /// Omitted arguments (`fmt(x,,10)`) are `None`.
    Call(String, Vec<Option<Expr>>),
    /// `break(x)`: takes the identifier itself, not its value.
    Break(char),
}

impl Expr {
    pub fn is_assignment(&self) -> bool {
        matches!(self, Expr::Assign(..))
    }

    /// Visit every node, depth first.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Unary(_, e) | Expr::Assign(_, _, e) => e.walk(f),
            Expr::Binary(_, l, r) => {
                l.walk(f);
                r.walk(f);
            }
            Expr::Call(_, args) => {
                for a in args.iter().flatten() {
                    a.walk(f);
                }
            }
            _ => {}
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    fn parse_assign(&mut self) -> Result<Expr, String> {
        let start = self.peek().clone();
        let lhs = self.parse_or()?;
        let op = match self.peek() {
            Token::Assign => AssignOp::Set,
            Token::AddAssign => AssignOp::Add,
            Token::SubAssign => AssignOp::Sub,
            Token::MulAssign => AssignOp::Mul,
            Token::DivAssign => AssignOp::Div,
            Token::IntDivAssign => AssignOp::IntDiv,
            Token::RemAssign => AssignOp::Rem,
            Token::ConcatAssign => AssignOp::Concat,
            _ => return Ok(lhs),
        };
        let Expr::Counter(n) = lhs else {
            return Err(RuntimeError::AssignmentTarget(start.to_string()).to_string());
        };
        self.pos += 1;
        let rhs = self.parse_assign()?;
        Ok(Expr::Assign(n, op, Box::new(rhs)))
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_relational()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                Token::StrictEq => BinOp::StrictEq,
                Token::StrictNe => BinOp::StrictNe,
                Token::StrictLt => BinOp::StrictLt,
                Token::StrictLe => BinOp::StrictLe,
                Token::StrictGt => BinOp::StrictGt,
                Token::StrictGe => BinOp::StrictGe,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_concat()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_concat(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_additive()?;
        while self.eat(&Token::Concat) {
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(BinOp::Concat, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::SlashSlash => BinOp::IntDiv,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Not => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.pos += 1;
        Ok(Expr::Unary(op, Box::new(self.parse_unary()?)))
    }

    fn parse_args(&mut self, name: &str) -> Result<Vec<Option<Expr>>, String> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            if matches!(self.peek(), Token::Comma | Token::RParen) {
                args.push(None);
            } else {
                args.push(Some(self.parse_assign()?));
            }
            if self.eat(&Token::Comma) {
                continue;
            }
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            return Err(format!("Expected ')' after arguments to {name}, got {}", self.peek()));
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(x) => Ok(Expr::Literal(Value::Float(x))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Counter(n) => Ok(Expr::Counter(n)),
            Token::Field(c) => Ok(Expr::Field(c)),
            Token::Config(k) => Ok(Expr::Config(k)),
            Token::Func(name) => {
                if !self.eat(&Token::LParen) {
                    return Err(format!("Expected '(' after {name}"));
                }
                let args = self.parse_args(&name)?;
                if name == "break" {
                    return match args.as_slice() {
                        [Some(Expr::Field(c))] => Ok(Expr::Break(*c)),
                        _ => Err("break() takes one field identifier".into()),
                    };
                }
                Ok(Expr::Call(name, args))
            }
            Token::LParen => {
                let inner = self.parse_assign()?;
                if !self.eat(&Token::RParen) {
                    return Err(format!("Expected ')', got {}", self.peek()));
                }
                Ok(inner)
            }
            Token::Unknown(s) => Err(format!("Unknown token {s} in expression")),
            other => Err(format!("Unexpected {other} in expression")),
        }
    }
}

/// Parse an expression string into an AST.
pub fn parse_expr(src: &str) -> Result<Expr, String> {
    let tokens = Lexer::new(src).tokenize();
    let mut parser = Parser::new(tokens);
    let expr = parser.parse_assign()?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        t => Err(format!("Unexpected {t} in expression")),
    }
}

/// The first token of `src` as written, for diagnostics.
pub fn leading_token(src: &str) -> String {
    Lexer::new(src).tokenize().into_iter().next().unwrap_or(Token::Eof).to_string()
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

/// Evaluate an [`Expr`] against the given context.
pub fn eval_expr(expr: &Expr, ctx: &mut dyn EvalContext) -> RtResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Counter(n) => Ok(ctx.counter(*n)),
        Expr::Field(c) => ctx.field(*c),
        Expr::Config(k) => ctx.config(k),
        Expr::Break(c) => ctx.control_break(*c).map(Value::from),

        Expr::Unary(op, inner) => {
            let v = eval_expr(inner, ctx)?;
            match op {
                UnaryOp::Neg => v.arith_neg(),
                UnaryOp::Plus => v.arith_pos(),
                UnaryOp::Not => Ok(Value::from(!v.as_bool())),
            }
        }

        Expr::Binary(BinOp::And, lhs, rhs) => {
            if !eval_expr(lhs, ctx)?.as_bool() {
                return Ok(Value::from(false));
            }
            Ok(Value::from(eval_expr(rhs, ctx)?.as_bool()))
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            if eval_expr(lhs, ctx)?.as_bool() {
                return Ok(Value::from(true));
            }
            Ok(Value::from(eval_expr(rhs, ctx)?.as_bool()))
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval_expr(lhs, ctx)?;
            let r = eval_expr(rhs, ctx)?;
            eval_binop(*op, &l, &r)
        }

        Expr::Assign(n, op, rhs) => {
            let rval = eval_expr(rhs, ctx)?;
            let new_val = match op {
                AssignOp::Set => rval,
                AssignOp::Add => ctx.counter(*n).arith_add(&rval)?,
                AssignOp::Sub => ctx.counter(*n).arith_sub(&rval)?,
                AssignOp::Mul => ctx.counter(*n).arith_mul(&rval)?,
                AssignOp::Div => ctx.counter(*n).arith_div(&rval)?,
                AssignOp::IntDiv => ctx.counter(*n).arith_intdiv(&rval)?,
                AssignOp::Rem => ctx.counter(*n).arith_rem(&rval)?,
                AssignOp::Concat => ctx.counter(*n).concat(&rval),
            };
            ctx.set_counter(*n, new_val.clone());
            Ok(new_val)
        }

        Expr::Call(name, arg_exprs) => {
            let mut args = Vec::with_capacity(arg_exprs.len());
            for ae in arg_exprs {
                args.push(match ae {
                    Some(e) => eval_expr(e, ctx)?,
                    None => Value::Absent,
                });
            }
            ctx.call_fn(name, args)
        }
    }
}

fn eval_binop(op: BinOp, l: &Value, r: &Value) -> RtResult<Value> {
    use Ordering::*;
    let loose = || l.cmp_value(r);
    let strict = || l.cmp_strict(r);
    Ok(match op {
        BinOp::Add => l.arith_add(r)?,
        BinOp::Sub => l.arith_sub(r)?,
        BinOp::Mul => l.arith_mul(r)?,
        BinOp::Div => l.arith_div(r)?,
        BinOp::IntDiv => l.arith_intdiv(r)?,
        BinOp::Rem => l.arith_rem(r)?,
        BinOp::Concat => l.concat(r),

        BinOp::Eq => Value::from(loose() == Equal),
        BinOp::Ne => Value::from(loose() != Equal),
        BinOp::Lt => Value::from(loose() == Less),
        BinOp::Le => Value::from(loose() != Greater),
        BinOp::Gt => Value::from(loose() == Greater),
        BinOp::Ge => Value::from(loose() != Less),
        BinOp::StrictEq => Value::from(strict() == Equal),
        BinOp::StrictNe => Value::from(strict() != Equal),
        BinOp::StrictLt => Value::from(strict() == Less),
        BinOp::StrictLe => Value::from(strict() != Greater),
        BinOp::StrictGt => Value::from(strict() == Greater),
        BinOp::StrictGe => Value::from(strict() != Less),

        BinOp::And => Value::from(l.as_bool() && r.as_bool()),
        BinOp::Or => Value::from(l.as_bool() || r.as_bool()),
    })
}

/// Convenience: parse and evaluate an expression string.
pub fn eval_str(src: &str, ctx: &mut dyn EvalContext) -> RtResult<Value> {
    let expr = parse_expr(src).map_err(|e| RuntimeError::invalid("expression", e))?;
    eval_expr(&expr, ctx)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Runtime value type for the specs expression language.
//!
//! Values are dynamically typed.  Text taken from records stays text until an
//! operator needs a number, at which point it is divined as an integer or a
//! real.  Coercion failures are reported as [`RuntimeError::NotNumeric`].

use std::cmp::Ordering;
use std::fmt;

use crate::error::{RtResult, RuntimeError};

/// Significant digits used when a real is turned into text.
pub const REAL_PRECISION: usize = 16;

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    /// No value: an unset counter, an omitted argument, `substr` at offset 0.
    #[default]
    Absent,
}

/// The numeric view of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Real(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Real(x) => x,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Number::Int(n) => Value::Int(n),
            Number::Real(x) => Value::Float(x),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => f.write_str(&format_real(*x)),
            Value::Str(s) => f.write_str(s),
            Value::Absent => Ok(()),
        }
    }
}

/// Format a real the way `%.16g` would: shortest of fixed or exponent form,
/// trailing zeros removed.
pub fn format_real(x: f64) -> String {
    if x == 0.0 {
        return "0".to_owned();
    }
    if !x.is_finite() {
        return x.to_string();
    }
    let sci = format!("{:.*e}", REAL_PRECISION - 1, x);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    if exp < -4 || exp >= REAL_PRECISION as i32 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{sign}{:02}", trim_fraction(mantissa), exp.abs())
    } else {
        let decimals = (REAL_PRECISION as i32 - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{x:.decimals$}")).to_owned()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Divine the numeric content of a string.  Surrounding blanks are ignored;
/// anything else that is not a plain integer or real yields `None`.
pub fn parse_number(s: &str) -> Option<Number> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(n) = t.parse::<i64>() {
        return Some(Number::Int(n));
    }
    let plausible = t.bytes().any(|b| b.is_ascii_digit())
        && t.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if !plausible {
        return None;
    }
    t.parse::<f64>().ok().map(Number::Real)
}

impl Value {
    /// Truth value: numeric zero, absent and empty text are false.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => match parse_number(s) {
                Some(n) => n.as_f64() != 0.0,
                None => !s.is_empty(),
            },
            Value::Absent => false,
        }
    }

    /// Textual form (clones for Str, formats for numeric variants).
    pub fn as_str(&self) -> String {
        self.to_string()
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Name of the divined type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "real",
            Value::Str(s) => match parse_number(s) {
                Some(Number::Int(_)) => "integer",
                Some(Number::Real(_)) => "real",
                None => "string",
            },
            Value::Absent => "none",
        }
    }

    /// Numeric view without the arithmetic defaults: `None` for absent,
    /// empty or non-numeric text.
    pub fn number(&self) -> Option<Number> {
        match self {
            Value::Int(n) => Some(Number::Int(*n)),
            Value::Float(x) => Some(Number::Real(*x)),
            Value::Str(s) => parse_number(s),
            Value::Absent => None,
        }
    }

    /// Numeric view for an arithmetic operator `op`.  Absent and blank text
    /// count as zero.
    pub fn operand(&self, op: &str) -> RtResult<Number> {
        match self {
            Value::Absent => Ok(Number::Int(0)),
            Value::Str(s) if s.trim().is_empty() => Ok(Number::Int(0)),
            _ => self.number().ok_or_else(|| RuntimeError::NotNumeric {
                op: op.to_owned(),
                value: self.as_str(),
            }),
        }
    }

    /// Integer view for `//`, `%` and integer-taking functions.  Reals are
    /// truncated toward zero.
    pub fn to_int(&self, op: &str) -> RtResult<i64> {
        match self.operand(op)? {
            Number::Int(n) => Ok(n),
            Number::Real(x) if x.is_finite() && x.abs() < 9.2e18 => Ok(x.trunc() as i64),
            Number::Real(_) => Err(RuntimeError::IntegerOverflow(op.to_owned())),
        }
    }

    pub fn to_float(&self, op: &str) -> RtResult<f64> {
        self.operand(op).map(Number::as_f64)
    }

    // ── Arithmetic ────────────────────────────────────────────────────────────

    fn arith(
        &self,
        rhs: &Value,
        op: &str,
        int_op: fn(i64, i64) -> Option<i64>,
        real_op: fn(f64, f64) -> f64,
    ) -> RtResult<Value> {
        let a = self.operand(op)?;
        let b = rhs.operand(op)?;
        match (a, b) {
            (Number::Int(x), Number::Int(y)) => int_op(x, y)
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::IntegerOverflow(op.to_owned())),
            _ => Ok(Value::Float(real_op(a.as_f64(), b.as_f64()))),
        }
    }

    pub fn arith_add(&self, rhs: &Value) -> RtResult<Value> {
        self.arith(rhs, "+", i64::checked_add, |a, b| a + b)
    }

    pub fn arith_sub(&self, rhs: &Value) -> RtResult<Value> {
        self.arith(rhs, "-", i64::checked_sub, |a, b| a - b)
    }

    pub fn arith_mul(&self, rhs: &Value) -> RtResult<Value> {
        self.arith(rhs, "*", i64::checked_mul, |a, b| a * b)
    }

    /// `/` always yields a real.
    pub fn arith_div(&self, rhs: &Value) -> RtResult<Value> {
        let a = self.to_float("/")?;
        let b = rhs.to_float("/")?;
        if b == 0.0 {
            return Err(RuntimeError::DivisionByZero);
        }
        Ok(Value::Float(a / b))
    }

    /// `//`: integer division truncating toward zero.
    pub fn arith_intdiv(&self, rhs: &Value) -> RtResult<Value> {
        let a = self.to_int("//")?;
        let b = rhs.to_int("//")?;
        if b == 0 {
            return Err(RuntimeError::DivisionByZero);
        }
        a.checked_div(b)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::IntegerOverflow("//".to_owned()))
    }

    /// `%`: remainder carrying the sign of the dividend.
    pub fn arith_rem(&self, rhs: &Value) -> RtResult<Value> {
        let a = self.to_int("%")?;
        let b = rhs.to_int("%")?;
        if b == 0 {
            return Err(RuntimeError::ModuloByZero);
        }
        a.checked_rem(b)
            .map(Value::Int)
            .ok_or_else(|| RuntimeError::IntegerOverflow("%".to_owned()))
    }

    pub fn arith_neg(&self) -> RtResult<Value> {
        match self.operand("-")? {
            Number::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::IntegerOverflow("-".to_owned())),
            Number::Real(x) => Ok(Value::Float(-x)),
        }
    }

    /// Unary `+`: forces the numeric view.
    pub fn arith_pos(&self) -> RtResult<Value> {
        self.operand("+").map(Number::into_value)
    }

    /// `||`: textual concatenation.
    pub fn concat(&self, rhs: &Value) -> Value {
        let mut s = self.as_str();
        s.push_str(&rhs.as_str());
        Value::Str(s)
    }

    // ── Comparison ────────────────────────────────────────────────────────────

    /// Loose ordering: numeric when both sides are numeric, else textual.
    pub fn cmp_value(&self, rhs: &Value) -> Ordering {
        match (self.number(), rhs.number()) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => a.cmp(&b),
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal),
            _ => self.as_str().cmp(&rhs.as_str()),
        }
    }

    /// Strict ordering: always compares the textual forms.
    pub fn cmp_strict(&self, rhs: &Value) -> Ordering {
        self.as_str().cmp(&rhs.as_str())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(if b { 1 } else { 0 })
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        n.into_value()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_int() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Int(-7).to_string(), "-7");
    }

    #[test]
    fn display_float() {
        assert_eq!(Value::Float(3.25).to_string(), "3.25");
        assert_eq!(Value::Float(1.0).to_string(), "1");
        assert_eq!(Value::Float(0.1 + 0.2).to_string(), "0.3");
        assert_eq!(Value::Float(2f64.sqrt()).to_string(), "1.414213562373095");
        assert_eq!(Value::Float(1e20).to_string(), "1e+20");
        assert_eq!(Value::Float(0.00001).to_string(), "1e-05");
    }

    #[test]
    fn display_absent_is_empty() {
        assert_eq!(Value::Absent.to_string(), "");
    }

    #[test]
    fn as_bool() {
        assert!(Value::Int(1).as_bool());
        assert!(!Value::Int(0).as_bool());
        assert!(Value::Str("hello".into()).as_bool());
        assert!(!Value::Str("".into()).as_bool());
        assert!(!Value::Str("0".into()).as_bool());
        assert!(!Value::Str("0.0".into()).as_bool());
        assert!(Value::Str("1".into()).as_bool());
        assert!(!Value::Absent.as_bool());
    }

    #[test]
    fn divination() {
        assert_eq!(parse_number("-8"), Some(Number::Int(-8)));
        assert_eq!(parse_number("-8.0"), Some(Number::Real(-8.0)));
        assert_eq!(parse_number(" 12 "), Some(Number::Int(12)));
        assert_eq!(parse_number("1e3"), Some(Number::Real(1000.0)));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(Value::Str("-8.0".into()).type_name(), "real");
    }

    #[test]
    fn arithmetic() {
        let a = Value::Int(10);
        let b = Value::Int(3);
        assert_eq!(a.arith_add(&b), Ok(Value::Int(13)));
        assert_eq!(a.arith_sub(&b), Ok(Value::Int(7)));
        assert_eq!(a.arith_mul(&b), Ok(Value::Int(30)));
        assert_eq!(a.arith_intdiv(&b), Ok(Value::Int(3)));
        assert_eq!(a.arith_rem(&b), Ok(Value::Int(1)));
        assert_eq!(Value::Int(-7).arith_rem(&Value::Int(2)), Ok(Value::Int(-1)));
    }

    #[test]
    fn division_is_real() {
        assert_eq!(Value::Int(123).arith_div(&Value::Int(3)), Ok(Value::Float(41.0)));
        assert_eq!(Value::Int(12).arith_div(&Value::Int(6)).unwrap().to_string(), "2");
    }

    #[test]
    fn div_by_zero() {
        assert_eq!(Value::Int(1).arith_div(&Value::Int(0)), Err(RuntimeError::DivisionByZero));
        assert_eq!(Value::Int(1).arith_intdiv(&Value::Int(0)), Err(RuntimeError::DivisionByZero));
        assert_eq!(Value::Int(1).arith_rem(&Value::Int(0)), Err(RuntimeError::ModuloByZero));
    }

    #[test]
    fn non_numeric_operand_is_error() {
        let err = Value::Str("abc".into()).arith_add(&Value::Int(1)).unwrap_err();
        assert!(matches!(err, RuntimeError::NotNumeric { .. }));
        assert!(Value::Str("x".into()).arith_rem(&Value::Int(2)).is_err());
    }

    #[test]
    fn absent_and_blank_are_zero() {
        assert_eq!(Value::Absent.arith_add(&Value::Int(5)), Ok(Value::Int(5)));
        assert_eq!(Value::Str(String::new()).arith_add(&Value::Int(5)), Ok(Value::Int(5)));
    }

    #[test]
    fn overflow_is_error() {
        assert!(Value::Int(i64::MAX).arith_add(&Value::Int(1)).is_err());
    }

    #[test]
    fn float_promotion() {
        let a = Value::Int(7);
        let b = Value::Float(2.0);
        assert_eq!(a.arith_add(&b), Ok(Value::Float(9.0)));
        assert_eq!(Value::Str("1.5".into()).arith_mul(&Value::Int(2)), Ok(Value::Float(3.0)));
    }

    #[test]
    fn neg() {
        assert_eq!(Value::Int(5).arith_neg(), Ok(Value::Int(-5)));
        assert_eq!(Value::Float(1.5).arith_neg(), Ok(Value::Float(-1.5)));
        assert_eq!(Value::Str("4".into()).arith_neg(), Ok(Value::Int(-4)));
    }

    #[test]
    fn loose_and_strict_comparison() {
        let a = Value::Str("-8".into());
        let b = Value::Str("-8.0".into());
        assert_eq!(a.cmp_value(&b), Ordering::Equal);
        assert_ne!(a.cmp_strict(&b), Ordering::Equal);
        assert_eq!(Value::Str("10".into()).cmp_value(&Value::Str("9".into())), Ordering::Greater);
        assert_eq!(Value::Str("10".into()).cmp_strict(&Value::Str("9".into())), Ordering::Less);
        assert_eq!(Value::Str("abc".into()).cmp_value(&Value::Int(1)), Ordering::Greater);
    }

    #[test]
    fn concat_coerces() {
        assert_eq!(Value::Int(1).concat(&Value::Float(2.5)), Value::Str("12.5".into()));
    }

    #[test]
    fn from_impls() {
        let v: Value = 42i64.into();
        assert_eq!(v, Value::Int(42));
        let v: Value = "hi".into();
        assert_eq!(v, Value::Str("hi".into()));
        let v: Value = true.into();
        assert_eq!(v, Value::Int(1));
    }
}

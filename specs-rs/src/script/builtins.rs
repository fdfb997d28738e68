//! Built-in ALU functions that depend only on their arguments.
//!
//! Each function receives a `Vec<Value>` of already-evaluated arguments
//! (omitted ones are [`Value::Absent`]) and returns a [`RtResult`].  Record
//! and run-state functions (`word`, `recno`, `eof`, …) live in the
//! interpreter, which falls back to [`call_builtin`] for everything else.

use aho_corasick::AhoCorasick;

use super::token::Alignment;
use super::value::{format_real, Number, Value};
use crate::conversion::{bytes_text, text_bytes};
use crate::error::{RtResult, RuntimeError};
use crate::output::fit;
use crate::pattern::{MatchFlags, PatternCache};
use crate::timefmt::{self, MICROS_PER_SECOND};

const PAD_CHAR: char = ' ';

/// Dispatch a built-in function call.
///
/// Returns `None` if the function name is not a built-in (caller should then
/// try the external functions or report it as unknown).
pub fn call_builtin(
    name: &str,
    args: Vec<Value>,
    patterns: &mut PatternCache,
) -> Option<RtResult<Value>> {
    // Ok(None) → not a builtin; `.transpose()` turns that into None.
    fn inner(name: &str, args: Vec<Value>, patterns: &mut PatternCache) -> RtResult<Option<Value>> {
        Ok(Some(match name {
            // ── Numeric ──────────────────────────────────────────────────────
            "abs" => {
                arity(name, &args, 1, 1)?;
                match args[0].operand(name)? {
                    Number::Int(n) => n
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or_else(|| RuntimeError::IntegerOverflow(name.to_owned()))?,
                    Number::Real(x) => Value::Float(x.abs()),
                }
            }
            "pow" => {
                arity(name, &args, 2, 2)?;
                pow(&args[0], &args[1])?
            }
            "sqrt" => {
                arity(name, &args, 1, 1)?;
                let x = args[0].to_float(name)?;
                if x < 0.0 {
                    return Err(RuntimeError::invalid(name, "negative argument"));
                }
                Value::Float(x.sqrt())
            }
            "tobin" => {
                arity(name, &args, 1, 1)?;
                let n = args[0].to_int(name)?;
                let bits = match n {
                    _ if n >> 8 == 0 => 8,
                    _ if n >> 16 == 0 => 16,
                    _ if n >> 32 == 0 => 32,
                    _ => 64,
                };
                Value::Str(to_binary(name, n, bits)?)
            }
            "tobine" => {
                arity(name, &args, 2, 2)?;
                let n = args[0].to_int(name)?;
                let bits = args[1].to_int(name)?;
                Value::Str(to_binary(name, n, bits)?)
            }
            "frombin" => {
                arity(name, &args, 1, 1)?;
                Value::Int(from_binary(name, &args[0].as_str())?)
            }
            "fmt" => {
                arity(name, &args, 1, 5)?;
                Value::Str(fmt_number(&args)?)
            }

            // ── String ───────────────────────────────────────────────────────
            "len" | "length" => {
                arity(name, &args, 1, 1)?;
                Value::Int(args[0].as_str().chars().count() as i64)
            }
            "substr" => {
                arity(name, &args, 2, 3)?;
                let s: Vec<char> = args[0].as_str().chars().collect();
                let start = args[1].to_int(name)?;
                let len = opt(&args, 2).map(|v| v.to_int(name)).transpose()?;
                match substring(&s, start, len) {
                    Some(sub) => Value::Str(sub),
                    None => Value::Absent,
                }
            }
            "left" | "right" | "center" | "centre" => {
                arity(name, &args, 2, 2)?;
                let s: Vec<char> = args[0].as_str().chars().collect();
                let n = args[1].to_int(name)?;
                Value::Str(justify(name, &s, n))
            }
            "pos" | "rpos" => {
                arity(name, &args, 2, 2)?;
                let needle = args[0].as_str();
                let hay = args[1].as_str();
                let found = if name == "pos" { hay.find(&needle) } else { hay.rfind(&needle) };
                Value::Int(found.map_or(0, |i| hay[..i].chars().count() as i64 + 1))
            }
            "includes" | "includesany" | "includesall" => {
                if args.len() < 2 {
                    return Err(RuntimeError::ArgumentCount {
                        name: name.to_owned(),
                        expected: "at least 2".into(),
                        got: args.len(),
                    });
                }
                let hay = args[0].as_str();
                let mut needles: Vec<String> = Vec::with_capacity(args.len() - 1);
                for n in args[1..].iter().map(Value::as_str) {
                    if !needles.contains(&n) {
                        needles.push(n);
                    }
                }
                Value::from(includes(&hay, &needles, name == "includesall"))
            }

            // ── Regular expressions ──────────────────────────────────────────
            "rmatch" | "rsearch" => {
                arity(name, &args, 2, 3)?;
                let flags = MatchFlags::parse(name, &opt(&args, 2).map(Value::as_str).unwrap_or_default())?;
                let text = args[0].as_str();
                let re = args[1].as_str();
                let hit = if name == "rmatch" {
                    patterns.is_match(&text, &re, flags)?
                } else {
                    patterns.search(&text, &re, flags)?
                };
                Value::from(hit)
            }
            "rreplace" => {
                arity(name, &args, 3, 4)?;
                let flags = MatchFlags::parse(name, &opt(&args, 3).map(Value::as_str).unwrap_or_default())?;
                Value::Str(patterns.replace(&args[0].as_str(), &args[1].as_str(), &args[2].as_str(), flags)?)
            }

            // ── Time ─────────────────────────────────────────────────────────
            "d2tf" => {
                arity(name, &args, 2, 2)?;
                let secs = args[0].to_float(name)?;
                let micros = (secs * MICROS_PER_SECOND as f64).round() as i64;
                Value::Str(timefmt::format(micros, &args[1].as_str()))
            }
            "tf2d" => {
                arity(name, &args, 2, 2)?;
                let text = args[0].as_str();
                let format = args[1].as_str();
                let micros = timefmt::parse(&text, &format).ok_or_else(|| {
                    RuntimeError::invalid(name, format!("'{text}' does not match format '{format}'"))
                })?;
                if micros % MICROS_PER_SECOND == 0 {
                    Value::Int(micros / MICROS_PER_SECOND)
                } else {
                    Value::Float(micros as f64 / MICROS_PER_SECOND as f64)
                }
            }

            "version" => {
                arity(name, &args, 0, 0)?;
                Value::from(crate::VERSION)
            }

            _ => return Ok(None),
        }))
    }

    inner(name, args, patterns).transpose()
}

// ── Numeric helpers ──────────────────────────────────────────────────────────

fn pow(base: &Value, exp: &Value) -> RtResult<Value> {
    let b = base.operand("pow")?;
    let e = exp.operand("pow")?;
    if let (Number::Int(b), Number::Int(e)) = (b, e) {
        if let Ok(e) = u32::try_from(e) {
            return b
                .checked_pow(e)
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::IntegerOverflow("pow".into()));
        }
    }
    Ok(Value::Float(b.as_f64().powf(e.as_f64())))
}

/// Little-endian encoding of `n` in `bits` bits, one character per byte.
fn to_binary(name: &str, n: i64, bits: i64) -> RtResult<String> {
    if !matches!(bits, 8 | 16 | 32 | 64) {
        return Err(RuntimeError::invalid(name, format!("Invalid bit length {bits}")));
    }
    if bits < 64 {
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << bits) - 1;
        if n < min || n > max {
            return Err(RuntimeError::invalid(name, format!("{n} does not fit in {bits} bits")));
        }
    }
    let bytes = n.to_le_bytes();
    Ok(bytes_text(&bytes[..(bits / 8) as usize]))
}

fn from_binary(name: &str, s: &str) -> RtResult<i64> {
    let bytes = text_bytes(s);
    if bytes.is_empty() || bytes.len() > 8 || bytes.len() != s.chars().count() {
        return Err(RuntimeError::invalid(
            name,
            format!("Invalid binary field length {}", s.chars().count()),
        ));
    }
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(&bytes);
    Ok(u64::from_le_bytes(buf) as i64)
}

/// `fmt(x[,kind[,digits[,decimal[,thousands]]]])`.
fn fmt_number(args: &[Value]) -> RtResult<String> {
    const NAME: &str = "fmt";
    let kind = opt(args, 1).map(Value::as_str).unwrap_or_else(|| "f".into());
    let scientific = match kind.to_ascii_lowercase().as_str() {
        "f" => false,
        "e" => true,
        _ => return Err(RuntimeError::invalid(NAME, format!("Invalid format type {kind}"))),
    };
    let digits = match opt(args, 2) {
        Some(v) => {
            let d = v.to_int(NAME)?;
            Some(usize::try_from(d).map_err(|_| RuntimeError::invalid(NAME, "negative precision"))?)
        }
        None => None,
    };
    let decimal = opt(args, 3).map(Value::as_str).unwrap_or_else(|| ".".into());
    let thousands = opt(args, 4).map(Value::as_str).unwrap_or_default();

    let number = args[0].operand(NAME)?;
    let text = match (scientific, digits, number) {
        (false, None, Number::Int(n)) => n.to_string(),
        (false, None, Number::Real(x)) => format_real(x),
        (false, Some(d), n) => format!("{:.*}", d, n.as_f64()),
        (true, None, n) => c_exponent(&format!("{:e}", n.as_f64())),
        (true, Some(d), n) => c_exponent(&format!("{:.*e}", d, n.as_f64())),
    };
    Ok(localize(&text, &decimal, &thousands))
}

/// `1.5e3` → `1.5e+03`.
fn c_exponent(s: &str) -> String {
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => s.to_owned(),
    }
}

/// Replace the decimal point and group integer digits by three.
fn localize(text: &str, decimal: &str, thousands: &str) -> String {
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text),
    };
    let split = unsigned.find(|c: char| !c.is_ascii_digit()).unwrap_or(unsigned.len());
    let (int_part, rest) = unsigned.split_at(split);
    let mut out = String::with_capacity(text.len() + int_part.len() / 3 * thousands.len());
    out.push_str(sign);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push_str(thousands);
        }
        out.push(c);
    }
    match rest.strip_prefix('.') {
        Some(frac) => {
            out.push_str(decimal);
            out.push_str(frac);
        }
        None => out.push_str(rest),
    }
    out
}

// ── String helpers ───────────────────────────────────────────────────────────

/// `substr` semantics: `None` for a start of 0, negative start and length
/// counted from the end, clipped at the end of the string.
fn substring(s: &[char], start: i64, len: Option<i64>) -> Option<String> {
    let slen = s.len() as i64;
    let mut start = start;
    if start == 0 {
        return None;
    }
    if start > slen {
        return Some(String::new());
    }
    if start < 0 {
        start += slen + 1;
        if start < 1 {
            return Some(String::new());
        }
    }
    let mut len = len.unwrap_or(slen - start + 1);
    if len < 0 {
        len += slen + 1;
        if len < 0 {
            return Some(String::new());
        }
    }
    let len = len.min(slen - start + 1);
    let from = (start - 1) as usize;
    Some(s[from..from + len as usize].iter().collect())
}

/// `left`, `right` and `center`: pad with blanks or truncate to `n`.
fn justify(name: &str, s: &[char], n: i64) -> String {
    let slen = s.len() as i64;
    let n = if n < 0 { n + slen + 1 } else { n };
    if n <= 0 {
        return String::new();
    }
    let align = match name {
        "left" => Alignment::Left,
        "right" => Alignment::Right,
        _ => Alignment::Center,
    };
    fit(s, n as usize, align, PAD_CHAR)
}

fn includes(hay: &str, needles: &[String], all: bool) -> bool {
    let ac = AhoCorasick::new(needles);
    if !all {
        return ac.is_match(hay);
    }
    let mut seen = vec![false; needles.len()];
    for m in ac.find_overlapping_iter(hay) {
        seen[m.pattern()] = true;
    }
    seen.iter().all(|&s| s)
}

// ── Argument accessors ────────────────────────────────────────────────────────

pub(crate) fn arity(name: &str, args: &[Value], min: usize, max: usize) -> RtResult<()> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max { min.to_string() } else { format!("{min} to {max}") };
    Err(RuntimeError::ArgumentCount { name: name.to_owned(), expected, got: args.len() })
}

/// An argument that was given and not omitted.
pub(crate) fn opt(args: &[Value], idx: usize) -> Option<&Value> {
    args.get(idx).filter(|v| !v.is_absent())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

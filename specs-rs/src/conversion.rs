//! Field conversions applied between extraction and placement
//! (`w1 c2x 1`, `f3 x2c nw`).
//!
//! Text is treated as a byte string: characters up to U+00FF stand for one
//! byte each, anything above is taken as its UTF-8 encoding.

use crate::error::{RtResult, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// bytes to a string of bits: `"AB"` → `"0100000101000010"`
    C2B,
    /// bytes to hex: `"AB"` → `"4142"`
    C2X,
    B2C,
    X2C,
    /// decimal number to hex: `"314159265"` → `"12b9b0a1"`
    D2X,
    X2D,
    Ucase,
    Lcase,
}

const ALL: [(&str, Conversion); 8] = [
    ("c2b", Conversion::C2B),
    ("c2x", Conversion::C2X),
    ("b2c", Conversion::B2C),
    ("x2c", Conversion::X2C),
    ("d2x", Conversion::D2X),
    ("x2d", Conversion::X2D),
    ("ucase", Conversion::Ucase),
    ("lcase", Conversion::Lcase),
];

/// Bytes of a text, one per character where the character fits in a byte.
pub fn text_bytes(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        match u8::try_from(u32::from(c)) {
            Ok(b) => out.push(b),
            Err(_) => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out
}

/// Inverse of [`text_bytes`] for byte-valued characters.
pub fn bytes_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

impl Conversion {
    pub fn from_name(name: &str) -> Option<Self> {
        ALL.iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, c)| c)
    }

    pub fn name(self) -> &'static str {
        ALL.iter().find(|(_, c)| *c == self).map_or("?", |&(n, _)| n)
    }

    pub fn apply(self, s: &str) -> RtResult<String> {
        let bad = |what: &str| RuntimeError::invalid(self.name(), format!("{what} <{s}>"));
        match self {
            Conversion::C2B => Ok(text_bytes(s).iter().map(|b| format!("{b:08b}")).collect()),
            Conversion::C2X => Ok(text_bytes(s).iter().map(|b| format!("{b:02x}")).collect()),
            Conversion::B2C => {
                if s.len() % 8 != 0 || !s.bytes().all(|b| b == b'0' || b == b'1') {
                    return Err(bad("invalid binary string"));
                }
                let bytes: Vec<u8> = s
                    .as_bytes()
                    .chunks(8)
                    .map(|chunk| chunk.iter().fold(0u8, |acc, &bit| (acc << 1) | (bit - b'0')))
                    .collect();
                Ok(bytes_text(&bytes))
            }
            Conversion::X2C => {
                crate::script::token::decode_hex(s).ok_or_else(|| bad("invalid hex string"))
            }
            Conversion::D2X => {
                let n: i64 = s.trim().parse().map_err(|_| bad("invalid decimal number"))?;
                Ok(format!("{n:x}"))
            }
            Conversion::X2D => {
                let n = u64::from_str_radix(s.trim(), 16).map_err(|_| bad("invalid hex number"))?;
                Ok(n.to_string())
            }
            Conversion::Ucase => Ok(s.to_uppercase()),
            Conversion::Lcase => Ok(s.to_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        assert_eq!(Conversion::from_name("C2X"), Some(Conversion::C2X));
        assert_eq!(Conversion::from_name("ucase"), Some(Conversion::Ucase));
        assert_eq!(Conversion::from_name("x2ch"), None);
    }

    #[test]
    fn char_to_hex_and_back() {
        assert_eq!(Conversion::C2X.apply("AB").unwrap(), "4142");
        assert_eq!(Conversion::X2C.apply("4142").unwrap(), "AB");
        assert!(Conversion::X2C.apply("414").is_err());
    }

    #[test]
    fn char_to_bits_and_back() {
        assert_eq!(Conversion::C2B.apply("AB").unwrap(), "0100000101000010");
        assert_eq!(Conversion::B2C.apply("0100000101000010").unwrap(), "AB");
        assert!(Conversion::B2C.apply("0102").is_err());
    }

    #[test]
    fn decimal_hex() {
        assert_eq!(Conversion::D2X.apply("314159265").unwrap(), "12b9b0a1");
        assert_eq!(Conversion::X2D.apply("12b9b0a1").unwrap(), "314159265");
        assert!(Conversion::D2X.apply("pi").is_err());
    }

    #[test]
    fn case() {
        assert_eq!(Conversion::Ucase.apply("abc").unwrap(), "ABC");
        assert_eq!(Conversion::Lcase.apply("ABC").unwrap(), "abc");
    }
}

//! Calendar arithmetic and strftime-style formatting for `d2tf` / `tf2d`.
//!
//! All times are UTC microseconds since the Unix epoch.  Supported codes:
//! `%Y %y %m %d %e %j %H %I %M %S %f %p %A %a %B %b %h %w %n %t %%`, where
//! `%f` is the six-digit microsecond part.

use std::time::{SystemTime, UNIX_EPOCH};

pub const MICROS_PER_SECOND: i64 = 1_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

const MONTH_NAMES: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];
const DAY_NAMES: [&str; 7] =
    ["Sunday", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday"];

/// Microseconds since the epoch, now.
pub fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

// ── Calendar ─────────────────────────────────────────────────────────────────

/// Convert (year, month 1-12, day 1-31) to days since Unix epoch.
/// Algorithm: Howard Hinnant's `days_from_civil`.
pub fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u32;
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe as i64 - 719_468
}

/// Decompose days-since-epoch into (year, month 1-12, day 1-31).
pub fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let mo = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = yoe as i64 + era * 400 + if mo <= 2 { 1 } else { 0 };
    (y, mo, d)
}

fn is_leap(year: i64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn day_of_year(year: i64, month: u32, day: u32) -> u32 {
    let mdays: [u32; 12] =
        [31, if is_leap(year) { 29 } else { 28 }, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    mdays[..month as usize - 1].iter().sum::<u32>() + day
}

// ── Formatting ───────────────────────────────────────────────────────────────

/// Format a timestamp using strftime-style codes (UTC).
pub fn format(micros: i64, fmt: &str) -> String {
    let secs = micros.div_euclid(MICROS_PER_SECOND);
    let frac = micros.rem_euclid(MICROS_PER_SECOND);
    let day_secs = secs.rem_euclid(SECONDS_PER_DAY) as u32;
    let days = secs.div_euclid(SECONDS_PER_DAY);

    let h = day_secs / 3600;
    let m = (day_secs % 3600) / 60;
    let s = day_secs % 60;
    let (year, month, day) = civil_from_days(days);
    let yday = day_of_year(year, month, day);
    // The epoch was a Thursday.
    let wday = (days + 4).rem_euclid(7) as usize;
    let month_name = MONTH_NAMES[month as usize - 1];

    let mut out = String::with_capacity(fmt.len() + 16);
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            None => out.push('%'),
            Some('%') => out.push('%'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('H') => out.push_str(&format!("{h:02}")),
            Some('I') => out.push_str(&format!("{:02}", if h % 12 == 0 { 12 } else { h % 12 })),
            Some('M') => out.push_str(&format!("{m:02}")),
            Some('S') => out.push_str(&format!("{s:02}")),
            Some('f') => out.push_str(&format!("{frac:06}")),
            Some('p') => out.push_str(if h < 12 { "AM" } else { "PM" }),
            Some('Y') => out.push_str(&format!("{year}")),
            Some('y') => out.push_str(&format!("{:02}", year.rem_euclid(100))),
            Some('m') => out.push_str(&format!("{month:02}")),
            Some('d') => out.push_str(&format!("{day:02}")),
            Some('e') => out.push_str(&format!("{day:2}")),
            Some('j') => out.push_str(&format!("{yday:03}")),
            Some('w') => out.push_str(&format!("{wday}")),
            Some('A') => out.push_str(DAY_NAMES[wday]),
            Some('a') => out.push_str(&DAY_NAMES[wday][..3]),
            Some('B') => out.push_str(month_name),
            Some('b' | 'h') => out.push_str(&month_name[..3]),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
        }
    }
    out
}

// ── Parsing ──────────────────────────────────────────────────────────────────

struct Fields {
    year: i64,
    month: u32,
    day: u32,
    yday: Option<u32>,
    hour: u32,
    minute: u32,
    second: u32,
    micros: u32,
    pm: Option<bool>,
}

struct Scanner<'a> {
    text: &'a [u8],
    pos: usize,
}

impl Scanner<'_> {
    fn digits(&mut self, max: usize) -> Option<u32> {
        let start = self.pos;
        while self.pos < self.text.len() && self.pos - start < max && self.text[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        std::str::from_utf8(&self.text[start..self.pos]).ok()?.parse().ok()
    }

    fn skip_blanks(&mut self) {
        while self.text.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    /// Match one of `names` by full name or three-letter abbreviation.
    fn name(&mut self, names: &[&str]) -> Option<usize> {
        let text = self.text;
        let rest = &text[self.pos..];
        let starts = |n: &str| rest.len() >= n.len() && rest[..n.len()].eq_ignore_ascii_case(n.as_bytes());
        for (i, full) in names.iter().enumerate() {
            if starts(full) {
                self.pos += full.len();
                return Some(i);
            }
        }
        for (i, full) in names.iter().enumerate() {
            let abbr = full.get(..3).unwrap_or(full);
            if starts(abbr) {
                self.pos += abbr.len();
                return Some(i);
            }
        }
        None
    }

    fn literal(&mut self, c: u8) -> Option<()> {
        (self.text.get(self.pos) == Some(&c)).then(|| self.pos += 1)
    }
}

/// Parse `text` according to `fmt`.  Fields the format does not mention
/// default to 1970-01-01 00:00:00.
pub fn parse(text: &str, fmt: &str) -> Option<i64> {
    let mut f = Fields {
        year: 1970,
        month: 1,
        day: 1,
        yday: None,
        hour: 0,
        minute: 0,
        second: 0,
        micros: 0,
        pm: None,
    };
    let mut sc = Scanner { text: text.as_bytes(), pos: 0 };
    let mut spec = fmt.bytes();
    while let Some(c) = spec.next() {
        if c.is_ascii_whitespace() {
            sc.skip_blanks();
            continue;
        }
        if c != b'%' {
            sc.literal(c)?;
            continue;
        }
        match spec.next()? {
            b'%' => sc.literal(b'%')?,
            b'n' | b't' => sc.skip_blanks(),
            b'Y' => {
                let negative = sc.literal(b'-').is_some();
                let y = i64::from(sc.digits(4)?);
                f.year = if negative { -y } else { y };
            }
            b'y' => {
                let y = sc.digits(2)?;
                f.year = i64::from(if y < 69 { 2000 + y } else { 1900 + y });
            }
            b'm' => f.month = sc.digits(2).filter(|m| (1..=12).contains(m))?,
            b'd' => f.day = sc.digits(2).filter(|d| (1..=31).contains(d))?,
            b'e' => {
                sc.skip_blanks();
                f.day = sc.digits(2).filter(|d| (1..=31).contains(d))?;
            }
            b'j' => f.yday = Some(sc.digits(3).filter(|d| (1..=366).contains(d))?),
            b'H' => f.hour = sc.digits(2).filter(|&h| h < 24)?,
            b'I' => f.hour = sc.digits(2).filter(|h| (1..=12).contains(h))? % 12,
            b'M' => f.minute = sc.digits(2).filter(|&m| m < 60)?,
            b'S' => f.second = sc.digits(2).filter(|&s| s <= 60)?,
            b'f' => {
                let start = sc.pos;
                let n = sc.digits(6)?;
                let width = (sc.pos - start) as u32;
                f.micros = n * 10u32.pow(6 - width);
            }
            b'p' => {
                let i = sc.name(&["AM", "PM"])?;
                f.pm = Some(i == 1);
            }
            b'B' | b'b' | b'h' => f.month = sc.name(&MONTH_NAMES)? as u32 + 1,
            b'A' | b'a' => {
                sc.name(&DAY_NAMES)?;
            }
            b'w' => {
                sc.digits(1)?;
            }
            _ => return None,
        }
    }
    if sc.pos != sc.text.len() {
        return None;
    }
    if f.pm == Some(true) && f.hour < 12 {
        f.hour += 12;
    }
    let days = match f.yday {
        Some(yd) => days_from_civil(f.year, 1, 1) + i64::from(yd) - 1,
        None => days_from_civil(f.year, f.month, f.day),
    };
    let secs = days * SECONDS_PER_DAY
        + i64::from(f.hour) * 3600
        + i64::from(f.minute) * 60
        + i64::from(f.second);
    Some(secs * MICROS_PER_SECOND + i64::from(f.micros))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "%Y-%m-%d %H:%M:%S.%f";

    #[test]
    fn civil_round_trip() {
        for days in [-800_000, -1, 0, 1, 11_016, 19_000, 2_932_896] {
            let (y, m, d) = civil_from_days(days);
            assert_eq!(days_from_civil(y, m, d), days);
        }
        assert_eq!(civil_from_days(0), (1970, 1, 1));
    }

    #[test]
    fn format_codes() {
        // 2001-09-09 01:46:40.123456 UTC, a Sunday.
        let t = 1_000_000_000 * MICROS_PER_SECOND + 123_456;
        assert_eq!(format(t, FULL), "2001-09-09 01:46:40.123456");
        assert_eq!(format(t, "%a %b %e %j %p %I"), "Sun Sep  9 252 AM 01");
        assert_eq!(format(t, "%A %B %y %w %%"), "Sunday September 01 0 %");
    }

    #[test]
    fn format_before_epoch() {
        assert_eq!(format(-1, FULL), "1969-12-31 23:59:59.999999");
    }

    #[test]
    fn parse_round_trip() {
        let t = 1_000_000_000 * MICROS_PER_SECOND + 123_456;
        assert_eq!(parse(&format(t, FULL), FULL), Some(t));
        assert_eq!(parse("2001-09-09", "%Y-%m-%d"), Some(999_993_600 * MICROS_PER_SECOND));
    }

    #[test]
    fn parse_names_and_pm() {
        let t = parse("09 Sep 2001 01:46:40 PM", "%d %b %Y %I:%M:%S %p").unwrap();
        assert_eq!(format(t, "%H:%M"), "13:46");
        assert_eq!(parse("Sunday, September 9, 2001", "%A, %B %e, %Y"), parse("2001-09-09", "%Y-%m-%d"));
    }

    #[test]
    fn parse_short_fraction() {
        assert_eq!(parse("1970-01-01 00:00:01.5", FULL), Some(1_500_000));
    }

    #[test]
    fn parse_rejects_mismatch() {
        assert_eq!(parse("2001/09/09", "%Y-%m-%d"), None);
        assert_eq!(parse("2001-13-09", "%Y-%m-%d"), None);
        assert_eq!(parse("2001-09-09 extra", "%Y-%m-%d"), None);
    }

    #[test]
    fn parse_day_of_year() {
        assert_eq!(parse("2001 252", "%Y %j"), parse("2001-09-09", "%Y-%m-%d"));
    }
}

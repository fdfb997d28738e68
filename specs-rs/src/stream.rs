//! Input streams and the stop policy that coordinates them.
//!
//! Each stream is a small state machine:
//!
//! ```text
//! Unstarted ──advance──▶ Positioned ──advance (no more lines)──▶ Exhausted
//!                          │   ▲
//!                   unread │   │ advance (replays the pushed-back record)
//!                          ▼   │
//!                        pushback slot
//! ```
//!
//! Stream 1 is the primary stream.  Every cycle advances all configured
//! streams once; [`StopPolicy`] then decides whether the cycle runs.

use std::collections::BTreeMap;
use std::io::BufRead;

use tracing::debug;

use crate::conversion::bytes_text;
use crate::error::{RtResult, RuntimeError};
use crate::record::Record;

/// Highest stream number accepted for input and output.
pub const MAX_STREAMS: usize = 8;

// ── InputStream ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unstarted,
    Positioned,
    Exhausted,
}

pub struct InputStream {
    id: usize,
    reader: Box<dyn BufRead>,
    state: StreamState,
    current: Record,
    pushback: Option<Record>,
    records_read: usize,
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("current", &self.current.text())
            .field("pushback", &self.pushback.as_ref().map(Record::text))
            .field("records_read", &self.records_read)
            .finish()
    }
}

/// Decode one raw line: UTF-8 when valid, otherwise one character per byte.
fn decode_line(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
    }
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => bytes_text(e.as_bytes()),
    }
}

impl InputStream {
    pub fn new(id: usize, reader: Box<dyn BufRead>) -> Self {
        InputStream {
            id,
            reader,
            state: StreamState::Unstarted,
            current: Record::default(),
            pushback: None,
            records_read: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == StreamState::Exhausted
    }

    /// Records taken from the underlying reader (replays not counted).
    pub fn records_read(&self) -> usize {
        self.records_read
    }

    pub fn current(&self) -> &Record {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut Record {
        &mut self.current
    }

    /// Replace the current record without moving the cursor.
    pub fn set_current(&mut self, record: Record) {
        self.current = record;
    }

    /// Move to the next record.  A pushed-back record is served first.
    /// Returns `false` once the stream is exhausted; the current record is
    /// then empty.
    pub fn advance(&mut self) -> RtResult<bool> {
        if let Some(record) = self.pushback.take() {
            self.current = record;
            self.state = StreamState::Positioned;
            return Ok(true);
        }
        if self.state == StreamState::Exhausted {
            return Ok(false);
        }
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            debug!(stream = self.id, records = self.records_read, "input stream exhausted");
            self.state = StreamState::Exhausted;
            self.current = Record::default();
            return Ok(false);
        }
        self.records_read += 1;
        self.current = Record::new(decode_line(buf));
        self.state = StreamState::Positioned;
        Ok(true)
    }

    /// Push the current record back for the next advance.  Only one record
    /// may wait in the slot.
    pub fn unread(&mut self) -> RtResult<()> {
        if self.pushback.is_some() {
            return Err(RuntimeError::DoubleUnread(self.id));
        }
        if self.state == StreamState::Positioned {
            self.pushback = Some(std::mem::take(&mut self.current));
        }
        Ok(())
    }
}

// ── Stop policy ───────────────────────────────────────────────────────────────

/// When the run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopPolicy {
    /// When stream 1 is exhausted.
    #[default]
    Primary,
    /// When every stream is exhausted.
    AllEof,
    /// When any stream is exhausted.
    AnyEof,
    /// When stream n is exhausted.
    Stream(usize),
    /// Like `AllEof`, but streams must end together.
    MatchEof,
}

// ── Streams ───────────────────────────────────────────────────────────────────

/// The configured input streams, the selected one, and the cycle counter.
#[derive(Debug)]
pub struct Streams {
    inputs: BTreeMap<usize, InputStream>,
    selected: usize,
    policy: StopPolicy,
    cycles: usize,
}

impl Default for Streams {
    fn default() -> Self {
        Streams { inputs: BTreeMap::new(), selected: 1, policy: StopPolicy::Primary, cycles: 0 }
    }
}

impl Streams {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single primary stream reading `reader`.
    pub fn primary(reader: Box<dyn BufRead>) -> Self {
        let mut streams = Streams::new();
        streams.add(1, reader);
        streams
    }

    pub fn add(&mut self, id: usize, reader: Box<dyn BufRead>) {
        self.inputs.insert(id, InputStream::new(id, reader));
    }

    pub fn contains(&self, id: usize) -> bool {
        self.inputs.contains_key(&id)
    }

    pub fn policy(&self) -> StopPolicy {
        self.policy
    }

    /// Set the stop policy.  `STOP n` must name a configured stream.
    pub fn set_policy(&mut self, policy: StopPolicy) -> RtResult<()> {
        if let StopPolicy::Stream(n) = policy {
            if !self.contains(n) {
                return Err(RuntimeError::UnknownInputStream(n));
            }
        }
        self.policy = policy;
        Ok(())
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    /// Make stream `n` the one used by unqualified field and word access.
    pub fn select(&mut self, n: usize) -> RtResult<()> {
        if !self.contains(n) {
            return Err(RuntimeError::UnknownInputStream(n));
        }
        self.selected = n;
        Ok(())
    }

    /// Back to the primary stream; every cycle starts here.
    pub fn reset_selection(&mut self) {
        self.selected = 1;
    }

    /// Completed and running cycles.
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    fn stream(&self, n: usize) -> RtResult<&InputStream> {
        self.inputs.get(&n).ok_or(RuntimeError::UnknownInputStream(n))
    }

    fn stream_mut(&mut self, n: usize) -> RtResult<&mut InputStream> {
        self.inputs.get_mut(&n).ok_or(RuntimeError::UnknownInputStream(n))
    }

    pub fn get(&self, n: usize) -> Option<&InputStream> {
        self.inputs.get(&n)
    }

    /// The selected stream.
    pub fn active(&self) -> RtResult<&InputStream> {
        self.stream(self.selected)
    }

    pub fn active_mut(&mut self) -> RtResult<&mut InputStream> {
        let n = self.selected;
        self.stream_mut(n)
    }

    /// Record number of the selected stream.
    pub fn recno(&self) -> usize {
        self.active().map_or(0, InputStream::records_read)
    }

    /// Advance every stream once and apply the stop policy.  Returns `true`
    /// when the cycle should run.
    pub fn advance_cycle(&mut self) -> RtResult<bool> {
        for stream in self.inputs.values_mut() {
            stream.advance()?;
        }
        let exhausted = |s: &InputStream| s.is_exhausted();
        let proceed = match self.policy {
            StopPolicy::Primary => !self.stream(1).map_or(true, exhausted),
            StopPolicy::Stream(n) => !exhausted(self.stream(n)?),
            StopPolicy::AllEof => !self.inputs.values().all(exhausted),
            StopPolicy::AnyEof => !self.inputs.values().any(exhausted),
            StopPolicy::MatchEof => {
                if self.inputs.values().all(exhausted) {
                    false
                } else if let Some(early) = self.inputs.values().find(|s| exhausted(s)) {
                    return Err(RuntimeError::StreamMismatch(early.id()));
                } else {
                    true
                }
            }
        };
        if proceed {
            self.cycles += 1;
        } else {
            debug!(policy = ?self.policy, cycles = self.cycles, "input complete");
        }
        Ok(proceed)
    }

    /// `READ`: advance the selected stream.  Reading past its end is an
    /// error.
    pub fn read(&mut self) -> RtResult<()> {
        let stream = self.active_mut()?;
        if stream.advance()? {
            Ok(())
        } else {
            Err(RuntimeError::ReadPastEnd(stream.id()))
        }
    }

    /// `READSTOP`: advance the selected stream.  Returns `false` when it is
    /// exhausted and the run should stop.
    pub fn readstop(&mut self) -> RtResult<bool> {
        self.active_mut()?.advance()
    }

    /// `UNREAD` on the selected stream.
    pub fn unread(&mut self) -> RtResult<()> {
        self.active_mut()?.unread()
    }

    /// `REDO`: `text` becomes the current record of the selected stream.
    pub fn redo(&mut self, text: String) -> RtResult<()> {
        self.active_mut()?.set_current(Record::new(text));
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn reader(text: &str) -> Box<dyn BufRead> {
        Box::new(Cursor::new(text.as_bytes().to_vec()))
    }

    fn two(a: &str, b: &str) -> Streams {
        let mut s = Streams::primary(reader(a));
        s.add(2, reader(b));
        s
    }

    #[test]
    fn advance_strips_line_endings() {
        let mut s = InputStream::new(1, reader("a\r\nb\nc"));
        assert_eq!(s.state(), StreamState::Unstarted);
        for want in ["a", "b", "c"] {
            assert!(s.advance().unwrap());
            assert_eq!(s.current().text(), want);
        }
        assert!(!s.advance().unwrap());
        assert!(s.is_exhausted());
        assert_eq!(s.current().text(), "");
        assert_eq!(s.records_read(), 3);
    }

    #[test]
    fn invalid_utf8_reads_as_bytes() {
        let mut s = InputStream::new(1, Box::new(Cursor::new(vec![b'a', 0xe9, b'\n'])));
        s.advance().unwrap();
        assert_eq!(s.current().text(), "a\u{e9}");
    }

    #[test]
    fn unread_replays_the_record() {
        let mut s = InputStream::new(1, reader("one\ntwo\n"));
        s.advance().unwrap();
        s.unread().unwrap();
        assert_eq!(s.current().text(), "");
        assert_eq!(s.unread(), Err(RuntimeError::DoubleUnread(1)));
        s.advance().unwrap();
        assert_eq!(s.current().text(), "one");
        assert_eq!(s.records_read(), 1);
        s.advance().unwrap();
        assert_eq!(s.current().text(), "two");
    }

    #[test]
    fn unread_before_first_record_is_a_no_op() {
        let mut s = InputStream::new(1, reader("x\n"));
        s.unread().unwrap();
        s.advance().unwrap();
        assert_eq!(s.current().text(), "x");
    }

    #[test]
    fn primary_policy_tolerates_short_secondary() {
        let mut s = two("1\n2\n3\n", "a\n");
        let mut cycles = 0;
        while s.advance_cycle().unwrap() {
            cycles += 1;
        }
        assert_eq!(cycles, 3);
        assert_eq!(s.cycles(), 3);
    }

    #[test]
    fn alleof_and_anyeof() {
        let mut s = two("1\n", "a\nb\n");
        s.set_policy(StopPolicy::AllEof).unwrap();
        let mut n = 0;
        while s.advance_cycle().unwrap() {
            n += 1;
        }
        assert_eq!(n, 2);

        let mut s = two("1\n2\n", "a\n");
        s.set_policy(StopPolicy::AnyEof).unwrap();
        let mut n = 0;
        while s.advance_cycle().unwrap() {
            n += 1;
        }
        assert_eq!(n, 1);
    }

    #[test]
    fn stop_on_named_stream() {
        let mut s = two("1\n2\n3\n", "a\n");
        s.set_policy(StopPolicy::Stream(2)).unwrap();
        assert!(s.advance_cycle().unwrap());
        assert!(!s.advance_cycle().unwrap());
        assert_eq!(s.set_policy(StopPolicy::Stream(5)), Err(RuntimeError::UnknownInputStream(5)));
    }

    #[test]
    fn matcheof_reports_uneven_streams() {
        let mut s = two("1\n2\n", "a\n");
        s.set_policy(StopPolicy::MatchEof).unwrap();
        assert!(s.advance_cycle().unwrap());
        assert_eq!(s.advance_cycle(), Err(RuntimeError::StreamMismatch(2)));

        let mut s = two("1\n", "a\n");
        s.set_policy(StopPolicy::MatchEof).unwrap();
        assert!(s.advance_cycle().unwrap());
        assert!(!s.advance_cycle().unwrap());
    }

    #[test]
    fn read_and_readstop() {
        let mut s = Streams::primary(reader("1\n2\n"));
        assert!(s.advance_cycle().unwrap());
        s.read().unwrap();
        assert_eq!(s.active().unwrap().current().text(), "2");
        assert_eq!(s.read(), Err(RuntimeError::ReadPastEnd(1)));

        let mut s = Streams::primary(reader("1\n"));
        s.advance_cycle().unwrap();
        assert!(!s.readstop().unwrap());
    }

    #[test]
    fn select_changes_active_stream_only() {
        let mut s = two("1\n", "a\n");
        s.advance_cycle().unwrap();
        s.select(2).unwrap();
        assert_eq!(s.active().unwrap().current().text(), "a");
        assert_eq!(s.get(1).unwrap().current().text(), "1");
        assert_eq!(s.select(3), Err(RuntimeError::UnknownInputStream(3)));
        s.reset_selection();
        assert_eq!(s.selected(), 1);
        assert_eq!(s.active().unwrap().current().text(), "1");
    }

    #[test]
    fn redo_replaces_current_record() {
        let mut s = Streams::primary(reader("abc\n"));
        s.advance_cycle().unwrap();
        s.redo("xyz".into()).unwrap();
        assert_eq!(s.active().unwrap().current().text(), "xyz");
        assert_eq!(s.recno(), 1);
    }
}

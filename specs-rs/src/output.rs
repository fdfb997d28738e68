//! Column-addressed output lines and the streams they are written to.
//!
//! Each output target owns an [`OutputBuffer`].  Datafields place text into
//! the active buffer; buffers are flushed as lines by `WRITE`, by switching
//! the active target, and at the end of every cycle.

use std::collections::BTreeMap;
use std::io::Write;

use tracing::debug;

use crate::error::{RtResult, RuntimeError};
use crate::script::token::Alignment;
use crate::stream::MAX_STREAMS;

/// Rightmost column a placement may reach.
pub const MAX_LINE_WIDTH: usize = 1 << 20;

// ── Alignment ─────────────────────────────────────────────────────────────────

/// Fit `text` into exactly `width` characters.  Short text is padded with
/// `pad`; long text is truncated, keeping the side given by `align`.  A
/// centred odd leftover goes to the right, so the smaller half is on the left.
pub fn fit(text: &[char], width: usize, align: Alignment, pad: char) -> String {
    let len = text.len();
    if len >= width {
        let from = match align {
            Alignment::Left => 0,
            Alignment::Right => len - width,
            Alignment::Center => (len - width) / 2,
        };
        return text[from..from + width].iter().collect();
    }
    let extra = width - len;
    let (before, after) = match align {
        Alignment::Left => (0, extra),
        Alignment::Right => (extra, 0),
        Alignment::Center => (extra / 2, extra - extra / 2),
    };
    let fill = |n: usize| std::iter::repeat(pad).take(n);
    fill(before).chain(text.iter().copied()).chain(fill(after)).collect()
}

// ── Placement ─────────────────────────────────────────────────────────────────

/// Where a datafield's text goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// 1-based column with an optional fixed width.
    Column { col: usize, width: Option<usize> },
    /// End of the line.
    Next(Option<usize>),
    /// End of the line, after one pad character.
    NextWord(Option<usize>),
    /// End of the line, after the field separator.
    NextField(Option<usize>),
    /// Nowhere (`.`).
    Discard,
}

impl Placement {
    pub fn width(&self) -> Option<usize> {
        match *self {
            Placement::Column { width, .. }
            | Placement::Next(width)
            | Placement::NextWord(width)
            | Placement::NextField(width) => width,
            Placement::Discard => None,
        }
    }

    /// Columns a fixed placement extends to, or the width an appended one
    /// adds.
    pub fn reach(&self) -> usize {
        match *self {
            Placement::Column { col, width } => col.saturating_add(width.unwrap_or(1)).saturating_sub(1),
            _ => self.width().unwrap_or(0),
        }
    }
}

// ── OutputBuffer ──────────────────────────────────────────────────────────────

/// One output line under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBuffer {
    chars: Vec<char>,
    /// Something was placed since the last flush, possibly empty text.
    dirty: bool,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    /// Overwrite from 1-based column `col`, filling any gap with blanks.
    pub fn put_at(&mut self, col: usize, text: &str) {
        let start = col.max(1) - 1;
        if self.chars.len() < start {
            self.chars.resize(start, ' ');
        }
        for (i, c) in text.chars().enumerate() {
            match self.chars.get_mut(start + i) {
                Some(slot) => *slot = c,
                None => self.chars.push(c),
            }
        }
        self.dirty = true;
    }

    pub fn append(&mut self, text: &str) {
        self.chars.extend(text.chars());
        self.dirty = true;
    }

    /// Append after `sep`, unless the line is still empty.
    pub fn append_separated(&mut self, sep: char, text: &str) {
        if !self.chars.is_empty() {
            self.chars.push(sep);
        }
        self.append(text);
    }

    /// Place `text` according to `placement`, fitting it to the width if one
    /// is given.
    pub fn place(&mut self, placement: Placement, text: &str, align: Alignment, pad: char, fs: char) {
        let fitted;
        let text = match placement.width() {
            Some(w) => {
                let chars: Vec<char> = text.chars().collect();
                fitted = fit(&chars, w, align, pad);
                fitted.as_str()
            }
            None => text,
        };
        match placement {
            Placement::Column { col, .. } => self.put_at(col, text),
            Placement::Next(_) => self.append(text),
            Placement::NextWord(_) => self.append_separated(pad, text),
            Placement::NextField(_) => self.append_separated(fs, text),
            Placement::Discard => {}
        }
    }

    /// The line so far; the buffer is left empty and clean.
    pub fn take(&mut self) -> String {
        self.dirty = false;
        std::mem::take(&mut self.chars).into_iter().collect()
    }

    pub fn clear(&mut self) {
        self.chars.clear();
        self.dirty = false;
    }
}

// ── Outputs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputTarget {
    Stream(usize),
    Stderr,
}

/// The output sinks and their line buffers.
pub struct Outputs {
    sinks: BTreeMap<usize, Box<dyn Write>>,
    stderr: Box<dyn Write>,
    buffers: BTreeMap<OutputTarget, OutputBuffer>,
    active: OutputTarget,
    lines: usize,
}

impl std::fmt::Debug for Outputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outputs")
            .field("sinks", &self.sinks.keys().collect::<Vec<_>>())
            .field("buffers", &self.buffers)
            .field("active", &self.active)
            .field("lines", &self.lines)
            .finish()
    }
}

impl Outputs {
    /// Stream 1 writes to `primary`; `STDERR` writes to `stderr`.
    pub fn new(primary: Box<dyn Write>, stderr: Box<dyn Write>) -> Self {
        let mut sinks = BTreeMap::new();
        sinks.insert(1, primary);
        Outputs { sinks, stderr, buffers: BTreeMap::new(), active: OutputTarget::Stream(1), lines: 0 }
    }

    /// Configure output stream `id` (2..=8).
    pub fn add(&mut self, id: usize, sink: Box<dyn Write>) {
        self.sinks.insert(id, sink);
    }

    pub fn active(&self) -> OutputTarget {
        self.active
    }

    /// Lines emitted so far, on all targets.
    pub fn lines_written(&self) -> usize {
        self.lines
    }

    /// Buffer of the active target.
    pub fn buffer(&mut self) -> &mut OutputBuffer {
        self.buffers.entry(self.active).or_default()
    }

    fn emit(&mut self, target: OutputTarget, line: &str) -> RtResult<()> {
        let sink = match target {
            OutputTarget::Stream(n) => {
                self.sinks.get_mut(&n).ok_or(RuntimeError::UnknownOutputStream(n))?
            }
            OutputTarget::Stderr => &mut self.stderr,
        };
        writeln!(sink, "{line}")?;
        self.lines += 1;
        Ok(())
    }

    fn flush_if_dirty(&mut self, target: OutputTarget) -> RtResult<()> {
        let line = match self.buffers.get_mut(&target) {
            Some(buf) if buf.is_dirty() => buf.take(),
            _ => return Ok(()),
        };
        self.emit(target, &line)
    }

    /// `OUTSTREAM n` / `STDERR`.
    pub fn select(&mut self, target: OutputTarget) -> RtResult<()> {
        if let OutputTarget::Stream(n) = target {
            if !(1..=MAX_STREAMS).contains(&n) || !self.sinks.contains_key(&n) {
                return Err(RuntimeError::UnknownOutputStream(n));
            }
        }
        if target != self.active {
            self.flush_if_dirty(self.active)?;
            self.active = target;
        }
        Ok(())
    }

    /// `WRITE`: emit the active line, even when nothing was placed.
    pub fn write(&mut self) -> RtResult<()> {
        let line = self.buffer().take();
        self.emit(self.active, &line)
    }

    /// `NOWRITE`: drop the active line.
    pub fn nowrite(&mut self) {
        self.buffer().clear();
    }

    /// Take the active line for `REDO`.
    pub fn redo_take(&mut self) -> String {
        self.buffer().take()
    }

    /// Flush every dirty buffer, numbered streams first, and make stream 1
    /// active again.
    pub fn end_cycle(&mut self) -> RtResult<()> {
        let targets: Vec<OutputTarget> = self.buffers.keys().copied().collect();
        for target in targets {
            self.flush_if_dirty(target)?;
        }
        self.active = OutputTarget::Stream(1);
        Ok(())
    }

    /// Drop all pending lines.
    pub fn discard_all(&mut self) {
        for buf in self.buffers.values_mut() {
            buf.clear();
        }
        self.active = OutputTarget::Stream(1);
    }

    /// Flush the underlying writers.
    pub fn finish(&mut self) -> RtResult<()> {
        for sink in self.sinks.values_mut() {
            sink.flush()?;
        }
        self.stderr.flush()?;
        debug!(lines = self.lines, "output complete");
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// A `Write` whose contents stay reachable after it is boxed.
    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    fn outputs() -> (Outputs, Shared, Shared) {
        let out = Shared::default();
        let err = Shared::default();
        (Outputs::new(Box::new(out.clone()), Box::new(err.clone())), out, err)
    }

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn fit_pads_and_truncates() {
        assert_eq!(fit(&chars("ab"), 5, Alignment::Left, ' '), "ab   ");
        assert_eq!(fit(&chars("ab"), 5, Alignment::Right, '.'), "...ab");
        assert_eq!(fit(&chars("ab"), 5, Alignment::Center, '*'), "*ab**");
        assert_eq!(fit(&chars("abcdef"), 3, Alignment::Left, ' '), "abc");
        assert_eq!(fit(&chars("abcdef"), 3, Alignment::Right, ' '), "def");
        assert_eq!(fit(&chars("abcdef"), 3, Alignment::Center, ' '), "bcd");
    }

    #[test]
    fn put_at_fills_gaps_and_overwrites() {
        let mut b = OutputBuffer::new();
        b.put_at(3, "xy");
        assert_eq!(b.text(), "  xy");
        b.put_at(1, "abcd");
        assert_eq!(b.text(), "abcd");
        b.put_at(3, "Z");
        assert_eq!(b.text(), "abZd");
    }

    #[test]
    fn next_placements() {
        let mut b = OutputBuffer::new();
        b.place(Placement::NextWord(None), "one", Alignment::Left, ' ', '\t');
        b.place(Placement::NextWord(None), "two", Alignment::Left, ' ', '\t');
        b.place(Placement::NextField(None), "3", Alignment::Left, ' ', '\t');
        b.place(Placement::Next(Some(4)), "7", Alignment::Right, '0', '\t');
        assert_eq!(b.text(), "one two\t30007");
    }

    #[test]
    fn empty_text_still_marks_dirty() {
        let mut b = OutputBuffer::new();
        b.put_at(1, "");
        assert!(b.is_dirty());
        assert_eq!(b.take(), "");
        assert!(!b.is_dirty());
    }

    #[test]
    fn end_cycle_flushes_only_dirty_buffers() {
        let (mut o, out, _) = outputs();
        o.end_cycle().unwrap();
        assert_eq!(out.text(), "");
        o.buffer().put_at(1, "hello");
        o.end_cycle().unwrap();
        assert_eq!(out.text(), "hello\n");
    }

    #[test]
    fn write_emits_empty_line_and_nowrite_discards() {
        let (mut o, out, _) = outputs();
        o.write().unwrap();
        o.buffer().append("gone");
        o.nowrite();
        o.end_cycle().unwrap();
        assert_eq!(out.text(), "\n");
    }

    #[test]
    fn select_flushes_and_switches() {
        let (mut o, out, err) = outputs();
        let second = Shared::default();
        o.add(2, Box::new(second.clone()));
        o.buffer().append("first");
        o.select(OutputTarget::Stream(2)).unwrap();
        assert_eq!(out.text(), "first\n");
        o.buffer().append("second");
        o.select(OutputTarget::Stderr).unwrap();
        o.buffer().append("oops");
        o.end_cycle().unwrap();
        assert_eq!(second.text(), "second\n");
        assert_eq!(err.text(), "oops\n");
        assert_eq!(o.active(), OutputTarget::Stream(1));
        assert_eq!(o.select(OutputTarget::Stream(3)), Err(RuntimeError::UnknownOutputStream(3)));
        assert_eq!(o.lines_written(), 3);
    }

    #[test]
    fn discard_all_drops_pending_lines() {
        let (mut o, out, _) = outputs();
        o.buffer().append("partial");
        o.discard_all();
        o.end_cycle().unwrap();
        assert_eq!(out.text(), "");
    }
}

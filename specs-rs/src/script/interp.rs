//! The cycle loop.
//!
//! An [`Interpreter`] owns a compiled [`Program`] and the run state it acts
//! on.  Each cycle advances every input stream once, executes the items up
//! to `EOF`, and flushes the output buffers.  When input is exhausted the
//! items after `EOF` run once more in the run-out cycle.
//!
//! Run state lives in [`RunContext`], which implements [`EvalContext`] so
//! expressions can reach field identifiers, counters, configuration
//! literals, record functions and the external function collaborator.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use super::builtins::{arity, call_builtin, opt};
use super::expr::{eval_expr, EvalContext};
use super::item::{DataField, Item, Program, Source};
use super::token::Range;
use super::value::Value;
use crate::config::Config;
use crate::error::{RtResult, RuntimeError};
use crate::external::ExternalFunctions;
use crate::output::{OutputTarget, Outputs};
use crate::pattern::PatternCache;
use crate::record::{Element, Record, DEFAULT_FIELD_SEPARATOR, DEFAULT_WORD_SEPARATOR};
use crate::stream::Streams;
use crate::timefmt::now_micros;

const DEFAULT_PAD: char = ' ';

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Ran to the end of its items or hit `CONTINUE`.
    Complete,
    /// A `SKIP-WHILE`/`SKIP-UNTIL` rejected the record.
    Skipped,
    /// `READSTOP` found the end of input.
    Stopped,
}

// ── RunContext ────────────────────────────────────────────────────────────────

/// Everything a running program can see and change.
pub struct RunContext {
    streams: Streams,
    outputs: Outputs,
    config: Config,
    external: Option<Box<dyn ExternalFunctions>>,
    patterns: PatternCache,
    counters: BTreeMap<usize, Value>,
    /// Field identifiers bound in the current record.
    fields: HashMap<char, String>,
    /// Values of the tracked break keys at the end of the previous cycle.
    breaks: HashMap<char, String>,
    field_sep: char,
    word_sep: char,
    pad: char,
    /// Skip items whose condition has already flipped.
    skip_done: HashSet<usize>,
    in_runout: bool,
    cycle: usize,
    start_micros: i64,
}

impl RunContext {
    fn new(streams: Streams, outputs: Outputs) -> Self {
        RunContext {
            streams,
            outputs,
            config: Config::builtin(),
            external: None,
            patterns: PatternCache::new(),
            counters: BTreeMap::new(),
            fields: HashMap::new(),
            breaks: HashMap::new(),
            field_sep: DEFAULT_FIELD_SEPARATOR,
            word_sep: DEFAULT_WORD_SEPARATOR,
            pad: DEFAULT_PAD,
            skip_done: HashSet::new(),
            in_runout: false,
            cycle: 0,
            start_micros: now_micros(),
        }
    }

    /// Reset the per-cycle state before the first item runs.
    fn begin_cycle(&mut self) {
        self.fields.clear();
        self.streams.reset_selection();
        self.field_sep = DEFAULT_FIELD_SEPARATOR;
        self.word_sep = DEFAULT_WORD_SEPARATOR;
        self.pad = DEFAULT_PAD;
    }

    fn record(&mut self) -> RtResult<&mut Record> {
        Ok(self.streams.active_mut()?.current_mut())
    }

    /// Execute `program.items[start..end]`.
    fn execute(&mut self, program: &Program, start: usize, end: usize) -> RtResult<Outcome> {
        let mut pc = start;
        while pc < end {
            let at = pc;
            pc += 1;
            match &program.items[at] {
                Item::Field(f) => self.put_field(f)?,
                Item::FieldSeparator(c) => self.field_sep = *c,
                Item::WordSeparator(c) => self.word_sep = *c,
                Item::Pad(c) => self.pad = *c,
                Item::Read => {
                    self.streams.read()?;
                    self.fields.clear();
                }
                Item::ReadStop => {
                    if !self.streams.readstop()? {
                        return Ok(Outcome::Stopped);
                    }
                    self.fields.clear();
                }
                Item::Write => self.outputs.write()?,
                Item::NoWrite => self.outputs.nowrite(),
                Item::Unread => {
                    self.streams.unread()?;
                    self.fields.clear();
                }
                Item::Redo => {
                    let text = self.outputs.redo_take();
                    self.streams.redo(text)?;
                    self.fields.clear();
                }
                Item::Continue | Item::Eof => break,
                Item::SelectInput(n) => self.streams.select(*n)?,
                Item::OutStream(n) => self.outputs.select(OutputTarget::Stream(*n))?,
                Item::Stderr => self.outputs.select(OutputTarget::Stderr)?,
                Item::Assert { cond, src } => {
                    if !eval_expr(cond, self)?.as_bool() {
                        return Err(RuntimeError::AssertionFailed(src.clone()));
                    }
                }
                Item::Abend(message) => return Err(RuntimeError::Abend(message.clone())),
                Item::Set(expr) => {
                    eval_expr(expr, self)?;
                }
                Item::Break(id) => {
                    self.track_break(*id)?;
                }
                Item::SkipWhile(cond) | Item::SkipUntil(cond) => {
                    if self.skip_done.contains(&at) {
                        continue;
                    }
                    let holds = eval_expr(cond, self)?.as_bool();
                    let skip = if matches!(program.items[at], Item::SkipWhile(_)) { holds } else { !holds };
                    if skip {
                        return Ok(Outcome::Skipped);
                    }
                    self.skip_done.insert(at);
                }
                Item::If { cond, on_false } | Item::While { cond, on_false } => {
                    if !eval_expr(cond, self)?.as_bool() {
                        pc = *on_false;
                    }
                }
                Item::Jump(to) => pc = *to,
            }
        }
        Ok(Outcome::Complete)
    }

    fn put_field(&mut self, f: &DataField) -> RtResult<()> {
        let raw = self.source_text(&f.source)?;
        if let Some(id) = f.label {
            self.bind_field(id, raw.clone())?;
        }
        let mut text = if f.strip { raw.trim().to_owned() } else { raw };
        if let Some(conv) = f.conversion {
            text = conv.apply(&text)?;
        }
        let (pad, fs) = (self.pad, self.field_sep);
        self.outputs.buffer().place(f.placement, &text, f.align, pad, fs);
        Ok(())
    }

    fn source_text(&mut self, source: &Source) -> RtResult<String> {
        let (ws, fs) = (self.word_sep, self.field_sep);
        Ok(match source {
            Source::Range(_) | Source::Words(_) | Source::Fields(_) => {
                extract(self.record()?, source, ws, fs)
            }
            Source::Literal(text) => text.clone(),
            Source::Id(id) => self.fields.get(id).cloned().ok_or(RuntimeError::FieldNotDefined(*id))?,
            Source::Number => format!("{:>10}", self.cycle),
            Source::TodClock => self.start_micros.to_string(),
            Source::DTodClock => now_micros().to_string(),
            Source::TimeDiff => format!("{:>8}", now_micros() - self.start_micros),
            Source::Print(expr) => eval_expr(expr, self)?.as_str(),
            Source::Substring { part, of } => {
                let mut whole = Record::new(self.source_text(of)?);
                extract(&mut whole, part, ws, fs)
            }
        })
    }

    fn bind_field(&mut self, id: char, text: String) -> RtResult<()> {
        if self.fields.contains_key(&id) {
            return Err(RuntimeError::FieldRedefined(id));
        }
        self.fields.insert(id, text);
        Ok(())
    }

    /// Whether break key `id` differs from its value in the previous cycle.
    /// The first reference starts tracking the key and reports no break.
    fn track_break(&mut self, id: char) -> RtResult<bool> {
        let current = self.fields.get(&id).ok_or(RuntimeError::FieldNotDefined(id))?;
        match self.breaks.get(&id) {
            Some(prev) => Ok(prev != current),
            None => {
                self.breaks.insert(id, current.clone());
                Ok(false)
            }
        }
    }

    /// Carry the tracked break keys' values over to the next cycle.
    fn remember_breaks(&mut self) {
        for (key, prev) in self.breaks.iter_mut() {
            if let Some(v) = self.fields.get(key) {
                prev.clone_from(v);
            }
        }
    }

    /// Record and run-position functions.  `Ok(None)` for any other name.
    fn record_fn(&mut self, name: &str, args: &[Value]) -> RtResult<Option<Value>> {
        let (kind, sep) = if name.starts_with("word") {
            (Element::Word, self.word_sep)
        } else {
            (Element::Field, self.field_sep)
        };
        let int_arg = |i: usize| args[i].to_int(name);
        Ok(Some(match name {
            "first" => {
                arity(name, args, 0, 0)?;
                Value::from(self.cycle == 1 && !self.in_runout)
            }
            "eof" => {
                arity(name, args, 0, 0)?;
                Value::from(self.in_runout)
            }
            "recno" => {
                arity(name, args, 0, 0)?;
                Value::Int(self.streams.recno() as i64)
            }
            "iterno" => {
                arity(name, args, 0, 0)?;
                Value::Int(self.cycle as i64)
            }
            "record" => {
                arity(name, args, 0, 0)?;
                Value::from(self.record()?.text())
            }
            "wordcount" | "fieldcount" => {
                arity(name, args, 0, 0)?;
                Value::Int(self.record()?.count(kind, sep) as i64)
            }
            "word" | "field" => {
                arity(name, args, 1, 1)?;
                let i = int_arg(0)?;
                Value::Str(self.record()?.element(kind, sep, i))
            }
            "words" | "fields" => {
                arity(name, args, 2, 2)?;
                let (a, b) = (int_arg(0)?, int_arg(1)?);
                Value::Str(self.record()?.elements(kind, sep, Range::span(a, b)))
            }
            "range" => {
                arity(name, args, 2, 2)?;
                let (a, b) = (int_arg(0)?, int_arg(1)?);
                Value::Str(self.record()?.from_to(a, b))
            }
            "wordstart" | "fieldstart" | "wordend" | "fieldend" | "wordlen" | "fieldlen" => {
                arity(name, args, 1, 1)?;
                let i = int_arg(0)?;
                let n = match self.record()?.element_span(kind, sep, i) {
                    None => 0,
                    Some(span) if name.ends_with("start") => span.start + 1,
                    Some(span) if name.ends_with("end") => span.end,
                    Some(span) => span.end - span.start,
                };
                Value::Int(n as i64)
            }
            "conf" => {
                arity(name, args, 1, 2)?;
                match self.config.get(&args[0].as_str()) {
                    Some(v) => Value::from(v),
                    None => opt(args, 1).cloned().unwrap_or(Value::Absent),
                }
            }
            _ => return Ok(None),
        }))
    }
}

/// Text of a range source applied to `record`.
fn extract(record: &mut Record, source: &Source, ws: char, fs: char) -> String {
    match source {
        Source::Range(r) => record.range(*r),
        Source::Words(r) => record.elements(Element::Word, ws, *r),
        Source::Fields(r) => record.elements(Element::Field, fs, *r),
        _ => String::new(),
    }
}

impl EvalContext for RunContext {
    fn field(&self, id: char) -> RtResult<Value> {
        self.fields
            .get(&id)
            .map(|s| Value::from(s.as_str()))
            .ok_or(RuntimeError::FieldNotDefined(id))
    }

    fn counter(&self, n: usize) -> Value {
        self.counters.get(&n).cloned().unwrap_or_default()
    }

    fn set_counter(&mut self, n: usize, value: Value) {
        self.counters.insert(n, value);
    }

    fn config(&self, key: &str) -> RtResult<Value> {
        self.config
            .get(key)
            .map(Value::from)
            .ok_or_else(|| RuntimeError::UnknownConfig(key.to_owned()))
    }

    fn control_break(&mut self, id: char) -> RtResult<bool> {
        self.track_break(id)
    }

    fn call_fn(&mut self, name: &str, args: Vec<Value>) -> RtResult<Value> {
        if let Some(v) = self.record_fn(name, &args)? {
            return Ok(v);
        }
        let fallback = self.external.is_some().then(|| args.clone());
        if let Some(result) = call_builtin(name, args, &mut self.patterns) {
            return result;
        }
        match (self.external.as_mut(), fallback) {
            (Some(ext), Some(args)) => ext.call(name, &args),
            _ => Err(RuntimeError::UnknownFunction(name.to_owned())),
        }
    }
}

// ── Interpreter ───────────────────────────────────────────────────────────────

/// A compiled program bound to its streams.
pub struct Interpreter {
    program: Program,
    ctx: RunContext,
    force_input: bool,
}

impl Interpreter {
    pub fn new(program: Program, streams: Streams, outputs: Outputs) -> Self {
        Interpreter { program, ctx: RunContext::new(streams, outputs), force_input: false }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.ctx.config = config;
        self
    }

    pub fn with_external(mut self, external: Box<dyn ExternalFunctions>) -> Self {
        self.ctx.external = Some(external);
        self
    }

    /// Read input even when the program never looks at it.
    pub fn force_read_input(mut self, force: bool) -> Self {
        self.force_input = force;
        self
    }

    /// Counter `#n` as it stands.
    pub fn counter(&self, n: usize) -> Value {
        self.ctx.counter(n)
    }

    /// Cycles run so far, not counting the run-out.
    pub fn cycles(&self) -> usize {
        self.ctx.cycle
    }

    /// Run the program to completion.
    pub fn run(&mut self) -> RtResult<()> {
        let ctx = &mut self.ctx;
        let program = &self.program;
        if let Some(policy) = program.stop {
            ctx.streams.set_policy(policy)?;
        }
        ctx.start_micros = now_micros();
        let end = program.cycle_end();

        if program.uses_input || self.force_input {
            while ctx.streams.advance_cycle()? {
                ctx.cycle += 1;
                ctx.begin_cycle();
                match ctx.execute(program, 0, end)? {
                    Outcome::Complete => {
                        ctx.remember_breaks();
                        ctx.outputs.end_cycle()?;
                    }
                    Outcome::Skipped => ctx.outputs.discard_all(),
                    Outcome::Stopped => {
                        debug!(cycle = ctx.cycle, "READSTOP at end of input");
                        ctx.outputs.discard_all();
                        break;
                    }
                }
            }
        } else {
            ctx.cycle = 1;
            ctx.begin_cycle();
            if ctx.execute(program, 0, end)? == Outcome::Complete {
                ctx.outputs.end_cycle()?;
            } else {
                ctx.outputs.discard_all();
            }
        }

        if let Some(eof_at) = program.eof_at {
            debug!(cycles = ctx.cycle, "run-out cycle");
            ctx.in_runout = true;
            ctx.begin_cycle();
            if ctx.execute(program, eof_at + 1, program.items.len())? == Outcome::Complete {
                ctx.outputs.end_cycle()?;
            } else {
                ctx.outputs.discard_all();
            }
        }
        ctx.outputs.finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

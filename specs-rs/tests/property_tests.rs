use std::cell::RefCell;
use std::io::{Cursor, Write};
use std::rc::Rc;

use proptest::prelude::*;
use specs::output::{fit, Outputs};
use specs::pattern::PatternCache;
use specs::record::{Element, Record};
use specs::script::builtins::call_builtin;
use specs::script::token::Alignment;
use specs::script::{compile_program, Interpreter, Value};
use specs::stream::{StopPolicy, Streams};
use specs::RuntimeError;

// ── Helpers ───────────────────────────────────────────────────────────────────

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

fn reader(text: &str) -> Box<dyn std::io::BufRead> {
    Box::new(Cursor::new(text.as_bytes().to_vec()))
}

fn run_streams(src: &str, streams: Streams) -> Result<String, RuntimeError> {
    let out = Shared::default();
    let outputs = Outputs::new(Box::new(out.clone()), Box::new(std::io::sink()));
    let program = compile_program(src).expect("program compiles");
    Interpreter::new(program, streams, outputs).run()?;
    let bytes = out.0.borrow().clone();
    Ok(String::from_utf8(bytes).expect("utf-8 output"))
}

fn run(src: &str, input: &str) -> String {
    run_streams(src, Streams::primary(reader(input))).expect("run succeeds")
}

fn builtin(name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
    call_builtin(name, args, &mut PatternCache::new()).expect("is a builtin")
}

// ── Extraction ────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn word_extraction_is_idempotent(text in "[a-z ]{0,40}", k in -6i64..10) {
        let mut rec = Record::new(text);
        let first = rec.element(Element::Word, ' ', k);
        let again = rec.element(Element::Word, ' ', k);
        prop_assert_eq!(first, again);
    }

    #[test]
    fn field_extraction_is_idempotent(text in "[a-z,]{0,40}", k in -6i64..10) {
        let mut rec = Record::new(text);
        let first = rec.element(Element::Field, ',', k);
        prop_assert_eq!(rec.element(Element::Field, ',', k), first);
    }

    #[test]
    fn words_never_contain_the_separator(text in "[a-z ]{0,40}", k in 1i64..8) {
        let mut rec = Record::new(text);
        prop_assert!(!rec.element(Element::Word, ' ', k).contains(' '));
    }
}

// ── Streams ───────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn unread_then_advance_replays(lines in prop::collection::vec("[a-z0-9 ]{0,12}", 1..8), at in 0usize..8) {
        let at = at % lines.len();
        let mut streams = Streams::primary(reader(&(lines.join("\n") + "\n")));
        for _ in 0..=at {
            prop_assert!(streams.advance_cycle().unwrap());
        }
        let before = streams.active().unwrap().current().text().to_owned();
        streams.unread().unwrap();
        prop_assert!(streams.advance_cycle().unwrap());
        prop_assert_eq!(streams.active().unwrap().current().text(), before.as_str());
    }
}

#[test]
fn second_unread_is_an_error() {
    let mut streams = Streams::primary(reader("a\nb\n"));
    streams.advance_cycle().unwrap();
    streams.unread().unwrap();
    assert_eq!(streams.unread(), Err(RuntimeError::DoubleUnread(1)));
}

// ── Binary encoding ───────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn tobin_frombin_round_trip(n in 0i64..=i64::MAX) {
        let bin = builtin("tobin", vec![Value::Int(n)]).unwrap();
        prop_assert_eq!(builtin("frombin", vec![bin]).unwrap(), Value::Int(n));
    }

    #[test]
    fn tobine_rejects_values_wider_than_the_width(n in 256i64..1_000_000) {
        prop_assert!(builtin("tobine", vec![Value::Int(n), Value::Int(8)]).is_err());
        let bin = builtin("tobine", vec![Value::Int(n), Value::Int(32)]).unwrap();
        prop_assert_eq!(builtin("frombin", vec![bin]).unwrap(), Value::Int(n));
    }
}

// ── Control breaks ────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn break_fires_exactly_on_key_changes(keys in prop::collection::vec("[abc]", 1..12)) {
        let input: String = keys.iter().map(|k| format!("{k} x\n")).collect();
        let out = run("k: w1 . print 'break(k)' 1", &input);
        let expected: String = keys
            .iter()
            .enumerate()
            .map(|(i, k)| if i > 0 && keys[i - 1] != *k { "1\n" } else { "0\n" })
            .collect();
        prop_assert_eq!(out, expected);
    }
}

// ── Alignment ─────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn center_puts_the_smaller_half_on_the_left(text in "[a-z]{1,10}", extra in 0usize..9) {
        let chars: Vec<char> = text.chars().collect();
        let width = chars.len() + extra;
        let out = fit(&chars, width, Alignment::Center, '.');
        let left = out.chars().position(|c| c != '.');
        prop_assert_eq!(out.chars().count(), width);
        prop_assert_eq!(left, Some(extra / 2));
    }

    #[test]
    fn fit_always_yields_the_width(text in "[a-z]{0,20}", width in 0usize..25) {
        let chars: Vec<char> = text.chars().collect();
        for align in [Alignment::Left, Alignment::Right, Alignment::Center] {
            prop_assert_eq!(fit(&chars, width, align, ' ').chars().count(), width);
        }
    }
}

#[test]
fn center_of_empty_text_is_all_pad() {
    assert_eq!(fit(&[], 3, Alignment::Center, '.'), "...");
    assert_eq!(fit(&[], 0, Alignment::Center, '.'), "");
}

// ── Examples ──────────────────────────────────────────────────────────────────

#[test]
fn literal_at_column_one() {
    assert_eq!(run("hello 1", ""), "hello\n");
}

#[test]
fn arithmetic_over_words() {
    let out = run("a: w1 . b: w2 . c: w3 . d: w4 . print 'a+b-c*d/6' 1", "1 2 3 4\n");
    assert_eq!(out, "1\n");
}

#[test]
fn substr_of_incredible() {
    let v = builtin("substr", vec![Value::from("incredible"), Value::Int(4), Value::Int(3)]);
    assert_eq!(v, Ok(Value::from("red")));
}

#[test]
fn fmt_with_separators() {
    let v = builtin(
        "fmt",
        vec![Value::Float(2f64.sqrt()), Value::Absent, Value::Int(10), Value::from(","), Value::from(":")],
    );
    assert_eq!(v, Ok(Value::from("1,4142135624")));
}

#[test]
fn dual_stream_stop_policies() {
    let streams = |policy: Option<StopPolicy>| {
        let mut s = Streams::primary(reader("a\nb\nc\n"));
        s.add(2, reader("1\n"));
        if let Some(p) = policy {
            s.set_policy(p).unwrap();
        }
        s
    };
    let src = "w1 1 select 2 w1 nw";
    assert_eq!(run_streams(src, streams(None)).unwrap(), "a 1\nb \nc \n");
    assert_eq!(run_streams(&format!("stop anyeof {src}"), streams(None)).unwrap(), "a 1\n");
    assert_eq!(run_streams(&format!("stop 2 {src}"), streams(None)).unwrap(), "a 1\n");
    assert_eq!(run_streams(&format!("stop alleof {src}"), streams(None)).unwrap(), "a 1\nb \nc \n");
    assert_eq!(
        run_streams(&format!("stop matcheof {src}"), streams(Some(StopPolicy::MatchEof))),
        Err(RuntimeError::StreamMismatch(2))
    );
}

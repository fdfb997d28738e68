use std::io::Write;
use std::process::{Command, Output, Stdio};

use tempfile::{tempdir, NamedTempFile};

fn specs() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_specs"));
    cmd.arg("--no-config").env_remove("RUST_LOG").env_remove("SPECSPATH");
    cmd
}

fn run_with_stdin(cmd: &mut Command, input: &str) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn specs");
    child.stdin.take().unwrap().write_all(input.as_bytes()).unwrap();
    child.wait_with_output().unwrap()
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

#[test]
fn literal_without_input() {
    let out = run_with_stdin(specs().arg("hello 1"), "");
    assert!(out.status.success());
    assert_eq!(stdout(&out), "hello\n");
}

#[test]
fn words_from_separate_arguments() {
    let out = run_with_stdin(specs().args(["w2", "1", "w1", "nw"]), "alpha beta\ngamma delta\n");
    assert!(out.status.success());
    assert_eq!(stdout(&out), "beta alpha\ndelta gamma\n");
}

#[test]
fn program_from_file_and_input_file() {
    let mut prog = NamedTempFile::new().unwrap();
    writeln!(prog, "# sum the first words").unwrap();
    writeln!(prog, "a: w1 .").unwrap();
    writeln!(prog, "set '#0 += a'").unwrap();
    writeln!(prog, "EOF").unwrap();
    writeln!(prog, "print '#0' 1").unwrap();
    let mut input = NamedTempFile::new().unwrap();
    write!(input, "1 x\n2 y\n39 z\n").unwrap();

    let out = specs().arg("-f").arg(prog.path()).arg("-i").arg(input.path()).output().unwrap();
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "42\n");
}

#[test]
fn output_files_and_streams() {
    let dir = tempdir().unwrap();
    let main = dir.path().join("main.txt");
    let second = dir.path().join("second.txt");
    let mut cmd = specs();
    cmd.arg("-o").arg(&main).arg("--outputstream").arg(format!("2={}", second.display()));
    cmd.arg("w1 1 outstream 2 w2 1");
    let out = run_with_stdin(&mut cmd, "a b\nc d\n");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(std::fs::read_to_string(&main).unwrap(), "a\nc\n");
    assert_eq!(std::fs::read_to_string(&second).unwrap(), "b\nd\n");
}

#[test]
fn second_input_stream() {
    let mut other = NamedTempFile::new().unwrap();
    write!(other, "1\n2\n").unwrap();
    let mut cmd = specs();
    cmd.arg("--inputstream").arg(format!("2={}", other.path().display()));
    cmd.arg("w1 1 select second w1 nw");
    let out = run_with_stdin(&mut cmd, "a\nb\n");
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "a 1\nb 2\n");
}

#[test]
fn set_defines_literals() {
    let out = run_with_stdin(specs().args(["--set", "who=world", "print '@who' 1"]), "");
    assert!(out.status.success());
    assert_eq!(stdout(&out), "world\n");
}

#[test]
fn configuration_file() {
    let mut cfg = NamedTempFile::new().unwrap();
    writeln!(cfg, "greeting: /hi there/").unwrap();
    writeln!(cfg, "broken line").unwrap();
    let out = Command::new(env!("CARGO_BIN_EXE_specs"))
        .arg("--config")
        .arg(cfg.path())
        .arg("print '@greeting' 1")
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", stderr(&out));
    assert_eq!(stdout(&out), "hi there\n");
    assert!(stderr(&out).contains("line 2"), "{}", stderr(&out));
}

#[test]
fn parse_error_exits_with_one() {
    let out = run_with_stdin(specs().arg("if '1' then /x/ 1"), "");
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("not terminated by ENDIF"), "{}", stderr(&out));
}

#[test]
fn runtime_error_keeps_earlier_output() {
    let out = run_with_stdin(specs().arg("a: w1 . assert 'a < 3' w1 1"), "1\n2\n3\n4\n");
    assert_eq!(out.status.code(), Some(1));
    assert_eq!(stdout(&out), "1\n2\n");
    assert!(stderr(&out).contains("Assertion failed: a < 3"));
}

#[test]
fn missing_program_is_a_usage_error() {
    let out = run_with_stdin(&mut specs(), "");
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn unknown_option_is_a_usage_error() {
    let out = run_with_stdin(specs().arg("--bogus"), "");
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn verbose_logs_to_stderr() {
    let out = run_with_stdin(specs().args(["-v", "w1 1"]), "x\n");
    assert!(out.status.success());
    assert_eq!(stdout(&out), "x\n");
    assert!(stderr(&out).contains("program compiled"), "{}", stderr(&out));
}

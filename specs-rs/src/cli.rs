//! Command-line arguments and run setup.
//!
//! Usage:
//!   specs [OPTIONS] [SPEC]...
//!   specs [OPTIONS] -f <SPECFILE>

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::debug;

use crate::config::Config;
use crate::error::SpecsError;
use crate::external;
use crate::output::Outputs;
use crate::script::{compile_args, compile_program, Interpreter, Program};
use crate::stream::{Streams, MAX_STREAMS};

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default, Parser)]
#[command(name = "specs", version, about = "Column-oriented, record-at-a-time text processing")]
pub struct CliArgs {
    /// Program words.  A single argument is split at blanks.
    #[arg(value_name = "SPEC", conflicts_with = "specfile")]
    pub spec: Vec<String>,

    /// Read the program from a file.
    #[arg(short = 'f', long = "specfile", value_name = "PATH")]
    pub specfile: Option<PathBuf>,

    /// Primary input (default stdin).
    #[arg(short = 'i', long = "inputfile", value_name = "PATH")]
    pub inputfile: Option<PathBuf>,

    /// Additional input stream N (2..=8).
    #[arg(long = "inputstream", value_name = "N=PATH", value_parser = parse_stream_spec)]
    pub inputstreams: Vec<(usize, PathBuf)>,

    /// Primary output (default stdout).
    #[arg(short = 'o', long = "outputfile", value_name = "PATH")]
    pub outputfile: Option<PathBuf>,

    /// Additional output stream N (2..=8).
    #[arg(long = "outputstream", value_name = "N=PATH", value_parser = parse_stream_spec)]
    pub outputstreams: Vec<(usize, PathBuf)>,

    /// Define a configuration literal.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Alternate configuration file.
    #[arg(long = "config", value_name = "PATH", conflicts_with = "no_config")]
    pub config: Option<PathBuf>,

    /// Skip the configuration file.
    #[arg(long = "no-config")]
    pub no_config: bool,

    /// Read input even if the program references none.
    #[arg(long = "force-read-input")]
    pub force_read_input: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl CliArgs {
    /// `true` when neither program words nor a program file were given.
    pub fn missing_program(&self) -> bool {
        self.spec.is_empty() && self.specfile.is_none()
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `N=PATH` for `--inputstream` / `--outputstream`.
pub fn parse_stream_spec(s: &str) -> Result<(usize, PathBuf), String> {
    let (n, path) = s.split_once('=').ok_or_else(|| format!("expected N=PATH, got '{s}'"))?;
    let n: usize = n.parse().map_err(|_| format!("bad stream number '{n}'"))?;
    if !(2..=MAX_STREAMS).contains(&n) {
        return Err(format!("stream number must be 2 to {MAX_STREAMS}, got {n}"));
    }
    if path.is_empty() {
        return Err(format!("missing path for stream {n}"));
    }
    Ok((n, PathBuf::from(path)))
}

// ── Run setup ─────────────────────────────────────────────────────────────────

fn load_program(args: &CliArgs) -> Result<Program, SpecsError> {
    match &args.specfile {
        Some(path) => compile_program(&std::fs::read_to_string(path)?),
        None => compile_args(&args.spec),
    }
}

/// Configuration file (unless disabled) plus `--set` overrides.
pub fn load_config(args: &CliArgs) -> Result<Config, SpecsError> {
    let mut config = if args.no_config { Config::builtin() } else { Config::load(args.config.as_deref())? };
    for spec in &args.set {
        config.apply_override(spec)?;
    }
    Ok(config)
}

fn open_input(path: &Path) -> io::Result<Box<dyn io::BufRead>> {
    Ok(Box::new(BufReader::new(File::open(path)?)))
}

fn create_output(path: &Path) -> io::Result<Box<dyn Write>> {
    Ok(Box::new(BufWriter::new(File::create(path)?)))
}

fn open_streams(args: &CliArgs) -> Result<(Streams, Outputs), SpecsError> {
    let primary: Box<dyn io::BufRead> = match &args.inputfile {
        Some(path) => open_input(path)?,
        None => Box::new(io::stdin().lock()),
    };
    let mut streams = Streams::primary(primary);
    for (n, path) in &args.inputstreams {
        streams.add(*n, open_input(path)?);
    }

    let stdout: Box<dyn Write> = match &args.outputfile {
        Some(path) => create_output(path)?,
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let mut outputs = Outputs::new(stdout, Box::new(io::stderr()));
    for (n, path) in &args.outputstreams {
        outputs.add(*n, create_output(path)?);
    }
    Ok((streams, outputs))
}

/// Compile the program and run it over the configured streams.
pub fn run(args: &CliArgs) -> Result<(), SpecsError> {
    let program = load_program(args)?;
    let config = load_config(args)?;
    let external = external::load(&config);
    let (streams, outputs) = open_streams(args)?;
    debug!(
        inputs = args.inputstreams.len() + 1,
        outputs = args.outputstreams.len() + 1,
        external = external.is_some(),
        "starting run"
    );

    let mut interp = Interpreter::new(program, streams, outputs)
        .with_config(config)
        .force_read_input(args.force_read_input);
    if let Some(ext) = external {
        interp = interp.with_external(ext);
    }
    interp.run()?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

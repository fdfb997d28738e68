//! Configuration literals.
//!
//! Literals come from `~/.specs` (or a file named on the command line) and
//! from `--set KEY=VALUE` overrides.  The file holds one literal per line:
//!
//! | Line | Meaning |
//! |------|---------|
//! | `name: value` | literal `name` with a one-word value |
//! | `name: /some text/` | value delimited by `/`, `"` or `'` |
//! | `# …` | comment, ignored |
//! | blank | ignored |
//!
//! Malformed lines are reported and skipped; they never stop a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use thiserror::Error;
use tracing::{debug, warn};

/// File name looked up in the home directory.
pub const CONFIG_FILE_NAME: &str = ".specs";

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A line of a configuration file that could not be used.
    #[error("line {line}: {message}")]
    Line { line: usize, message: String },

    #[error("cannot read configuration file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("--set expects KEY=VALUE, got '{0}'")]
    BadOverride(String),
}

// ── Config ────────────────────────────────────────────────────────────────────

/// Immutable name → literal map, consulted by `@name` and `conf()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    literals: BTreeMap<String, String>,
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn is_value_delimiter(c: char) -> bool {
    matches!(c, '/' | '"' | '\'')
}

/// Parse one non-comment line into `(key, value)`.
fn parse_line(line: &str) -> Result<(String, String), String> {
    let line = line.trim_start_matches(is_blank);
    let Some((key, rest)) = line.split_once(is_blank) else {
        return Err("Key extends to end of line.".into());
    };
    let rest = rest.trim_start_matches(is_blank);
    let Some(first) = rest.chars().next() else {
        return Err("No value found".into());
    };
    let Some(key) = key.strip_suffix(':').filter(|k| !k.is_empty()) else {
        return Err(format!("Key '{key}' must end with ':'"));
    };
    let value = if is_value_delimiter(first) {
        let body = &rest[first.len_utf8()..];
        match body.find(first) {
            Some(end) => body[..end].to_owned(),
            None => return Err("Delimited value not terminated.".into()),
        }
    } else {
        rest.split(is_blank).next().unwrap_or_default().to_owned()
    };
    Ok((key.to_owned(), value))
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration holding only the built-in literals.
    pub fn builtin() -> Self {
        let mut config = Config::new();
        config.add_builtins();
        config
    }

    fn add_builtins(&mut self) {
        self.literals.insert("version".into(), crate::VERSION.into());
    }

    /// Parse configuration text.  Returns the literals that could be read
    /// and the errors for the lines that could not.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let line = raw.trim_start_matches(is_blank);
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Ok((key, value)) => {
                    config.literals.insert(key, value);
                }
                Err(message) => errors.push(ConfigError::Line { line: i + 1, message }),
            }
        }

        config.add_builtins();
        (config, errors)
    }

    /// Read and parse a configuration file.
    pub fn load_file(path: &Path) -> Result<(Self, Vec<ConfigError>), ConfigError> {
        let s = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        Ok(Self::load_str(&s))
    }

    /// `~/.specs`, when a home directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.home_dir().join(CONFIG_FILE_NAME))
    }

    /// Load `path`, or the default file when `path` is `None`.  A missing
    /// default file is not an error; a missing explicit file is.  Line
    /// errors are logged and skipped.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, errors) = match path {
            Some(p) => Self::load_file(p)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(p) => Self::load_file(&p)?,
                None => {
                    debug!("no configuration file");
                    return Ok(Self::builtin());
                }
            },
        };
        for e in &errors {
            warn!("Invalid configuration file line: {e}");
        }
        debug!(literals = config.literals.len(), "configuration loaded");
        Ok(config)
    }

    /// Apply a `KEY=VALUE` override.
    pub fn apply_override(&mut self, spec: &str) -> Result<(), ConfigError> {
        match spec.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                self.set(key, value);
                Ok(())
            }
            _ => Err(ConfigError::BadOverride(spec.to_owned())),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.literals.insert(key.into(), value.into());
    }

    /// Look a literal up.  An empty value counts as undefined.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.literals.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

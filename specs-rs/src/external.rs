//! Functions supplied from outside the ALU.
//!
//! When an expression calls a name the ALU does not know, the interpreter
//! hands the call to an [`ExternalFunctions`] implementation.  The `python`
//! and `lua` features provide engines that load `localfuncs.py` or
//! `localfuncs.lua`; [`LocalFuncs`] is a plain-Rust table used by embedders
//! and tests.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::warn;

use crate::config::Config;
use crate::error::{RtResult, RuntimeError};
use crate::script::Value;

/// Environment variable naming the directory that holds local functions.
pub const SPECSPATH: &str = "SPECSPATH";

/// Diagnostic for an engine that could not load its function file.
pub const LOAD_ERROR: &str = "error loading local functions";

pub trait ExternalFunctions {
    /// Call `name`.  Unknown names yield [`RuntimeError::UnknownFunction`].
    fn call(&mut self, name: &str, args: &[Value]) -> RtResult<Value>;
}

/// Error for a function that failed inside its engine.
pub fn call_error(name: &str, detail: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::External(format!("error in external function {name}: {detail}"))
}

/// Error for an engine whose function file failed to load.
pub fn load_error(detail: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::External(format!("{LOAD_ERROR}: {detail}"))
}

/// Where to find the function file `file_name`: the configuration literal
/// `literal` if set, otherwise `$SPECSPATH/file_name`.
pub fn locate(config: &Config, literal: &str, file_name: &str) -> Option<PathBuf> {
    if let Some(path) = config.get(literal) {
        return Some(PathBuf::from(path));
    }
    std::env::var_os(SPECSPATH).map(|dir| PathBuf::from(dir).join(file_name))
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load the function file of the engine compiled into this build, if one is
/// configured and present.  A file named by a configuration literal must
/// exist; one looked up in `SPECSPATH` is optional.
///
/// A file that fails to load does not stop the run: the failure is kept in
/// a [`FailedLoad`] and reported by the first call that reaches it.
pub fn load(config: &Config) -> Option<Box<dyn ExternalFunctions>> {
    let loaded = match load_python(config) {
        Ok(None) => load_lua(config),
        other => other,
    };
    match loaded {
        Ok(funcs) => funcs,
        Err(error) => {
            warn!(%error, "local functions unavailable");
            Some(Box::new(FailedLoad::new(error)))
        }
    }
}

#[cfg(feature = "python")]
fn load_python(config: &Config) -> RtResult<Option<Box<dyn ExternalFunctions>>> {
    use crate::python::{PythonFuncs, PYTHON_FUNCS_FILE};
    match find(config, "pythonFuncs", PYTHON_FUNCS_FILE) {
        Some(path) => Ok(Some(Box::new(PythonFuncs::load(&path)?))),
        None => Ok(None),
    }
}

#[cfg(not(feature = "python"))]
fn load_python(_config: &Config) -> RtResult<Option<Box<dyn ExternalFunctions>>> {
    Ok(None)
}

#[cfg(feature = "lua")]
fn load_lua(config: &Config) -> RtResult<Option<Box<dyn ExternalFunctions>>> {
    use crate::lua::{LuaFuncs, LUA_FUNCS_FILE};
    match find(config, "luaFuncs", LUA_FUNCS_FILE) {
        Some(path) => Ok(Some(Box::new(LuaFuncs::load(&path)?))),
        None => Ok(None),
    }
}

#[cfg(not(feature = "lua"))]
fn load_lua(_config: &Config) -> RtResult<Option<Box<dyn ExternalFunctions>>> {
    Ok(None)
}

#[cfg_attr(not(any(feature = "python", feature = "lua")), allow(dead_code))]
fn find(config: &Config, literal: &str, file_name: &str) -> Option<PathBuf> {
    let explicit = config.get(literal).is_some();
    locate(config, literal, file_name).filter(|p| explicit || p.is_file())
}

/// Stands in for an engine whose function file did not load.
#[derive(Debug, Clone)]
pub struct FailedLoad {
    error: RuntimeError,
}

impl FailedLoad {
    pub fn new(error: RuntimeError) -> Self {
        FailedLoad { error }
    }
}

impl ExternalFunctions for FailedLoad {
    fn call(&mut self, _name: &str, _args: &[Value]) -> RtResult<Value> {
        Err(self.error.clone())
    }
}

// ── LocalFuncs ────────────────────────────────────────────────────────────────

type LocalFn = Box<dyn FnMut(&[Value]) -> RtResult<Value>>;

/// External functions registered as Rust closures.
#[derive(Default)]
pub struct LocalFuncs {
    funcs: HashMap<String, LocalFn>,
}

impl LocalFuncs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        f: impl FnMut(&[Value]) -> RtResult<Value> + 'static,
    ) -> &mut Self {
        self.funcs.insert(name.into(), Box::new(f));
        self
    }
}

impl ExternalFunctions for LocalFuncs {
    fn call(&mut self, name: &str, args: &[Value]) -> RtResult<Value> {
        match self.funcs.get_mut(name) {
            Some(f) => f(args).map_err(|e| call_error(name, e)),
            None => Err(RuntimeError::UnknownFunction(name.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_functions_are_called() {
        let mut funcs = LocalFuncs::new();
        funcs.register("twice", |args| args[0].arith_mul(&Value::Int(2)));
        assert_eq!(funcs.call("twice", &[Value::Int(21)]), Ok(Value::Int(42)));
        assert_eq!(
            funcs.call("nope", &[]),
            Err(RuntimeError::UnknownFunction("nope".into()))
        );
    }

    #[test]
    fn failures_are_wrapped() {
        let mut funcs = LocalFuncs::new();
        funcs.register("boom", |_| Err(RuntimeError::DivisionByZero));
        let err = funcs.call("boom", &[]).unwrap_err();
        assert_eq!(err.to_string(), "error in external function boom: Division by zero");
    }

    #[test]
    fn nothing_configured_loads_nothing() {
        let cfg = Config::new();
        if std::env::var_os(SPECSPATH).is_none() {
            assert!(load(&cfg).is_none());
        }
    }

    #[test]
    fn failed_load_reports_on_call() {
        let mut funcs = FailedLoad::new(load_error("/nowhere/localfuncs.py: not found"));
        let err = funcs.call("anything", &[Value::Int(1)]).unwrap_err();
        assert!(err.to_string().starts_with(LOAD_ERROR), "{err}");
    }

    #[cfg(any(feature = "python", feature = "lua"))]
    #[test]
    fn missing_configured_file_is_deferred() {
        let mut cfg = Config::new();
        cfg.set("pythonFuncs", "/nonexistent/localfuncs.py");
        cfg.set("luaFuncs", "/nonexistent/localfuncs.lua");
        let mut funcs = load(&cfg).expect("a stand-in for the failed engine");
        let err = funcs.call("triple", &[Value::Int(1)]).unwrap_err();
        assert!(err.to_string().starts_with(LOAD_ERROR), "{err}");
    }

    #[test]
    fn literal_overrides_specspath() {
        let mut cfg = Config::new();
        cfg.set("pythonFuncs", "/opt/f.py");
        assert_eq!(locate(&cfg, "pythonFuncs", "localfuncs.py"), Some(PathBuf::from("/opt/f.py")));
    }
}

//! External functions written in Python, via the `pyo3` crate.
//!
//! Enabled with the `python` Cargo feature:
//! ```text
//! cargo build --features python
//! cargo test  --features python
//! ```
//!
//! The function file (`localfuncs.py`) is compiled into its own module.
//! Every callable at its top level becomes an ALU function:
//!
//! | Python value      | ALU value      |
//! |-------------------|----------------|
//! | `int`, `bool`     | integer        |
//! | `float`           | real           |
//! | `str`             | text           |
//! | `None`            | absent         |
//! | anything else     | its `str()`    |

#[cfg(feature = "python")]
pub use python_impl::PythonFuncs;

/// Name of the function file looked up in `SPECSPATH`.
pub const PYTHON_FUNCS_FILE: &str = "localfuncs.py";

#[cfg(feature = "python")]
mod python_impl {
    use std::path::Path;
    use std::sync::OnceLock;

    use pyo3::prelude::*;
    use pyo3::types::{PyModule, PyTuple};
    use tracing::debug;

    use crate::error::{RtResult, RuntimeError};
    use crate::external::{call_error, load_error, ExternalFunctions};
    use crate::script::Value;

    static PYTHON_INIT: OnceLock<()> = OnceLock::new();

    // ── Conversions ───────────────────────────────────────────────────────

    fn to_py(py: Python<'_>, v: &Value) -> PyObject {
        match v {
            Value::Int(n) => n.into_py(py),
            Value::Float(x) => x.into_py(py),
            Value::Str(s) => s.into_py(py),
            Value::Absent => py.None(),
        }
    }

    fn from_py(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
        if obj.is_none() {
            return Ok(Value::Absent);
        }
        if let Ok(n) = obj.extract::<i64>() {
            return Ok(Value::Int(n));
        }
        if let Ok(x) = obj.extract::<f64>() {
            return Ok(Value::Float(x));
        }
        if let Ok(s) = obj.extract::<String>() {
            return Ok(Value::Str(s));
        }
        Ok(Value::Str(obj.str()?.to_string()))
    }

    // ── PythonFuncs ───────────────────────────────────────────────────────

    /// A loaded Python function module.
    pub struct PythonFuncs {
        module: Py<PyModule>,
    }

    impl PythonFuncs {
        /// Compile `code` as the function module.
        pub fn from_source(code: &str, file_name: &str) -> RtResult<Self> {
            // CPython is initialised at most once per process.
            PYTHON_INIT.get_or_init(pyo3::prepare_freethreaded_python);
            Python::with_gil(|py| {
                PyModule::from_code_bound(py, code, file_name, "localfuncs")
                    .map(|m| PythonFuncs { module: m.unbind() })
                    .map_err(load_error)
            })
        }

        /// Load the function file at `path`.
        pub fn load(path: &Path) -> RtResult<Self> {
            let code = std::fs::read_to_string(path)
                .map_err(|e| load_error(format!("{}: {e}", path.display())))?;
            let funcs = Self::from_source(&code, &path.to_string_lossy())?;
            debug!(path = %path.display(), "python functions loaded");
            Ok(funcs)
        }
    }

    impl ExternalFunctions for PythonFuncs {
        fn call(&mut self, name: &str, args: &[Value]) -> RtResult<Value> {
            Python::with_gil(|py| {
                let module = self.module.bind(py);
                let func = match module.getattr(name) {
                    Ok(f) if f.is_callable() => f,
                    _ => return Err(RuntimeError::UnknownFunction(name.to_owned())),
                };
                let args = PyTuple::new_bound(py, args.iter().map(|v| to_py(py, v)));
                func.call1(args)
                    .and_then(|r| from_py(&r))
                    .map_err(|e| call_error(name, e))
            })
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(all(test, feature = "python"))]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use super::python_impl::*;
    use crate::error::RuntimeError;
    use crate::external::ExternalFunctions;
    use crate::script::Value;

    // Tests share one embedded interpreter; run them one at a time.
    static TEST_MX: Mutex<()> = Mutex::new(());

    const SOURCE: &str = "\
def double(x):
    return x * 2

def greet(name):
    return 'hello ' + name

def half(x):
    return x / 2

def nothing():
    return None

def boom():
    raise ValueError('bad')

NOT_A_FUNCTION = 3
";

    fn funcs() -> PythonFuncs {
        PythonFuncs::from_source(SOURCE, "localfuncs.py").unwrap()
    }

    #[test]
    fn calls_return_alu_values() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let mut f = funcs();
        assert_eq!(f.call("double", &[Value::Int(21)]), Ok(Value::Int(42)));
        assert_eq!(f.call("greet", &[Value::from("you")]), Ok(Value::from("hello you")));
        assert_eq!(f.call("half", &[Value::Int(3)]), Ok(Value::Float(1.5)));
        assert_eq!(f.call("nothing", &[]), Ok(Value::Absent));
    }

    #[test]
    fn unknown_and_non_callable_names() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let mut f = funcs();
        assert_eq!(f.call("missing", &[]), Err(RuntimeError::UnknownFunction("missing".into())));
        assert_eq!(
            f.call("NOT_A_FUNCTION", &[]),
            Err(RuntimeError::UnknownFunction("NOT_A_FUNCTION".into()))
        );
    }

    #[test]
    fn raised_exception_is_reported() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let err = funcs().call("boom", &[]).unwrap_err().to_string();
        assert!(err.starts_with("error in external function boom"), "{err}");
    }

    #[test]
    fn syntax_error_fails_to_load() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let Err(err) = PythonFuncs::from_source("def broken(:\n", "bad.py") else {
            panic!("expected a load error");
        };
        assert!(err.to_string().starts_with("error loading local functions"));
    }

    #[test]
    fn load_reads_file() {
        let _g = TEST_MX.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{SOURCE}").unwrap();
        let mut f = PythonFuncs::load(file.path()).unwrap();
        assert_eq!(f.call("double", &[Value::from("4")]), Ok(Value::from("44")));
    }
}

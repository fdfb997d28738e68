//! External functions written in Lua 5.4, via the `mlua` crate.
//!
//! Enabled with the `lua` Cargo feature:
//! ```text
//! cargo build --features lua
//! cargo test  --features lua
//! ```
//!
//! The function file (`localfuncs.lua`) runs once in a fresh Lua state; each
//! global function it defines becomes an ALU function.  Integers, numbers
//! and strings map to the ALU's integer, real and text values, `nil` to
//! absent, and booleans to 1 or 0.

#[cfg(feature = "lua")]
pub use lua_impl::LuaFuncs;

/// Name of the function file looked up in `SPECSPATH`.
pub const LUA_FUNCS_FILE: &str = "localfuncs.lua";

#[cfg(feature = "lua")]
mod lua_impl {
    use std::path::Path;

    use mlua::prelude::*;
    use tracing::debug;

    use crate::error::{RtResult, RuntimeError};
    use crate::external::{call_error, load_error, ExternalFunctions};
    use crate::script::Value;

    fn to_lua(lua: &Lua, v: &Value) -> LuaResult<LuaValue> {
        Ok(match v {
            Value::Int(n) => LuaValue::Integer(*n),
            Value::Float(x) => LuaValue::Number(*x),
            Value::Str(s) => LuaValue::String(lua.create_string(s)?),
            Value::Absent => LuaValue::Nil,
        })
    }

    fn from_lua(v: LuaValue) -> LuaResult<Value> {
        Ok(match v {
            LuaValue::Nil => Value::Absent,
            LuaValue::Boolean(b) => Value::from(b),
            LuaValue::Integer(n) => Value::Int(n),
            LuaValue::Number(x) => Value::Float(x),
            LuaValue::String(s) => Value::Str((*s.to_str()?).to_owned()),
            other => {
                return Err(LuaError::runtime(format!("cannot return a {} value", other.type_name())))
            }
        })
    }

    /// A Lua state holding the loaded functions.
    pub struct LuaFuncs {
        lua: Lua,
    }

    impl LuaFuncs {
        /// Run `code` as the function file.
        pub fn from_source(code: &str, chunk_name: &str) -> RtResult<Self> {
            let lua = Lua::new();
            lua.load(code).set_name(chunk_name).exec().map_err(load_error)?;
            Ok(LuaFuncs { lua })
        }

        /// Load the function file at `path`.
        pub fn load(path: &Path) -> RtResult<Self> {
            let code = std::fs::read_to_string(path)
                .map_err(|e| load_error(format!("{}: {e}", path.display())))?;
            let funcs = Self::from_source(&code, &path.to_string_lossy())?;
            debug!(path = %path.display(), "lua functions loaded");
            Ok(funcs)
        }
    }

    impl ExternalFunctions for LuaFuncs {
        fn call(&mut self, name: &str, args: &[Value]) -> RtResult<Value> {
            let func = match self.lua.globals().get::<LuaValue>(name) {
                Ok(LuaValue::Function(f)) => f,
                _ => return Err(RuntimeError::UnknownFunction(name.to_owned())),
            };
            let lua_args = args
                .iter()
                .map(|v| to_lua(&self.lua, v))
                .collect::<LuaResult<LuaMultiValue>>()
                .map_err(|e| call_error(name, e))?;
            func.call::<LuaValue>(lua_args)
                .and_then(from_lua)
                .map_err(|e| call_error(name, e))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────

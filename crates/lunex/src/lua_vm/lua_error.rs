// Error plumbing. A raised Lua error carries its original error value
// (any LuaValue) plus a captured stack for traceback rendering. Yield is a
// control signal that travels the same channel but is never catchable.

use std::fmt;

use crate::lua_value::LuaValue;

pub type LuaResult<T> = Result<T, LuaError>;

pub enum LuaError {
    Runtime(Box<RuntimeError>),
    /// coroutine.yield in flight; carries the transfer values
    Yield(Vec<LuaValue>),
}

pub struct RuntimeError {
    pub value: LuaValue,
    pub traceback: Option<Traceback>,
}

#[derive(Clone, Default)]
pub struct Traceback {
    pub entries: Vec<TraceEntry>,
}

#[derive(Clone)]
pub struct TraceEntry {
    /// raw chunk name (render with `short_source`)
    pub source: String,
    pub line: u32,
    /// where the function was defined, for anonymous frames
    pub def_line: u32,
    pub name: Option<String>,
    pub role: FrameRole,
    pub is_tail: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FrameRole {
    /// top-level chunk
    Main,
    Function,
    /// frame running a __close or other metamethod
    Metamethod,
    /// debug hook invocation
    Hook,
    /// native (Rust) function
    Native,
    /// saved coroutine frame referenced through an upvalue
    Upvalue,
}

impl LuaError {
    pub fn runtime(value: LuaValue) -> Self {
        LuaError::Runtime(Box::new(RuntimeError {
            value,
            traceback: None,
        }))
    }

    pub fn with_traceback(value: LuaValue, traceback: Traceback) -> Self {
        LuaError::Runtime(Box::new(RuntimeError {
            value,
            traceback: Some(traceback),
        }))
    }

    /// Plain string error without position information.
    pub fn msg(message: impl Into<String>) -> Self {
        LuaError::runtime(LuaValue::string(message.into()))
    }

    pub fn is_yield(&self) -> bool {
        matches!(self, LuaError::Yield(_))
    }

    /// The Lua-visible error value. Yield has none.
    pub fn value(&self) -> LuaValue {
        match self {
            LuaError::Runtime(e) => e.value.clone(),
            LuaError::Yield(_) => LuaValue::Nil,
        }
    }
}

impl fmt::Display for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaError::Runtime(e) => f.write_str(&display_error_value(&e.value)),
            LuaError::Yield(_) => f.write_str("yield"),
        }
    }
}

impl fmt::Debug for LuaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LuaError({})", self)
    }
}

/// Display projection of an error value: strings and numbers render
/// directly, anything else by type.
pub fn display_error_value(value: &LuaValue) -> String {
    match value {
        LuaValue::String(s) => s.as_str_lossy().into_owned(),
        LuaValue::Integer(_) | LuaValue::Float(_) => value.to_string(),
        other => format!("(error object is a {} value)", other.type_name()),
    }
}

/// Render a chunk name the way error messages expect: `@file` strips to the
/// path, `=name` is verbatim, anything else becomes a quoted excerpt
/// truncated to 15 characters.
pub fn short_source(source: &str) -> String {
    if let Some(rest) = source.strip_prefix('@') {
        return rest.to_string();
    }
    if let Some(rest) = source.strip_prefix('=') {
        return rest.to_string();
    }
    let first_line = source.lines().next().unwrap_or("");
    let one_line = source.lines().nth(1).is_none();
    if one_line && first_line.chars().count() <= 15 {
        format!("[string \"{}\"]", first_line)
    } else {
        let excerpt: String = first_line.chars().take(15).collect();
        format!("[string \"{}...\"]", excerpt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_source() {
        assert_eq!(short_source("@foo.lua"), "foo.lua");
        assert_eq!(short_source("=stdin"), "stdin");
        assert_eq!(short_source("return 1"), "[string \"return 1\"]");
        assert_eq!(
            short_source("local x = 1 + 2 + 3"),
            "[string \"local x = 1 + 2...\"]"
        );
    }

    #[test]
    fn test_error_value_projection() {
        assert_eq!(display_error_value(&LuaValue::string("boom")), "boom");
        assert_eq!(display_error_value(&LuaValue::Integer(4)), "4");
        assert!(display_error_value(&LuaValue::Boolean(true)).contains("boolean"));
    }
}

// Behavioral tests: full Lua sources through the compiler and VM.

mod test_closures;
mod test_coroutine;
mod test_close;
mod test_debug;
mod test_dump;
mod test_errors;
mod test_functions;
mod test_lexer;
mod test_metamethods;
mod test_operators;
mod test_pattern;
mod test_stdlib;
mod test_string;
mod test_syntax;

use crate::lua_value::LuaValue;
use crate::lua_vm::LuaVM;

/// Run a chunk on a fresh VM with the standard libraries open; panics
/// with the rendered error on failure.
pub(crate) fn run(source: &str) -> Vec<LuaValue> {
    let mut vm = LuaVM::new();
    vm.open_libs();
    match vm.execute(source) {
        Ok(vals) => vals,
        Err(e) => panic!("script failed: {}", vm.render_error(&e)),
    }
}

/// Run a chunk expected to fail; returns the error's display message.
pub(crate) fn run_err(source: &str) -> String {
    let mut vm = LuaVM::new();
    vm.open_libs();
    match vm.execute(source) {
        Ok(_) => panic!("script unexpectedly succeeded"),
        Err(e) => e.to_string(),
    }
}

pub(crate) fn first(source: &str) -> LuaValue {
    run(source).into_iter().next().unwrap_or(LuaValue::Nil)
}

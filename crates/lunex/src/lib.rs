// Lua 5.4 Runtime
// A compact Lua VM implementation with bytecode compiler and cooperative coroutines

#[cfg(test)]
mod test;

pub mod compiler;
pub mod lib_registry;
pub mod lua_value;
pub mod lua_vm;
pub mod stdlib;

pub use compiler::Compiler;
pub use lib_registry::LibraryRegistry;
pub use lua_value::{LuaFunction, LuaString, LuaTable, LuaValue, Proto};
pub use lua_vm::{Instruction, LuaError, LuaResult, LuaVM, OpCode, VmOptions};

/// Main entry point for executing Lua code
pub fn execute(source: &str) -> LuaResult<Vec<LuaValue>> {
    let mut vm = LuaVM::new();
    vm.open_libs();
    vm.execute(source)
}

/// Execute Lua code with a custom VM instance
pub fn execute_with_vm(vm: &mut LuaVM, source: &str) -> LuaResult<Vec<LuaValue>> {
    vm.execute(source)
}

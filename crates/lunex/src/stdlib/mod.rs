// Standard library assembly.

pub mod basic;
pub mod coroutine;
pub mod debug;
pub mod io;
pub mod math;
pub mod os;
pub mod package;
pub mod string;
pub mod table;

use crate::lua_vm::LuaVM;

/// Install every standard library into the VM.
pub fn open_libs(vm: &mut LuaVM) {
    basic::open(vm);
    string::open(vm);
    table::open(vm);
    math::open(vm);
    os::open(vm);
    io::open(vm);
    coroutine::open(vm);
    debug::open(vm);
    package::open(vm);

    let version = vm.new_string("Lua 5.4");
    vm.set_global("_VERSION", version);
}

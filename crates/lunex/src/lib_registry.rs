// Library registration: a clean way to expose Rust functions as Lua
// library tables.

use crate::lua_value::{LuaFunction, LuaTable, LuaValue};
use crate::lua_vm::{CFunction, LuaVM};

/// A library module containing named native functions.
pub struct LibraryModule {
    pub name: &'static str,
    pub functions: Vec<(&'static str, CFunction)>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            functions: Vec::new(),
        }
    }
}

/// Builder for library modules:
/// `lib_module!("string", { "len" => str_len, ... })`.
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($func_name:expr => $func:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.functions.push(($func_name, $func));
        )*
        module
    }};
}

pub struct LibraryRegistry {
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    /// Install every registered module into the VM's globals. Functions of
    /// the pseudo-module `_G` land directly in the globals table; other
    /// modules get a table under their name. Returns nothing useful but
    /// keeps registration order deterministic.
    pub fn load_all(&self, vm: &mut LuaVM) {
        for module in &self.modules {
            load_module(vm, module);
        }
    }
}

impl Default for LibraryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn load_module(vm: &mut LuaVM, module: &LibraryModule) -> LuaValue {
    if module.name == "_G" {
        for (name, func) in &module.functions {
            let value = LuaValue::function(LuaFunction::native(*name, *func));
            vm.set_global(name, value);
        }
        return LuaValue::Table(vm.globals());
    }
    let table = LuaTable::new();
    let table_value = LuaValue::table(table);
    if let LuaValue::Table(t) = &table_value {
        for (name, func) in &module.functions {
            let key = vm.new_string(*name);
            let value = LuaValue::function(LuaFunction::native(*name, *func));
            let _ = t.borrow_mut().raw_set(key, value);
        }
    }
    vm.set_global(module.name, table_value.clone());
    table_value
}

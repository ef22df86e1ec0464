// Package library: require over the filesystem protocol, with the usual
// loaded/preload tables and searchpath.

use std::rc::Rc;

use crate::lib_registry;
use crate::lua_value::{LuaTable, LuaValue};
use crate::lua_vm::{LuaResult, LuaVM, NativeReturn};

const DEFAULT_PATH: &str = "./?.lua;./?/init.lua";

pub fn open(vm: &mut LuaVM) {
    let module = crate::lib_module!("package", {
        "searchpath" => pkg_searchpath,
    });
    let table = lib_registry::load_module(vm, &module);
    if let LuaValue::Table(t) = &table {
        let mut set = |vm: &mut LuaVM, name: &str, v: LuaValue| {
            let key = vm.new_string(name);
            let _ = t.borrow_mut().raw_set(key, v);
        };
        let path = vm.new_string(DEFAULT_PATH);
        set(vm, "path", path);
        let cpath = vm.new_string("");
        set(vm, "cpath", cpath);
        // the five package.config lines: dirsep, pathsep, placeholder,
        // executable placeholder, ignore mark
        let config = vm.new_string("/\n;\n?\n!\n-\n");
        set(vm, "config", config);
        set(vm, "loaded", LuaValue::table(LuaTable::new()));
        set(vm, "preload", LuaValue::table(LuaTable::new()));
    }
    // require is a global closing over the package table
    let module = crate::lib_module!("_G", {
        "require" => pkg_require,
    });
    lib_registry::load_module(vm, &module);
}

fn package_field(vm: &mut LuaVM, field: &str) -> LuaValue {
    let pkg = vm.get_global("package");
    match pkg.as_table() {
        Some(t) => t.borrow().raw_get_str(field),
        None => LuaValue::Nil,
    }
}

/// Expand `?` in every template of `path` and return the first file the
/// filesystem reports as existing.
fn search_path(vm: &mut LuaVM, name: &str, path: &str, sep: &str) -> Result<String, String> {
    let fs = Rc::clone(&vm.fs);
    let file_name = name.replace(sep, "/");
    let mut tried = Vec::new();
    for template in path.split(';') {
        if template.is_empty() {
            continue;
        }
        let candidate = template.replace('?', &file_name);
        if fs.exists(&candidate) {
            return Ok(candidate);
        }
        tried.push(format!("no file '{}'", candidate));
    }
    Err(tried.join("\n\t"))
}

fn pkg_searchpath(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let name = vm.check_string(1)?.as_str_lossy().into_owned();
    let path = vm.check_string(2)?.as_str_lossy().into_owned();
    let sep = vm.opt_string(3, ".")?.as_str_lossy().into_owned();
    match search_path(vm, &name, &path, &sep) {
        Ok(found) => Ok(NativeReturn::one(vm.new_string(found))),
        Err(tried) => Ok(NativeReturn::Values(vec![
            LuaValue::Nil,
            vm.new_string(format!("\n\t{}", tried)),
        ])),
    }
}

fn pkg_require(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let name = vm.check_string(1)?.as_str_lossy().into_owned();
    let loaded = match package_field(vm, "loaded").as_table() {
        Some(t) => t,
        None => return Err(vm.error_plain("'package.loaded' is not a table")),
    };
    let key = vm.new_string(&name);
    let cached = loaded.borrow().raw_get(&key);
    if !cached.is_nil() {
        return Ok(NativeReturn::one(cached));
    }

    // package.preload wins over the file search
    let preload = package_field(vm, "preload");
    let loader = match preload.as_table() {
        Some(t) => t.borrow().raw_get(&key),
        None => LuaValue::Nil,
    };
    let (loader, loader_arg) = if loader.is_nil() {
        let path = match package_field(vm, "path").as_lua_string() {
            Some(s) => s.as_str_lossy().into_owned(),
            None => DEFAULT_PATH.to_string(),
        };
        let found = match search_path(vm, &name, &path, ".") {
            Ok(found) => found,
            Err(tried) => {
                return Err(vm.error_plain(format!(
                    "module '{}' not found:\n\t{}",
                    name, tried
                )));
            }
        };
        let fs = Rc::clone(&vm.fs);
        let bytes = fs
            .read(&found)
            .map_err(|e| vm.error_plain(format!("error loading module '{}': {}", name, e)))?;
        let chunk_name = format!("@{}", found);
        let closure = crate::stdlib::basic::load_chunk(vm, &bytes, &chunk_name, "bt", None)
            .map_err(|e| vm.error_plain(e))?;
        (closure, vm.new_string(found))
    } else {
        (loader, vm.new_string(&name))
    };

    let name_arg = vm.new_string(&name);
    let results = vm.call_value(loader, vec![name_arg, loader_arg])?;
    let value = results.into_iter().next().unwrap_or(LuaValue::Nil);
    let value = if value.is_nil() {
        LuaValue::Boolean(true)
    } else {
        value
    };
    let _ = loaded.borrow_mut().raw_set(key, value.clone());
    Ok(NativeReturn::one(value))
}

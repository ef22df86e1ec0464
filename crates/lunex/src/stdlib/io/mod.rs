// IO library over a narrow filesystem protocol, so hosts can substitute
// their own storage.

pub mod file;

use std::io::Write as _;
use std::rc::Rc;

use crate::lib_registry;
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaResult, LuaVM, NativeReturn};

/// What the io library needs from the host.
pub trait LuaFs {
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Result<Vec<u8>, String>;
    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), String>;
}

/// Default implementation over std::fs.
pub struct RealFs;

impl LuaFs for RealFs {
    fn exists(&self, path: &str) -> bool {
        std::path::Path::new(path).exists()
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, String> {
        std::fs::read(path).map_err(|e| e.to_string())
    }

    fn write(&self, path: &str, bytes: &[u8]) -> Result<(), String> {
        std::fs::write(path, bytes).map_err(|e| e.to_string())
    }
}

pub fn open(vm: &mut LuaVM) {
    let module = crate::lib_module!("io", {
        "open" => io_open,
        "lines" => io_lines,
        "read" => io_read,
        "write" => io_write,
    });
    lib_registry::load_module(vm, &module);
    file::install_handle_metatable(vm);
}

fn io_open(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let path = vm.check_string(1)?.as_str_lossy().into_owned();
    let mode = vm.opt_string(2, "r")?.as_str_lossy().into_owned();
    match file::open_handle(vm, &path, &mode) {
        Ok(handle) => Ok(NativeReturn::one(handle)),
        Err(msg) => Ok(NativeReturn::Values(vec![
            LuaValue::Nil,
            vm.new_string(msg),
        ])),
    }
}

fn io_lines(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let path = vm.check_string(1)?.as_str_lossy().into_owned();
    match file::open_handle(vm, &path, "r") {
        Ok(handle) => file::lines_iterator(vm, handle),
        Err(msg) => Err(vm.error_plain(msg)),
    }
}

/// io.read on the default input: line-oriented stdin.
fn io_read(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let mode = vm.opt_string(1, "l")?.as_str_lossy().into_owned();
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => Ok(NativeReturn::one(LuaValue::Nil)),
        Ok(_) => {
            let trimmed = line.trim_end_matches(['\n', '\r']);
            match mode.trim_start_matches('*') {
                "n" => Ok(NativeReturn::one(
                    crate::lua_value::number::parse_number(trimmed.trim())
                        .unwrap_or(LuaValue::Nil),
                )),
                "L" => Ok(NativeReturn::one(vm.new_string(line.clone()))),
                _ => Ok(NativeReturn::one(vm.new_string(trimmed))),
            }
        }
        Err(_) => Ok(NativeReturn::one(LuaValue::Nil)),
    }
}

/// io.write on the default output.
fn io_write(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let args = vm.args_vec();
    let mut out = std::io::stdout();
    for arg in &args {
        let bytes = match arg {
            LuaValue::String(s) => s.as_bytes().to_vec(),
            LuaValue::Integer(_) | LuaValue::Float(_) => arg.to_string().into_bytes(),
            other => {
                let name = vm.native_name();
                return Err(vm.runtime_error(format!(
                    "bad argument #1 to '{}' (string expected, got {})",
                    name,
                    other.type_name()
                )));
            }
        };
        let _ = out.write_all(&bytes);
    }
    let _ = out.flush();
    Ok(NativeReturn::none())
}

pub(crate) fn vm_fs(vm: &LuaVM) -> Rc<dyn LuaFs> {
    Rc::clone(&vm.fs)
}

// FILE* handles: buffered wrappers over the filesystem protocol. A
// writable handle flushes its buffer on close; __gc and __close both
// close the handle.

use std::cell::RefCell;
use std::rc::Rc;

use super::LuaFs;
use crate::lua_value::{number, LuaFunction, LuaTable, LuaUserdata, LuaValue};
use crate::lua_vm::{LuaResult, LuaVM, NativeReturn};

pub struct FileHandle {
    path: String,
    buffer: Vec<u8>,
    pos: usize,
    writable: bool,
    closed: bool,
    fs: Rc<dyn LuaFs>,
}

impl FileHandle {
    fn flush_and_close(&mut self) -> Result<(), String> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.writable {
            self.fs.write(&self.path, &self.buffer)?;
        }
        Ok(())
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        let _ = self.flush_and_close();
    }
}

pub fn open_handle(vm: &mut LuaVM, path: &str, mode: &str) -> Result<LuaValue, String> {
    let fs = super::vm_fs(vm);
    let base_mode = mode.trim_end_matches('b');
    let (buffer, pos, writable) = match base_mode {
        "r" | "r+" => {
            let bytes = fs.read(path).map_err(|e| format!("{}: {}", path, e))?;
            (bytes, 0, base_mode == "r+")
        }
        "w" | "w+" => (Vec::new(), 0, true),
        "a" | "a+" => {
            let bytes = if fs.exists(path) {
                fs.read(path).unwrap_or_default()
            } else {
                Vec::new()
            };
            let len = bytes.len();
            (bytes, len, true)
        }
        _ => return Err(format!("invalid mode '{}'", mode)),
    };
    let handle = FileHandle {
        path: path.to_string(),
        buffer,
        pos,
        writable,
        closed: false,
        fs,
    };
    let ud = LuaUserdata::new(RefCell::new(handle));
    let ud = Rc::new(RefCell::new(ud));
    if let Some(mt) = vm.file_metatable.clone() {
        ud.borrow_mut().set_metatable(Some(mt));
    }
    Ok(LuaValue::Userdata(ud))
}

fn with_handle<T>(
    vm: &mut LuaVM,
    arg: usize,
    f: impl FnOnce(&mut FileHandle) -> Result<T, String>,
) -> LuaResult<T> {
    let v = vm.arg(arg);
    let ud = match v.as_userdata() {
        Some(ud) => ud,
        None => {
            let name = vm.native_name();
            return Err(vm.runtime_error(format!(
                "bad argument #{} to '{}' (FILE* expected)",
                arg, name
            )));
        }
    };
    let result = {
        let ud = ud.borrow();
        match ud.downcast_ref::<RefCell<FileHandle>>() {
            Some(cell) => {
                let mut handle = cell.borrow_mut();
                if handle.closed {
                    Err("attempt to use a closed file".to_string())
                } else {
                    f(&mut handle)
                }
            }
            None => Err("FILE* expected".to_string()),
        }
    };
    result.map_err(|e| vm.error_plain(e))
}

pub fn install_handle_metatable(vm: &mut LuaVM) {
    let methods = LuaTable::new();
    let methods = Rc::new(RefCell::new(methods));
    let mut add = |vm: &mut LuaVM, name: &'static str, f| {
        let key = vm.new_string(name);
        let func = LuaValue::function(LuaFunction::native(name, f));
        let _ = methods.borrow_mut().raw_set(key, func);
    };
    add(vm, "read", file_read);
    add(vm, "write", file_write);
    add(vm, "lines", file_lines);
    add(vm, "close", file_close);
    add(vm, "seek", file_seek);

    let mt = Rc::new(RefCell::new(LuaTable::new()));
    {
        let mut mt_ref = mt.borrow_mut();
        let index_key = vm.new_string("__index");
        let _ = mt_ref.raw_set(index_key, LuaValue::Table(Rc::clone(&methods)));
        let name_key = vm.new_string("__name");
        let name_val = vm.new_string("FILE*");
        let _ = mt_ref.raw_set(name_key, name_val);
        let gc_key = vm.new_string("__gc");
        let _ = mt_ref.raw_set(gc_key, LuaValue::function(LuaFunction::native("close", file_close)));
        let close_key = vm.new_string("__close");
        let _ = mt_ref.raw_set(
            close_key,
            LuaValue::function(LuaFunction::native("close", file_close)),
        );
    }
    vm.file_metatable = Some(mt);
}

fn read_one(handle: &mut FileHandle, mode: &str) -> Result<Option<Vec<u8>>, String> {
    let rest = &handle.buffer[handle.pos.min(handle.buffer.len())..];
    match mode.trim_start_matches('*') {
        "a" => {
            let out = rest.to_vec();
            handle.pos = handle.buffer.len();
            Ok(Some(out))
        }
        "l" | "L" => {
            if rest.is_empty() {
                return Ok(None);
            }
            let keep_newline = mode.ends_with('L');
            match rest.iter().position(|&b| b == b'\n') {
                Some(nl) => {
                    let end = if keep_newline { nl + 1 } else { nl };
                    let out = rest[..end].to_vec();
                    handle.pos += nl + 1;
                    Ok(Some(out))
                }
                None => {
                    let out = rest.to_vec();
                    handle.pos = handle.buffer.len();
                    Ok(Some(out))
                }
            }
        }
        "n" => {
            // scan a numeral prefix
            let text = String::from_utf8_lossy(rest);
            let trimmed = text.trim_start();
            let skipped = text.len() - trimmed.len();
            let end = trimmed
                .find(|c: char| c.is_whitespace())
                .unwrap_or(trimmed.len());
            let candidate = &trimmed[..end];
            handle.pos += skipped + end;
            Ok(Some(candidate.as_bytes().to_vec()))
        }
        other => Err(format!("invalid format '{}'", other)),
    }
}

fn file_read(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    // numeric format: read exactly n bytes
    if let Some(n) = vm.arg(2).as_integer() {
        let bytes = with_handle(vm, 1, |handle| {
            let rest = &handle.buffer[handle.pos.min(handle.buffer.len())..];
            if rest.is_empty() && n > 0 {
                return Ok(None);
            }
            let take = (n.max(0) as usize).min(rest.len());
            let out = rest[..take].to_vec();
            handle.pos += take;
            Ok(Some(out))
        })?;
        return Ok(match bytes {
            Some(bytes) => NativeReturn::one(vm.new_string_bytes(bytes)),
            None => NativeReturn::one(LuaValue::Nil),
        });
    }
    let mode = vm.opt_string(2, "l")?.as_str_lossy().into_owned();
    let is_number = mode.trim_start_matches('*') == "n";
    let bytes = with_handle(vm, 1, |handle| read_one(handle, &mode))?;
    Ok(match bytes {
        Some(bytes) => {
            if is_number {
                let text = String::from_utf8_lossy(&bytes).into_owned();
                NativeReturn::one(number::parse_number(text.trim()).unwrap_or(LuaValue::Nil))
            } else {
                NativeReturn::one(vm.new_string_bytes(bytes))
            }
        }
        None => NativeReturn::one(LuaValue::Nil),
    })
}

fn file_write(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let args = vm.args_from(2);
    let mut pieces: Vec<Vec<u8>> = Vec::with_capacity(args.len());
    for arg in &args {
        match arg {
            LuaValue::String(s) => pieces.push(s.as_bytes().to_vec()),
            LuaValue::Integer(_) | LuaValue::Float(_) => {
                pieces.push(arg.to_string().into_bytes());
            }
            other => {
                let name = vm.native_name();
                return Err(vm.runtime_error(format!(
                    "bad argument to '{}' (string expected, got {})",
                    name,
                    other.type_name()
                )));
            }
        }
    }
    with_handle(vm, 1, |handle| {
        if !handle.writable {
            return Err("file not opened for writing".to_string());
        }
        for piece in &pieces {
            let pos = handle.pos;
            let end = pos + piece.len();
            if end > handle.buffer.len() {
                handle.buffer.resize(end, 0);
            }
            handle.buffer[pos..end].copy_from_slice(piece);
            handle.pos = end;
        }
        Ok(())
    })?;
    Ok(NativeReturn::one(vm.arg(1)))
}

fn lines_step(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let handle_val = vm.native_upvalue(0);
    let ud = match handle_val.as_userdata() {
        Some(ud) => ud,
        None => return Ok(NativeReturn::one(LuaValue::Nil)),
    };
    let line = {
        let ud = ud.borrow();
        match ud.downcast_ref::<RefCell<FileHandle>>() {
            Some(cell) => {
                let mut handle = cell.borrow_mut();
                if handle.closed {
                    None
                } else {
                    read_one(&mut handle, "l").ok().flatten()
                }
            }
            None => None,
        }
    };
    Ok(match line {
        Some(bytes) => NativeReturn::one(vm.new_string_bytes(bytes)),
        None => NativeReturn::one(LuaValue::Nil),
    })
}

pub fn lines_iterator(vm: &mut LuaVM, handle: LuaValue) -> LuaResult<NativeReturn> {
    let iter = LuaFunction::native_with_upvalues("lines_iterator", lines_step, vec![handle]);
    Ok(NativeReturn::one(LuaValue::function(iter)))
}

fn file_lines(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let handle = vm.arg(1);
    lines_iterator(vm, handle)
}

fn file_close(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.arg(1);
    let ud = match v.as_userdata() {
        Some(ud) => ud,
        None => return Ok(NativeReturn::one(LuaValue::Boolean(true))),
    };
    let result = {
        let ud = ud.borrow();
        match ud.downcast_ref::<RefCell<FileHandle>>() {
            Some(cell) => cell.borrow_mut().flush_and_close(),
            None => Ok(()),
        }
    };
    match result {
        Ok(()) => Ok(NativeReturn::one(LuaValue::Boolean(true))),
        Err(e) => Ok(NativeReturn::Values(vec![
            LuaValue::Nil,
            vm.new_string(e),
        ])),
    }
}

fn file_seek(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let whence = vm.opt_string(2, "cur")?.as_str_lossy().into_owned();
    let offset = vm.opt_integer(3, 0)?;
    let pos = with_handle(vm, 1, |handle| {
        let len = handle.buffer.len() as i64;
        let base = match whence.as_str() {
            "set" => 0,
            "cur" => handle.pos as i64,
            "end" => len,
            other => return Err(format!("invalid option '{}'", other)),
        };
        let target = (base + offset).clamp(0, len);
        handle.pos = target as usize;
        Ok(target)
    })?;
    Ok(NativeReturn::one(LuaValue::Integer(pos)))
}

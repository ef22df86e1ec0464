// Basic library: the global protocol surface (print, type, pairs, pcall,
// load, error, metatable access).

use std::rc::Rc;

use crate::lib_registry;
use crate::lua_value::{number, LuaClosure, LuaFunction, LuaUpvalue, LuaValue};
use crate::lua_vm::lua_error::short_source;
use crate::lua_vm::{load_proto, LuaError, LuaResult, LuaVM, MetaEvent, NativeReturn, DUMP_SIGNATURE};

pub fn open(vm: &mut LuaVM) {
    let module = crate::lib_module!("_G", {
        "print" => basic_print,
        "type" => basic_type,
        "tostring" => basic_tostring,
        "tonumber" => basic_tonumber,
        "pairs" => basic_pairs,
        "ipairs" => basic_ipairs,
        "next" => basic_next,
        "select" => basic_select,
        "rawget" => basic_rawget,
        "rawset" => basic_rawset,
        "rawequal" => basic_rawequal,
        "rawlen" => basic_rawlen,
        "setmetatable" => basic_setmetatable,
        "getmetatable" => basic_getmetatable,
        "assert" => basic_assert,
        "error" => basic_error,
        "pcall" => basic_pcall,
        "xpcall" => basic_xpcall,
        "load" => basic_load,
        "loadstring" => basic_load,
        "dofile" => basic_dofile,
        "loadfile" => basic_loadfile,
        "collectgarbage" => basic_collectgarbage,
    });
    lib_registry::load_module(vm, &module);
    let globals = LuaValue::Table(vm.globals());
    vm.set_global("_G", globals);
}

fn basic_print(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let args = vm.args_vec();
    let mut pieces = Vec::with_capacity(args.len());
    for arg in &args {
        let s = vm.tostring_value(arg)?;
        pieces.push(match s {
            LuaValue::String(s) => s.as_str_lossy().into_owned(),
            other => other.to_string(),
        });
    }
    println!("{}", pieces.join("\t"));
    Ok(NativeReturn::none())
}

fn basic_type(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.check_any(1)?;
    Ok(NativeReturn::one(vm.new_string(v.type_name())))
}

fn basic_tostring(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.check_any(1)?;
    let s = vm.tostring_value(&v)?;
    Ok(NativeReturn::one(s))
}

fn basic_tonumber(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.check_any(1)?;
    if vm.arg(2).is_nil() {
        return Ok(NativeReturn::one(
            v.coerce_number().unwrap_or(LuaValue::Nil),
        ));
    }
    let base = vm.check_integer(2)?;
    if !(2..=36).contains(&base) {
        let name = vm.native_name();
        return Err(vm.runtime_error(format!(
            "bad argument #2 to '{}' (base out of range)",
            name
        )));
    }
    let s = match &v {
        LuaValue::String(s) => Rc::clone(s),
        _ => {
            return Err(vm.runtime_error(format!(
                "bad argument #1 to '{}' (string expected, got {})",
                vm.native_name(),
                v.type_name()
            )));
        }
    };
    let text = s.as_str_lossy();
    match number::parse_integer_with_base(&text, base as u32) {
        Some(i) => Ok(NativeReturn::one(LuaValue::Integer(i))),
        None => Ok(NativeReturn::one(LuaValue::Nil)),
    }
}

fn basic_next(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let t = vm.check_table(1)?;
    let key = vm.arg(2);
    let key_ref = if key.is_nil() { None } else { Some(&key) };
    match t.borrow().next(key_ref) {
        Ok(Some((k, v))) => Ok(NativeReturn::Values(vec![k, v])),
        Ok(None) => Ok(NativeReturn::one(LuaValue::Nil)),
        Err(()) => Err(vm.runtime_error("invalid key to 'next'")),
    }
}

fn basic_pairs(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.check_any(1)?;
    if let Some(handler) = vm.get_metamethod(&v, MetaEvent::Pairs) {
        let mut vals = vm.call_value(handler, vec![v])?;
        vals.resize(3, LuaValue::Nil);
        return Ok(NativeReturn::Values(vals));
    }
    let t = vm.check_table(1)?;
    let next_fn = LuaValue::function(LuaFunction::native("next", basic_next));
    Ok(NativeReturn::Values(vec![
        next_fn,
        LuaValue::Table(t),
        LuaValue::Nil,
    ]))
}

fn ipairs_iter(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let state = vm.arg(1);
    let i = vm.check_integer(2)? + 1;
    let v = vm.index_value(&state, &LuaValue::Integer(i))?;
    if v.is_nil() {
        Ok(NativeReturn::one(LuaValue::Nil))
    } else {
        Ok(NativeReturn::Values(vec![LuaValue::Integer(i), v]))
    }
}

fn basic_ipairs(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.check_any(1)?;
    let iter = LuaValue::function(LuaFunction::native("ipairs_iterator", ipairs_iter));
    Ok(NativeReturn::Values(vec![iter, v, LuaValue::Integer(0)]))
}

fn basic_select(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let selector = vm.check_any(1)?;
    let rest = vm.args_from(2);
    if let LuaValue::String(s) = &selector {
        if s.as_bytes() == b"#" {
            return Ok(NativeReturn::one(LuaValue::Integer(rest.len() as i64)));
        }
    }
    let n = vm.check_integer(1)?;
    let start = if n < 0 {
        let from_end = rest.len() as i64 + n;
        if from_end < 0 {
            let name = vm.native_name();
            return Err(vm.runtime_error(format!(
                "bad argument #1 to '{}' (index out of range)",
                name
            )));
        }
        from_end as usize
    } else if n == 0 {
        let name = vm.native_name();
        return Err(vm.runtime_error(format!(
            "bad argument #1 to '{}' (index out of range)",
            name
        )));
    } else {
        (n as usize - 1).min(rest.len())
    };
    Ok(NativeReturn::Values(rest[start.min(rest.len())..].to_vec()))
}

fn basic_rawget(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let t = vm.check_table(1)?;
    let key = vm.check_any(2)?;
    let v = t.borrow().raw_get(&key);
    Ok(NativeReturn::one(v))
}

fn basic_rawset(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let t = vm.check_table(1)?;
    let key = vm.check_any(2)?;
    let value = vm.arg(3);
    if let Err(e) = t.borrow_mut().raw_set(key, value) {
        return Err(vm.runtime_error(e.message()));
    }
    Ok(NativeReturn::one(LuaValue::Table(t)))
}

fn basic_rawequal(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let a = vm.check_any(1)?;
    let b = vm.check_any(2)?;
    Ok(NativeReturn::one(LuaValue::Boolean(a.raw_equal(&b))))
}

fn basic_rawlen(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.check_any(1)?;
    match &v {
        LuaValue::Table(t) => Ok(NativeReturn::one(LuaValue::Integer(t.borrow().length()))),
        LuaValue::String(s) => Ok(NativeReturn::one(LuaValue::Integer(s.len() as i64))),
        _ => {
            let name = vm.native_name();
            Err(vm.runtime_error(format!(
                "bad argument #1 to '{}' (table or string expected)",
                name
            )))
        }
    }
}

fn basic_setmetatable(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let t = vm.check_table(1)?;
    let mt = vm.arg(2);
    let protected = t
        .borrow()
        .metatable()
        .map(|mt| !mt.borrow().raw_get_str("__metatable").is_nil())
        .unwrap_or(false);
    if protected {
        return Err(vm.runtime_error("cannot change a protected metatable"));
    }
    match mt {
        LuaValue::Nil => t.borrow_mut().set_metatable(None),
        LuaValue::Table(mt) => t.borrow_mut().set_metatable(Some(mt)),
        other => {
            let name = vm.native_name();
            return Err(vm.runtime_error(format!(
                "bad argument #2 to '{}' (nil or table expected, got {})",
                name,
                other.type_name()
            )));
        }
    }
    Ok(NativeReturn::one(LuaValue::Table(t)))
}

fn basic_getmetatable(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.check_any(1)?;
    match vm.get_metatable(&v) {
        Some(mt) => {
            let guard = mt.borrow().raw_get_str("__metatable");
            if !guard.is_nil() {
                Ok(NativeReturn::one(guard))
            } else {
                Ok(NativeReturn::one(LuaValue::Table(mt)))
            }
        }
        None => Ok(NativeReturn::one(LuaValue::Nil)),
    }
}

fn basic_assert(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let v = vm.check_any(1)?;
    if v.is_truthy() {
        return Ok(NativeReturn::Values(vm.args_vec()));
    }
    let msg = if vm.arg_count() >= 2 {
        vm.arg(2)
    } else {
        vm.new_string("assertion failed!")
    };
    Err(vm.error_value(msg))
}

fn basic_error(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let value = vm.arg(1);
    let level = vm.opt_integer(2, 1)?;
    let value = match (&value, level) {
        (LuaValue::String(s), level) if level >= 1 => {
            // prefix the location of the frame `level` steps up
            let position = {
                let frames = &vm.contexts.last().expect("main context present").frames;
                frames
                    .len()
                    .checked_sub(level as usize)
                    .and_then(|i| frames.get(i))
                    .map(|f| (short_source(&f.proto.source), f.current_line()))
            };
            match position {
                Some((source, line)) => {
                    vm.new_string(format!("{}:{}: {}", source, line, s.as_str_lossy()))
                }
                None => value.clone(),
            }
        }
        _ => value.clone(),
    };
    Err(vm.error_value(value))
}

fn basic_pcall(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_any(1)?;
    let args = vm.args_from(2);
    Ok(NativeReturn::Call {
        func: f,
        args,
        protect: Some(None),
    })
}

fn basic_xpcall(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let f = vm.check_any(1)?;
    let handler = vm.check_any(2)?;
    let args = vm.args_from(3);
    Ok(NativeReturn::Call {
        func: f,
        args,
        protect: Some(Some(handler)),
    })
}

/// Shared by load/loadfile/dofile: compile a chunk from text or binary
/// bytes, honoring the mode filter and the optional environment.
pub(crate) fn load_chunk(
    vm: &mut LuaVM,
    bytes: &[u8],
    chunk_name: &str,
    mode: &str,
    env: Option<LuaValue>,
) -> Result<LuaValue, String> {
    let is_binary = bytes.starts_with(DUMP_SIGNATURE);
    if is_binary {
        if !mode.contains('b') {
            return Err("attempt to load a binary chunk".to_string());
        }
        let proto = load_proto(bytes)?;
        return Ok(instantiate(vm, Rc::new(proto), env));
    }
    if !mode.contains('t') {
        return Err("attempt to load a text chunk".to_string());
    }
    let source = String::from_utf8_lossy(bytes);
    match vm.compile_named(&source, chunk_name) {
        Ok(proto) => Ok(instantiate(vm, proto, env)),
        Err(LuaError::Runtime(e)) => Err(match &e.value {
            LuaValue::String(s) => s.as_str_lossy().into_owned(),
            other => other.to_string(),
        }),
        Err(LuaError::Yield(_)) => Err("unexpected yield".to_string()),
    }
}

fn instantiate(vm: &mut LuaVM, proto: Rc<crate::lua_value::Proto>, env: Option<LuaValue>) -> LuaValue {
    match env {
        None => vm.make_main_closure(proto),
        Some(env) => {
            let cell = Rc::new(LuaUpvalue::closed(env));
            let mut upvalues = Vec::with_capacity(proto.upvalues.len());
            for (i, desc) in proto.upvalues.iter().enumerate() {
                if i == 0 && desc.name == "_ENV" {
                    upvalues.push(Rc::clone(&cell));
                } else {
                    upvalues.push(Rc::new(LuaUpvalue::closed(LuaValue::Nil)));
                }
            }
            LuaValue::Function(Rc::new(LuaFunction::Lua(LuaClosure { proto, upvalues })))
        }
    }
}

fn basic_load(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let chunk = vm.check_any(1)?;
    let explicit_name = !vm.arg(2).is_nil();
    let mode = vm.opt_string(3, "bt")?.as_str_lossy().into_owned();
    let env = if vm.arg_count() >= 4 {
        Some(vm.arg(4))
    } else {
        None
    };
    let (bytes, default_name) = match &chunk {
        LuaValue::String(s) => (s.as_bytes().to_vec(), s.as_str_lossy().into_owned()),
        LuaValue::Function(_) => {
            // reader function: concatenate pieces until nil/false/""
            let mut buf = Vec::new();
            loop {
                let piece = vm
                    .call_value(chunk.clone(), Vec::new())?
                    .into_iter()
                    .next()
                    .unwrap_or(LuaValue::Nil);
                match piece {
                    LuaValue::Nil | LuaValue::Boolean(false) => break,
                    LuaValue::String(s) => {
                        if s.is_empty() {
                            break;
                        }
                        buf.extend_from_slice(s.as_bytes());
                    }
                    _ => {
                        return Err(vm.runtime_error("reader function must return a string"));
                    }
                }
            }
            (buf, "=(load)".to_string())
        }
        other => {
            let name = vm.native_name();
            return Err(vm.runtime_error(format!(
                "bad argument #1 to '{}' (string or function expected, got {})",
                name,
                other.type_name()
            )));
        }
    };
    let chunk_name = if explicit_name {
        vm.check_string(2)?.as_str_lossy().into_owned()
    } else {
        default_name
    };
    match load_chunk(vm, &bytes, &chunk_name, &mode, env) {
        Ok(closure) => Ok(NativeReturn::one(closure)),
        Err(msg) => Ok(NativeReturn::Values(vec![
            LuaValue::Nil,
            vm.new_string(msg),
        ])),
    }
}

fn basic_loadfile(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let path = vm.check_string(1)?.as_str_lossy().into_owned();
    let mode = vm.opt_string(2, "bt")?.as_str_lossy().into_owned();
    let env = if vm.arg_count() >= 3 {
        Some(vm.arg(3))
    } else {
        None
    };
    let fs = Rc::clone(&vm.fs);
    let bytes = match fs.read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            let msg = vm.new_string(format!("cannot open {}: {}", path, e));
            return Ok(NativeReturn::Values(vec![LuaValue::Nil, msg]));
        }
    };
    let chunk_name = format!("@{}", path);
    match load_chunk(vm, &bytes, &chunk_name, &mode, env) {
        Ok(closure) => Ok(NativeReturn::one(closure)),
        Err(msg) => Ok(NativeReturn::Values(vec![
            LuaValue::Nil,
            vm.new_string(msg),
        ])),
    }
}

fn basic_dofile(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let path = vm.check_string(1)?.as_str_lossy().into_owned();
    let fs = Rc::clone(&vm.fs);
    let bytes = match fs.read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Err(vm.error_plain(format!("cannot open {}: {}", path, e)));
        }
    };
    let chunk_name = format!("@{}", path);
    match load_chunk(vm, &bytes, &chunk_name, "bt", None) {
        Ok(closure) => Ok(NativeReturn::Call {
            func: closure,
            args: Vec::new(),
            protect: None,
        }),
        Err(msg) => Err(vm.error_plain(msg)),
    }
}

fn basic_collectgarbage(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let opt = vm.opt_string(1, "collect")?.as_str_lossy().into_owned();
    // memory is reference-counted; the protocol surface answers anyway
    match opt.as_str() {
        "count" => Ok(NativeReturn::Values(vec![
            LuaValue::Float(0.0),
            LuaValue::Integer(0),
        ])),
        "isrunning" => Ok(NativeReturn::one(LuaValue::Boolean(true))),
        "collect" | "step" | "stop" | "restart" | "incremental" | "generational" => {
            Ok(NativeReturn::one(LuaValue::Integer(0)))
        }
        other => {
            let name = vm.native_name();
            Err(vm.runtime_error(format!(
                "bad argument #1 to '{}' (invalid option '{}')",
                name, other
            )))
        }
    }
}

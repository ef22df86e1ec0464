// Debug library: introspection over frames, upvalues, and hooks.

use crate::lib_registry;
use crate::lua_value::{LuaFunction, LuaTable, LuaValue};
use crate::lua_vm::lua_error::short_source;
use crate::lua_vm::traceback::format_traceback;
use crate::lua_vm::{LuaResult, LuaVM, NativeReturn};

pub fn open(vm: &mut LuaVM) {
    let module = crate::lib_module!("debug", {
        "getinfo" => dbg_getinfo,
        "getlocal" => dbg_getlocal,
        "setlocal" => dbg_setlocal,
        "getupvalue" => dbg_getupvalue,
        "setupvalue" => dbg_setupvalue,
        "sethook" => dbg_sethook,
        "gethook" => dbg_gethook,
        "traceback" => dbg_traceback,
    });
    lib_registry::load_module(vm, &module);
}

fn info_for_function(vm: &mut LuaVM, func: &LuaValue) -> LuaValue {
    let mut t = LuaTable::new();
    let mut set = |vm: &mut LuaVM, name: &str, v: LuaValue| {
        let key = vm.new_string(name);
        let _ = t.raw_set(key, v);
    };
    if let Some(f) = func.as_function() {
        match f.as_ref() {
            LuaFunction::Lua(closure) => {
                let proto = &closure.proto;
                let src = vm.new_string(&proto.source);
                set(vm, "source", src);
                let short = vm.new_string(short_source(&proto.source));
                set(vm, "short_src", short);
                let what = if proto.is_main_chunk() { "main" } else { "Lua" };
                let what = vm.new_string(what);
                set(vm, "what", what);
                set(vm, "linedefined", LuaValue::Integer(proto.line_defined as i64));
                set(
                    vm,
                    "lastlinedefined",
                    LuaValue::Integer(proto.last_line_defined as i64),
                );
                set(vm, "nups", LuaValue::Integer(proto.upvalues.len() as i64));
                set(vm, "nparams", LuaValue::Integer(proto.num_params as i64));
                set(vm, "isvararg", LuaValue::Boolean(proto.is_vararg));
                set(vm, "currentline", LuaValue::Integer(-1));
            }
            LuaFunction::Native(native) => {
                let src = vm.new_string("=[C]");
                set(vm, "source", src);
                let short = vm.new_string("[C]");
                set(vm, "short_src", short);
                let what = vm.new_string("C");
                set(vm, "what", what);
                set(vm, "linedefined", LuaValue::Integer(-1));
                set(vm, "lastlinedefined", LuaValue::Integer(-1));
                let nups = native.upvalues.borrow().len() as i64;
                set(vm, "nups", LuaValue::Integer(nups));
                set(vm, "nparams", LuaValue::Integer(0));
                set(vm, "isvararg", LuaValue::Boolean(true));
                set(vm, "currentline", LuaValue::Integer(-1));
                let name = vm.new_string(&native.name);
                set(vm, "name", name);
            }
        }
    }
    set(vm, "func", func.clone());
    LuaValue::table(t)
}

fn dbg_getinfo(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let subject = vm.check_any(1)?;
    if subject.is_function() {
        return Ok(NativeReturn::one(info_for_function(vm, &subject)));
    }
    let level = vm.check_integer(1)?;
    let idx = match vm.lua_frame_index(level.max(0) as usize) {
        Some(idx) => idx,
        None => return Ok(NativeReturn::one(LuaValue::Nil)),
    };
    let (func, line, name, is_tail) = {
        let frame = &vm.context().frames[idx];
        (
            LuaValue::Function(std::rc::Rc::clone(&frame.closure)),
            frame.current_line(),
            frame.call_name.clone(),
            frame.is_tail_call,
        )
    };
    let info = info_for_function(vm, &func);
    if let Some(t) = info.as_table() {
        let key = vm.new_string("currentline");
        let _ = t.borrow_mut().raw_set(key, LuaValue::Integer(line as i64));
        let key = vm.new_string("istailcall");
        let _ = t.borrow_mut().raw_set(key, LuaValue::Boolean(is_tail));
        if let Some(name) = name {
            let key = vm.new_string("name");
            let value = vm.new_string(name);
            let _ = t.borrow_mut().raw_set(key, value);
        }
    }
    Ok(NativeReturn::one(info))
}

fn dbg_getlocal(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let level = vm.check_integer(1)?;
    let n = vm.check_integer(2)?;
    if n < 1 {
        return Ok(NativeReturn::one(LuaValue::Nil));
    }
    match vm.frame_local_get(level.max(0) as usize, n as usize) {
        Some((name, value)) => {
            let name = vm.new_string(name);
            Ok(NativeReturn::Values(vec![name, value]))
        }
        None => Ok(NativeReturn::one(LuaValue::Nil)),
    }
}

fn dbg_setlocal(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let level = vm.check_integer(1)?;
    let n = vm.check_integer(2)?;
    let value = vm.arg(3);
    if n < 1 {
        return Ok(NativeReturn::one(LuaValue::Nil));
    }
    match vm.frame_local_set(level.max(0) as usize, n as usize, value) {
        Some(name) => Ok(NativeReturn::one(vm.new_string(name))),
        None => Ok(NativeReturn::one(LuaValue::Nil)),
    }
}

fn dbg_getupvalue(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let func = vm.check_function(1)?;
    let n = vm.check_integer(2)?;
    if n < 1 {
        return Ok(NativeReturn::one(LuaValue::Nil));
    }
    match vm.closure_upvalue_get(&func, n as usize) {
        Some((name, value)) => {
            let name = vm.new_string(name);
            Ok(NativeReturn::Values(vec![name, value]))
        }
        None => Ok(NativeReturn::one(LuaValue::Nil)),
    }
}

fn dbg_setupvalue(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let func = vm.check_function(1)?;
    let n = vm.check_integer(2)?;
    let value = vm.arg(3);
    if n < 1 {
        return Ok(NativeReturn::one(LuaValue::Nil));
    }
    match vm.closure_upvalue_set(&func, n as usize, value) {
        Some(name) => Ok(NativeReturn::one(vm.new_string(name))),
        None => Ok(NativeReturn::one(LuaValue::Nil)),
    }
}

fn dbg_sethook(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    if vm.arg(1).is_nil() {
        vm.hook.func = None;
        vm.hook.on_call = false;
        vm.hook.on_return = false;
        vm.hook.on_line = false;
        vm.hook.count = 0;
        return Ok(NativeReturn::none());
    }
    let func = vm.check_function(1)?;
    let mask = vm.opt_string(2, "")?.as_str_lossy().into_owned();
    let count = vm.opt_integer(3, 0)?;
    vm.hook.func = Some(func);
    vm.hook.on_call = mask.contains('c');
    vm.hook.on_return = mask.contains('r');
    vm.hook.on_line = mask.contains('l');
    vm.hook.count = count.max(0) as u32;
    vm.hook.counter = vm.hook.count;
    Ok(NativeReturn::none())
}

fn dbg_gethook(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    match vm.hook.func.clone() {
        None => Ok(NativeReturn::one(LuaValue::Nil)),
        Some(func) => {
            let mut mask = String::new();
            if vm.hook.on_call {
                mask.push('c');
            }
            if vm.hook.on_return {
                mask.push('r');
            }
            if vm.hook.on_line {
                mask.push('l');
            }
            let mask = vm.new_string(mask);
            Ok(NativeReturn::Values(vec![
                func,
                mask,
                LuaValue::Integer(vm.hook.count as i64),
            ]))
        }
    }
}

fn dbg_traceback(vm: &mut LuaVM) -> LuaResult<NativeReturn> {
    let msg = vm.arg(1);
    // non-string messages pass through untouched
    if !msg.is_nil() && !msg.is_string() && !msg.is_number() {
        return Ok(NativeReturn::one(msg));
    }
    let level = vm.opt_integer(2, 1)?.max(0) as usize;
    let mut tb = vm.capture_traceback();
    // skip the traceback call itself, then the requested levels
    let skip = (level).min(tb.entries.len());
    tb.entries.drain(..skip.min(tb.entries.len()));
    let msg_text = if msg.is_nil() {
        None
    } else {
        Some(msg.to_string())
    };
    let on_main = vm.current_coroutine().is_none();
    let rendered = format_traceback(msg_text.as_deref(), &tb, on_main);
    Ok(NativeReturn::one(vm.new_string(rendered)))
}
